use serde_json::json;

use crate::composite::{CompositeColumns, Position, WeightAlignment};
use crate::error::EngineError;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::ranking::RankedTable;
use crate::report::Scoring;
use crate::table::{SplitPolicy, Table};
use crate::thresholds::{ClosedSide, ThresholdSpec};

pub type HandlerResult<T> = Result<T, serde_json::Value>;

pub fn engine_err(req: &Request, e: EngineError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

pub fn required_str(req: &Request, key: &str) -> HandlerResult<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str<'a>(req: &'a Request, key: &str) -> HandlerResult<Option<&'a str>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a string", key),
            Some(json!({ key: other })),
        )),
    }
}

pub fn opt_bool(req: &Request, key: &str, default: bool) -> HandlerResult<bool> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a boolean", key),
            Some(json!({ key: other })),
        )),
    }
}

pub fn opt_f64(req: &Request, key: &str, default: f64) -> HandlerResult<f64> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(v) => v.as_f64().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                format!("{} must be a number", key),
                Some(json!({ key: v })),
            )
        }),
    }
}

fn f64_list(req: &Request, key: &str, raw: &serde_json::Value) -> HandlerResult<Vec<f64>> {
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", format!("{} must be an array of numbers", key), None));
    };
    items
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.as_f64().ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{}[{}] must be a number", key, i),
                    Some(json!({ key: raw })),
                )
            })
        })
        .collect()
}

pub fn opt_f64_list(req: &Request, key: &str) -> HandlerResult<Option<Vec<f64>>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => f64_list(req, key, raw).map(Some),
    }
}

pub fn str_list(req: &Request, key: &str, raw: &serde_json::Value) -> HandlerResult<Vec<String>> {
    let Some(items) = raw.as_array() else {
        return Err(err(&req.id, "bad_params", format!("{} must be an array of strings", key), None));
    };
    items
        .iter()
        .map(|v| {
            v.as_str().map(|s| s.to_string()).ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    format!("{} must contain only strings", key),
                    Some(json!({ key: raw })),
                )
            })
        })
        .collect()
}

pub fn opt_str_list(req: &Request, key: &str) -> HandlerResult<Option<Vec<String>>> {
    match req.params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(raw) => str_list(req, key, raw).map(Some),
    }
}

/// `maxGroupRank`: absent takes the default, `null` lifts the cap.
pub fn group_rank_cap(req: &Request, default: Option<u32>) -> HandlerResult<Option<u32>> {
    match req.params.get("maxGroupRank") {
        None => Ok(default),
        Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .filter(|&n| n >= 1)
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                err(
                    &req.id,
                    "bad_params",
                    "maxGroupRank must be a positive integer or null",
                    Some(json!({ "maxGroupRank": v })),
                )
            }),
    }
}

pub fn dataset<'a>(state: &'a AppState, req: &Request) -> HandlerResult<&'a RankedTable> {
    let id = required_str(req, "datasetId")?;
    state
        .datasets
        .get(&id)
        .ok_or_else(|| err(&req.id, "not_found", "dataset not found", Some(json!({ "datasetId": id }))))
}

fn scoped_bool(req: &Request, scope: &serde_json::Value, key: &str) -> HandlerResult<bool> {
    match scope.get(key).or_else(|| req.params.get(key)) {
        None | Some(serde_json::Value::Null) => Ok(false),
        Some(serde_json::Value::Bool(b)) => Ok(*b),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a boolean", key),
            Some(json!({ key: other })),
        )),
    }
}

/// Threshold list plus the `cumulative` / `closedSide` / `reversed` flags.
/// Flags set on `scope` win over the request-level ones.
pub fn thresholds_at(
    req: &Request,
    scope: &serde_json::Value,
    default_side: ClosedSide,
) -> HandlerResult<ThresholdSpec> {
    let Some(raw) = scope.get("thresholds") else {
        return Err(err(&req.id, "bad_params", "missing thresholds", None));
    };
    let spec = ThresholdSpec::from_json(raw).map_err(|e| engine_err(req, e))?;
    let side = match scope.get("closedSide").or_else(|| req.params.get("closedSide")) {
        None | Some(serde_json::Value::Null) => default_side,
        raw => ClosedSide::from_json(raw).map_err(|e| engine_err(req, e))?,
    };
    Ok(spec
        .cumulative(scoped_bool(req, scope, "cumulative")?)
        .closed_side(side)
        .reversed(scoped_bool(req, scope, "reversed")?))
}

/// `bands: [{ thresholds, subjects, cumulative?, closedSide?, reversed? }]`.
pub fn bands(req: &Request) -> HandlerResult<Vec<(ThresholdSpec, Vec<String>)>> {
    let Some(items) = req.params.get("bands").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing bands", None));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let spec = thresholds_at(req, item, ClosedSide::Lower)?;
        let Some(subjects) = item.get("subjects") else {
            return Err(err(&req.id, "bad_params", "bands[].subjects is required", None));
        };
        out.push((spec, str_list(req, "subjects", subjects)?));
    }
    Ok(out)
}

pub fn split_policy(req: &Request) -> HandlerResult<SplitPolicy> {
    SplitPolicy::parse(opt_str(req, "split")?).map_err(|e| engine_err(req, e))
}

/// Composite settings; `None` when the request carries no `weights`.
pub fn scoring(req: &Request, default_names: CompositeColumns) -> HandlerResult<Option<Scoring>> {
    let Some(weights) = opt_f64_list(req, "weights")? else {
        return Ok(None);
    };
    let mut names = default_names;
    match req.params.get("columns") {
        None | Some(serde_json::Value::Null) => {}
        Some(serde_json::Value::Object(cols)) => {
            for (key, slot) in [("sum", &mut names.sum), ("dot", &mut names.dot), ("rank", &mut names.rank)] {
                match cols.get(key) {
                    None | Some(serde_json::Value::Null) => {}
                    Some(serde_json::Value::String(label)) => *slot = label.clone(),
                    Some(other) => {
                        return Err(err(
                            &req.id,
                            "bad_params",
                            format!("columns.{} must be a string", key),
                            Some(json!({ "columns": { key: other } })),
                        ))
                    }
                }
            }
        }
        Some(other) => {
            return Err(err(
                &req.id,
                "bad_params",
                "columns must be an object",
                Some(json!({ "columns": other })),
            ))
        }
    }
    Ok(Some(Scoring {
        weights,
        names,
        alignment: WeightAlignment::parse(opt_str(req, "weightAlign")?).map_err(|e| engine_err(req, e))?,
        position: Position::parse(opt_str(req, "position")?).map_err(|e| engine_err(req, e))?,
    }))
}

pub fn tables_json(tables: &[(String, Table)]) -> serde_json::Value {
    json!(tables
        .iter()
        .map(|(name, table)| json!({ "name": name, "table": table }))
        .collect::<Vec<_>>())
}
