use crate::aggregators::{DualMode, RateOptions, ValidCountPosition};
use crate::composite::CompositeColumns;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    bands, dataset, engine_err, group_rank_cap, opt_bool, opt_f64, opt_f64_list, opt_str,
    opt_str_list, required_str, scoring, split_policy, str_list, tables_json, thresholds_at,
    HandlerResult,
};
use crate::ipc::types::{AppState, Request, StoredReport};
use crate::ranking::SubjectCatalog;
use crate::report::{self, DualParams, QualifiedLimits, RateParams, ReportKind, ReportTables};
use crate::thresholds::ClosedSide;
use serde_json::json;

fn catalog(state: &AppState, req: &Request) -> HandlerResult<SubjectCatalog> {
    state.config.catalog().map_err(|e| engine_err(req, e))
}

fn store(
    state: &mut AppState,
    req: &Request,
    kind: ReportKind,
    built: HandlerResult<ReportTables>,
) -> serde_json::Value {
    let tables = match built {
        Ok(t) => t,
        Err(e) => return e,
    };
    let dataset_id = match required_str(req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let report_id = uuid::Uuid::new_v4().to_string();
    log::debug!(
        "report {} ({}) built with {} tables",
        report_id,
        kind.as_str(),
        tables.len()
    );
    let result = json!({
        "reportId": report_id,
        "kind": kind.as_str(),
        "tables": tables_json(&tables),
    });
    state.reports.insert(
        report_id,
        StoredReport {
            kind,
            dataset_id,
            tables,
        },
    );
    ok(&req.id, result)
}

fn build_score_bands(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let catalog = catalog(state, req)?;
    let bands = bands(req)?;
    let cap = group_rank_cap(req, state.config.subject_group_rank_cap)?;
    let split = split_policy(req)?;
    let scoring = scoring(req, CompositeColumns::default())?;
    report::score_bands(table, &catalog, &bands, cap, split, scoring.as_ref())
        .map_err(|e| engine_err(req, e))
}

fn build_double_qualified(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let catalog = catalog(state, req)?;
    let params = DualParams {
        thresholds: thresholds_at(req, &req.params, ClosedSide::Upper)?,
        secondary: opt_f64(req, "secondary", f64::from(state.config.max_total_rank))?,
        mode: DualMode::parse(opt_str(req, "mode")?).map_err(|e| engine_err(req, e))?,
        subjects: opt_str_list(req, "subjects")?,
    };
    let cap = group_rank_cap(req, None)?;
    let split = split_policy(req)?;
    let scoring = scoring(req, CompositeColumns::default())?;
    report::double_qualified(table, &catalog, &params, cap, split, scoring.as_ref())
        .map_err(|e| engine_err(req, e))
}

fn full_marks(req: &Request) -> HandlerResult<Vec<(f64, Vec<String>)>> {
    let Some(items) = req.params.get("fullMarks").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing fullMarks", None));
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Some(mark) = item.get("fullMark").and_then(|v| v.as_f64()) else {
            return Err(err(
                &req.id,
                "bad_params",
                "fullMarks[].fullMark must be a number",
                Some(json!({ "item": item })),
            ));
        };
        let Some(subjects) = item.get("subjects") else {
            return Err(err(&req.id, "bad_params", "fullMarks[].subjects is required", None));
        };
        out.push((mark, str_list(req, "subjects", subjects)?));
    }
    Ok(out)
}

fn build_rates(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let catalog = catalog(state, req)?;
    let params = RateParams {
        full_marks: full_marks(req)?,
        ratios: opt_f64_list(req, "ratios")?.unwrap_or_else(|| state.config.rate_ratios.clone()),
        cumulative: opt_bool(req, "cumulative", true)?,
        options: RateOptions {
            include_mean: opt_bool(req, "includeMean", true)?,
            include_below_min: opt_bool(req, "includeBelowMin", false)?,
            valid_count: ValidCountPosition::from_json(req.params.get("validCount"))
                .map_err(|e| engine_err(req, e))?,
        },
        rank_labels: opt_str_list(req, "rankColumns")?.unwrap_or_default(),
    };
    let cap = group_rank_cap(req, state.config.rate_group_rank_cap)?;
    let split = split_policy(req)?;
    report::rates(table, &catalog, &params, cap, split).map_err(|e| engine_err(req, e))
}

fn build_class_bands(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let thresholds = thresholds_at(req, &req.params, ClosedSide::Upper)?;
    let cap = group_rank_cap(req, state.config.class_group_rank_cap)?;
    let names = CompositeColumns {
        sum: "headcount".to_string(),
        ..CompositeColumns::default()
    };
    let scoring = scoring(req, names)?;
    report::class_bands(table, &thresholds, cap, scoring.as_ref()).map_err(|e| engine_err(req, e))
}

fn qualified_limits(req: &Request) -> HandlerResult<QualifiedLimits> {
    Ok(QualifiedLimits {
        subject_max: opt_f64(req, "subjectMax", 40.0)?,
        total_max: opt_f64(req, "totalMax", 40.0)?,
    })
}

fn build_subject_qualified(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let limits = qualified_limits(req)?;
    let qualified = report::subject_qualified(table, limits.subject_max, limits.total_max)
        .map_err(|e| engine_err(req, e))?;
    Ok(vec![("qualified".to_string(), qualified)])
}

fn build_combined(state: &AppState, req: &Request) -> HandlerResult<ReportTables> {
    let table = dataset(state, req)?;
    let catalog = catalog(state, req)?;
    let bands = bands(req)?;
    let limits = qualified_limits(req)?;
    let cap = group_rank_cap(req, state.config.subject_group_rank_cap)?;
    let split = split_policy(req)?;
    let scoring = scoring(req, CompositeColumns::default())?;
    report::combined(table, &catalog, &bands, &limits, cap, split, scoring.as_ref())
        .map_err(|e| engine_err(req, e))
}

fn handle_reports_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(stored) = state.reports.get(&id) else {
        return err(&req.id, "not_found", "report not found", Some(json!({ "reportId": id })));
    };
    ok(
        &req.id,
        json!({
            "reportId": id,
            "kind": stored.kind.as_str(),
            "datasetId": stored.dataset_id,
            "tables": tables_json(&stored.tables),
        }),
    )
}

fn handle_reports_drop(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "reportId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if state.reports.remove(&id).is_none() {
        return err(&req.id, "not_found", "report not found", Some(json!({ "reportId": id })));
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, built) = match req.method.as_str() {
        "reports.scoreBands" => (ReportKind::ScoreBands, build_score_bands(state, req)),
        "reports.doubleQualified" => (ReportKind::DoubleQualified, build_double_qualified(state, req)),
        "reports.rates" => (ReportKind::Rates, build_rates(state, req)),
        "reports.classBands" => (ReportKind::ClassBands, build_class_bands(state, req)),
        "reports.subjectQualified" => (ReportKind::SubjectQualified, build_subject_qualified(state, req)),
        "reports.combined" => (ReportKind::Combined, build_combined(state, req)),
        "reports.get" => return Some(handle_reports_get(state, req)),
        "reports.drop" => return Some(handle_reports_drop(state, req)),
        _ => return None,
    };
    Some(store(state, req, kind, built))
}
