use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{dataset, engine_err, group_rank_cap, opt_bool, opt_str, opt_str_list, required_str};
use crate::ipc::types::{AppState, Request};
use crate::ranking::RankedTable;
use serde_json::json;

fn handle_datasets_load(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(items) = req.params.get("rows").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing rows", None);
    };
    let mut rows = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            return err(
                &req.id,
                "bad_params",
                format!("rows[{}] must be an object", i),
                None,
            );
        };
        rows.push(obj.clone());
    }

    let group_key = match opt_str(req, "groupKey") {
        Ok(v) => v.map(str::to_string).unwrap_or_else(|| state.config.group_key.clone()),
        Err(e) => return e,
    };
    let id_keys = match opt_str_list(req, "idKeys") {
        Ok(v) => v.unwrap_or_else(|| state.config.id_keys.clone()),
        Err(e) => return e,
    };
    let catalog = match state.config.catalog() {
        Ok(c) => c,
        Err(e) => return engine_err(req, e),
    };

    let table = match RankedTable::build(&rows, &catalog, &group_key, &id_keys) {
        Ok(t) => t,
        Err(e) => return engine_err(req, e),
    };

    let dataset_id = uuid::Uuid::new_v4().to_string();
    log::info!(
        "dataset {} loaded: {} rows, {} subjects",
        dataset_id,
        table.len(),
        table.subjects().len()
    );
    let result = json!({
        "datasetId": dataset_id,
        "subjects": table.subjects(),
        "groups": table.groups(),
        "rowCount": table.len(),
    });
    state.datasets.insert(dataset_id, table);
    ok(&req.id, result)
}

fn handle_datasets_ranked(state: &mut AppState, req: &Request) -> serde_json::Value {
    let table = match dataset(state, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let cap = match group_rank_cap(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match table.to_table(cap) {
        Ok(listing) => ok(&req.id, json!({ "table": listing })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_datasets_rank_table(state: &mut AppState, req: &Request) -> serde_json::Value {
    let table = match dataset(state, req) {
        Ok(t) => t,
        Err(e) => return e,
    };
    let cap = match group_rank_cap(req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let pair = match opt_bool(req, "pairWithTotal", true) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match table.rank_frame(cap).to_table(table, pair) {
        Ok(ranks) => ok(&req.id, json!({ "table": ranks })),
        Err(e) => engine_err(req, e),
    }
}

fn handle_datasets_drop(state: &mut AppState, req: &Request) -> serde_json::Value {
    let id = match required_str(req, "datasetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if state.datasets.remove(&id).is_none() {
        return err(&req.id, "not_found", "dataset not found", Some(json!({ "datasetId": id })));
    }
    state.reports.retain(|_, r| r.dataset_id != id);
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "datasets.load" => Some(handle_datasets_load(state, req)),
        "datasets.ranked" => Some(handle_datasets_ranked(state, req)),
        "datasets.rankTable" => Some(handle_datasets_rank_table(state, req)),
        "datasets.drop" => Some(handle_datasets_drop(state, req)),
        _ => None,
    }
}
