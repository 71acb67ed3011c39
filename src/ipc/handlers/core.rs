use crate::config::EngineConfig;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "datasets": state.datasets.len(),
            "reports": state.reports.len(),
        }),
    )
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "config": state.config }))
}

/// Replaces the session config. Loaded datasets keep the subject order
/// they were built with.
fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = req.params.get("config") else {
        return err(&req.id, "bad_params", "missing params.config", None);
    };
    match EngineConfig::from_json(raw.clone()) {
        Ok(cfg) => {
            log::info!("config updated: {} subjects", cfg.subjects.len());
            state.config = cfg;
            ok(&req.id, json!({ "config": state.config }))
        }
        Err(e) => err(&req.id, "bad_config", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        _ => None,
    }
}
