use crate::bundle::{export_report_bundle, BundleTable};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{opt_str_list, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_reports_export_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let ids = match opt_str_list(req, "reportIds") {
        Ok(Some(ids)) => ids,
        Ok(None) => {
            let mut all: Vec<String> = state.reports.keys().cloned().collect();
            all.sort();
            all
        }
        Err(e) => return e,
    };

    let mut tables: Vec<BundleTable<'_>> = Vec::new();
    for id in &ids {
        let Some(stored) = state.reports.get(id) else {
            return err(&req.id, "not_found", "report not found", Some(json!({ "reportId": id })));
        };
        for (name, table) in &stored.tables {
            tables.push(BundleTable {
                report: stored.kind.as_str(),
                name,
                table,
            });
        }
    }

    match export_report_bundle(&tables, &out_path) {
        Ok(summary) => {
            log::info!(
                "exported {} tables to {}",
                summary.entries.len(),
                out_path.to_string_lossy()
            );
            ok(
                &req.id,
                json!({
                    "path": out_path.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entries": summary
                        .entries
                        .iter()
                        .map(|e| json!({ "path": e.path, "rows": e.rows, "sha256": e.sha256 }))
                        .collect::<Vec<_>>(),
                }),
            )
        }
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.exportBundle" => Some(handle_reports_export_bundle(state, req)),
        _ => None,
    }
}
