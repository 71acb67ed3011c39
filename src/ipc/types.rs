use std::collections::HashMap;

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::ranking::RankedTable;
use crate::report::{ReportKind, ReportTables};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct StoredReport {
    pub kind: ReportKind,
    pub dataset_id: String,
    pub tables: ReportTables,
}

/// Session state. Nothing here outlives the process.
pub struct AppState {
    pub config: EngineConfig,
    pub datasets: HashMap<String, RankedTable>,
    pub reports: HashMap<String, StoredReport>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            datasets: HashMap::new(),
            reports: HashMap::new(),
        }
    }
}
