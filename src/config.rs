use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::ranking::SubjectCatalog;

pub const CONFIG_ENV: &str = "EXAMSTATD_CONFIG";

/// Session configuration: canonical subject order, dataset layout and
/// report defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub subjects: Vec<String>,
    pub group_key: String,
    pub id_keys: Vec<String>,
    pub subject_group_rank_cap: Option<u32>,
    pub rate_group_rank_cap: Option<u32>,
    pub class_group_rank_cap: Option<u32>,
    pub max_total_rank: u32,
    pub rate_ratios: Vec<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subjects: [
                "chinese",
                "math",
                "english",
                "physics",
                "chemistry",
                "biology",
                "politics",
                "history",
                "geography",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            group_key: "class".to_string(),
            id_keys: vec!["studentId".to_string(), "name".to_string()],
            subject_group_rank_cap: Some(60),
            rate_group_rank_cap: Some(40),
            class_group_rank_cap: Some(60),
            max_total_rank: 200,
            rate_ratios: vec![0.6, 0.8],
        }
    }
}

impl EngineConfig {
    pub fn catalog(&self) -> EngineResult<SubjectCatalog> {
        SubjectCatalog::new(self.subjects.clone())
    }

    /// Parses a config value and checks that it yields a usable catalog.
    pub fn from_json(value: serde_json::Value) -> anyhow::Result<Self> {
        let cfg: EngineConfig = serde_json::from_value(value).context("invalid config")?;
        cfg.catalog().context("invalid subject list")?;
        if cfg.group_key.trim().is_empty() {
            anyhow::bail!("groupKey must not be empty");
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.to_string_lossy()))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.to_string_lossy()))?;
        Self::from_json(value)
    }

    /// Reads the file named by `EXAMSTATD_CONFIG`, falling back to defaults
    /// when the variable is unset.
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_fill_missing_fields() {
        let cfg = EngineConfig::from_json(json!({ "subjects": ["math", "art"] })).unwrap();
        assert_eq!(cfg.subjects, vec!["math", "art"]);
        assert_eq!(cfg.group_key, "class");
        assert_eq!(cfg.rate_group_rank_cap, Some(40));
        assert_eq!(cfg.rate_ratios, vec![0.6, 0.8]);
    }

    #[test]
    fn duplicate_subjects_are_rejected() {
        let err = EngineConfig::from_json(json!({ "subjects": ["math", "math"] })).unwrap_err();
        assert!(format!("{err:#}").contains("listed twice"));
        assert!(EngineConfig::from_json(json!({ "groupKey": " " })).is_err());
    }

    #[test]
    fn load_reads_a_file() {
        let dir = std::env::temp_dir().join(format!("examstatd-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, r#"{"groupKey": "homeroom", "maxTotalRank": 50}"#).unwrap();
        let cfg = EngineConfig::load(&path).unwrap();
        assert_eq!(cfg.group_key, "homeroom");
        assert_eq!(cfg.max_total_rank, 50);
        assert!(EngineConfig::load(&dir.join("missing.json")).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
