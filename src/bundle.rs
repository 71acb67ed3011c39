use anyhow::Context;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::table::{Cell, ColumnKey, Table};

const MANIFEST_ENTRY: &str = "manifest.json";
const REPORTS_DIR: &str = "reports";
const MAX_NAME_CHARS: usize = 30;
pub const BUNDLE_FORMAT_V1: &str = "examstat-report-bundle-v1";

/// One table to be written, named by the report it came from.
#[derive(Debug, Clone)]
pub struct BundleTable<'a> {
    pub report: &'a str,
    pub name: &'a str,
    pub table: &'a Table,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BundleEntry {
    pub path: String,
    pub rows: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entries: Vec<BundleEntry>,
}

/// Entry-name sanitiser: word characters survive, runs of whitespace or
/// hyphens collapse to `_`, everything else is dropped.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::new();
    let mut in_gap = false;
    for ch in raw.trim().chars() {
        if ch.is_whitespace() || ch == '-' {
            in_gap = true;
            continue;
        }
        if !(ch.is_alphanumeric() || ch == '_') {
            continue;
        }
        if in_gap && !out.is_empty() {
            out.push('_');
        }
        in_gap = false;
        out.push(ch);
    }
    let out: String = out.chars().take(MAX_NAME_CHARS).collect();
    if out.is_empty() {
        "data".to_string()
    } else {
        out
    }
}

fn empty_notice(table: &Table) -> Table {
    let mut notice = Table::new(table.index_name.clone(), vec![ColumnKey::plain("notice", "notice")]);
    // Single fixed row, width always matches.
    let _ = notice.push_row("1", vec![Cell::Text("empty".to_string())]);
    notice
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Writes every table as a CSV entry under `reports/` plus a manifest.
pub fn export_report_bundle(tables: &[BundleTable<'_>], out_path: &Path) -> anyhow::Result<ExportSummary> {
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<BundleEntry> = Vec::with_capacity(tables.len());
    for t in tables {
        let base = format!("{}_{}", sanitize_name(t.report), sanitize_name(t.name));
        let mut path = format!("{}/{}.csv", REPORTS_DIR, base);
        let mut n = 2;
        while entries.iter().any(|e| e.path == path) {
            path = format!("{}/{}_{}.csv", REPORTS_DIR, base, n);
            n += 1;
        }

        let csv = if t.table.is_empty() {
            empty_notice(t.table).to_csv()
        } else {
            t.table.to_csv()
        };
        zip.start_file(path.as_str(), opts)
            .with_context(|| format!("failed to start entry {}", path))?;
        zip.write_all(csv.as_bytes())
            .with_context(|| format!("failed to write entry {}", path))?;

        entries.push(BundleEntry {
            sha256: sha256_hex(csv.as_bytes()),
            rows: t.table.rows.len(),
            path,
        });
    }

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "entries": entries
            .iter()
            .map(|e| json!({ "path": e.path, "rows": e.rows, "sha256": e.sha256 }))
            .collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("math scores - class 1"), "math_scores_class_1");
        assert_eq!(sanitize_name("count[60,80)"), "count6080");
        assert_eq!(sanitize_name("***"), "data");
        assert_eq!(sanitize_name(&"x".repeat(40)).len(), 30);
        assert_eq!(sanitize_name("语文"), "语文");
    }

    #[test]
    fn bundle_has_manifest_and_csv_entries() {
        let mut table = Table::new("class", vec![ColumnKey::plain("count[60,80)", "bin_60_80")]);
        table.push_row("1", vec![Cell::Int(4)]).unwrap();
        let empty = Table::new("class", vec![ColumnKey::plain("mean", "mean")]);

        let dir = std::env::temp_dir().join(format!("examstatd-bundle-{}", uuid::Uuid::new_v4()));
        let out = dir.join("nested").join("bundle.zip");
        let summary = export_report_bundle(
            &[
                BundleTable { report: "scoreBands", name: "math", table: &table },
                BundleTable { report: "scoreBands", name: "math", table: &empty },
            ],
            &out,
        )
        .unwrap();
        assert_eq!(summary.entries.len(), 2);
        assert_eq!(summary.entries[0].path, "reports/scoreBands_math.csv");
        assert_eq!(summary.entries[1].path, "reports/scoreBands_math_2.csv");

        let mut archive = ZipArchive::new(File::open(&out).unwrap()).unwrap();
        let mut csv = String::new();
        archive
            .by_name("reports/scoreBands_math.csv")
            .unwrap()
            .read_to_string(&mut csv)
            .unwrap();
        assert_eq!(csv, "class,count[60,80)\n1,4\n");
        assert_eq!(summary.entries[0].sha256, sha256_hex(csv.as_bytes()));

        let mut notice = String::new();
        archive
            .by_name("reports/scoreBands_math_2.csv")
            .unwrap()
            .read_to_string(&mut notice)
            .unwrap();
        assert_eq!(notice, "class,notice\n1,empty\n");

        let mut manifest = String::new();
        archive
            .by_name("manifest.json")
            .unwrap()
            .read_to_string(&mut manifest)
            .unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest).unwrap();
        assert_eq!(manifest["format"], BUNDLE_FORMAT_V1);
        assert_eq!(manifest["entries"][1]["rows"], 0);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
