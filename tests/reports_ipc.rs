use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_examstatd");
    let mut child = Command::new(exe)
        .env_remove("EXAMSTATD_CONFIG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examstatd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": method,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value["ok"], true, "{} failed: {}", method, value);
    value["result"].clone()
}

/// Totals: s1 360, s2 285, s3 132, s4 340, s5 209, s6 none.
fn rows() -> serde_json::Value {
    json!([
        {"class": 1, "studentId": "s1", "chinese": 120, "math": 130, "english": 110},
        {"class": 1, "studentId": "s2", "chinese": 95, "math": 88, "english": 102},
        {"class": 1, "studentId": "s3", "chinese": 60, "math": 72, "english": "absent"},
        {"class": 2, "studentId": "s4", "chinese": 110, "math": 140, "english": 90},
        {"class": 2, "studentId": "s5", "chinese": 80, "math": 59, "english": 70},
        {"class": 2, "studentId": "s6", "name": "no scores"},
    ])
}

fn table<'a>(result: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    result["tables"]
        .as_array()
        .expect("tables array")
        .iter()
        .find(|t| t["name"] == name)
        .map(|t| &t["table"])
        .unwrap_or_else(|| panic!("no table named {}", name))
}

fn labels(table: &serde_json::Value) -> Vec<String> {
    table["columns"]
        .as_array()
        .expect("columns")
        .iter()
        .map(|c| c["label"].as_str().expect("label").to_string())
        .collect()
}

fn cell(table: &serde_json::Value, row: &str, label: &str) -> serde_json::Value {
    let col = labels(table)
        .iter()
        .position(|l| l == label)
        .unwrap_or_else(|| panic!("no column {}", label));
    let row = table["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .find(|r| r["key"] == row)
        .unwrap_or_else(|| panic!("no row {}", row));
    row["cells"][col].clone()
}

fn num(v: serde_json::Value) -> f64 {
    v.as_f64().unwrap_or_else(|| panic!("not a number: {}", v))
}

fn load(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    let result = request_ok(stdin, reader, "datasets.load", json!({ "rows": rows() }));
    assert_eq!(result["subjects"], json!(["chinese", "math", "english"]));
    assert_eq!(result["groups"], json!(["1", "2"]));
    assert_eq!(result["rowCount"], 6);
    result["datasetId"].as_str().expect("dataset id").to_string()
}

#[test]
fn ranked_listing_and_rank_table() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let id = load(&mut stdin, &mut reader);

    let ranked = request_ok(&mut stdin, &mut reader, "datasets.ranked", json!({ "datasetId": id }));
    let listing = &ranked["table"];
    assert_eq!(num(cell(listing, "1", "total")), 360.0);
    assert_eq!(cell(listing, "4", "overall_rank"), json!(2));
    assert_eq!(cell(listing, "4", "group_rank"), json!(1));
    assert_eq!(cell(listing, "6", "total"), serde_json::Value::Null);
    assert_eq!(cell(listing, "6", "group_rank"), serde_json::Value::Null);
    assert_eq!(cell(listing, "6", "name"), json!("no scores"));

    let capped = request_ok(
        &mut stdin,
        &mut reader,
        "datasets.ranked",
        json!({ "datasetId": id, "maxGroupRank": 1 }),
    );
    assert_eq!(capped["table"]["rows"].as_array().map(Vec::len), Some(2));

    let ranks = request_ok(&mut stdin, &mut reader, "datasets.rankTable", json!({ "datasetId": id }));
    // math: s4 140, s1 130, s2 88, s3 72, s5 59
    assert_eq!(cell(&ranks["table"], "1", "math"), json!([2.0, 1.0]));
    assert_eq!(cell(&ranks["table"], "4", "math"), json!([1.0, 2.0]));
    assert_eq!(cell(&ranks["table"], "6", "math"), json!([null, null]));

    let plain = request_ok(
        &mut stdin,
        &mut reader,
        "datasets.rankTable",
        json!({ "datasetId": id, "pairWithTotal": false }),
    );
    assert_eq!(cell(&plain["table"], "5", "math"), json!(5));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn score_band_report_splits_per_subject_with_composite() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let id = load(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "reports.scoreBands",
        json!({
            "datasetId": id,
            "bands": [{ "thresholds": [60, 90, 120], "subjects": ["math", "chinese"] }],
            "maxGroupRank": null,
            "weights": [1, 2, 3, 4],
        }),
    );
    assert_eq!(result["kind"], "scoreBands");
    let names: Vec<&str> = result["tables"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["chinese", "math"]);

    let math = table(&result, "math");
    assert_eq!(
        labels(math),
        vec!["count[60,90)", "count[90,120)", "count[120,+∞)", "sum", "score", "rank"]
    );
    assert_eq!(math["indexName"], "class");
    assert_eq!(cell(math, "1", "count[60,90)"), json!(2));
    assert_eq!(cell(math, "2", "count[60,90)"), json!(0));
    assert_eq!(cell(math, "2", "count[120,+∞)"), json!(1));
    assert_eq!(num(cell(math, "1", "score")), 5.0);
    assert_eq!(num(cell(math, "2", "score")), 3.0);
    assert_eq!(cell(math, "1", "rank"), json!(1));
    assert_eq!(cell(math, "2", "rank"), json!(2));

    let report_id = result["reportId"].as_str().unwrap().to_string();
    let fetched = request_ok(&mut stdin, &mut reader, "reports.get", json!({ "reportId": report_id }));
    assert_eq!(fetched["datasetId"], id.as_str());
    assert_eq!(table(&fetched, "math"), math);

    let merged = request_ok(
        &mut stdin,
        &mut reader,
        "reports.scoreBands",
        json!({
            "datasetId": id,
            "bands": [{ "thresholds": [60, 90], "subjects": ["math"], "closedSide": "upper" }],
            "split": "merge",
        }),
    );
    assert_eq!(labels(table(&merged, "math")), vec!["math_count(60,90]", "math_count(90,+∞)"]);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn double_qualified_and_subject_qualified_reports() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let id = load(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "reports.doubleQualified",
        json!({ "datasetId": id, "thresholds": [0, 2, 4], "secondary": 3, "subjects": ["math"] }),
    );
    let math = table(&result, "math");
    assert_eq!(
        labels(math),
        vec!["dual(0,2] T≤3", "dual(2,4] T≤3", "dual(4,+∞) T≤3", "dual(any) T>3"]
    );
    assert_eq!(cell(math, "1", "dual(0,2] T≤3"), json!(1));
    assert_eq!(cell(math, "1", "dual(2,4] T≤3"), json!(1));
    assert_eq!(cell(math, "1", "dual(any) T>3"), json!(1));
    assert_eq!(cell(math, "2", "dual(0,2] T≤3"), json!(1));
    assert_eq!(cell(math, "2", "dual(any) T>3"), json!(1));

    let qualified = request_ok(
        &mut stdin,
        &mut reader,
        "reports.subjectQualified",
        json!({ "datasetId": id, "subjectMax": 2, "totalMax": 2 }),
    );
    let t = table(&qualified, "qualified");
    assert_eq!(labels(t), vec!["chinese", "math", "english"]);
    assert_eq!(cell(t, "1", "english"), json!(1));
    assert_eq!(cell(t, "2", "english"), json!(0));
    assert_eq!(cell(t, "2", "math"), json!(1));

    let combined = request_ok(
        &mut stdin,
        &mut reader,
        "reports.combined",
        json!({
            "datasetId": id,
            "bands": [{ "thresholds": [60, 90, 120], "subjects": ["math"] }],
            "subjectMax": 2,
            "totalMax": 2,
            "weights": [1],
        }),
    );
    let math = table(&combined, "math");
    assert_eq!(labels(math)[0], "qualified<=2");
    assert_eq!(cell(math, "1", "qualified<=2"), json!(1));
    assert_eq!(num(cell(math, "2", "score")), 1.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn rate_and_class_band_reports() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let id = load(&mut stdin, &mut reader);

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "reports.rates",
        json!({
            "datasetId": id,
            "fullMarks": [{ "fullMark": 150, "subjects": ["math", "chinese", "english"] }],
            "validCount": "tail",
            "maxGroupRank": null,
            "rankColumns": ["mean", "ratio[90,+∞)"],
        }),
    );
    let math = table(&result, "math");
    assert_eq!(
        labels(math),
        vec![
            "count[90,+∞)",
            "ratio[90,+∞)",
            "ratio[90,+∞)_rank",
            "count[120,+∞)",
            "ratio[120,+∞)",
            "mean",
            "mean_rank",
            "count_valid"
        ]
    );
    assert_eq!(cell(math, "1", "count[90,+∞)"), json!(1));
    assert!((num(cell(math, "2", "ratio[90,+∞)")) - 1.0 / 3.0).abs() < 1e-12);
    assert!((num(cell(math, "1", "mean")) - 290.0 / 3.0).abs() < 1e-9);
    assert_eq!(num(cell(math, "2", "mean")), 99.5);
    assert_eq!(cell(math, "2", "mean_rank"), json!(1));
    assert_eq!(cell(math, "2", "count_valid"), json!(2));

    let bands = request_ok(
        &mut stdin,
        &mut reader,
        "reports.classBands",
        json!({ "datasetId": id, "thresholds": [0, 2, 4], "weights": [2, 1] }),
    );
    let t = table(&bands, "overall_rank");
    assert_eq!(
        labels(t),
        vec!["count(0,2]", "count(2,4]", "count(4,+∞)", "headcount", "score", "rank"]
    );
    assert_eq!(cell(t, "1", "count(4,+∞)"), json!(1));
    assert_eq!(cell(t, "2", "count(4,+∞)"), json!(0));
    assert_eq!(num(cell(t, "1", "headcount")), 2.0);
    assert_eq!(cell(t, "2", "rank"), json!(1));

    drop(stdin);
    let _ = child.wait();
}
