use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

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

fn send_line(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    line: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    serde_json::from_str(out.trim()).expect("parse response json")
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn ok_result(resp: serde_json::Value) -> serde_json::Value {
    assert_eq!(resp["ok"], true, "request failed: {}", resp);
    resp["result"].clone()
}

fn read_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> String {
    let mut text = String::new();
    archive
        .by_name(name)
        .unwrap_or_else(|_| panic!("missing entry {}", name))
        .read_to_string(&mut text)
        .expect("read entry");
    text
}

#[test]
fn export_bundle_writes_manifest_and_csv_per_table() {
    let dir = temp_dir("examstat-bundle");
    let out = dir.join("exports").join("reports.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let load = ok_result(request(
        &mut stdin,
        &mut reader,
        "load",
        "datasets.load",
        json!({ "rows": [
            {"class": 1, "studentId": "s1", "math": 130, "chinese": 120},
            {"class": 1, "studentId": "s2", "math": 88, "chinese": 95},
            {"class": 2, "studentId": "s3", "math": 140, "chinese": 110},
        ]}),
    ));
    let dataset_id = load["datasetId"].as_str().expect("dataset id").to_string();

    let bands = ok_result(request(
        &mut stdin,
        &mut reader,
        "bands",
        "reports.scoreBands",
        json!({
            "datasetId": dataset_id,
            "bands": [{ "thresholds": [60, 90, 120], "subjects": ["math"] }],
            "weights": [1, 2, 3],
        }),
    ));
    let bands_id = bands["reportId"].as_str().expect("report id").to_string();
    let classes = ok_result(request(
        &mut stdin,
        &mut reader,
        "classes",
        "reports.classBands",
        json!({ "datasetId": dataset_id, "thresholds": [0, 1, 2] }),
    ));
    let classes_id = classes["reportId"].as_str().expect("report id").to_string();

    let export = ok_result(request(
        &mut stdin,
        &mut reader,
        "export",
        "reports.exportBundle",
        json!({ "outPath": out.to_string_lossy(), "reportIds": [bands_id, classes_id] }),
    ));
    assert_eq!(export["bundleFormat"], "examstat-report-bundle-v1");
    let paths: Vec<&str> = export["entries"]
        .as_array()
        .expect("entries")
        .iter()
        .map(|e| e["path"].as_str().expect("path"))
        .collect();
    assert_eq!(
        paths,
        vec!["reports/scoreBands_math.csv", "reports/classBands_overall_rank.csv"]
    );

    drop(stdin);
    let _ = child.wait();

    let mut archive = zip::ZipArchive::new(File::open(&out).expect("open bundle")).expect("zip");
    let csv = read_entry(&mut archive, "reports/scoreBands_math.csv");
    let mut lines = csv.lines();
    assert_eq!(
        lines.next(),
        Some("class,count[60,90),count[90,120),count[120,+∞),sum,score,rank")
    );
    // class 1: 88 in [60,90), 130 in [120,+∞)
    assert_eq!(lines.next(), Some("1,1,0,1,2,4,1"));
    assert_eq!(lines.next(), Some("2,0,0,1,1,3,2"));

    let manifest: serde_json::Value =
        serde_json::from_str(&read_entry(&mut archive, "manifest.json")).expect("manifest json");
    assert_eq!(manifest["format"], "examstat-report-bundle-v1");
    assert!(manifest["exportedAt"].as_str().is_some_and(|s| s.contains('T')));
    assert_eq!(manifest["entries"][0]["rows"], 2);
    assert_eq!(manifest["entries"][0]["sha256"], export["entries"][0]["sha256"]);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn export_bundle_reports_unknown_ids_and_io_failures() {
    let dir = temp_dir("examstat-bundle-errors");
    let blocker = dir.join("not-a-dir");
    std::fs::write(&blocker, b"file").expect("write blocker");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let missing = request(
        &mut stdin,
        &mut reader,
        "missing",
        "reports.exportBundle",
        json!({ "outPath": dir.join("a.zip").to_string_lossy(), "reportIds": ["nope"] }),
    );
    assert_eq!(missing["error"]["code"], "not_found");

    let blocked = request(
        &mut stdin,
        &mut reader,
        "blocked",
        "reports.exportBundle",
        json!({ "outPath": blocker.join("b.zip").to_string_lossy() }),
    );
    assert_eq!(blocked["error"]["code"], "io_failed");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}
