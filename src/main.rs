mod aggregators;
mod bundle;
mod composite;
mod config;
mod error;
mod ipc;
mod ranking;
mod report;
mod table;
mod thresholds;

use std::io::{self, BufRead, Write};

fn init_logging() {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    builder
        .format(|buf, record| {
            writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
        })
        .write_style(env_logger::WriteStyle::Never)
        // stdout carries the protocol.
        .target(env_logger::Target::Stderr);
    builder.init();
}

fn main() {
    init_logging();

    let config = match config::EngineConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("failed to load config: {e:#}");
            std::process::exit(2);
        }
    };
    log::info!(
        "examstatd {} ready ({} subjects)",
        env!("CARGO_PKG_VERSION"),
        config.subjects.len()
    );
    let mut state = ipc::AppState::new(config);

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                log::warn!("bad request line: {}", e);
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
