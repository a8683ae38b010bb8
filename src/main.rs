mod cards;
mod catalog;
mod collection;
mod config;
mod csv_codec;
mod db;
mod error;
mod ipc;
mod repair;
mod resolver;
mod schema;
mod transfer;
mod valuation;

use std::io::{self, BufRead, Write};
use tracing::{info, warn};

fn init_logging(filter: &str) {
    // stdout carries the IPC stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .with_env_filter(filter)
        .init();
}

fn main() {
    let cfg = config::SidecarConfig::from_env();
    init_logging(&cfg.log_filter);

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
        seed_demo: cfg.seed_demo,
    };
    if let Some(path) = cfg.workspace.as_ref() {
        match db::open_db(path, cfg.seed_demo) {
            Ok((conn, _)) => {
                state.workspace = Some(path.clone());
                state.db = Some(conn);
            }
            Err(e) => {
                let error = format!("{e:#}");
                warn!(workspace = %path.display(), %error, "startup workspace not opened");
            }
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "cardvaultd ready");

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
                // Can't reply without id.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{resp}");
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
