mod access;
mod account;
mod backup;
mod calc;
mod config;
mod db;
mod identity;
mod ipc;
mod model;
mod roster;
mod saga;
mod store;

use std::io::{self, BufRead, Write};

fn init_logging() {
    use simplelog::{ColorChoice, TermLogger, TerminalMode};

    // stdout carries the protocol; logs go to stderr only.
    let log_cfg = simplelog::ConfigBuilder::new()
        .add_filter_allow_str("colleged")
        .build();
    if TermLogger::init(
        config::log_level_from_env(),
        log_cfg,
        TerminalMode::Stderr,
        ColorChoice::Never,
    )
    .is_err()
    {
        eprintln!("colleged: logger already initialised");
    }
}

fn main() {
    init_logging();
    log::info!("colleged {} starting", env!("CARGO_PKG_VERSION"));

    let mut state = ipc::AppState::default();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                log::error!("stdin read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to; reply anyway so the caller is not left waiting.
                log::warn!("bad request line: {}", e);
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
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
    log::info!("stdin closed; exiting");
}
