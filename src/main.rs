mod backup;
mod blocks;
mod config;
mod db;
mod fields;
mod ipc;
mod json_import;
mod store;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = config::Args::parse();
    config::init_logging(&args.log_level);

    match args.command {
        Some(config::Command::Convert { path, out }) => convert(&path, out.as_deref()),
        None => {
            serve(args.workspace);
            ExitCode::SUCCESS
        }
    }
}

fn convert(path: &std::path::Path, out: Option<&std::path::Path>) -> ExitCode {
    match blocks::convert_text_file(path, out) {
        Ok(summary) => {
            for w in &summary.warnings {
                warn!(line = w.line, code = w.code, "{}", w.message);
            }
            println!(
                "Parsed {} trade(s) saved to: {}",
                summary.trade_count,
                summary.out_path.to_string_lossy()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(path = %path.display(), "{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn serve(workspace: Option<std::path::PathBuf>) {
    let mut state = ipc::AppState::default();
    if let Some(path) = workspace {
        match store::TradeStore::open(&path) {
            Ok(s) => {
                state.workspace = Some(path);
                state.store = Some(s);
            }
            Err(e) => error!(path = %path.display(), error = %e, "startup workspace not opened"),
        }
    }
    info!(version = env!("CARGO_PKG_VERSION"), "tradejournald ready");

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
                warn!(error = %e, "unparseable request line");
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

    // Closing stdin ends the session; the journal handle is released here.
    drop(state);
    info!("tradejournald stopped");
}
