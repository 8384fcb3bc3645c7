mod config;
mod db;
mod error;
mod export;
mod flatten;
mod grading;
mod ipc;
mod logging;
mod schema;

use std::io::{self, BufRead, Write};

fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let config = config::DashboardConfig::from_env()?;
    let mut state = ipc::AppState::new(config);

    // Startup open is best-effort: while offline every data request fails
    // with `db_offline` and `health` reports why.
    if let Some(path) = state.config.database.clone() {
        let attach = state.config.attach.clone();
        ipc::open_into_state(&mut state, &path, &attach);
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        db_status = %state.db_status(),
        "dashboardd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::warn!(error = %e, "dropping malformed request");
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
    Ok(())
}
