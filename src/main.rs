use anyhow::Context;
use gradebookd::{ipc, Engine};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "GRADEBOOKD_LOG";
const WORKSPACE_ENV: &str = "GRADEBOOKD_WORKSPACE";

fn init_tracing() {
    // stdout carries the protocol.
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("gradebookd=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn initial_state() -> anyhow::Result<ipc::AppState> {
    let mut state = ipc::AppState::default();
    if let Some(dir) = std::env::var_os(WORKSPACE_ENV) {
        let path = PathBuf::from(dir);
        let engine = Engine::open(&path)
            .with_context(|| format!("open workspace {}", path.display()))?;
        state.workspace = Some(path);
        state.engine = Some(engine);
    }
    Ok(state)
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let mut state = initial_state()?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gradebookd started");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
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
                let _ = writeln!(stdout, "{}", ipc::bad_json(e.to_string()));
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
