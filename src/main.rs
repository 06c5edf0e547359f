use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use lessond::config::DaemonConfig;
use lessond::ipc::{self, AppState};
use lessond::logging::init_logging;

/// How long in-flight generations may keep emitting events after stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    init_logging();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, run())
}

async fn run() -> anyhow::Result<()> {
    let config = DaemonConfig::from_env();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = config.backend_name(),
        generator = %config.generator.base_url,
        "lessond starting"
    );

    // Responses and events share one writer so lines never interleave.
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::task::spawn_local(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            let mut s = serde_json::to_string(&line).unwrap_or_else(|_| "{\"ok\":false}".to_string());
            s.push('\n');
            if stdout.write_all(s.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let state = Rc::new(AppState::new(config, tx.clone()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(v)) => v,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to reply to.
                let _ = tx.send(json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                }));
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&state, req).await;
        let _ = tx.send(resp);
    }

    drop(tx);
    drop(state);
    if tokio::time::timeout(SHUTDOWN_GRACE, writer).await.is_err() {
        tracing::warn!("shutting down with generation still in flight");
    }
    tracing::info!("lessond stopped");
    Ok(())
}
