//! Line-oriented driver for the dispatcher.
//!
//! Run with: cargo run -p pool-demo
//!
//! Each stdin line is a JSON object `{"tool": "...", "arguments": {...}}`;
//! each result is printed as one JSON line. EOF or Ctrl-C shuts down.
//!
//! ```text
//! {"tool": "ssh_connect", "arguments": {"name": "web", "host": "10.0.0.5", "username": "deploy", "key_filename": "/home/me/.ssh/id_ed25519"}}
//! {"tool": "ssh_execute", "arguments": {"connection": "web", "command": "uptime"}}
//! ```

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use serde_json::{Value, json};
use sshmux_core::Settings;
use sshmux_dispatch::Dispatcher;
use sshmux_ssh::RusshConnector;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Deserialize)]
struct Request {
    tool: String,
    #[serde(default)]
    arguments: Value,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    tracing::info!(
        presets = settings.connections.len(),
        binding = ?settings.shell_binding,
        "Starting"
    );

    let dispatcher = Dispatcher::new(Arc::new(RusshConnector::new()), settings);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("reading stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatcher.call(&request.tool, request.arguments).await,
            Err(e) => json!({
                "success": false,
                "error": format!("malformed request: {e}"),
                "kind": "invalid",
            }),
        };
        let mut out = serde_json::to_vec(&result)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    dispatcher.shutdown().await;
    tracing::info!("Stopped");
    Ok(())
}
