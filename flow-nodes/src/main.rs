use anyhow::{Context, Result};
use flow_nodes::{load_config, Flow};
use sfconn::config::RuntimeConfig;
use sfconn::host::{ContextStore, FlowMessage, MemoryContext, NodeOutput, SqliteContext};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flow_nodes=info,sfconn=info".into()),
        )
        .init();

    info!("Flow nodes starting...");

    let runtime = RuntimeConfig::from_env();
    let config = load_config(&runtime.config_path)?;
    info!(
        config = %runtime.config_path,
        connections = config.connections.len(),
        nodes = config.nodes.len(),
        offline = runtime.offline,
        "Configuration loaded"
    );

    let context_path = runtime
        .context_db
        .clone()
        .unwrap_or_else(|| config.context.path.clone());
    let context: Arc<dyn ContextStore> = if context_path.is_empty() {
        info!("Node context kept in memory");
        Arc::new(MemoryContext::new())
    } else {
        let store = SqliteContext::open(&context_path)
            .with_context(|| format!("Failed to open context store at {}", context_path))?;
        info!(path = %context_path, "Context store initialized");
        Arc::new(store)
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let output_handle = tokio::spawn(async move {
        while let Some(output) = rx.recv().await {
            log_output(&output);
        }
    });

    let flow = Arc::new(Flow::start(&config, &runtime, context, tx).await?);
    info!(inputs = ?flow.input_ids(), "Flow deployed");

    // Each stdin line `<node id> <json>` is injected as one message. The
    // reader thread is never joined so a pending read cannot hold up exit.
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    let input_flow = Arc::clone(&flow);
    let input_handle = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if let Err(e) = inject_line(&input_flow, &line).await {
                warn!(error = %e, "Ignoring input line");
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    input_handle.abort();
    let _ = input_handle.await;
    match Arc::try_unwrap(flow) {
        Ok(flow) => flow.stop().await,
        Err(flow) => flow.registry().close_all().await,
    }
    output_handle.abort();
    info!("Flow nodes stopped");

    Ok(())
}

async fn inject_line(flow: &Flow, line: &str) -> Result<()> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let (node_id, body) = line.split_once(' ').unwrap_or((line, ""));
    let msg = if body.trim().is_empty() {
        FlowMessage::new()
    } else {
        let value = serde_json::from_str(body).context("message body is not valid JSON")?;
        FlowMessage::from_value(value)?
    };
    flow.inject(node_id, msg).await
}

fn log_output(output: &NodeOutput) {
    match output {
        NodeOutput::Status { node, status } => {
            info!(node = %node, fill = ?status.fill, text = %status.text, "status");
        }
        NodeOutput::Message { node, msg } => {
            info!(node = %node, msg = %msg.clone().into_value(), "send");
        }
        NodeOutput::Error { node, message } => {
            error!(node = %node, error = %message, "node error");
        }
    }
}
