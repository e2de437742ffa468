mod cli;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;

use vaultbridge::vector::vector_search;
use vaultbridge::{ProcessBridge, ToolFacade, config, mcp, tool_definitions};

use crate::cli::{Cli, Command};

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = std::env::var("VAULTBRIDGE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    // stdout carries MCP frames when serving
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = config::load(&cli.config)?;

    match cli.command {
        Command::Serve { session } => {
            let facade = Arc::new(ToolFacade::from_config(&config)?);
            tracing::info!(session = %session, "serving tools on stdio");
            mcp::run_tool_server(facade, session).await?;
            Ok(())
        }

        Command::Call { tool, session, args } => {
            let args: Value = serde_json::from_str(&args).context("--args must be a JSON object")?;
            let facade = ToolFacade::from_config(&config)?;
            let envelope = facade.execute_tool(&session, &tool, args).await;
            print_json(&envelope.to_value())?;
            if !envelope.is_success() {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Tools => print_json(&Value::Array(tool_definitions())),

        Command::Check => {
            let bridge = ProcessBridge::new(config.worker.clone());
            let worker = match bridge.advertised_tools().await {
                Ok(tools) => json!({
                    "status": "ok",
                    "name": config.worker.name,
                    "tools": tools.iter().filter_map(|t| t.get("name").cloned()).collect::<Vec<_>>(),
                }),
                Err(e) => json!({ "status": "error", "name": config.worker.name, "error": e.to_string() }),
            };
            let vectors = if config.vector.is_configured() {
                match vector_search(&config.vector)?.ping().await {
                    Ok(()) => json!({ "status": "ok", "collection": config.vector.collection }),
                    Err(e) => json!({ "status": "error", "error": e.to_string() }),
                }
            } else {
                json!({ "status": "disabled" })
            };
            let healthy = worker["status"] == "ok" && vectors["status"] != "error";
            print_json(&json!({ "worker": worker, "vector": vectors }))?;
            if !healthy {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
