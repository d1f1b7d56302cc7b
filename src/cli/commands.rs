use anyhow::{Context, Result};
use clap::ArgMatches;
use log::{error, info, warn};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::config::NodeConfig;
use crate::flow::{ErrorReport, FlowHost, FlowMessage};
use crate::modbus::{FunctionCode, LoopbackTransport, ModbusTransport, ReplyMode};
use crate::services::status::NodeStatus;
use crate::services::write_node::{resolve_transport, ModbusWriteNode};
use crate::utils::error::WriteError;

/// Host for the CLI runner: outward messages and error reports go to stdout
/// as JSON lines, everything else to the log.
pub struct StdoutHost;

impl FlowHost for StdoutHost {
    fn send(&self, node_id: &str, message: FlowMessage) {
        println!("{}", json!({ "node": node_id, "output": message.to_json() }));
    }

    fn log_error(&self, node_id: &str, error: &WriteError, message: &FlowMessage) {
        error!("❌ [{}] {} (msg: {})", node_id, error, message.to_json());
    }

    fn report_error(&self, report: ErrorReport) {
        match serde_json::to_value(&report) {
            Ok(value) => println!("{}", json!({ "error": value })),
            Err(e) => error!("❌ Failed to serialize error report: {}", e),
        }
    }

    fn set_status(&self, node_id: &str, status: &NodeStatus) {
        info!("🔵 [{}] status: {}", node_id, status.text);
    }

    fn closed(&self, node_id: &str) {
        info!("👋 [{}] closed", node_id);
    }
}

pub async fn handle_subcommands(matches: &ArgMatches) -> Result<bool> {
    if let Some(matches) = matches.subcommand_matches("run") {
        info!("▶️  Executing run command...");
        run_node(matches).await?;
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("check-config") {
        let config = load_config(matches)?;
        config.node.validate()?;

        println!("✅ Configuration OK for node '{}'", config.node.label());
        println!("   🏷️  Id: {}", config.node.id);
        println!("   📡 Server: {}", config.node.server.as_deref().unwrap_or("<none, node inert>"));
        println!(
            "   📝 Unit {} | {} @ {} x{}",
            config.node.unit_id, config.node.data_type, config.node.address, config.node.quantity
        );
        match FunctionCode::for_data_type(&config.node.data_type) {
            Ok(code) => println!("   🔢 Function code: {}", code),
            Err(e) => println!("   ⚠️  {}", e),
        }
        return Ok(true);
    }

    if let Some(matches) = matches.subcommand_matches("init-config") {
        let output = matches
            .get_one::<String>("output")
            .context("missing --output")?;
        NodeConfig::default().save_to_file(output)?;
        println!("✅ Default configuration written to {}", output);
        return Ok(true);
    }

    Ok(false)
}

fn load_config(matches: &ArgMatches) -> Result<NodeConfig> {
    match matches.get_one::<String>("config") {
        Some(path) => {
            info!("📄 Loading configuration from {}", path);
            NodeConfig::from_file(path).with_context(|| format!("cannot load {}", path))
        }
        None => {
            info!("📄 No configuration file given, using defaults");
            Ok(NodeConfig::default())
        }
    }
}

async fn run_node(matches: &ArgMatches) -> Result<()> {
    let mut config = load_config(matches)?;
    config.apply_matches(matches)?;
    config.node.validate()?;

    let mode = match config.loopback.fail_every {
        Some(n) => ReplyMode::FailEvery(n),
        None => ReplyMode::Acknowledge,
    };
    let loopback_name = config.node.server.clone().unwrap_or_else(|| "loopback".to_string());
    let loopback = Arc::new(LoopbackTransport::new(&loopback_name, mode));
    loopback.set_active(config.loopback.start_active)?;

    let transports: Vec<Arc<dyn ModbusTransport>> = vec![loopback];
    let transport = resolve_transport(&config.node, &transports);
    if transport.is_none() {
        warn!("⚠️  No transport for node '{}', inputs will be ignored", config.node.label());
    }

    let mut node = ModbusWriteNode::new(config.node.clone(), transport, Arc::new(StdoutHost));

    let (tx, rx) = mpsc::channel(64);
    let reader = tokio::spawn(read_stdin_messages(tx));

    node.run(rx, async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;

    reader.abort();
    Ok(())
}

/// Feeds one JSON flow message per stdin line into the node.
async fn read_stdin_messages(tx: mpsc::Sender<FlowMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("❌ Failed to read stdin: {}", e);
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<FlowMessage>(&line) {
            Ok(message) => {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("⚠️  Skipping line that is not a flow message: {}", e),
        }
    }
}
