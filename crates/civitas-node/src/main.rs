//! Civitas Node - governance execution pipeline.
//!
//! Runs the vote relay, tally, multisig ledger and timelock queue behind a
//! JSON-RPC server, driven by a periodic scheduler.

pub mod chain_client;
pub mod config;
pub mod metrics;
pub mod node;
pub mod telemetry;

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "civitas-node")]
#[command(about = "Civitas - gasless voting, multisig approval and timelocked execution")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Config file path
    #[arg(short, long, value_name = "FILE", env = "CIVITAS_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    init_config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, env = "CIVITAS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// RPC listen address
    #[arg(long)]
    rpc_addr: Option<SocketAddr>,

    /// Chain JSON-RPC endpoint
    #[arg(long, env = "CIVITAS_CHAIN_ENDPOINT")]
    chain_endpoint: Option<String>,

    /// Chain ID bound into signed messages
    #[arg(long)]
    chain_id: Option<u64>,

    /// Log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,

    /// Enable metrics
    #[arg(long)]
    metrics: bool,

    /// Keep state in memory only
    #[arg(long)]
    in_memory: bool,
}

impl Args {
    fn apply(&self, config: &mut config::NodeConfig) {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(addr) = self.rpc_addr {
            config.rpc.http_addr = addr;
        }
        if let Some(endpoint) = &self.chain_endpoint {
            config.chain.endpoint = endpoint.clone();
        }
        if let Some(chain_id) = self.chain_id {
            config.governance.chain_id = chain_id;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.format = "json".to_string();
        }
        if self.metrics {
            config.metrics.enabled = true;
        }
        if self.in_memory {
            config.storage.in_memory = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => config::NodeConfig::from_file(path)?,
        None => config::NodeConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    if let Some(path) = &args.init_config {
        config.to_file(path)?;
        println!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    telemetry::init_telemetry(&config.logging)?;

    info!(
        name = %config.name,
        data_dir = %config.data_dir.display(),
        chain_id = config.governance.chain_id,
        chain = %config.chain.endpoint,
        rpc = %config.rpc.http_addr,
        signers = config.governance.multisig_signers.len(),
        threshold = config.governance.multisig_threshold,
        "Configuration loaded"
    );

    let (mut node, _shutdown) = node::CivitasNode::new(config).await?;

    if let Err(e) = node.start().await {
        error!("Failed to start node: {}", e);
        return Err(e);
    }

    if let Err(e) = node.run().await {
        error!("Node error: {}", e);
        return Err(e);
    }

    info!("Civitas node shutdown complete");
    Ok(())
}
