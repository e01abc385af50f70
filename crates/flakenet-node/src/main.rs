//! Flakenet node -- levin p2p connection scheduler.
//!
//! Usage:
//!   flakenet-node                            # Run with default config
//!   flakenet-node --config path.toml         # Run with custom config
//!   flakenet-node probe 188.35.187.49:12560  # One-shot handshake probe

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};

use flakenet_levin::Connection;
use flakenet_node::config::NodeConfig;
use flakenet_p2p::{
    BasicNodeData, CoreSyncData, HandshakeRequest, HandshakeResponse, Node, PingRequest,
    PingResponse, SupportFlagsRequest, SupportFlagsResponse, COMMAND_HANDSHAKE, COMMAND_PING,
    COMMAND_SUPPORT_FLAGS,
};

#[derive(Parser)]
#[command(name = "flakenet-node", about = "Flakenet p2p node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "flakenet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Handshake with one peer and print what it reports
    Probe {
        /// Peer address, e.g. 188.35.187.49:12560
        address: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flakenet_node=info,flakenet_p2p=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = NodeConfig::load_or_default(&cli.config)?;

    match cli.command {
        Some(Commands::Probe { address }) => probe(&cfg, &address).await,
        Some(Commands::Run) | None => run_node(cfg).await,
    }
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        network_id = %cfg.p2p.network_id,
        seeds = cfg.p2p.seed_nodes.len(),
        max_out = cfg.p2p.max_out_connections,
        "starting flakenet-node"
    );

    let mut node = Node::start(cfg.p2p);
    tracing::info!(
        peer_id = format_args!("{:016x}", node.peer_id()),
        "scheduler running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    node.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// Dial one peer, handshake, and print everything it reports.
async fn probe(cfg: &NodeConfig, address: &str) -> anyhow::Result<()> {
    const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

    let local_time = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let connection = Connection::connect(address).await?;

    let request = HandshakeRequest {
        node_data: BasicNodeData {
            local_time,
            my_port: 0,
            network_id: cfg.p2p.network_id.clone(),
            peer_id: rand::random(),
        },
        payload_data: CoreSyncData::default(),
    };
    let (code, response): (i32, HandshakeResponse) = connection
        .invoke(COMMAND_HANDSHAKE, &request, PROBE_TIMEOUT)
        .await?;

    println!("peer:       {address}");
    println!("return:     {code}");
    println!("network_id: {}", response.node_data.network_id);
    println!("peer_id:    {:016x}", response.node_data.peer_id);
    println!("height:     {}", response.payload_data.current_height);
    println!("difficulty: {}", response.payload_data.cumulative_difficulty);
    println!("top_id:     {}", hex::encode(&response.payload_data.top_id));
    println!("peers:      {}", response.peers.len());

    let (_, flags): (i32, SupportFlagsResponse) = connection
        .invoke(COMMAND_SUPPORT_FLAGS, &SupportFlagsRequest, PROBE_TIMEOUT)
        .await?;
    println!("flags:      {:#x}", flags.support_flags);

    let (_, pong): (i32, PingResponse) = connection
        .invoke(COMMAND_PING, &PingRequest, PROBE_TIMEOUT)
        .await?;
    println!("ping:       {} ({:016x})", pong.status, pong.peer_id);

    connection.close().await;
    Ok(())
}
