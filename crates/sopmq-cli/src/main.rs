//! `sopmq`: run a cluster node, or drive a simple publish benchmark
//! against one.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sopmq_client::Client;
use sopmq_node::{
    AuthStore, Coordinator, GossipWriter, MemoryStorage, NodeConfig, NodeContext, NodeServer,
    PeerConnectionPool, ReplicaService, Ring, RingNode, RingSnapshot,
};
use sopmq_types::Endpoint;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "sopmq", version, about = "a horizontally scalable message queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run this process as a cluster node.
    Node {
        /// Path to this node's TOML configuration file.
        #[arg(long)]
        config: String,
        /// This node's id on the ring. Distinct nodes must use distinct ids.
        #[arg(long)]
        node_id: u64,
        /// Seed an initial user so clients have something to authenticate
        /// against. Format: username:password.
        #[arg(long)]
        user: Option<String>,
    },
    /// Publish a burst of messages and report throughput.
    Bench {
        #[arg(long)]
        addr: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
        #[arg(long, default_value = "bench")]
        queue: String,
        #[arg(long, default_value_t = 1000)]
        count: u32,
        #[arg(long, default_value_t = 64)]
        payload_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Node { config, node_id, user } => run_node(&config, node_id, user).await,
        Command::Bench {
            addr,
            username,
            password,
            queue,
            count,
            payload_size,
        } => run_bench(&addr, &username, &password, &queue, count, payload_size).await,
    }
}

async fn run_node(config_path: &str, node_id: u64, user: Option<String>) -> Result<()> {
    let config = NodeConfig::load(config_path).context("loading node config")?;

    let mut auth_store = AuthStore::new();
    if let Some(spec) = user {
        let (username, password) = spec
            .split_once(':')
            .context("--user must be formatted as username:password")?;
        auth_store.add_user(username, password);
    }
    // Every node in the cluster is configured with this same credential so
    // peer-to-peer `ProxyPublish`/`Gossip` connections can pass the same
    // challenge/response handshake a client goes through.
    auth_store.add_user(&config.node_username, &config.node_password);

    let self_node = RingNode {
        node_id,
        range_start: config.range,
        endpoint: Endpoint::new(config.bind_address.clone(), config.port),
    };
    let ring = Arc::new(Ring::new(
        RingSnapshot::new(vec![self_node]).context("building initial ring snapshot")?,
    ));

    let storage = Arc::new(MemoryStorage::new());
    let replica_service = Arc::new(ReplicaService::new(node_id, storage.clone()));
    let peer_pool = Arc::new(PeerConnectionPool::new(
        config.max_message_size,
        config.node_username.clone(),
        config.node_password.clone(),
    ));
    let coordinator = Arc::new(Coordinator::new(Duration::from_secs(2), 30));
    let gossip_writer = Arc::new(GossipWriter::new(ring.clone()));

    let context = Arc::new(NodeContext {
        node_id,
        auth_store: Arc::new(auth_store),
        ring,
        storage,
        replica_service,
        peer_pool,
        coordinator,
        gossip_writer,
    });

    let server = NodeServer::new(context, config.max_message_size);
    server.serve(&config.bind_socket_addr()).await?;
    Ok(())
}

async fn run_bench(
    addr: &str,
    username: &str,
    password: &str,
    queue: &str,
    count: u32,
    payload_size: usize,
) -> Result<()> {
    let client = Client::connect(addr, username, password)
        .await
        .context("connecting and authenticating")?;

    let payload = vec![0xABu8; payload_size];
    let start = Instant::now();
    let mut failures = 0u32;

    for _ in 0..count {
        if client.publish(queue, payload.clone()).await.is_err() {
            failures += 1;
        }
    }

    let elapsed = start.elapsed();
    let rate = count as f64 / elapsed.as_secs_f64();
    println!(
        "published {count} messages ({failures} failed) in {elapsed:?} ({rate:.1} msg/s)"
    );
    Ok(())
}
