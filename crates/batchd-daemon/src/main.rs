//! batchd daemon
//!
//! Loads the fleet configuration, connects to every node agent and runs the
//! scheduling loops until interrupted.
//!
//! The daemon ships with the in-process `MemoryStore`, seeded only with the
//! configured nodes. Batches and experiments reach the scheduler through a
//! submission front end sharing the store; a deployment backed by a database
//! replaces `open_store` with its own `Store` implementation.

use anyhow::Context;
use batchd_agent::{AgentRegistry, HttpNodeAgent};
use batchd_core::{DaemonConfig, LoggingConfig, Node, NodeState};
use batchd_scheduler::{Orchestrator, SchedulerContext, Triggers};
use batchd_store::{MemoryStore, Store};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// batchd - RAM-aware batch scheduler for a fleet of container nodes
#[derive(Parser, Debug)]
#[command(name = "batchd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(config: &LoggingConfig, level: Option<&str>) -> anyhow::Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) if level.is_none() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_new(level.unwrap_or(&config.level)),
    }
    .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let result = match config.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

/// Store the scheduling core reads and writes through
fn open_store() -> Arc<dyn Store> {
    Arc::new(MemoryStore::new())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    init_logging(&config.logging, args.log_level.as_deref())?;

    info!("Starting batchd v{}", env!("CARGO_PKG_VERSION"));

    let store = open_store();
    let triggers = Triggers::new();
    let mut agents = AgentRegistry::new();

    for node in &config.nodes {
        // Nodes start offline; the first inspection pass brings them up
        store
            .insert_node(Node::new(node.name.clone(), NodeState::Offline, node.ram))
            .await?;
        let agent = HttpNodeAgent::spawn(
            node.name.clone(),
            &node.url,
            store.clone(),
            triggers.scheduling.clone(),
            config.agent.timeout(),
        )?;
        agents.register(agent);
        info!(node = %node.name, url = %node.url, ram = node.ram, "Node registered");
    }

    if config.nodes.is_empty() {
        info!("No nodes configured");
    }

    let context = SchedulerContext::new(store, agents, &config.scheduling, &config.redaction);
    let handle = Orchestrator::start(context, triggers);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    handle.shutdown();

    Ok(())
}
