// src/main.rs

//! Entry point for `clusterwardend`: the always-on monitoring daemon
//! (§2). The CLI front-end's flag parsing and subcommand dispatch
//! are out of scope (§1); this binary only distinguishes daemon
//! mode from a version query, and a `--nodes` bootstrap source standing in
//! for the real metadata-table read until a DBMS driver is wired in.

use async_trait::async_trait;
use clusterwarden::core::db::InMemoryDbConnector;
use clusterwarden::core::directory::NodeSource;
use clusterwarden::core::errors::EngineError;
use clusterwarden::core::types::Node;
use clusterwarden::daemon;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--version") {
        println!("clusterwardend version {VERSION}");
        return 0;
    }

    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("clusterwarden.conf"));

    let nodes_path = args
        .iter()
        .position(|a| a == "--nodes")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let peer_port: u16 = args
        .iter()
        .position(|a| a == "--peer-port")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(7480);

    let db = Arc::new(InMemoryDbConnector::new());
    let node_source: Arc<dyn NodeSource> = match nodes_path {
        Some(path) => Arc::new(JsonFileNodeSource { path }),
        None => {
            eprintln!("clusterwardend: --nodes <path> is required until a DBMS driver is wired in");
            return clusterwarden::core::exitcode::BAD_CONFIG;
        }
    };

    match daemon::run(config_path, db, node_source, peer_port).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "daemon exited with an error");
            daemon::exit_code_for(&e)
        }
    }
}

/// Bootstraps the node directory from a JSON file of `Node` records. This
/// stands in for the real metadata-table read (out of scope
/// (§1) until a concrete DBMS driver is plugged into `DbConnector`.
struct JsonFileNodeSource {
    path: PathBuf,
}

#[async_trait]
impl NodeSource for JsonFileNodeSource {
    async fn fetch_all(&self) -> Result<Vec<Node>, EngineError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::StoreUnavailable(format!("failed to read nodes file: {e}")))?;
        serde_json::from_str(&raw).map_err(|e| EngineError::StoreUnavailable(format!("invalid nodes file: {e}")))
    }
}
