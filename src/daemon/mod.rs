// src/daemon/mod.rs

//! The daemon process mode: wires up every component (C1-C8) for one
//! locally-supervised node and runs until a termination signal arrives.
//!
//! Loads config, builds shared state, spawns the per-concern tasks on a
//! `JoinSet`, then blocks on whichever exits (or, here, on the
//! signal-wait future) first.

pub mod context;
pub mod signals;
pub mod spawner;

use crate::config::EngineConfig;
use crate::core::db::DbConnector;
use crate::core::directory::{NodeDirectory, NodeSource};
use crate::core::election::FailoverEngine;
use crate::core::errors::EngineError;
use crate::core::events::{EventLog, NotificationHook};
use crate::core::exitcode;
use crate::core::inspector::ReplicationInspector;
use crate::core::peer::TcpPeerClient;
use crate::core::prober::ConnectionProber;
use crate::core::promote::ProcessPromotionRunner;
use crate::core::reload::{ConfigHandle, ShutdownReason, apply_reload, graceful_shutdown};
use crate::core::store::MetadataStoreClient;
use context::DaemonContext;
use signals::SignalEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Runs the daemon to completion (i.e. until a termination signal), given
/// the two external collaborators the core deliberately does not
/// implement: the DBMS wire connection (`db`) and the node-table reader
/// (`node_source`), both out of scope per §1.
pub async fn run(
    config_path: PathBuf,
    db: Arc<dyn DbConnector>,
    node_source: Arc<dyn NodeSource>,
    peer_port: u16,
) -> Result<(), EngineError> {
    let config = crate::config::parse_file(&config_path).await?;
    info!(node_id = config.node_id, node_name = %config.node_name, "clusterwardend starting");

    let ctx = build_context(config_path.clone(), config, db, node_source, peer_port).await?;

    let mut tasks = spawner::spawn_tasks(ctx.engine.clone(), ctx.config_handle.snapshot().monitor_interval_secs, ctx.peer_port);

    loop {
        tokio::select! {
            event = signals::wait_for_signal() => {
                match event {
                    SignalEvent::Reload => {
                        if let Err(rejected) = reload(&ctx).await {
                            error!(?rejected, "configuration reload failed");
                        }
                    }
                    SignalEvent::Shutdown(reason) => {
                        shutdown(&ctx, reason).await;
                        tasks.shutdown().await;
                        return Ok(());
                    }
                }
            }
            Some(res) = tasks.join_next() => {
                match res {
                    Ok(Err(e)) => {
                        error!(error = %e, "a daemon task exited with an error, shutting down");
                        tasks.shutdown().await;
                        return Err(e);
                    }
                    Err(join_err) => {
                        error!(error = %join_err, "a daemon task panicked");
                    }
                    Ok(Ok(())) => {}
                }
            }
        }
    }
}

async fn build_context(
    config_path: PathBuf,
    config: EngineConfig,
    db: Arc<dyn DbConnector>,
    node_source: Arc<dyn NodeSource>,
    peer_port: u16,
) -> Result<DaemonContext, EngineError> {
    let store = Arc::new(MetadataStoreClient::new(db.clone()));
    let hook = config
        .event_notification_command
        .clone()
        .map(|command_template| NotificationHook { command_template });
    let events = Arc::new(EventLog::new(db.clone(), hook));

    let directory = Arc::new(NodeDirectory::new(node_source));
    directory.refresh().await?;

    let local_node = directory
        .get(config.node_id)
        .await
        .ok_or_else(|| EngineError::ConfigInvalid(format!("node_id {} not found in node directory", config.node_id)))?;
    let upstream_id = local_node
        .upstream_node_id
        .ok_or_else(|| EngineError::ConfigInvalid("local node has no upstream_node_id; is it a primary?".to_string()))?;

    let prober = Arc::new(ConnectionProber::new(db.clone(), config.monitor_interval_secs));
    let inspector = Arc::new(ReplicationInspector::new(db.clone()));
    let peer_client = Arc::new(TcpPeerClient);
    let promotion_runner = Arc::new(ProcessPromotionRunner);

    let engine = Arc::new(FailoverEngine::new(
        config.node_id,
        upstream_id,
        directory,
        prober,
        inspector,
        store.clone(),
        events.clone(),
        peer_client,
        promotion_runner,
        config.promotion_commands(),
        config.to_election_config(),
    ));

    let config_handle = ConfigHandle::new(config);

    Ok(DaemonContext {
        config_path,
        config_handle,
        engine,
        store,
        events,
        peer_port,
    })
}

async fn reload(ctx: &DaemonContext) -> Result<(), Vec<&'static str>> {
    let candidate = crate::config::parse_file(&ctx.config_path)
        .await
        .map_err(|_| vec!["<parse error, see logs>"])?;
    let election_config = apply_reload(&ctx.config_handle, candidate, &ctx.events, ctx.config_handle.snapshot().node_id).await?;
    ctx.engine.replace_config(election_config);
    Ok(())
}

async fn shutdown(ctx: &DaemonContext, reason: ShutdownReason) {
    graceful_shutdown(
        reason,
        ctx.engine.held_term(),
        &ctx.store,
        &ctx.events,
        ctx.config_handle.snapshot().node_id,
        std::time::Duration::from_secs(5),
    )
    .await;
}

/// Maps a top-level daemon failure to the process exit code (§7: only the
/// top level may terminate the process).
pub fn exit_code_for(err: &EngineError) -> i32 {
    exitcode::for_error(err)
}
