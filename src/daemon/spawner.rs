// src/daemon/spawner.rs

//! Spawns the daemon's long-running tasks onto a `JoinSet`: one task per
//! concern, joined on a single set so a task dying surfaces immediately.

use crate::core::election::FailoverEngine;
use crate::core::errors::EngineError;
use crate::core::peer::{VisibilityOracle, run_peer_listener};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::error;

/// Spawns the monitor-tick loop and the peer-RPC listener, returning a
/// `JoinSet` the caller selects over alongside the signal-wait future. Either
/// task resolving to `Err` is a reason for the daemon to terminate.
pub fn spawn_tasks(engine: Arc<FailoverEngine>, tick_interval: Duration, peer_port: u16) -> JoinSet<Result<(), EngineError>> {
    let mut tasks = JoinSet::new();

    let monitor_engine = engine.clone();
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            ticker.tick().await;
            monitor_engine.check_recovered_primary_conflict().await;
            monitor_engine.monitor_tick().await;
            if monitor_engine.degraded_timeout_exceeded() {
                return Err(EngineError::DegradedTimeoutExceeded(
                    "remained DEGRADED past degraded_monitoring_timeout".to_string(),
                ));
            }
        }
    });

    let oracle: Arc<dyn VisibilityOracle> = engine;
    tasks.spawn(async move {
        run_peer_listener(peer_port, oracle).await.map_err(|e| {
            error!(error = %e, "peer RPC listener exited");
            EngineError::from(e)
        })
    });

    tasks
}
