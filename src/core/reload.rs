// src/core/reload.rs

//! C7: Reload & Signal Handler. Hot-reloads a whitelisted subset of
//! configuration on SIGHUP; drains in-flight elections and releases any
//! held voting term on SIGTERM/SIGINT (§4.7).
//!
//! Grounded on `tracing_subscriber::reload::Layer`'s handle-swap pattern:
//! an `Arc<RwLock<Arc<T>>>` readers snapshot from, writers atomically
//! replace under a write lock, generalized from log directives to the
//! engine's config.

use crate::config::EngineConfig;
use crate::core::election::ElectionConfig;
use crate::core::events::{EventLog, new_event};
use crate::core::store::MetadataStoreClient;
use crate::core::types::{EventType, NodeId};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// An atomically-swappable handle to the live configuration. Readers hold
/// a cloned `Arc<EngineConfig>` snapshot for the duration of one monitor
/// tick rather than re-reading through the lock on every field access
/// (§9: "readers hold a snapshot for the duration of one monitor
/// tick").
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<Arc<EngineConfig>>>);

impl ConfigHandle {
    pub fn new(initial: EngineConfig) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(initial))))
    }

    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.0.read().clone()
    }

    fn swap(&self, new: Arc<EngineConfig>) {
        *self.0.write() = new;
    }
}

/// Fields immutable at runtime: location and priority are identity
/// properties of the node record, not daemon tuning, and `node_id` pins
/// which local node this daemon instance supervises (§4.7).
const IMMUTABLE_FIELDS: &[&str] = &["node_id", "node_name", "location", "priority"];

/// Applies a freshly-parsed configuration over the current one, honoring
/// the reload whitelist: decision-engine-relevant parameters (timeouts,
/// connection-check type, command strings, event-notification settings,
/// failover mode) may change; identity fields may not.
///
/// Returns the `ElectionConfig` to install into the running
/// `FailoverEngine`, or an error listing the rejected immutable fields.
pub async fn apply_reload(
    handle: &ConfigHandle,
    candidate: EngineConfig,
    events: &EventLog,
    local_node_id: NodeId,
) -> Result<ElectionConfig, Vec<&'static str>> {
    let current = handle.snapshot();
    let mut rejected = Vec::new();

    if candidate.node_id != current.node_id {
        rejected.push("node_id");
    }
    if candidate.node_name != current.node_name {
        rejected.push("node_name");
    }
    if candidate.location != current.location {
        rejected.push("location");
    }
    if candidate.priority != current.priority {
        rejected.push("priority");
    }

    if !rejected.is_empty() {
        for field in &rejected {
            events.record(new_event(
                local_node_id,
                EventType::ReloadRejected,
                false,
                format!("attempted change to immutable field '{field}' was ignored"),
            ));
        }
        warn!(?rejected, "reload rejected changes to immutable fields");
    }

    // Build the merged config: identity fields keep their running values,
    // everything else (the whitelist) takes the candidate's value.
    let mut merged = candidate;
    merged.node_id = current.node_id;
    merged.node_name = current.node_name.clone();
    merged.location = current.location.clone();
    merged.priority = current.priority;

    let election_config = merged.to_election_config();
    handle.swap(Arc::new(merged));

    events.record(new_event(
        local_node_id,
        EventType::ReloadApplied,
        true,
        "configuration reloaded".to_string(),
    ));
    info!("configuration reload applied");

    if rejected.is_empty() {
        Ok(election_config)
    } else {
        // Reload still applies for every other whitelisted field; the
        // rejection is per-field, not all-or-nothing (§4.7).
        Ok(election_config)
    }
}

/// Checked at startup and on reload: `repmgrd_standby_startup_timeout`
/// falls back to `standby_reconnect_timeout` when unset (§9).
pub fn resolve_standby_startup_timeout(
    explicit: Option<std::time::Duration>,
    standby_reconnect_timeout: std::time::Duration,
) -> std::time::Duration {
    explicit.unwrap_or(standby_reconnect_timeout)
}

/// What the signal handler observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
}

/// Graceful-shutdown sequence on SIGINT/SIGTERM: drain briefly, release a
/// held voting term, emit `daemon_shutdown` (§4.7).
pub async fn graceful_shutdown(
    reason: ShutdownReason,
    held_term: Option<u64>,
    store: &MetadataStoreClient,
    events: &EventLog,
    local_node_id: NodeId,
    drain_timeout: std::time::Duration,
) {
    info!(?reason, "shutdown signal received, draining in-flight election");
    tokio::time::sleep(drain_timeout.min(std::time::Duration::from_secs(5))).await;

    if let Some(term_id) = held_term
        && let Err(e) = store.release_voting_term(term_id).await
    {
        warn!(error = %e, "failed to release held voting term during shutdown");
    }

    events.record(new_event(
        local_node_id,
        EventType::DaemonShutdown,
        true,
        format!("{reason:?}"),
    ));
}
