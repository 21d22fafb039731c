// src/core/prober.rs

//! C2: Connection Prober. Probe results are cached for no longer than one
//! monitor tick; `reconnect_attempts` x `reconnect_interval` governs how long
//! a transient failure is tolerated before being declared genuine
//! (§4.2).

use crate::core::db::{DbConnector, ProbeStrategy};
use crate::core::events::{EventLog, new_event};
use crate::core::types::{EventType, NodeId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    Up,
    Down,
    Unknown,
}

struct CacheEntry {
    observed_at: Instant,
    result: ProbeResult,
}

/// Wraps a `DbConnector` with a one-tick probe cache and the
/// reconnect-attempts retry loop from §4.2.
pub struct ConnectionProber {
    db: Arc<dyn DbConnector>,
    cache: DashMap<NodeId, CacheEntry>,
    cache_ttl: Duration,
}

impl ConnectionProber {
    pub fn new(db: Arc<dyn DbConnector>, monitor_interval: Duration) -> Self {
        Self {
            db,
            cache: DashMap::new(),
            cache_ttl: monitor_interval,
        }
    }

    /// A single probe attempt at the given strategy, respecting the cache.
    pub async fn probe(&self, node_id: NodeId, strategy: ProbeStrategy) -> ProbeResult {
        if let Some(entry) = self.cache.get(&node_id)
            && entry.observed_at.elapsed() < self.cache_ttl
        {
            return entry.result;
        }

        let result = match self.db.probe(node_id, strategy, Duration::from_secs(5)).await {
            Ok(()) => ProbeResult::Up,
            Err(_) => ProbeResult::Down,
        };

        self.cache.insert(
            node_id,
            CacheEntry {
                observed_at: Instant::now(),
                result,
            },
        );
        result
    }

    /// Retries `probe` up to `reconnect_attempts` times, spaced by
    /// `reconnect_interval`. `reconnect_attempts = 0` means "fail immediately"
    /// with no retries (§4.5 numeric semantics).
    ///
    /// On a successful probe after at least one prior failure, emits an
    /// `unreachable_elapsed` event carrying how long the node was down.
    pub async fn probe_with_retries(
        &self,
        node_id: NodeId,
        strategy: ProbeStrategy,
        reconnect_attempts: u32,
        reconnect_interval: Duration,
        events: &EventLog,
    ) -> ProbeResult {
        let became_unreachable_at = Instant::now();
        let mut attempts_made = 0u32;
        let mut last = ProbeResult::Unknown;

        loop {
            last = self.probe(node_id, strategy).await;
            attempts_made += 1;
            if last == ProbeResult::Up {
                if attempts_made > 1 {
                    let elapsed = became_unreachable_at.elapsed();
                    events.record(new_event(
                        node_id,
                        EventType::RepmgrdReconnect,
                        true,
                        format!("unreachable_elapsed={}ms", elapsed.as_millis()),
                    ));
                }
                return last;
            }
            if attempts_made > reconnect_attempts {
                break;
            }
            debug!(node_id, attempts_made, "probe failed, retrying");
            tokio::time::sleep(reconnect_interval).await;
        }
        last
    }
}
