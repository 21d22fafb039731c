// src/core/db.rs

//! `DbConnector`: the external-collaborator boundary standing in for the
//! DBMS's wire protocol and SQL text (deliberately out of scope — see §1).
//!
//! One narrow trait, a handful of short async methods, every call wrapped
//! in an explicit deadline. The real production implementation would open
//! a native driver connection; `InMemoryDbConnector` is a test double that
//! lets the engine run and be tested without a real DBMS.

use crate::core::types::{Event, Lsn, NodeId, VotingTermOutcome};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Error, Clone)]
pub enum DbError {
    #[error("connection refused")]
    ConnectionRefused,
    #[error("operation timed out")]
    Timeout,
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// The three probe strategies from §4.2, in increasing cost order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// ICMP-level reachability only; says nothing about DBMS health.
    Ping,
    /// Open a fresh connection+auth session, then tear it down.
    Connect,
    /// Open (or reuse) a session and run a trivial, deadline-bound query.
    Query,
}

/// A point-in-time replication snapshot for one node (§4.3).
#[derive(Debug, Clone)]
pub struct ReplicationState {
    pub is_in_recovery: bool,
    pub last_received_lsn: Option<Lsn>,
    pub last_replayed_lsn: Option<Lsn>,
    pub timeline_id: u32,
    pub upstream_application_name: Option<String>,
}

/// One pooled connection's worth of DBMS access, covering C2 (probing), C3
/// (replication inspection), and C4 (metadata store writes). Keeping these on
/// one trait mirrors issuing both a liveness check and a status query over a
/// single connection rather than modeling separate client types per concern.
#[async_trait]
pub trait DbConnector: Send + Sync {
    /// Probe a node's health at the given strategy, with a deadline.
    async fn probe(
        &self,
        node_id: NodeId,
        strategy: ProbeStrategy,
        deadline: Duration,
    ) -> Result<(), DbError>;

    /// Query a node's current replication state (C3).
    async fn replication_state(
        &self,
        node_id: NodeId,
        deadline: Duration,
    ) -> Result<ReplicationState, DbError>;

    /// Mark a node active/inactive in the metadata store (C4).
    async fn set_active(&self, node_id: NodeId, active: bool) -> Result<(), DbError>;

    /// Repoint a node's recorded upstream in the metadata store (C4).
    async fn set_upstream(&self, node_id: NodeId, upstream_id: NodeId) -> Result<(), DbError>;

    /// Attempt to acquire the singleton voting-term row. Succeeds only when
    /// `proposed_id` exceeds the current maximum (§3/§4.4).
    async fn acquire_voting_term(
        &self,
        proposed_id: u64,
        candidate_id: NodeId,
    ) -> Result<VotingTermOutcome, DbError>;

    /// Release a held voting term (used on `PromotionFailed` per §4.5 step 5d).
    async fn release_voting_term(&self, term_id: u64) -> Result<(), DbError>;

    /// Append a full event record; returns the assigned strictly-increasing
    /// id (the `id` field on `event` itself is a caller-side placeholder,
    /// not necessarily the one the store assigns).
    async fn append_event(&self, event: &Event) -> Result<u64, DbError>;
}

/// An in-memory `DbConnector` for tests and for running the daemon without a
/// real DBMS attached. Reachability and LSNs are injected by the caller
/// (typically a test harness driving the scenarios in §8).
pub struct InMemoryDbConnector {
    inner: Arc<AsyncMutex<InMemoryState>>,
}

struct InMemoryState {
    reachable: HashMap<NodeId, bool>,
    replication: HashMap<NodeId, ReplicationState>,
    current_term: u64,
    next_event_id: u64,
    events: Vec<Event>,
}

impl InMemoryDbConnector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AsyncMutex::new(InMemoryState {
                reachable: HashMap::new(),
                replication: HashMap::new(),
                current_term: 0,
                next_event_id: 1,
                events: Vec::new(),
            })),
        }
    }

    pub async fn set_reachable(&self, node_id: NodeId, reachable: bool) {
        self.inner.lock().await.reachable.insert(node_id, reachable);
    }

    pub async fn set_replication_state(&self, node_id: NodeId, state: ReplicationState) {
        self.inner.lock().await.replication.insert(node_id, state);
    }

    /// Every event recorded so far, in append order, for assertions in tests.
    pub async fn recorded_events(&self) -> Vec<Event> {
        self.inner.lock().await.events.clone()
    }
}

impl Default for InMemoryDbConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DbConnector for InMemoryDbConnector {
    async fn probe(
        &self,
        node_id: NodeId,
        _strategy: ProbeStrategy,
        _deadline: Duration,
    ) -> Result<(), DbError> {
        let state = self.inner.lock().await;
        if state.reachable.get(&node_id).copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(DbError::ConnectionRefused)
        }
    }

    async fn replication_state(
        &self,
        node_id: NodeId,
        _deadline: Duration,
    ) -> Result<ReplicationState, DbError> {
        let state = self.inner.lock().await;
        if !state.reachable.get(&node_id).copied().unwrap_or(false) {
            return Err(DbError::ConnectionRefused);
        }
        state
            .replication
            .get(&node_id)
            .cloned()
            .ok_or_else(|| DbError::QueryFailed("no replication state recorded".to_string()))
    }

    async fn set_active(&self, _node_id: NodeId, _active: bool) -> Result<(), DbError> {
        Ok(())
    }

    async fn set_upstream(&self, _node_id: NodeId, _upstream_id: NodeId) -> Result<(), DbError> {
        Ok(())
    }

    async fn acquire_voting_term(
        &self,
        proposed_id: u64,
        candidate_id: NodeId,
    ) -> Result<VotingTermOutcome, DbError> {
        let mut state = self.inner.lock().await;
        if proposed_id > state.current_term {
            state.current_term = proposed_id;
            Ok(VotingTermOutcome::Acquired)
        } else {
            Ok(VotingTermOutcome::LostTo(candidate_id))
        }
    }

    async fn release_voting_term(&self, _term_id: u64) -> Result<(), DbError> {
        Ok(())
    }

    async fn append_event(&self, event: &Event) -> Result<u64, DbError> {
        let mut state = self.inner.lock().await;
        let id = state.next_event_id;
        state.next_event_id += 1;
        let mut stored = event.clone();
        stored.id = id;
        state.events.push(stored);
        Ok(id)
    }
}
