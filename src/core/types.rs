// src/core/types.rs

//! The core data model: `Node`, `NodeRuntimeState`, `VotingTerm`, `Event`.
//!
//! `Node` records are owned by the cluster metadata store; a daemon only ever
//! holds a read-through cache of them (see `core::directory`).
//! `NodeRuntimeState` is owned exclusively by the local daemon.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Cluster-unique node identifier. Always `>= 1`.
pub type NodeId = u32;

/// A 64-bit write-ahead-log position. Unsigned, strictly increasing per node
/// while that node is up. Never synthesize a zero to mean "unknown" — use
/// `Option<Lsn>` at call sites that can fail to observe a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    pub const ZERO: Lsn = Lsn(0);
}

/// The role a node plays in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Standby,
    Witness,
}

/// A registered node record, as stored in the cluster metadata table.
/// Never destroyed while a node exists physically; marked `active = false`
/// instead (see §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub name: String,
    pub role: Role,
    pub location: String,
    pub priority: u32,
    pub conninfo: String,
    pub upstream_node_id: Option<NodeId>,
    pub slot_name: Option<String>,
    pub active: bool,
}

impl Node {
    /// A witness never has physical replication state and is never a
    /// promotion candidate (§4.5).
    pub fn is_witness(&self) -> bool {
        self.role == Role::Witness
    }

    /// Nodes with `priority = 0` opt out of promotion (§4.5).
    pub fn is_candidate_eligible(&self) -> bool {
        !self.is_witness() && self.priority > 0 && self.active
    }
}

/// Whether a daemon currently believes a peer node is keeping up with
/// replication normally or has fallen behind/lost its upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringState {
    Normal,
    Degraded,
}

/// Per-node, per-daemon, in-memory observation. Created on first
/// observation, mutated by the prober/inspector, destroyed on daemon exit.
#[derive(Debug, Clone)]
pub struct NodeRuntimeState {
    pub last_seen: Instant,
    pub monitoring_state: MonitoringState,
    pub last_known_lsn: Option<Lsn>,
    pub reachable: bool,
    pub timeline_id: Option<u32>,
}

impl NodeRuntimeState {
    pub fn new() -> Self {
        Self {
            last_seen: Instant::now(),
            monitoring_state: MonitoringState::Normal,
            last_known_lsn: None,
            reachable: false,
            timeline_id: None,
        }
    }
}

impl Default for NodeRuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

/// A cluster-wide, singleton "right to run this election" row. Guarded by a
/// transactional upsert in the real metadata store; `term_id` must exceed the
/// current maximum for an acquisition to succeed (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingTerm {
    pub term_id: u64,
    pub candidate_node_id: NodeId,
}

/// The outcome of an `acquire_voting_term` attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotingTermOutcome {
    Acquired,
    LostTo(NodeId),
}

/// Stable event-type identifiers, named for scripting compatibility
/// (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StandbyClone,
    StandbyRegister,
    StandbyPromote,
    StandbyFollow,
    RepmgrdStart,
    RepmgrdShutdown,
    RepmgrdFailoverPromote,
    RepmgrdFailoverFollow,
    RepmgrdUpstreamDisconnect,
    RepmgrdReconnect,
    FailoverValidationFailed,
    PromoteFailed,
    /// Not a catalog-listed type but referenced by §8 scenario S2/S3.
    FailoverAbortedMinority,
    FailoverAbortedPrimaryVisible,
    ReloadApplied,
    ReloadRejected,
    DaemonShutdown,
    UpstreamLostSuspected,
}

/// An append-only cluster event record (§3 I4: `id` strictly
/// increasing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub node_id: NodeId,
    pub event_type: EventType,
    pub success: bool,
    /// Milliseconds since the Unix epoch; stamped by the caller so the type
    /// stays free of `std::time::SystemTime::now()` calls deep in the engine.
    pub timestamp_ms: u64,
    pub detail: String,
}
