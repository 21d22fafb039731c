// src/cli.rs

//! Typed request boundary for the administrative CLI (§6). Flag
//! parsing, help text, and usage formatting are the CLI front-end's own
//! concern and out of scope here; this module only defines the requests
//! the core accepts and the exit-code-bearing result it returns.

use crate::core::exitcode;
use crate::core::types::NodeId;

#[derive(Debug, Clone)]
pub enum PrimaryRequest {
    Register { node_id: NodeId },
    Unregister { node_id: NodeId },
}

#[derive(Debug, Clone)]
pub enum StandbyRequest {
    Register { node_id: NodeId, upstream_node_id: NodeId },
    Unregister { node_id: NodeId },
    Clone { node_id: NodeId, upstream_node_id: NodeId },
    Promote { node_id: NodeId },
    Follow { node_id: NodeId, upstream_node_id: NodeId },
}

#[derive(Debug, Clone)]
pub enum NodeRequest {
    Rejoin { node_id: NodeId, upstream_node_id: NodeId },
    Check { node_id: NodeId },
    Status { node_id: NodeId },
    Service { node_id: NodeId, action: ServiceAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
}

#[derive(Debug, Clone)]
pub enum ClusterRequest {
    Show,
    Event,
    Matrix,
    Crosscheck,
    Cleanup,
}

#[derive(Debug, Clone)]
pub enum DaemonRequest {
    Start,
    Stop,
    Pause,
}

#[derive(Debug, Clone)]
pub enum Request {
    Primary(PrimaryRequest),
    Standby(StandbyRequest),
    Node(NodeRequest),
    Cluster(ClusterRequest),
    Daemon(DaemonRequest),
}

/// The result of dispatching a `Request`: a human-readable summary plus
/// the exit code the CLI front-end should return to its shell
/// (§6: "the CLI returns an exit code matching the error taxonomy").
pub struct RequestOutcome {
    pub summary: String,
    pub exit_code: i32,
}

impl RequestOutcome {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            exit_code: exitcode::SUCCESS,
        }
    }

    pub fn from_error(err: &crate::core::errors::EngineError) -> Self {
        Self {
            summary: err.to_string(),
            exit_code: exitcode::for_error(err),
        }
    }
}
