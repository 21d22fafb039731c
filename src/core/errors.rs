// src/core/errors.rs

//! The primary error type for the engine, following the taxonomy in §7.

use std::sync::Arc;
use thiserror::Error;

/// All possible failures within the failover decision engine.
///
/// `thiserror` gives clean `Display` impls and `From` conversions; the
/// process boundary (`main.rs`) maps each variant to a stable exit code
/// rather than wrapping it further.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Fatal at startup; never recoverable in-process.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Transient; retried by the store client with backoff, surfaced as
    /// `repmgrd_upstream_disconnect` if it persists past the configured window.
    #[error("metadata store unavailable: {0}")]
    StoreUnavailable(String),

    /// Expected during a partition; folded into quorum math, never fatal.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Benign; causes a transition back to `MONITORING`.
    #[error("election aborted: {0}")]
    ElectionAborted(String),

    /// Serious; the daemon goes to `DEGRADED` and releases the voting term.
    #[error("promotion failed: {0}")]
    PromotionFailed(String),

    /// A bug: an invariant the engine relies on did not hold. Logged, emitted
    /// as an event, and the process exits with code 15 from the top level.
    #[error("internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// `degraded_monitoring_timeout` elapsed while stuck in `DEGRADED`; the
    /// daemon terminates itself to surface the problem to a supervisor.
    #[error("degraded monitoring timeout exceeded: {0}")]
    DegradedTimeoutExceeded(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::PeerUnreachable(format!("malformed peer message: {e}"))
    }
}

impl From<tokio::time::error::Elapsed> for EngineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        EngineError::PeerUnreachable("operation timed out".to_string())
    }
}
