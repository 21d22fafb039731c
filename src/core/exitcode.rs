// src/core/exitcode.rs

//! Stable process exit codes (§6). Implementations must keep this
//! numbering stable for script compatibility — never renumber an existing
//! variant, only add new ones.

use crate::core::errors::EngineError;

pub const SUCCESS: i32 = 0;
pub const BAD_CONFIG: i32 = 1;
pub const DB_CONNECTION: i32 = 6;
pub const DB_QUERY: i32 = 7;
pub const PROMOTION_FAILED: i32 = 8;
pub const FAILOVER_FAILED: i32 = 11;
pub const SWITCHOVER_FAILED: i32 = 18;
pub const OUT_OF_MEMORY: i32 = 21;
pub const REJOIN_FAILED: i32 = 24;
pub const NODE_STATUS: i32 = 25;
/// Not in the script-facing catalogue; reserved for
/// `InternalInvariantViolation` per §7's propagation policy.
pub const INTERNAL: i32 = 15;
/// Not in the script-facing catalogue; used when `degraded_monitoring_timeout`
/// elapses and the daemon terminates itself (§4.5 numeric semantics).
pub const DEGRADED_TIMEOUT: i32 = 26;

/// Maps an `EngineError` to the exit code a top-level `main` should use.
///
/// Only the top level ever calls `std::process::exit`; everywhere else
/// errors are bubbled up as `Result` (§9 re-architecture guidance).
pub fn for_error(err: &EngineError) -> i32 {
    match err {
        EngineError::ConfigInvalid(_) => BAD_CONFIG,
        EngineError::StoreUnavailable(_) => DB_CONNECTION,
        EngineError::PeerUnreachable(_) => DB_CONNECTION,
        EngineError::ElectionAborted(_) => FAILOVER_FAILED,
        EngineError::PromotionFailed(_) => PROMOTION_FAILED,
        EngineError::InternalInvariantViolation(_) => INTERNAL,
        EngineError::DegradedTimeoutExceeded(_) => DEGRADED_TIMEOUT,
        EngineError::Io(_) => DB_CONNECTION,
    }
}
