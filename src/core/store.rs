// src/core/store.rs

//! C4: Metadata Store Client. A thin wrapper over `DbConnector` that adds
//! the one piece of policy this component owns: once the store is judged
//! unavailable, writes are refused outright rather than retried silently,
//! so callers see a clear `StoreUnavailable` instead of a hang
//! (§4.4).

use crate::core::db::{DbConnector, DbError};
use crate::core::errors::EngineError;
use crate::core::types::{NodeId, VotingTermOutcome};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Wraps a `DbConnector` for the metadata-store-writing concerns of the
/// engine: node activation/upstream changes and the voting-term CAS.
pub struct MetadataStoreClient {
    db: Arc<dyn DbConnector>,
    blocked: AtomicBool,
}

impl MetadataStoreClient {
    pub fn new(db: Arc<dyn DbConnector>) -> Self {
        Self {
            db,
            blocked: AtomicBool::new(false),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Re-arms the client after an operator has confirmed the store is
    /// reachable again (§4.4: blocking is not self-healing).
    pub fn unblock(&self) {
        self.blocked.store(false, Ordering::Release);
    }

    fn guard(&self) -> Result<(), EngineError> {
        if self.blocked.load(Ordering::Acquire) {
            return Err(EngineError::StoreUnavailable(
                "metadata store write refused: client is blocked after a prior failure".to_string(),
            ));
        }
        Ok(())
    }

    fn map_err(&self, err: DbError) -> EngineError {
        self.blocked.store(true, Ordering::Release);
        EngineError::StoreUnavailable(err.to_string())
    }

    pub async fn set_active(&self, node_id: NodeId, active: bool) -> Result<(), EngineError> {
        self.guard()?;
        self.db
            .set_active(node_id, active)
            .await
            .map_err(|e| self.map_err(e))
    }

    pub async fn set_upstream(&self, node_id: NodeId, upstream_id: NodeId) -> Result<(), EngineError> {
        self.guard()?;
        self.db
            .set_upstream(node_id, upstream_id)
            .await
            .map_err(|e| self.map_err(e))
    }

    pub async fn acquire_voting_term(
        &self,
        proposed_id: u64,
        candidate_id: NodeId,
    ) -> Result<VotingTermOutcome, EngineError> {
        self.guard()?;
        self.db
            .acquire_voting_term(proposed_id, candidate_id)
            .await
            .map_err(|e| self.map_err(e))
    }

    pub async fn release_voting_term(&self, term_id: u64) -> Result<(), EngineError> {
        self.guard()?;
        self.db
            .release_voting_term(term_id)
            .await
            .map_err(|e| self.map_err(e))
    }
}
