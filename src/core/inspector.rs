// src/core/inspector.rs

//! C3: Replication Inspector. Queries each node's replication state and
//! ranks candidates for promotion (§4.3).

use crate::core::db::{DbConnector, DbError, ReplicationState};
use crate::core::types::{Lsn, Node, NodeId};
use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::time::Duration;

/// A snapshot of one node's replication standing, used for candidate
/// ranking during an election.
#[derive(Debug, Clone)]
pub struct CandidateStanding {
    pub node: Node,
    pub last_replayed_lsn: Lsn,
    pub timeline_id: u32,
}

/// Orders candidates from best to worst: highest replayed LSN wins, ties
/// broken by highest timeline, then highest configured priority, then
/// lowest node_id for determinism (§4.3 candidate ranking).
pub struct CandidateRank;

impl CandidateRank {
    pub fn compare(a: &CandidateStanding, b: &CandidateStanding) -> CmpOrdering {
        b.last_replayed_lsn
            .cmp(&a.last_replayed_lsn)
            .then_with(|| b.timeline_id.cmp(&a.timeline_id))
            .then_with(|| b.node.priority.cmp(&a.node.priority))
            .then_with(|| a.node.node_id.cmp(&b.node.node_id))
    }

    /// Sorts `candidates` best-first in place.
    pub fn sort(candidates: &mut [CandidateStanding]) {
        candidates.sort_by(Self::compare);
    }
}

const REPLICATION_QUERY_DEADLINE: Duration = Duration::from_secs(5);

/// Queries nodes for their current replication state via the `DbConnector`
/// boundary, folding an unreachable/failed query into `None` rather than an
/// error — an election must proceed around nodes it cannot currently reach.
pub struct ReplicationInspector {
    db: Arc<dyn DbConnector>,
}

impl ReplicationInspector {
    pub fn new(db: Arc<dyn DbConnector>) -> Self {
        Self { db }
    }

    pub async fn inspect(&self, node: &Node) -> Option<ReplicationState> {
        match self.db.replication_state(node.node_id, REPLICATION_QUERY_DEADLINE).await {
            Ok(state) => Some(state),
            Err(DbError::Timeout) | Err(DbError::ConnectionRefused) | Err(DbError::QueryFailed(_)) => None,
        }
    }

    /// Inspects every eligible candidate and returns a best-first ranked
    /// list. Candidates that cannot be reached are dropped: an unreachable
    /// node cannot be promoted regardless of how far ahead it might be.
    pub async fn rank_candidates(&self, nodes: &[Node]) -> Vec<CandidateStanding> {
        let mut standings = Vec::new();
        for node in nodes.iter().filter(|n| n.is_candidate_eligible()) {
            if let Some(state) = self.inspect(node).await {
                standings.push(CandidateStanding {
                    node: node.clone(),
                    last_replayed_lsn: state.last_replayed_lsn.unwrap_or(Lsn::ZERO),
                    timeline_id: state.timeline_id,
                });
            }
        }
        CandidateRank::sort(&mut standings);
        standings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Role;

    fn node(id: NodeId, priority: u32) -> Node {
        Node {
            node_id: id,
            name: format!("n{id}"),
            role: Role::Standby,
            location: "dc1".into(),
            priority,
            conninfo: "host=localhost".into(),
            upstream_node_id: Some(1),
            slot_name: None,
            active: true,
        }
    }

    fn standing(id: NodeId, lsn: u64, timeline: u32, priority: u32) -> CandidateStanding {
        CandidateStanding {
            node: node(id, priority),
            last_replayed_lsn: Lsn(lsn),
            timeline_id: timeline,
        }
    }

    #[test]
    fn higher_lsn_wins_regardless_of_priority() {
        let mut candidates = vec![standing(2, 100, 1, 100), standing(3, 200, 1, 50)];
        CandidateRank::sort(&mut candidates);
        assert_eq!(candidates[0].node.node_id, 3);
    }

    #[test]
    fn ties_broken_by_priority_then_node_id() {
        let mut candidates = vec![standing(5, 100, 1, 50), standing(2, 100, 1, 50), standing(3, 100, 1, 100)];
        CandidateRank::sort(&mut candidates);
        // node 3 wins on priority; nodes 2 and 5 tie on priority, 2 wins on node_id.
        assert_eq!(candidates[0].node.node_id, 3);
        assert_eq!(candidates[1].node.node_id, 2);
        assert_eq!(candidates[2].node.node_id, 5);
    }

    #[tokio::test]
    async fn unreachable_candidates_are_excluded_from_ranking() {
        let db = Arc::new(crate::core::db::InMemoryDbConnector::new());
        db.set_reachable(2, true).await;
        db.set_replication_state(
            2,
            ReplicationState {
                is_in_recovery: true,
                last_received_lsn: Some(Lsn(10)),
                last_replayed_lsn: Some(Lsn(10)),
                timeline_id: 1,
                upstream_application_name: None,
            },
        )
        .await;
        // node 3 left unreachable.
        let inspector = ReplicationInspector::new(db);
        let ranked = inspector.rank_candidates(&[node(2, 100), node(3, 100)]).await;
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].node.node_id, 2);
    }
}
