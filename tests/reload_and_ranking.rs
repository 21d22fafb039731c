// tests/reload_and_ranking.rs
//
// Covers two cross-module properties that don't fit naturally as a single
// module's unit test: config hot-reload honoring the immutable-field
// whitelist end-to-end, and the candidate-ranking invariant holding over
// arbitrary inputs.

use clusterwarden::core::db::InMemoryDbConnector;
use clusterwarden::core::events::EventLog;
use clusterwarden::core::inspector::{CandidateRank, CandidateStanding};
use clusterwarden::core::reload::{apply_reload, ConfigHandle};
use clusterwarden::core::types::{Lsn, Node, NodeId, Role};
use proptest::prelude::*;
use std::sync::Arc;

fn minimal_config(node_id: u32, reconnect_attempts: &str) -> String {
    format!(
        "node_id = {node_id}\nnode_name = 'n{node_id}'\nconninfo = 'host=localhost'\n\
         data_directory = '/var/lib/db'\npromote_command = 'repmgr standby promote'\n\
         follow_command = 'repmgr standby follow'\nreconnect_attempts = {reconnect_attempts}\n"
    )
}

#[tokio::test]
async fn reload_applies_whitelisted_fields_and_rejects_identity_changes() {
    let initial = clusterwarden::config::parse_str(&minimal_config(1, "3")).unwrap();
    let handle = ConfigHandle::new(initial);
    let events = EventLog::new(Arc::new(InMemoryDbConnector::new()), None);

    // Candidate changes node_id (rejected) and reconnect_attempts (applied).
    let candidate = clusterwarden::config::parse_str(&minimal_config(2, "5")).unwrap();
    let election_config = apply_reload(&handle, candidate, &events, 1).await.unwrap();

    assert_eq!(handle.snapshot().node_id, 1, "identity field must not change");
    assert_eq!(election_config.reconnect_attempts, 5, "whitelisted field must apply");
    assert_eq!(handle.snapshot().reconnect_attempts, 5);
}

#[tokio::test]
async fn reloading_with_only_whitelisted_changes_is_idempotent() {
    let initial = clusterwarden::config::parse_str(&minimal_config(1, "3")).unwrap();
    let handle = ConfigHandle::new(initial);
    let events = EventLog::new(Arc::new(InMemoryDbConnector::new()), None);

    let same_again = clusterwarden::config::parse_str(&minimal_config(1, "3")).unwrap();
    let first = apply_reload(&handle, same_again.clone(), &events, 1).await.unwrap();
    let second = apply_reload(&handle, same_again, &events, 1).await.unwrap();

    assert_eq!(first.reconnect_attempts, second.reconnect_attempts);
    assert_eq!(handle.snapshot().node_id, 1);
}

fn arb_standing() -> impl Strategy<Value = CandidateStanding> {
    (1u32..20, 0u64..10_000, 0u32..5, 1u32..1000).prop_map(|(node_id, lsn, timeline, priority)| {
        CandidateStanding {
            node: Node {
                node_id: node_id as NodeId,
                name: format!("n{node_id}"),
                role: Role::Standby,
                location: "dc1".to_string(),
                priority,
                conninfo: "host=localhost".to_string(),
                upstream_node_id: Some(1),
                slot_name: None,
                active: true,
            },
            last_replayed_lsn: Lsn(lsn),
            timeline_id: timeline,
        }
    })
}

proptest! {
    /// Sorting is idempotent and always produces the best candidate (by
    /// LSN, then timeline, then priority, then lowest node_id) first,
    /// regardless of input order.
    #[test]
    fn candidate_rank_sort_puts_the_best_standing_first(mut standings in prop::collection::vec(arb_standing(), 1..12)) {
        CandidateRank::sort(&mut standings);

        for pair in standings.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let key = |s: &CandidateStanding| (s.last_replayed_lsn, s.timeline_id, s.node.priority);
            prop_assert!(
                key(a) >= key(b),
                "sorted standings must be non-increasing by (lsn, timeline, priority)"
            );
            if key(a) == key(b) {
                prop_assert!(a.node.node_id <= b.node.node_id, "ties must break by ascending node_id");
            }
        }

        let mut resorted = standings.clone();
        CandidateRank::sort(&mut resorted);
        let ids_before: Vec<_> = standings.iter().map(|s| s.node.node_id).collect();
        let ids_after: Vec<_> = resorted.iter().map(|s| s.node.node_id).collect();
        prop_assert_eq!(ids_before, ids_after, "sort must be idempotent");
    }
}
