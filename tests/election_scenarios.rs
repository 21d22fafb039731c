// tests/election_scenarios.rs
//
// Drives `FailoverEngine` end-to-end through `monitor_tick`, the scenarios
// loosely matching §8 S1-S3 and S6: a clean winner promotion, a
// loser following the new primary, a minority partition aborting to
// DEGRADED, and a failed promote command.
//
// Peers are answered by a `ScriptedPeerClient` fixed up front rather than by
// wiring two live `FailoverEngine`s together over real sockets; the wire
// round-trip itself is already covered by `core::peer`'s own test.

use async_trait::async_trait;
use clusterwarden::core::db::{DbConnector, InMemoryDbConnector, ReplicationState};
use clusterwarden::core::directory::{NodeDirectory, NodeSource};
use clusterwarden::core::election::{ElectionConfig, ElectionState, FailoverEngine};
use clusterwarden::core::errors::EngineError;
use clusterwarden::core::events::EventLog;
use clusterwarden::core::inspector::ReplicationInspector;
use clusterwarden::core::peer::{PeerClient, PeerError, PeerVisibility};
use clusterwarden::core::prober::ConnectionProber;
use clusterwarden::core::promote::{PromotionCommands, ProcessPromotionRunner};
use clusterwarden::core::shellcmd::ShellCommand;
use clusterwarden::core::store::MetadataStoreClient;
use clusterwarden::core::types::{Lsn, Node, NodeId, Role};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn node(id: NodeId, name: &str, role: Role, priority: u32, upstream: Option<NodeId>, active: bool) -> Node {
    Node {
        node_id: id,
        name: name.to_string(),
        role,
        location: "dc1".to_string(),
        priority,
        conninfo: format!("host=node{id}"),
        upstream_node_id: upstream,
        slot_name: Some(format!("slot_{id}")),
        active,
    }
}

struct FixedSource(Vec<Node>);

#[async_trait]
impl NodeSource for FixedSource {
    async fn fetch_all(&self) -> Result<Vec<Node>, EngineError> {
        Ok(self.0.clone())
    }
}

/// A peer transport whose answers are fixed up front, standing in for the
/// other daemons in the cluster without opening real sockets between them.
struct ScriptedPeerClient {
    answers: HashMap<NodeId, Result<PeerVisibility, PeerError>>,
}

impl ScriptedPeerClient {
    fn new() -> Self {
        Self { answers: HashMap::new() }
    }

    fn respond(mut self, node_id: NodeId, visibility: PeerVisibility) -> Self {
        self.answers.insert(node_id, Ok(visibility));
        self
    }

    fn unreachable(mut self, node_id: NodeId) -> Self {
        self.answers.insert(node_id, Err(PeerError::Unreachable("no route".to_string())));
        self
    }
}

#[async_trait]
impl PeerClient for ScriptedPeerClient {
    async fn query_visibility(&self, peer: &Node, _deadline: Duration) -> Result<PeerVisibility, PeerError> {
        self.answers
            .get(&peer.node_id)
            .cloned()
            .unwrap_or(Err(PeerError::Unreachable("unscripted peer".to_string())))
    }
}

fn fast_config(extra: impl FnOnce(&mut ElectionConfig)) -> ElectionConfig {
    let mut cfg = ElectionConfig {
        reconnect_attempts: 0,
        reconnect_interval: Duration::from_millis(10),
        monitor_interval: Duration::from_millis(10),
        async_query_timeout: Duration::from_secs(1),
        primary_notification_timeout: Duration::from_millis(500),
        primary_follow_timeout: Duration::from_millis(500),
        promote_check_interval: Duration::from_millis(10),
        promote_check_timeout: Duration::from_secs(2),
        degraded_monitoring_timeout: None,
        primary_visibility_consensus: false,
        child_nodes_connected_include_witness: false,
        failover_validation_command: None,
    };
    extra(&mut cfg);
    cfg
}

async fn build_engine(
    local_node_id: NodeId,
    local_upstream_id: NodeId,
    nodes: Vec<Node>,
    db: Arc<InMemoryDbConnector>,
    peer_client: ScriptedPeerClient,
    config: ElectionConfig,
) -> Arc<FailoverEngine> {
    let directory = Arc::new(NodeDirectory::new(Arc::new(FixedSource(nodes))));
    directory.refresh().await.unwrap();

    let store = Arc::new(MetadataStoreClient::new(db.clone() as Arc<dyn DbConnector>));
    let events = Arc::new(EventLog::new(db.clone() as Arc<dyn DbConnector>, None));
    let prober = Arc::new(ConnectionProber::new(db.clone() as Arc<dyn DbConnector>, Duration::from_millis(10)));
    let inspector = Arc::new(ReplicationInspector::new(db.clone() as Arc<dyn DbConnector>));

    let commands = PromotionCommands {
        promote_command: ShellCommand::parse("/bin/true"),
        follow_command: ShellCommand::parse("/bin/true"),
        rejoin_command: None,
    };

    Arc::new(FailoverEngine::new(
        local_node_id,
        local_upstream_id,
        directory,
        prober,
        inspector,
        store,
        events,
        Arc::new(peer_client),
        Arc::new(ProcessPromotionRunner),
        commands,
        config,
    ))
}

/// S1 (winner side): the node with the highest replayed LSN wins even
/// though a sibling holds higher `priority`, promotes, and returns to
/// MONITORING.
#[tokio::test]
async fn highest_lsn_candidate_wins_and_promotes() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);
    let standby_b = node(3, "standby-b", Role::Standby, 80, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await; // primary down
    db.set_reachable(3, true).await; // local node (standby-b) itself
    db.set_replication_state(
        3,
        ReplicationState {
            // Recovery has already ended by the time the engine probes its
            // own state post-promote-command, so `wait_for_recovery_ended`
            // succeeds on its first check.
            is_in_recovery: false,
            last_received_lsn: Some(Lsn(1100)),
            last_replayed_lsn: Some(Lsn(1100)),
            timeline_id: 1,
            upstream_application_name: Some("primary".to_string()),
        },
    )
    .await;

    let peers = ScriptedPeerClient::new().respond(
        2,
        PeerVisibility {
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: Some(1),
            primary_visible: false,
        },
    );

    let engine = build_engine(
        3,
        1,
        vec![primary, standby_a, standby_b],
        db,
        peers,
        fast_config(|_| {}),
    )
    .await;

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Monitoring);
    assert_eq!(engine.held_term(), Some(1));
}

/// S1 (loser side): the same cluster, driven from standby-a's perspective.
/// It loses the rank to standby-b and follows the new primary once the
/// directory shows it active and replication attaches to it.
#[tokio::test]
async fn lower_lsn_candidate_follows_new_primary() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);
    let standby_b = node(3, "standby-b", Role::Standby, 80, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await;
    db.set_reachable(2, true).await; // local node (standby-a) itself
    db.set_replication_state(
        2,
        ReplicationState {
            is_in_recovery: true,
            last_received_lsn: Some(Lsn(1000)),
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: 1,
            upstream_application_name: Some("standby-b".to_string()),
        },
    )
    .await;

    let peers = ScriptedPeerClient::new().respond(
        3,
        PeerVisibility {
            last_replayed_lsn: Some(Lsn(1100)),
            timeline_id: Some(1),
            primary_visible: false,
        },
    );

    let engine = build_engine(
        2,
        1,
        vec![primary, standby_a, standby_b],
        db,
        peers,
        fast_config(|_| {}),
    )
    .await;

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Monitoring);
    assert_eq!(engine.held_term(), None);
}

/// S2: a standby isolated from every other voter cannot reach a majority
/// and must abort to DEGRADED rather than promote itself unilaterally.
#[tokio::test]
async fn minority_partition_aborts_to_degraded() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);
    let standby_b = node(3, "standby-b", Role::Standby, 80, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await;
    db.set_reachable(2, true).await;
    db.set_replication_state(
        2,
        ReplicationState {
            is_in_recovery: true,
            last_received_lsn: Some(Lsn(1000)),
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: 1,
            upstream_application_name: Some("primary".to_string()),
        },
    )
    .await;

    let peers = ScriptedPeerClient::new().unreachable(3);

    let engine = build_engine(
        2,
        1,
        vec![primary, standby_a, standby_b],
        db,
        peers,
        fast_config(|_| {}),
    )
    .await;

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Degraded);
}

/// S3: a witness counts toward the quorum denominator when configured to,
/// and a reachable witness reporting the primary visible aborts the
/// failover back to MONITORING instead of promoting.
#[tokio::test]
async fn witness_reporting_primary_visible_aborts_failover() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);
    let standby_b = node(3, "standby-b", Role::Standby, 80, Some(1), true);
    let witness = node(4, "witness", Role::Witness, 0, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await;
    db.set_reachable(2, true).await;
    db.set_replication_state(
        2,
        ReplicationState {
            is_in_recovery: true,
            last_received_lsn: Some(Lsn(1000)),
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: 1,
            upstream_application_name: Some("primary".to_string()),
        },
    )
    .await;

    let peers = ScriptedPeerClient::new().unreachable(3).respond(
        4,
        PeerVisibility {
            last_replayed_lsn: None,
            timeline_id: None,
            primary_visible: true,
        },
    );

    let engine = build_engine(
        2,
        1,
        vec![primary, standby_a, standby_b, witness],
        db,
        peers,
        fast_config(|cfg| {
            cfg.primary_visibility_consensus = true;
            cfg.child_nodes_connected_include_witness = true;
        }),
    )
    .await;

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Monitoring);
    assert_eq!(engine.held_term(), None);
}

/// S6: a winning candidate whose promote command fails never reports
/// itself active and instead falls back to DEGRADED, releasing the term it
/// had acquired.
#[tokio::test]
async fn failed_promote_command_falls_back_to_degraded() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await;
    db.set_reachable(2, true).await;
    db.set_replication_state(
        2,
        ReplicationState {
            is_in_recovery: true,
            last_received_lsn: Some(Lsn(1000)),
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: 1,
            upstream_application_name: Some("primary".to_string()),
        },
    )
    .await;

    let directory = Arc::new(NodeDirectory::new(Arc::new(FixedSource(vec![primary, standby_a]))));
    directory.refresh().await.unwrap();

    let store = Arc::new(MetadataStoreClient::new(db.clone() as Arc<dyn DbConnector>));
    let events = Arc::new(EventLog::new(db.clone() as Arc<dyn DbConnector>, None));
    let prober = Arc::new(ConnectionProber::new(db.clone() as Arc<dyn DbConnector>, Duration::from_millis(10)));
    let inspector = Arc::new(ReplicationInspector::new(db.clone() as Arc<dyn DbConnector>));

    let commands = PromotionCommands {
        promote_command: ShellCommand::parse("/bin/false"),
        follow_command: ShellCommand::parse("/bin/true"),
        rejoin_command: None,
    };

    let engine = Arc::new(FailoverEngine::new(
        2,
        1,
        directory,
        prober,
        inspector,
        store,
        events,
        Arc::new(ScriptedPeerClient::new()),
        Arc::new(ProcessPromotionRunner),
        commands,
        fast_config(|_| {}),
    ));

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Degraded);
    assert_eq!(engine.held_term(), None);
}

/// `degraded_monitoring_timeout` bounds how long a daemon may sit in
/// DEGRADED: once it elapses, `degraded_timeout_exceeded` flips true so the
/// monitor-tick loop can terminate the daemon.
#[tokio::test]
async fn degraded_timeout_exceeded_flips_true_only_after_the_configured_window() {
    let primary = node(1, "primary", Role::Primary, 0, None, true);
    let standby_a = node(2, "standby-a", Role::Standby, 100, Some(1), true);
    let standby_b = node(3, "standby-b", Role::Standby, 80, Some(1), true);

    let db = Arc::new(InMemoryDbConnector::new());
    db.set_reachable(1, false).await;
    db.set_reachable(2, true).await;
    db.set_replication_state(
        2,
        ReplicationState {
            is_in_recovery: true,
            last_received_lsn: Some(Lsn(1000)),
            last_replayed_lsn: Some(Lsn(1000)),
            timeline_id: 1,
            upstream_application_name: Some("primary".to_string()),
        },
    )
    .await;

    // standby-b unreachable too: visible quorum stays below majority and the
    // engine aborts straight to DEGRADED, same as minority_partition_aborts_to_degraded.
    let peers = ScriptedPeerClient::new().unreachable(3);

    let engine = build_engine(
        2,
        1,
        vec![primary, standby_a, standby_b],
        db,
        peers,
        fast_config(|cfg| {
            cfg.degraded_monitoring_timeout = Some(Duration::from_millis(50));
        }),
    )
    .await;

    engine.monitor_tick().await;
    assert_eq!(engine.state(), ElectionState::Degraded);
    assert!(!engine.degraded_timeout_exceeded());

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(engine.degraded_timeout_exceeded());
}
