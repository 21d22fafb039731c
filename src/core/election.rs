// src/core/election.rs

//! C5: Quorum & Election Engine — the central decision state machine.
//! Detects loss of the local upstream, polls peers to build a visibility
//! consensus, elects a promotion candidate by replication progress, drives
//! the promotion, and instructs the losing candidates to re-attach
//! (§4.5).
//!
//! A tick-driven loop feeds a per-daemon voter-set quorum: unlike a single
//! global quorum, each node's election only needs majority agreement
//! among its own siblings plus itself, so a partition can run its own
//! election on its own timeline without touching unrelated nodes.

use crate::core::db::ProbeStrategy;
use crate::core::directory::NodeDirectory;
use crate::core::errors::EngineError;
use crate::core::events::{EventLog, new_event};
use crate::core::inspector::{CandidateRank, CandidateStanding, ReplicationInspector};
use crate::core::peer::{PeerClient, PeerVisibility, VisibilityOracle};
use crate::core::prober::{ConnectionProber, ProbeResult};
use crate::core::promote::{PromotionCommands, PromotionRunner, execute_promotion};
use crate::core::store::MetadataStoreClient;
use crate::core::types::{EventType, Lsn, Node, NodeId, VotingTermOutcome};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// The election state machine's states (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    Monitoring,
    Suspect,
    Polling,
    Electing,
    Promoting,
    Following,
    Degraded,
}

/// Parameters governing the election algorithm. Everything here is a
/// candidate for hot-reload per §4.7; `EngineConfig` holds the
/// canonical copy and builds one of these on each reload.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub monitor_interval: Duration,
    pub async_query_timeout: Duration,
    pub primary_notification_timeout: Duration,
    pub primary_follow_timeout: Duration,
    pub promote_check_interval: Duration,
    pub promote_check_timeout: Duration,
    pub degraded_monitoring_timeout: Option<Duration>,
    pub primary_visibility_consensus: bool,
    /// Resolves the open question of whether a configured witness counts
    /// toward the voter-set denominator when computing majority. Defaults
    /// to excluding witnesses (see DESIGN.md).
    pub child_nodes_connected_include_witness: bool,
    pub failover_validation_command: Option<crate::core::shellcmd::ShellCommand>,
}

/// Majority threshold for a voter set of size `n`: strict majority,
/// `ceil(n/2 + 1)` per §4.5 step 3d, computed as `n/2 + 1` using
/// integer division (equivalent for all n >= 0).
fn majority(voter_set_size: usize) -> usize {
    voter_set_size / 2 + 1
}

/// One peer's poll result, gathered during the POLLING phase.
#[derive(Debug, Clone)]
struct PollResult {
    node_id: NodeId,
    reachable: bool,
    last_replayed_lsn: Option<Lsn>,
    timeline_id: Option<u32>,
    primary_visible: bool,
}

/// Drives one daemon's half of the distributed election. Each instance
/// supervises exactly one local node, per §5.
pub struct FailoverEngine {
    local_node_id: NodeId,
    local_upstream_id: NodeId,
    directory: Arc<NodeDirectory>,
    prober: Arc<ConnectionProber>,
    inspector: Arc<ReplicationInspector>,
    store: Arc<MetadataStoreClient>,
    events: Arc<EventLog>,
    peer_client: Arc<dyn PeerClient>,
    promotion_runner: Arc<dyn PromotionRunner>,
    commands: PromotionCommands,
    config: RwLock<ElectionConfig>,
    state: RwLock<ElectionState>,
    degraded_since: RwLock<Option<std::time::Instant>>,
    last_term_held: AtomicU64,
}

impl FailoverEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_node_id: NodeId,
        local_upstream_id: NodeId,
        directory: Arc<NodeDirectory>,
        prober: Arc<ConnectionProber>,
        inspector: Arc<ReplicationInspector>,
        store: Arc<MetadataStoreClient>,
        events: Arc<EventLog>,
        peer_client: Arc<dyn PeerClient>,
        promotion_runner: Arc<dyn PromotionRunner>,
        commands: PromotionCommands,
        config: ElectionConfig,
    ) -> Self {
        Self {
            local_node_id,
            local_upstream_id,
            directory,
            prober,
            inspector,
            store,
            events,
            peer_client,
            promotion_runner,
            commands,
            config: RwLock::new(config),
            state: RwLock::new(ElectionState::Monitoring),
            degraded_since: RwLock::new(None),
            last_term_held: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ElectionState {
        *self.state.read()
    }

    /// The voting term this daemon currently holds, if its last election
    /// attempt acquired one and it hasn't since been released.
    pub fn held_term(&self) -> Option<u64> {
        let term = self.last_term_held.load(Ordering::Acquire);
        (term > 0).then_some(term)
    }

    fn set_state(&self, new_state: ElectionState) {
        let mut state = self.state.write();
        if *state != new_state {
            info!(from = ?*state, to = ?new_state, node_id = self.local_node_id, "election state transition");
        }
        *state = new_state;
        if new_state == ElectionState::Degraded {
            *self.degraded_since.write() = Some(std::time::Instant::now());
        } else {
            *self.degraded_since.write() = None;
        }
    }

    fn config(&self) -> ElectionConfig {
        self.config.read().clone()
    }

    /// Atomically swaps in a new config, used by the reload handler (C7).
    pub fn replace_config(&self, new_config: ElectionConfig) {
        *self.config.write() = new_config;
    }

    /// Returns true once `degraded_monitoring_timeout` has elapsed while in
    /// DEGRADED, signalling the daemon should terminate itself
    /// (§4.5 numeric semantics).
    pub fn degraded_timeout_exceeded(&self) -> bool {
        let Some(timeout) = self.config().degraded_monitoring_timeout else {
            return false;
        };
        self.degraded_since
            .read()
            .map(|since| since.elapsed() > timeout)
            .unwrap_or(false)
    }

    /// Runs one monitoring tick. Only acts while in MONITORING; if already
    /// mid-election the caller should wait for that election to conclude
    /// (§5: at most one election in flight per daemon).
    pub async fn monitor_tick(&self) {
        if self.state() != ElectionState::Monitoring {
            return;
        }

        let cfg = self.config();
        let first_probe = self.prober.probe(self.local_upstream_id, ProbeStrategy::Ping).await;
        if first_probe == ProbeResult::Up {
            return;
        }

        self.set_state(ElectionState::Suspect);
        let result = self
            .prober
            .probe_with_retries(
                self.local_upstream_id,
                ProbeStrategy::Connect,
                cfg.reconnect_attempts,
                cfg.reconnect_interval,
                &self.events,
            )
            .await;

        if result == ProbeResult::Up {
            self.set_state(ElectionState::Monitoring);
            return;
        }

        self.events.record(new_event(
            self.local_node_id,
            EventType::UpstreamLostSuspected,
            true,
            format!("upstream node {} unreachable", self.local_upstream_id),
        ));
        self.set_state(ElectionState::Polling);

        if let Err(e) = self.run_election().await {
            warn!(error = %e, "election cycle ended with an error");
        }
    }

    /// The voter set V: every active standby of the cluster (excluding
    /// witnesses unless configured otherwise), plus the local node itself.
    async fn voter_set(&self) -> Vec<Node> {
        let cfg = self.config();
        let mut voters = self.directory.siblings_of(self.local_node_id).await;
        if cfg.child_nodes_connected_include_witness {
            voters.extend(self.directory.witnesses().await);
        }
        if let Some(me) = self.directory.get(self.local_node_id).await {
            voters.push(me);
        }
        voters
    }

    /// POLLING phase: fan out to every other voter, gather visibility, and
    /// decide whether to proceed to ELECTING, abort back to MONITORING, or
    /// give up to DEGRADED (§4.5 step 3).
    async fn run_election(&self) -> Result<(), EngineError> {
        let cfg = self.config();
        let voters = self.voter_set().await;
        let voter_set_size = voters.len();
        let needed = majority(voter_set_size);

        let mut results = Vec::with_capacity(voters.len());
        for voter in &voters {
            if voter.node_id == self.local_node_id {
                let local = self.local_visibility().await;
                results.push(PollResult {
                    node_id: self.local_node_id,
                    reachable: true,
                    last_replayed_lsn: local.last_replayed_lsn,
                    timeline_id: local.timeline_id,
                    primary_visible: local.primary_visible,
                });
                continue;
            }
            match self.peer_client.query_visibility(voter, cfg.async_query_timeout).await {
                Ok(v) => results.push(PollResult {
                    node_id: voter.node_id,
                    reachable: true,
                    last_replayed_lsn: v.last_replayed_lsn,
                    timeline_id: v.timeline_id,
                    primary_visible: v.primary_visible,
                }),
                Err(_) => results.push(PollResult {
                    node_id: voter.node_id,
                    reachable: false,
                    last_replayed_lsn: None,
                    timeline_id: None,
                    primary_visible: false,
                }),
            }
        }

        let visible_quorum = results.iter().filter(|r| r.reachable).count();
        if visible_quorum < needed {
            warn!(
                visible_quorum,
                needed, voter_set_size, "visible quorum below majority, aborting to DEGRADED"
            );
            self.events.record(new_event(
                self.local_node_id,
                EventType::FailoverAbortedMinority,
                true,
                format!("visible_quorum={visible_quorum} needed={needed}"),
            ));
            self.set_state(ElectionState::Degraded);
            return Ok(());
        }

        if cfg.primary_visibility_consensus && results.iter().any(|r| r.reachable && r.primary_visible) {
            info!("a reachable peer still sees the primary, aborting failover");
            self.events.record(new_event(
                self.local_node_id,
                EventType::FailoverAbortedPrimaryVisible,
                true,
                "a polled peer reports the primary is visible".to_string(),
            ));
            self.set_state(ElectionState::Monitoring);
            return Ok(());
        }

        self.set_state(ElectionState::Electing);
        self.run_election_phase(&voters, &results, cfg).await
    }

    /// ELECTING phase: rank candidates by LSN, acquire the voting term, and
    /// either promote (winner) or follow (loser) (§4.5 steps 4-6).
    async fn run_election_phase(
        &self,
        voters: &[Node],
        results: &[PollResult],
        cfg: ElectionConfig,
    ) -> Result<(), EngineError> {
        let mut standings = Vec::new();
        for voter in voters.iter().filter(|v| v.is_candidate_eligible()) {
            let Some(result) = results.iter().find(|r| r.node_id == voter.node_id) else {
                continue;
            };
            if !result.reachable {
                continue;
            }
            let Some(lsn) = result.last_replayed_lsn else {
                continue;
            };
            standings.push(CandidateStanding {
                node: voter.clone(),
                last_replayed_lsn: lsn,
                timeline_id: result.timeline_id.unwrap_or(0),
            });
        }
        CandidateRank::sort(&mut standings);

        let Some(winner) = standings.first() else {
            warn!("no eligible candidate found, aborting to DEGRADED");
            self.set_state(ElectionState::Degraded);
            return Ok(());
        };

        if winner.node.node_id != self.local_node_id {
            return self.run_following_phase(winner.node.node_id, cfg).await;
        }

        let proposed_term = self.last_term_held.load(Ordering::Acquire) + 1;
        match self.store.acquire_voting_term(proposed_term, self.local_node_id).await? {
            VotingTermOutcome::LostTo(other) => {
                info!(other, "lost the voting term race, returning to POLLING");
                self.set_state(ElectionState::Polling);
                return Ok(());
            }
            VotingTermOutcome::Acquired => {
                self.last_term_held.store(proposed_term, Ordering::Release);
            }
        }

        if let Some(validation) = &cfg.failover_validation_command {
            let outcome = crate::core::shellcmd::run_with_timeout(
                validation,
                cfg.async_query_timeout,
                Duration::from_secs(2),
            )
            .await;
            if !outcome.success {
                self.events.record(new_event(
                    self.local_node_id,
                    EventType::FailoverValidationFailed,
                    false,
                    outcome.stdout,
                ));
                self.store.release_voting_term(proposed_term).await.ok();
                self.last_term_held.store(0, Ordering::Release);
                self.set_state(ElectionState::Degraded);
                return Ok(());
            }
        }

        self.run_promotion_phase(proposed_term, cfg).await
    }

    /// PROMOTING phase, only on the winning node (§4.5 step 5). After the
    /// promote command exits successfully, polls the local node's own
    /// replication state at `promote_check_interval` until recovery has
    /// actually ended, up to `promote_check_timeout` (§4.5 step 5b) — the
    /// command's exit code alone says nothing about whether the DBMS has
    /// finished coming out of recovery.
    async fn run_promotion_phase(&self, held_term: u64, cfg: ElectionConfig) -> Result<(), EngineError> {
        self.set_state(ElectionState::Promoting);

        let command_result = execute_promotion(
            self.promotion_runner.as_ref(),
            &self.commands.promote_command,
            cfg.promote_check_timeout,
        )
        .await;

        let failure_detail = match command_result {
            Ok(_) => {
                if self.wait_for_recovery_ended(cfg.promote_check_interval, cfg.promote_check_timeout).await {
                    None
                } else {
                    Some("promote command exited successfully but recovery never ended".to_string())
                }
            }
            Err(e) => Some(e.to_string()),
        };

        let Some(detail) = failure_detail else {
            self.store.set_active(self.local_node_id, true).await?;
            self.store.set_upstream(self.local_node_id, self.local_node_id).await.ok();
            self.events.record(new_event(
                self.local_node_id,
                EventType::StandbyPromote,
                true,
                "promoted to primary".to_string(),
            ));
            self.events.record(new_event(
                self.local_node_id,
                EventType::RepmgrdFailoverPromote,
                true,
                format!("node:{}", self.local_node_id),
            ));
            self.set_state(ElectionState::Monitoring);
            return Ok(());
        };

        self.events.record(new_event(self.local_node_id, EventType::PromoteFailed, false, detail));
        self.store.release_voting_term(held_term).await.ok();
        self.last_term_held.store(0, Ordering::Release);
        self.set_state(ElectionState::Degraded);
        Ok(())
    }

    /// Polls this node's own replication state until `is_in_recovery` is
    /// false, checking every `interval` up to `timeout`. Returns false if
    /// the node's record can't be found, its state can't be inspected, or
    /// the timeout elapses first.
    async fn wait_for_recovery_ended(&self, interval: Duration, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(me) = self.directory.get(self.local_node_id).await
                && let Some(state) = self.inspector.inspect(&me).await
                && !state.is_in_recovery
            {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// FOLLOWING phase, on every non-winning node (§4.5 step 6).
    async fn run_following_phase(&self, new_primary_id: NodeId, cfg: ElectionConfig) -> Result<(), EngineError> {
        self.set_state(ElectionState::Following);

        let deadline = std::time::Instant::now() + cfg.primary_notification_timeout;
        let mut new_primary = None;
        while std::time::Instant::now() < deadline {
            if let Some(node) = self.directory.get(new_primary_id).await
                && node.active
            {
                new_primary = Some(node);
                break;
            }
            self.directory.refresh().await.ok();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        let Some(new_primary) = new_primary else {
            warn!(new_primary_id, "new primary never became visible, entering DEGRADED");
            self.set_state(ElectionState::Degraded);
            return Ok(());
        };

        if let Err(e) = execute_promotion(
            self.promotion_runner.as_ref(),
            &self.commands.follow_command,
            cfg.primary_follow_timeout,
        )
        .await
        {
            warn!(error = %e, "follow command failed, entering DEGRADED");
            self.set_state(ElectionState::Degraded);
            return Ok(());
        }

        let verify_deadline = std::time::Instant::now() + cfg.primary_follow_timeout;
        let mut attached = false;
        while std::time::Instant::now() < verify_deadline {
            if let Some(me) = self.directory.get(self.local_node_id).await {
                let repl = self.inspector.inspect(&me).await;
                if repl
                    .and_then(|r| r.upstream_application_name)
                    .map(|name| name == new_primary.name)
                    .unwrap_or(false)
                {
                    attached = true;
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        if !attached {
            warn!("could not verify attachment to new primary, entering DEGRADED");
            self.set_state(ElectionState::Degraded);
            return Ok(());
        }

        self.store.set_upstream(self.local_node_id, new_primary.node_id).await?;
        self.events.record(new_event(
            self.local_node_id,
            EventType::RepmgrdFailoverFollow,
            true,
            format!("node:{}", self.local_node_id),
        ));
        self.set_state(ElectionState::Monitoring);
        Ok(())
    }

    /// This daemon's own answer to "what is your replication state, and do
    /// you see the primary?" — used both to build the local `PollResult`
    /// during an election and to answer inbound peer queries via
    /// `VisibilityOracle`.
    async fn local_visibility(&self) -> PeerVisibility {
        let Some(me) = self.directory.get(self.local_node_id).await else {
            return PeerVisibility {
                last_replayed_lsn: None,
                timeline_id: None,
                primary_visible: false,
            };
        };
        let repl = self.inspector.inspect(&me).await;
        let primary_visible = self.prober.probe(self.local_upstream_id, ProbeStrategy::Ping).await == ProbeResult::Up;
        PeerVisibility {
            last_replayed_lsn: repl.as_ref().and_then(|r| r.last_replayed_lsn),
            timeline_id: repl.as_ref().map(|r| r.timeline_id),
            primary_visible,
        }
    }

    /// §4.5 point 7: a recovered original primary is never
    /// auto-reattached. Called on every tick regardless of election state;
    /// acts only when this node's own record is `active=false` but it is
    /// itself reachable again.
    pub async fn check_recovered_primary_conflict(&self) {
        let Some(me) = self.directory.get(self.local_node_id).await else {
            return;
        };
        if me.active {
            return;
        }
        if self.prober.probe(self.local_node_id, ProbeStrategy::Ping).await == ProbeResult::Up {
            warn!(
                node_id = self.local_node_id,
                "node is reachable but marked inactive after a completed failover; remaining DEGRADED pending administrative rejoin"
            );
            self.set_state(ElectionState::Degraded);
        }
    }
}

#[async_trait]
impl VisibilityOracle for FailoverEngine {
    async fn local_visibility(&self) -> PeerVisibility {
        FailoverEngine::local_visibility(self).await
    }
}
