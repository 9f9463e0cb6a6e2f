//! The PBFT round driver.
//!
//! One [`PbftEngine`] per validator node. [`PbftEngine::run_round`] drives a
//! single block through pre-prepare, prepare and commit against the local
//! chain and mempool; [`PbftEngine::handle_message`] feeds inbound peer
//! traffic into the logs the round waits on. The two run concurrently and
//! meet only through [`PrePrepareLog`] and the two [`VoteLog`]s.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prioria_chain::Blockchain;
use prioria_core::time::now_millis;
use prioria_core::{Block, KeyPair, LedgerEntry, PublicKey};
use prioria_mempool::{Mempool, MempoolError};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ConfigError, ConsensusError, VotePhase};
use crate::events::FinalizationSink;
use crate::message::{NetMessage, PbftKind, PbftMessage};
use crate::net::{Inbox, Transport};
use crate::quorum::{AdaptiveQuorum, FaultParams};
use crate::registry::ValidatorRegistry;
use crate::votes::{PrePrepareLog, VoteLog, VoteStatus};

/// How far past the next block index pre-prepares and votes are logged
pub const VOTE_WINDOW: u64 = 8;

/// Consensus tuning for one node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pre_prepare_timeout_ms: u64,
    pub prepare_timeout_ms: u64,
    pub commit_timeout_ms: u64,
    /// Hard cap on entries per block, applied after the adaptive batch size
    pub max_block_entries: usize,
    /// Declared `f`; derived from the validator count when absent
    pub fault_tolerance: Option<usize>,
    pub adaptive: AdaptiveQuorum,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            pre_prepare_timeout_ms: 2000,
            prepare_timeout_ms: 2000,
            commit_timeout_ms: 2000,
            max_block_entries: 1000,
            fault_tolerance: None,
            adaptive: AdaptiveQuorum::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("pre_prepare_timeout_ms", self.pre_prepare_timeout_ms),
            ("prepare_timeout_ms", self.prepare_timeout_ms),
            ("commit_timeout_ms", self.commit_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    reason: "must be at least 1 ms".to_string(),
                });
            }
        }
        if self.max_block_entries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_block_entries",
                reason: "must be at least 1".to_string(),
            });
        }
        self.adaptive.validate()
    }

    pub fn pre_prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.pre_prepare_timeout_ms)
    }

    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }

    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }
}

/// Where the current round stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    PrePrepare,
    Prepare,
    Commit,
    Finalized,
    Failed,
}

/// Result of a round that did not fail
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    /// Nothing to propose, or nothing pending to wait for
    Skipped,
    Finalized {
        index: u64,
        hash: prioria_core::Digest,
        entries: usize,
        view: u64,
    },
}

/// Why an inbound message was not recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    UnknownSender,
    BadSignature,
    NotPrimary,
    LowReputation,
    KindMismatch,
    /// Targets a block index the local chain already has
    StaleBlock,
    /// Leaves a gap after the local tip; a sync request was sent
    OutOfOrder,
    /// Targets an index beyond the vote window
    TooFarAhead,
    /// The sender already voted for another hash at this index
    ConflictingVote,
    /// A synced block without a quorum of valid commits
    MissingCertificate,
    Rejected(String),
}

/// What became of one inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum HandleOutcome {
    Recorded,
    Duplicate,
    /// A sync request, answered with this many blocks
    Answered(usize),
    Ignored(IgnoreReason),
}

/// Node statistics for operators
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub node_id: String,
    pub chain_length: usize,
    pub blocks_finalized: u64,
    pub entries_processed: u64,
    pub mempool_size: usize,
    pub validator_score: f64,
    pub peers_connected: usize,
    pub view: u64,
    pub round: u64,
    pub phase: Phase,
}

pub struct PbftEngine {
    config: EngineConfig,
    node_id: String,
    keypair: KeyPair,
    fault: FaultParams,
    registry: Arc<RwLock<ValidatorRegistry>>,
    chain: Arc<RwLock<Blockchain>>,
    mempool: Arc<Mempool>,
    transport: Arc<dyn Transport>,
    sink: Option<Arc<dyn FinalizationSink>>,
    view: AtomicU64,
    round: AtomicU64,
    phase: Mutex<Phase>,
    pre_prepares: PrePrepareLog,
    prepares: VoteLog,
    commits: VoteLog,
    /// Commits that finalized each block, served with sync answers
    certificates: Mutex<BTreeMap<u64, Vec<PbftMessage>>>,
    blocks_finalized: AtomicU64,
    entries_processed: AtomicU64,
}

impl PbftEngine {
    pub fn new(
        config: EngineConfig,
        node_id: impl Into<String>,
        keypair: KeyPair,
        registry: ValidatorRegistry,
        chain: Arc<RwLock<Blockchain>>,
        mempool: Arc<Mempool>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConsensusError> {
        config.validate()?;
        if !registry.contains(&keypair.public) {
            return Err(ConsensusError::NotAValidator);
        }
        let fault = match config.fault_tolerance {
            Some(f) => FaultParams::with_declared(registry.len(), f)?,
            None => FaultParams::for_validators(registry.len())?,
        };

        let node_id = node_id.into();
        info!(
            "Node {} joining {} validators (f = {}, quorum = {})",
            node_id, fault.n, fault.f, fault.quorum
        );

        Ok(PbftEngine {
            config,
            node_id,
            keypair,
            fault,
            registry: Arc::new(RwLock::new(registry)),
            chain,
            mempool,
            transport,
            sink: None,
            view: AtomicU64::new(0),
            round: AtomicU64::new(0),
            phase: Mutex::new(Phase::Idle),
            pre_prepares: PrePrepareLog::new(),
            prepares: VoteLog::new(),
            commits: VoteLog::new(),
            certificates: Mutex::new(BTreeMap::new()),
            blocks_finalized: AtomicU64::new(0),
            entries_processed: AtomicU64::new(0),
        })
    }

    pub fn with_sink(mut self, sink: Arc<dyn FinalizationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn fault_params(&self) -> FaultParams {
        self.fault
    }

    pub fn registry(&self) -> &Arc<RwLock<ValidatorRegistry>> {
        &self.registry
    }

    pub fn chain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.chain
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn view(&self) -> u64 {
        self.view.load(Ordering::SeqCst)
    }

    pub fn round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    fn enter(&self, phase: Phase, index: u64, view: u64) {
        self.set_phase(phase);
        info!("Node {} block {} view {}: {:?}", self.node_id, index, view, phase);
    }

    /// Commit certificate of a finalized block, empty when unknown
    pub fn certificate(&self, index: u64) -> Vec<PbftMessage> {
        self.certificates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&index)
            .cloned()
            .unwrap_or_default()
    }

    fn store_certificate(&self, index: u64, certificate: Vec<PbftMessage>) {
        self.certificates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index, certificate);
    }

    fn log_for(&self, kind: PbftKind) -> &VoteLog {
        match kind {
            PbftKind::Commit => &self.commits,
            _ => &self.prepares,
        }
    }

    /// Admit an entry locally and gossip it to peers
    pub async fn submit(&self, entry: LedgerEntry) -> Result<String, MempoolError> {
        let id = self.mempool.admit(entry.clone()).await?;
        let message = NetMessage::Transaction {
            entry,
            from: self.node_id.clone(),
        };
        if let Err(e) = self.transport.broadcast(message) {
            warn!("Failed to gossip entry {}: {}", id, e);
        }
        Ok(id)
    }

    /// Drive one block through the three phases.
    ///
    /// On failure the chain is untouched, a primary puts its drained entries
    /// back in the mempool, and liveness or verification failures advance
    /// the view so the next round has a new primary.
    pub async fn run_round(&self) -> Result<RoundOutcome, ConsensusError> {
        let local_view = self.view();
        let (index, prior) = {
            let chain = self.chain.read().await;
            (chain.height() + 1, chain.latest().clone())
        };
        let primary = self.registry.read().await.primary(local_view).pubkey;
        let is_primary = primary == self.keypair.public;
        self.set_phase(Phase::Idle);

        let (view, block, drained) = if is_primary {
            match self.propose(local_view, &prior).await? {
                Some((block, drained)) => (local_view, block, drained),
                None => return Ok(RoundOutcome::Skipped),
            }
        } else {
            if self.pre_prepares.get(index, local_view).is_none() && self.mempool.size().await == 0
            {
                return Ok(RoundOutcome::Skipped);
            }
            self.enter(Phase::PrePrepare, index, local_view);

            let deadline = Instant::now() + self.config.pre_prepare_timeout();
            let Some(message) = self.pre_prepares.wait_for(index, local_view, deadline).await
            else {
                let error = ConsensusError::PrePrepareTimeout {
                    index,
                    view: local_view,
                };
                return Err(self.abandon(error, Vec::new()).await);
            };

            if message.view > local_view {
                self.view.fetch_max(message.view, Ordering::SeqCst);
                info!("Node {} adopting view {}", self.node_id, message.view);
            }
            let Some(block) = message.block else {
                let error = ConsensusError::VerificationFailed {
                    index,
                    reason: "pre-prepare carries no block".to_string(),
                };
                return Err(self.abandon(error, Vec::new()).await);
            };
            (message.view, block, Vec::new())
        };

        let result = match self.agree(view, &block).await {
            Ok(()) => self.finalize(view, block).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.abandon(e, drained).await),
        }
    }

    /// Drain a batch and announce it. `None` when the mempool is empty.
    async fn propose(
        &self,
        view: u64,
        prior: &Block,
    ) -> Result<Option<(Block, Vec<LedgerEntry>)>, ConsensusError> {
        let Some(top) = self.mempool.top_priority().await else {
            debug!("Node {} has nothing to propose", self.node_id);
            return Ok(None);
        };
        let batch = self
            .config
            .adaptive
            .batch_size(top)
            .min(self.config.max_block_entries);
        let entries = self.mempool.drain(batch).await;

        match self.announce(view, prior, &entries) {
            Ok(Some(block)) => {
                info!(
                    "Node {} proposing block {} with {} entries ({:?} tier, top priority {:.3})",
                    self.node_id,
                    block.index,
                    entries.len(),
                    self.config.adaptive.tier(top),
                    top
                );
                Ok(Some((block, entries)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.mempool.restore(entries).await;
                Err(e)
            }
        }
    }

    fn announce(
        &self,
        view: u64,
        prior: &Block,
        entries: &[LedgerEntry],
    ) -> Result<Option<Block>, ConsensusError> {
        let Some(block) = Blockchain::propose_after(
            prior,
            entries.to_vec(),
            self.keypair.public,
            now_millis(),
        )?
        else {
            return Ok(None);
        };
        self.enter(Phase::PrePrepare, block.index, view);

        let message = PbftMessage::pre_prepare(view, &block, &self.keypair)?;
        self.pre_prepares.insert(message.clone());
        self.transport.broadcast(NetMessage::from_pbft(message))?;
        Ok(Some(block))
    }

    /// Prepare and commit on an accepted proposal
    async fn agree(&self, view: u64, block: &Block) -> Result<(), ConsensusError> {
        self.enter(Phase::Prepare, block.index, view);

        if !block.verify_all() {
            let reason = match block.verify_entries() {
                Err((entry_id, e)) => format!("entry {entry_id}: {e}"),
                Ok(()) => "integrity hash mismatch".to_string(),
            };
            return Err(ConsensusError::VerificationFailed {
                index: block.index,
                reason,
            });
        }
        self.chain.read().await.check_candidate(block)?;

        self.cast(PbftKind::Prepare, view, block).await?;
        self.await_quorum(VotePhase::Prepare, block, self.config.prepare_timeout())
            .await?;

        self.enter(Phase::Commit, block.index, view);
        self.cast(PbftKind::Commit, view, block).await?;
        self.await_quorum(VotePhase::Commit, block, self.config.commit_timeout())
            .await
    }

    async fn cast(&self, kind: PbftKind, view: u64, block: &Block) -> Result<(), ConsensusError> {
        let message = PbftMessage::vote(kind, view, block.index, block.hash, &self.keypair)?;

        if self.registry.read().await.is_eligible(&self.keypair.public) {
            self.log_for(kind).record(&message);
        } else {
            warn!(
                "Node {} reputation is below the minimum, own {:?} vote not counted",
                self.node_id, kind
            );
        }

        self.transport.broadcast(NetMessage::from_pbft(message))?;
        debug!(
            "Node {} voted {:?} for block {} ({})",
            self.node_id,
            kind,
            block.index,
            block.hash.short_hex(8)
        );
        Ok(())
    }

    async fn await_quorum(
        &self,
        phase: VotePhase,
        block: &Block,
        timeout: Duration,
    ) -> Result<(), ConsensusError> {
        let log = match phase {
            VotePhase::Prepare => &self.prepares,
            VotePhase::Commit => &self.commits,
        };
        let need = self.fault.quorum;
        match log
            .wait_for_quorum(&block.hash, need, Instant::now() + timeout)
            .await
        {
            Ok(have) => {
                debug!(
                    "Node {} {} quorum for block {} ({}/{})",
                    self.node_id, phase, block.index, have, need
                );
                Ok(())
            }
            Err(have) => Err(ConsensusError::QuorumTimeout {
                phase,
                hash: block.hash,
                have,
                need,
            }),
        }
    }

    async fn finalize(&self, view: u64, block: Block) -> Result<RoundOutcome, ConsensusError> {
        let index = block.index;
        let hash = block.hash;
        let count = block.entries.len();

        let appended = {
            let mut chain = self.chain.write().await;
            // Sync may have delivered it while the commit wait was running
            if chain.latest().hash == hash {
                false
            } else {
                chain.append(block.clone())?;
                true
            }
        };

        self.store_certificate(index, self.commits.certificate(&hash));
        self.mempool.remove_committed(&block.entry_ids()).await;
        self.apply_feedback(&block).await;
        self.prune_through(index);

        self.round.fetch_add(1, Ordering::SeqCst);
        self.blocks_finalized.fetch_add(1, Ordering::SeqCst);
        self.entries_processed
            .fetch_add(count as u64, Ordering::SeqCst);
        self.enter(Phase::Finalized, index, view);

        if appended {
            if let Some(sink) = &self.sink {
                sink.on_block_finalized(&block);
            }
        }

        Ok(RoundOutcome::Finalized {
            index,
            hash,
            entries: count,
            view,
        })
    }

    /// Reputation feedback and the weighted-support audit for a finalized block
    async fn apply_feedback(&self, block: &Block) {
        let committers = self.commits.voters(&block.hash);
        let mut dissenters = self.commits.dissenters(block.index, &block.hash);
        dissenters.extend(self.prepares.dissenters(block.index, &block.hash));

        let mut registry = self.registry.write().await;
        for pubkey in &committers {
            registry.record_vote(pubkey, true);
        }
        for pubkey in dissenters.iter().filter(|pk| !committers.contains(pk)) {
            warn!("Validator {} voted against block {}", pubkey.short(), block.index);
            registry.record_vote(pubkey, false);
        }

        let priority = block.max_priority();
        let support = registry.support(&committers);
        let required = self.config.adaptive.required_fraction(priority);
        if support >= required {
            info!(
                "Block {} weighted support {:.3} meets {:?} fraction {:.2}",
                block.index,
                support,
                self.config.adaptive.tier(priority),
                required
            );
        } else {
            warn!(
                "Block {} weighted support {:.3} below {:?} fraction {:.2}",
                block.index,
                support,
                self.config.adaptive.tier(priority),
                required
            );
        }
    }

    fn prune_through(&self, index: u64) {
        self.pre_prepares.prune_through(index);
        self.prepares.prune_through(index);
        self.commits.prune_through(index);
    }

    async fn abandon(&self, error: ConsensusError, drained: Vec<LedgerEntry>) -> ConsensusError {
        self.set_phase(Phase::Failed);

        if !drained.is_empty() {
            let restored = self.mempool.restore(drained).await;
            info!("Node {} returned {} entries to the mempool", self.node_id, restored);
        }

        match &error {
            e if e.is_retryable() || matches!(e, ConsensusError::VerificationFailed { .. }) => {
                let next = self.view.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Node {} round failed: {}; moving to view {}", self.node_id, e, next);
            }
            ConsensusError::Chain(e) => {
                warn!("Node {} round failed on chain linkage: {}", self.node_id, e);
                let height = self.chain.read().await.height();
                self.request_sync(height);
            }
            e => error!("Node {} round failed: {}", self.node_id, e),
        }
        error
    }

    fn request_sync(&self, from_index: u64) {
        let message = NetMessage::SyncRequest {
            from: self.node_id.clone(),
            from_index,
        };
        if let Err(e) = self.transport.broadcast(message) {
            warn!("Node {} failed to request sync: {}", self.node_id, e);
        }
    }

    /// Apply one inbound peer message
    pub async fn handle_message(&self, message: NetMessage) -> HandleOutcome {
        match message {
            NetMessage::Transaction { entry, from } => match self.mempool.admit(entry).await {
                Ok(id) => {
                    debug!("Node {} admitted entry {} from {}", self.node_id, id, from);
                    HandleOutcome::Recorded
                }
                Err(MempoolError::DuplicateEntry(_)) => HandleOutcome::Duplicate,
                Err(e) => HandleOutcome::Ignored(IgnoreReason::Rejected(e.to_string())),
            },
            NetMessage::Block {
                block,
                certificate,
                from,
            } => self.handle_block(block, certificate, &from).await,
            NetMessage::PrePrepare(m) => self.handle_pbft(PbftKind::PrePrepare, m).await,
            NetMessage::Prepare(m) => self.handle_pbft(PbftKind::Prepare, m).await,
            NetMessage::Commit(m) => self.handle_pbft(PbftKind::Commit, m).await,
            NetMessage::SyncRequest { from, from_index } => {
                let blocks = self.chain.read().await.blocks_after(from_index).to_vec();
                let count = blocks.len();
                for block in blocks {
                    let message = NetMessage::Block {
                        certificate: self.certificate(block.index),
                        block,
                        from: self.node_id.clone(),
                    };
                    if let Err(e) = self.transport.broadcast(message) {
                        warn!("Node {} failed to answer sync from {}: {}", self.node_id, from, e);
                        break;
                    }
                }
                debug!(
                    "Node {} answered sync from {} with {} blocks",
                    self.node_id, from, count
                );
                HandleOutcome::Answered(count)
            }
        }
    }

    async fn handle_pbft(&self, expected: PbftKind, message: PbftMessage) -> HandleOutcome {
        if message.kind != expected {
            return HandleOutcome::Ignored(IgnoreReason::KindMismatch);
        }
        {
            let registry = self.registry.read().await;
            if !registry.contains(&message.sender) {
                return HandleOutcome::Ignored(IgnoreReason::UnknownSender);
            }
            if message.verify_signature().is_err() {
                warn!(
                    "Node {} dropped {:?} with bad signature from {}",
                    self.node_id,
                    message.kind,
                    message.sender.short()
                );
                return HandleOutcome::Ignored(IgnoreReason::BadSignature);
            }
            if !registry.is_eligible(&message.sender) {
                return HandleOutcome::Ignored(IgnoreReason::LowReputation);
            }
            if expected == PbftKind::PrePrepare
                && !registry.is_primary(&message.sender, message.view)
            {
                warn!(
                    "Node {} dropped pre-prepare from non-primary {} for view {}",
                    self.node_id,
                    message.sender.short(),
                    message.view
                );
                return HandleOutcome::Ignored(IgnoreReason::NotPrimary);
            }
        }

        let height = self.chain.read().await.height();
        if message.block_index <= height {
            return HandleOutcome::Ignored(IgnoreReason::StaleBlock);
        }
        if message.block_index > height + VOTE_WINDOW {
            return HandleOutcome::Ignored(IgnoreReason::TooFarAhead);
        }

        if expected == PbftKind::PrePrepare {
            if !message.block_matches() {
                return HandleOutcome::Ignored(IgnoreReason::Rejected(
                    "pre-prepare block does not match its signed hash".to_string(),
                ));
            }
            if message.block_index > height + 1 {
                self.request_sync(height);
            }
            let index = message.block_index;
            let view = message.view;
            return if self.pre_prepares.insert(message) {
                debug!(
                    "Node {} logged pre-prepare for block {} in view {}",
                    self.node_id, index, view
                );
                HandleOutcome::Recorded
            } else {
                HandleOutcome::Duplicate
            };
        }

        let log = self.log_for(expected);
        match log.record(&message) {
            VoteStatus::Added => {
                debug!(
                    "Node {} recorded {:?} from {} for block {} ({} votes)",
                    self.node_id,
                    expected,
                    message.sender.short(),
                    message.block_index,
                    log.count(&message.block_hash)
                );
                HandleOutcome::Recorded
            }
            VoteStatus::Duplicate => HandleOutcome::Duplicate,
            VoteStatus::Conflict => {
                warn!(
                    "Node {} dropped conflicting {:?} from {} for block {} in view {}",
                    self.node_id,
                    expected,
                    message.sender.short(),
                    message.block_index,
                    message.view
                );
                HandleOutcome::Ignored(IgnoreReason::ConflictingVote)
            }
        }
    }

    /// Append a block finalized elsewhere. It needs a quorum of valid
    /// commits, carried or already logged here.
    async fn handle_block(
        &self,
        block: Block,
        certificate: Vec<PbftMessage>,
        from: &str,
    ) -> HandleOutcome {
        let index = block.index;
        let height = self.chain.read().await.height();
        if index <= height {
            debug!("Node {} already has block {} from {}", self.node_id, index, from);
            return HandleOutcome::Ignored(IgnoreReason::StaleBlock);
        }
        if index > height + 1 {
            debug!(
                "Node {} got block {} from {} ahead of tip {}",
                self.node_id, index, from, height
            );
            self.request_sync(height);
            return HandleOutcome::Ignored(IgnoreReason::OutOfOrder);
        }

        let certificate = match self.certify(&block, certificate).await {
            Ok(certificate) => certificate,
            Err(reason) => {
                warn!(
                    "Node {} refused block {} from {}: {:?}",
                    self.node_id, index, from, reason
                );
                return HandleOutcome::Ignored(reason);
            }
        };
        if let Err(e) = self.chain.write().await.append(block.clone()) {
            return HandleOutcome::Ignored(IgnoreReason::Rejected(e.to_string()));
        }
        self.store_certificate(index, certificate);

        // Vote logs stay until the next local finalize; a round may still be waiting on them
        self.mempool.remove_committed(&block.entry_ids()).await;
        info!("Node {} synced block {} from {}", self.node_id, index, from);
        if let Some(sink) = &self.sink {
            sink.on_block_finalized(&block);
        }
        HandleOutcome::Recorded
    }

    /// Distinct valid commits for `block`, each cast in a view whose primary
    /// is the block's proposer. Fails below quorum.
    async fn certify(
        &self,
        block: &Block,
        carried: Vec<PbftMessage>,
    ) -> Result<Vec<PbftMessage>, IgnoreReason> {
        let registry = self.registry.read().await;
        if !registry.contains(&block.proposer) {
            return Err(IgnoreReason::NotPrimary);
        }

        let mut signers = HashSet::new();
        let mut certificate = Vec::new();
        for commit in carried.into_iter().chain(self.commits.certificate(&block.hash)) {
            let valid = commit.kind == PbftKind::Commit
                && commit.block_index == block.index
                && commit.block_hash == block.hash
                && registry.contains(&commit.sender)
                && registry.is_primary(&block.proposer, commit.view)
                && !signers.contains(&commit.sender)
                && commit.verify_signature().is_ok();
            if valid {
                signers.insert(commit.sender);
                certificate.push(commit);
            }
        }

        if self.fault.has_quorum(certificate.len()) {
            Ok(certificate)
        } else {
            Err(IgnoreReason::MissingCertificate)
        }
    }

    pub async fn stats(&self) -> NodeStats {
        let chain_length = self.chain.read().await.len();
        let validator_score = self
            .registry
            .read()
            .await
            .score_of(&self.keypair.public)
            .unwrap_or(0.0);
        NodeStats {
            node_id: self.node_id.clone(),
            chain_length,
            blocks_finalized: self.blocks_finalized.load(Ordering::SeqCst),
            entries_processed: self.entries_processed.load(Ordering::SeqCst),
            mempool_size: self.mempool.size().await,
            validator_score,
            peers_connected: self.transport.peer_count(),
            view: self.view(),
            round: self.round(),
            phase: self.phase(),
        }
    }

    /// Feed a hub inbox into [`Self::handle_message`] until the hub closes
    pub async fn pump(self: Arc<Self>, mut inbox: Inbox) {
        while let Some(message) = inbox.recv().await {
            let kind = message.kind_name();
            if let HandleOutcome::Ignored(reason) = self.handle_message(message).await {
                debug!("Node {} ignored {}: {:?}", self.node_id, kind, reason);
            }
        }
        debug!("Node {} inbox closed", self.node_id);
    }

    /// Run rounds on a fixed cadence forever
    pub async fn run(self: Arc<Self>, round_time: Duration) {
        let mut ticker = interval(round_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Node {} starting consensus loop with round time {}ms",
            self.node_id,
            round_time.as_millis()
        );

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_round().await {
                debug!("Node {} round ended: {}", self.node_id, e);
            }
        }
    }
}
