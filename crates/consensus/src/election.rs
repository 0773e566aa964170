//! A single election over one qualified root.
//!
//! Elections start passive, listening for votes, then turn active and
//! solicit confirmations. Reaching quorum confirms the election; the
//! winner is handed to the confirming set and, if it is a fork of the
//! block currently in the ledger, forced into the block processor
//! first. State transitions for one election are totally ordered under
//! its mutex.

use crate::active::ActiveElections;
use crate::solicitor::ConfirmationSolicitor;
use crate::tally::{Vote, VoteTally};
use lattix_core::{StatDetail, StatType};
use lattix_types::{Account, Amount, Block, BlockHash, QualifiedRoot, Root};
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Why an election was started; drives its limits and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionBehavior {
    /// Started explicitly, e.g. by an operator; unbounded
    Manual,
    /// Started by the priority scheduler from a bucket
    Priority,
    /// Started from vote-cache hints
    Hinted,
    /// Started optimistically ahead of dependencies
    Optimistic,
}

impl ElectionBehavior {
    /// Counter detail for per-behavior stats.
    pub fn stat_detail(&self) -> StatDetail {
        match self {
            ElectionBehavior::Manual => StatDetail::Manual,
            ElectionBehavior::Priority => StatDetail::Priority,
            ElectionBehavior::Hinted => StatDetail::Hinted,
            ElectionBehavior::Optimistic => StatDetail::Optimistic,
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionBehavior::Manual => "manual",
            ElectionBehavior::Priority => "priority",
            ElectionBehavior::Hinted => "hinted",
            ElectionBehavior::Optimistic => "optimistic",
        }
    }
}

impl std::fmt::Display for ElectionBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Election lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionState {
    /// Only listening for incoming votes
    Passive,
    /// Actively requesting confirmations
    Active,
    /// Confirmed, still broadcasting the winner
    Confirmed,
    /// Confirmed and finished
    ExpiredConfirmed,
    /// Gave up without confirmation
    ExpiredUnconfirmed,
    /// Cancelled by the scheduler
    Cancelled,
}

impl ElectionState {
    /// Whether a transition between two states is allowed.
    pub fn valid_change(from: ElectionState, to: ElectionState) -> bool {
        match from {
            ElectionState::Passive => matches!(
                to,
                ElectionState::Active
                    | ElectionState::Confirmed
                    | ElectionState::ExpiredUnconfirmed
                    | ElectionState::Cancelled
            ),
            ElectionState::Active => matches!(
                to,
                ElectionState::Confirmed
                    | ElectionState::ExpiredUnconfirmed
                    | ElectionState::Cancelled
            ),
            ElectionState::Confirmed => matches!(to, ElectionState::ExpiredConfirmed),
            ElectionState::ExpiredConfirmed
            | ElectionState::ExpiredUnconfirmed
            | ElectionState::Cancelled => false,
        }
    }

    /// Short name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElectionState::Passive => "passive",
            ElectionState::Active => "active",
            ElectionState::Confirmed => "confirmed",
            ElectionState::ExpiredConfirmed => "expired_confirmed",
            ElectionState::ExpiredUnconfirmed => "expired_unconfirmed",
            ElectionState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ElectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding a vote into an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteCode {
    /// The vote changed the tally
    Vote,
    /// A replay of an already counted vote
    Replay,
    /// No election was interested in the hash
    Indeterminate,
}

/// How the cementing of an election winner was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionStatusType {
    /// Election still running
    Ongoing,
    /// Confirmed by vote quorum while active
    ActiveConfirmedQuorum,
    /// Cemented through confirmation height while the election ran
    ActiveConfirmationHeight,
    /// Cemented without a live election
    InactiveConfirmationHeight,
    /// Stopped without confirmation
    Stopped,
}

/// Summary of an election, emitted on cementing and kept in the
/// recently-cemented history.
#[derive(Clone)]
pub struct ElectionStatus {
    /// How the cementing was observed
    pub status_type: ElectionStatusType,
    /// The winning block, when known
    pub winner: Option<Arc<Block>>,
    /// Total vote weight observed
    pub tally_weight: Amount,
    /// Final vote weight observed
    pub final_tally_weight: Amount,
    /// Confirmation requests sent
    pub confirmation_request_count: u32,
    /// Candidate blocks observed
    pub block_count: usize,
    /// Distinct voting representatives
    pub voter_count: usize,
    /// Time from start to completion
    pub duration: Duration,
}

impl Default for ElectionStatus {
    fn default() -> Self {
        Self {
            status_type: ElectionStatusType::Ongoing,
            winner: None,
            tally_weight: Amount::ZERO,
            final_tally_weight: Amount::ZERO,
            confirmation_request_count: 0,
            block_count: 0,
            voter_count: 0,
            duration: Duration::ZERO,
        }
    }
}

struct ElectionData {
    state: ElectionState,
    state_start: Instant,
    blocks: HashMap<BlockHash, Arc<Block>>,
    /// The fork currently present in the ledger
    current_block: Arc<Block>,
    /// Set once quorum is reached; never changes afterwards
    winner: Option<Arc<Block>>,
    tally: VoteTally,
    last_request: Option<Instant>,
    last_broadcast_hash: Option<BlockHash>,
    last_broadcast_time: Option<Instant>,
    last_vote: Option<(BlockHash, bool)>,
    last_vote_time: Option<Instant>,
    end: Option<Instant>,
}

static NEXT_ELECTION_ID: AtomicU64 = AtomicU64::new(1);

const PASSIVE_DURATION_FACTOR: u32 = 5;

/// Consensus process over one qualified root.
pub struct Election {
    id: u64,
    this: Weak<Election>,
    active: Weak<ActiveElections>,
    behavior: ElectionBehavior,
    root: Root,
    qualified_root: QualifiedRoot,
    start: Instant,
    confirmation_request_count: AtomicU32,
    data: Mutex<ElectionData>,
}

impl Election {
    /// Creates an election seeded with the block occupying the root in
    /// the ledger.
    pub(crate) fn new(
        active: &Arc<ActiveElections>,
        block: Arc<Block>,
        behavior: ElectionBehavior,
    ) -> Arc<Self> {
        let mut blocks = HashMap::new();
        blocks.insert(block.hash(), block.clone());
        Arc::new_cyclic(|this| Self {
            id: NEXT_ELECTION_ID.fetch_add(1, Ordering::Relaxed),
            this: this.clone(),
            active: Arc::downgrade(active),
            behavior,
            root: block.root(),
            qualified_root: block.qualified_root(),
            start: Instant::now(),
            confirmation_request_count: AtomicU32::new(0),
            data: Mutex::new(ElectionData {
                state: ElectionState::Passive,
                state_start: Instant::now(),
                blocks,
                current_block: block,
                winner: None,
                tally: VoteTally::new(),
                last_request: None,
                last_broadcast_hash: None,
                last_broadcast_time: None,
                last_vote: None,
                last_vote_time: None,
                end: None,
            }),
        })
    }

    /// Election id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Why this election was started.
    pub fn behavior(&self) -> ElectionBehavior {
        self.behavior
    }

    /// The contested root.
    pub fn root(&self) -> Root {
        self.root
    }

    /// The contested qualified root.
    pub fn qualified_root(&self) -> QualifiedRoot {
        self.qualified_root
    }

    /// Time since the election started.
    pub fn duration(&self) -> Duration {
        self.start.elapsed()
    }

    /// Processes a vote from a representative. Returns
    /// [`VoteCode::Replay`] when the tally is unchanged.
    pub fn vote(&self, representative: Account, timestamp: u64, hash: BlockHash) -> VoteCode {
        let Some(active) = self.active.upgrade() else {
            return VoteCode::Indeterminate;
        };
        let weight = active.representatives().weight(&representative);
        let mut data = self.data.lock();

        let updated = data.tally.vote(Vote {
            hash,
            representative,
            weight,
            timestamp,
        });
        if !updated {
            return VoteCode::Replay;
        }

        active.stats().inc(StatType::Election, StatDetail::Vote);
        trace!(
            election = self.id,
            rep = %representative,
            %hash,
            weight = %weight,
            "vote processed"
        );

        if !Self::confirmed_state(data.state) {
            self.confirm_if_quorum(&active, &mut data);
        }
        VoteCode::Vote
    }

    /// Registers a ledger update for this root. `is_in_ledger` marks
    /// the block as the fork the ledger currently holds. Returns false
    /// when the election is already confirmed.
    pub fn process(&self, block: &Arc<Block>, is_in_ledger: bool) -> bool {
        debug_assert_eq!(block.qualified_root(), self.qualified_root);
        let mut data = self.data.lock();
        if Self::confirmed_state(data.state) {
            return false;
        }
        data.blocks.insert(block.hash(), block.clone());
        if is_in_ledger {
            data.current_block = block.clone();
        }
        true
    }

    /// Advances the election state machine once per request-loop tick.
    /// Returns true when the election should be erased.
    pub fn transition_time(&self, solicitor: &mut ConfirmationSolicitor) -> bool {
        let Some(active) = self.active.upgrade() else {
            return true;
        };
        let mut data = self.data.lock();
        let mut done = false;

        match data.state {
            ElectionState::Passive => {
                self.confirm_if_quorum(&active, &mut data);
                if self.base_latency(&active) * PASSIVE_DURATION_FACTOR < data.state_start.elapsed()
                {
                    Self::change_state(&mut data, ElectionState::Active);
                }
            }
            ElectionState::Active => {
                self.confirm_if_quorum(&active, &mut data);
                self.broadcast_vote(&active, &mut data);
                self.broadcast_block(&active, solicitor, &mut data);
                self.request_confirmations(&active, solicitor, &mut data);
            }
            ElectionState::Confirmed => {
                done = true;
                // The winner keeps being announced while the election
                // winds down
                self.broadcast_vote(&active, &mut data);
                self.broadcast_block(&active, solicitor, &mut data);
                Self::change_state(&mut data, ElectionState::ExpiredConfirmed);
            }
            ElectionState::ExpiredConfirmed | ElectionState::ExpiredUnconfirmed => {
                debug_assert!(false, "completed elections are not updated");
            }
            ElectionState::Cancelled => {
                return true;
            }
        }

        if !Self::confirmed_state(data.state) && self.time_to_live() < self.duration() {
            Self::change_state(&mut data, ElectionState::ExpiredUnconfirmed);
            active.stats().inc(StatType::Election, StatDetail::Expired);
            debug!(election = self.id, root = %self.qualified_root, "election expired");
            done = true;
        }

        if done {
            data.end = Some(Instant::now());
        }
        done
    }

    /// Moves a passive election to active.
    pub fn transition_active(&self) {
        let mut data = self.data.lock();
        if data.state == ElectionState::Passive {
            Self::change_state(&mut data, ElectionState::Active);
        }
    }

    /// Cancels the election; it is erased on the next loop tick.
    pub fn cancel(&self) {
        let mut data = self.data.lock();
        if Self::change_state(&mut data, ElectionState::Cancelled) {
            if let Some(active) = self.active.upgrade() {
                active.stats().inc(StatType::Election, StatDetail::Cancelled);
            }
        }
    }

    /// Confirms the election on `hash` if that block is known and the
    /// election is not already confirmed. Used when cementing observes
    /// the block through confirmation height.
    pub fn try_confirm(&self, hash: &BlockHash) -> bool {
        let Some(active) = self.active.upgrade() else {
            return false;
        };
        let mut data = self.data.lock();
        if Self::confirmed_state(data.state) {
            return false;
        }
        if let Some(block) = data.blocks.get(hash).cloned() {
            return self.confirm_once(&active, &mut data, block);
        }
        false
    }

    /// Sends the initial vote for a freshly inserted election.
    pub fn broadcast_vote_immediate(&self) {
        if let Some(active) = self.active.upgrade() {
            let mut data = self.data.lock();
            self.broadcast_vote_impl(&active, &mut data);
        }
    }

    /// Whether the election reached confirmation.
    pub fn confirmed(&self) -> bool {
        Self::confirmed_state(self.data.lock().state)
    }

    /// Whether the election expired without confirmation.
    pub fn failed(&self) -> bool {
        self.data.lock().state == ElectionState::ExpiredUnconfirmed
    }

    /// The winning block, once quorum was reached.
    pub fn winner(&self) -> Option<Arc<Block>> {
        self.data.lock().winner.clone()
    }

    /// Current state.
    pub fn state(&self) -> ElectionState {
        self.data.lock().state
    }

    /// All candidate blocks by hash.
    pub fn blocks(&self) -> HashMap<BlockHash, Arc<Block>> {
        self.data.lock().blocks.clone()
    }

    /// Whether a hash is among the candidates.
    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.data.lock().blocks.contains_key(hash)
    }

    /// The candidate leading the tally.
    pub fn leader(&self) -> Option<BlockHash> {
        self.data.lock().tally.leader()
    }

    /// Number of confirmation requests sent.
    pub fn confirmation_request_count(&self) -> u32 {
        self.confirmation_request_count.load(Ordering::Relaxed)
    }

    /// A snapshot of the election for observers and history.
    pub fn current_status(&self) -> ElectionStatus {
        let data = self.data.lock();
        let status_type = match data.state {
            ElectionState::Passive | ElectionState::Active => ElectionStatusType::Ongoing,
            ElectionState::Confirmed | ElectionState::ExpiredConfirmed => {
                ElectionStatusType::ActiveConfirmedQuorum
            }
            ElectionState::ExpiredUnconfirmed | ElectionState::Cancelled => {
                ElectionStatusType::Stopped
            }
        };
        ElectionStatus {
            status_type,
            winner: data.winner.clone(),
            tally_weight: data.tally.tally().values().copied().sum(),
            final_tally_weight: data.tally.final_tally().values().copied().sum(),
            confirmation_request_count: self.confirmation_request_count.load(Ordering::Relaxed),
            block_count: data.blocks.len(),
            voter_count: data.tally.len(),
            duration: data
                .end
                .map_or_else(|| self.start.elapsed(), |end| end - self.start),
        }
    }

    fn confirmed_state(state: ElectionState) -> bool {
        matches!(
            state,
            ElectionState::Confirmed | ElectionState::ExpiredConfirmed
        )
    }

    fn change_state(data: &mut MutexGuard<'_, ElectionData>, desired: ElectionState) -> bool {
        if ElectionState::valid_change(data.state, desired) {
            data.state = desired;
            data.state_start = Instant::now();
            true
        } else {
            false
        }
    }

    /// Confirms if quorum was reached; otherwise keeps the ledger in
    /// step with the leading candidate.
    fn confirm_if_quorum(
        &self,
        active: &Arc<ActiveElections>,
        data: &mut MutexGuard<'_, ElectionData>,
    ) -> bool {
        let quorum_delta = active.representatives().quorum_delta();
        if quorum_delta.is_zero() {
            return false;
        }
        if let Some(winner_hash) = data.tally.quorum(quorum_delta) {
            // Votes can arrive before the block itself
            if let Some(block) = data.blocks.get(&winner_hash).cloned() {
                if winner_hash != data.current_block.hash() {
                    // The winner is a fork; force it into the ledger
                    active.force_block(&block);
                }
                return self.confirm_once(active, data, block);
            }
        } else if let Some(candidate_hash) = data.tally.leader() {
            if let Some(block) = data.blocks.get(&candidate_hash).cloned() {
                if candidate_hash != data.current_block.hash() {
                    active.force_block(&block);
                }
            }
        }
        false
    }

    fn confirm_once(
        &self,
        active: &Arc<ActiveElections>,
        data: &mut MutexGuard<'_, ElectionData>,
        winner: Arc<Block>,
    ) -> bool {
        if !Self::change_state(data, ElectionState::Confirmed) {
            active
                .stats()
                .inc(StatType::Election, StatDetail::ConfirmOnceFailed);
            return false;
        }
        data.winner = Some(winner.clone());
        active.stats().inc(StatType::Election, StatDetail::ConfirmOnce);
        debug!(
            election = self.id,
            winner = %winner.hash(),
            behavior = %self.behavior,
            voters = data.tally.len(),
            blocks = data.blocks.len(),
            "election confirmed"
        );

        active
            .recently_confirmed
            .put(self.qualified_root, winner.hash());
        if let Some(this) = self.this.upgrade() {
            active.add_election_winner_details(winner.hash(), this);
        }
        self.broadcast_vote_impl(active, data);
        active.confirming_set().add(winner.hash());
        true
    }

    fn base_latency(&self, active: &Arc<ActiveElections>) -> Duration {
        active.config().base_latency
    }

    fn time_to_live(&self) -> Duration {
        match self.behavior {
            ElectionBehavior::Manual | ElectionBehavior::Priority => Duration::from_secs(5 * 60),
            ElectionBehavior::Hinted | ElectionBehavior::Optimistic => Duration::from_secs(30),
        }
    }

    fn confirm_req_time(&self, active: &Arc<ActiveElections>) -> Duration {
        match self.behavior {
            ElectionBehavior::Manual | ElectionBehavior::Priority | ElectionBehavior::Hinted => {
                self.base_latency(active) * 5
            }
            ElectionBehavior::Optimistic => self.base_latency(active) * 2,
        }
    }

    fn request_confirmations(
        &self,
        active: &Arc<ActiveElections>,
        solicitor: &mut ConfirmationSolicitor,
        data: &mut MutexGuard<'_, ElectionData>,
    ) {
        let due = data
            .last_request
            .map_or(true, |last| self.confirm_req_time(active) < last.elapsed());
        if due && solicitor.request(&data.current_block, &data.tally) > 0 {
            data.last_request = Some(Instant::now());
            self.confirmation_request_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn broadcast_block(
        &self,
        active: &Arc<ActiveElections>,
        solicitor: &mut ConfirmationSolicitor,
        data: &mut MutexGuard<'_, ElectionData>,
    ) {
        let interval = active.config().block_broadcast_interval;
        let due = data
            .last_broadcast_time
            .map_or(true, |last| last.elapsed() > interval)
            || data.last_broadcast_hash != Some(data.current_block.hash());
        if due && solicitor.broadcast(&data.current_block) {
            let stats = active.stats();
            stats.inc(
                StatType::Election,
                if data.last_broadcast_hash.is_none() {
                    StatDetail::BroadcastBlockInitial
                } else {
                    StatDetail::BroadcastBlockRepeat
                },
            );
            data.last_broadcast_hash = Some(data.current_block.hash());
            data.last_broadcast_time = Some(Instant::now());
        }
    }

    /// The hash this node should currently vote for and whether the
    /// vote is final.
    fn vote_request(
        active: &Arc<ActiveElections>,
        data: &MutexGuard<'_, ElectionData>,
    ) -> (BlockHash, bool) {
        let quorum_delta = active.representatives().quorum_delta();
        let candidate = data
            .tally
            .leader()
            .filter(|leader| data.blocks.contains_key(leader))
            .unwrap_or_else(|| data.current_block.hash());
        let is_final = Self::confirmed_state(data.state)
            || (!quorum_delta.is_zero() && data.tally.quorum(quorum_delta).is_some());
        (candidate, is_final)
    }

    fn broadcast_vote(
        &self,
        active: &Arc<ActiveElections>,
        data: &mut MutexGuard<'_, ElectionData>,
    ) {
        let interval = active.config().vote_broadcast_interval;
        let time_due = data
            .last_vote_time
            .map_or(true, |last| last.elapsed() > interval);
        // Also vote out of schedule when the candidate changed or the
        // vote turned final
        let request = Self::vote_request(active, data);
        if time_due || data.last_vote != Some(request) {
            self.broadcast_vote_impl(active, data);
        }
    }

    fn broadcast_vote_impl(
        &self,
        active: &Arc<ActiveElections>,
        data: &mut MutexGuard<'_, ElectionData>,
    ) {
        let (candidate, is_final) = Self::vote_request(active, data);

        active.stats().inc(StatType::Election, StatDetail::BroadcastVote);
        active.stats().inc(
            StatType::Election,
            if is_final {
                StatDetail::BroadcastVoteFinal
            } else {
                StatDetail::BroadcastVoteNormal
            },
        );
        active.vote_generated.notify(&(self.root, candidate, is_final));

        data.last_vote = Some((candidate, is_final));
        data.last_vote_time = Some(Instant::now());
    }
}
