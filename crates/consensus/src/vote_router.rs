//! Vote fan-in from the network to elections.
//!
//! Maps candidate block hashes to the elections interested in them.
//! Elections connect every candidate hash when they start or when a
//! fork joins; erasing an election disconnects all of its hashes.

use crate::election::{Election, VoteCode};
use lattix_core::{ContainerInfo, ObserverSet, StatDetail, StatType, Stats};
use lattix_types::{Account, BlockHash};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Routes representative votes to the elections that want them.
pub struct VoteRouter {
    stats: Arc<Stats>,
    elections: RwLock<HashMap<BlockHash, Weak<Election>>>,

    /// Fired when a fresh hash should be checked against cached votes.
    pub vote_cache_requested: ObserverSet<BlockHash>,
}

impl VoteRouter {
    /// Creates an empty router.
    pub fn new(stats: Arc<Stats>) -> Arc<Self> {
        Arc::new(Self {
            stats,
            elections: RwLock::new(HashMap::new()),
            vote_cache_requested: ObserverSet::new(),
        })
    }

    /// Routes votes for a hash to an election.
    pub fn connect(&self, hash: BlockHash, election: Weak<Election>) {
        self.elections.write().insert(hash, election);
    }

    /// Removes all routes to an election.
    pub fn disconnect(&self, election: &Arc<Election>) {
        self.elections.write().retain(|_, existing| {
            existing
                .upgrade()
                .map_or(false, |existing| !Arc::ptr_eq(&existing, election))
        });
    }

    /// Removes the route for one hash.
    pub fn disconnect_hash(&self, hash: &BlockHash) {
        self.elections.write().remove(hash);
    }

    /// The election interested in a hash, if any.
    pub fn election(&self, hash: &BlockHash) -> Option<Arc<Election>> {
        self.elections.read().get(hash)?.upgrade()
    }

    /// Whether any election is interested in a hash.
    pub fn active(&self, hash: &BlockHash) -> bool {
        self.election(hash).is_some()
    }

    /// Feeds one representative's votes to the interested elections.
    pub fn vote(
        &self,
        representative: Account,
        timestamp: u64,
        hashes: &[BlockHash],
    ) -> HashMap<BlockHash, VoteCode> {
        let mut results = HashMap::new();
        for hash in hashes {
            let code = match self.election(hash) {
                Some(election) => election.vote(representative, timestamp, *hash),
                None => VoteCode::Indeterminate,
            };
            if code == VoteCode::Vote {
                self.stats.inc(StatType::VoteRouter, StatDetail::VoteProcessed);
            }
            results.insert(*hash, code);
        }
        results
    }

    /// Requests a cached-votes replay for a fresh hash.
    pub fn trigger_vote_cache(&self, hash: &BlockHash) {
        self.vote_cache_requested.notify(hash);
    }

    /// Number of routed hashes, including stale routes not yet swept.
    pub fn len(&self) -> usize {
        self.elections.read().len()
    }

    /// True when no hashes are routed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default().leaf(
            "elections",
            self.len(),
            std::mem::size_of::<(BlockHash, Weak<Election>)>(),
        )
    }
}
