//! Vote accumulation for one election.
//!
//! One vote per representative; a newer timestamp replaces an older
//! vote, so a representative can switch candidates. Final votes carry
//! the maximum timestamp and can never be replaced.

use lattix_types::{Account, Amount, BlockHash};
use std::collections::{BTreeMap, HashMap};

/// Timestamp marking a final vote.
pub const FINAL_TIMESTAMP: u64 = u64::MAX;

/// One representative's vote for a block hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vote {
    /// The hash voted for
    pub hash: BlockHash,
    /// The voting representative
    pub representative: Account,
    /// The representative's weight at vote time
    pub weight: Amount,
    /// Vote timestamp; [`FINAL_TIMESTAMP`] marks a final vote
    pub timestamp: u64,
}

impl Vote {
    /// Whether this is a final vote.
    pub fn is_final(&self) -> bool {
        self.timestamp == FINAL_TIMESTAMP
    }
}

/// Per-representative vote index with weight tallies.
#[derive(Debug, Default)]
pub struct VoteTally {
    votes: HashMap<Account, Vote>,
}

impl VoteTally {
    /// Creates an empty tally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a vote. Returns whether the tally changed; replays with
    /// an equal or older timestamp are ignored.
    pub fn vote(&mut self, vote: Vote) -> bool {
        match self.votes.get_mut(&vote.representative) {
            Some(existing) => {
                if existing.timestamp < vote.timestamp {
                    *existing = vote;
                    true
                } else {
                    false
                }
            }
            None => {
                self.votes.insert(vote.representative, vote);
                true
            }
        }
    }

    /// Weight per block over all votes, descending is up to the caller.
    pub fn tally(&self) -> BTreeMap<BlockHash, Amount> {
        self.summarize(0)
    }

    /// Weight per block over final votes only.
    pub fn final_tally(&self) -> BTreeMap<BlockHash, Amount> {
        self.summarize(FINAL_TIMESTAMP)
    }

    /// The block with the most vote weight; ties break to the lowest
    /// hash.
    pub fn leader(&self) -> Option<BlockHash> {
        self.tally()
            .into_iter()
            .max_by(|(hash_a, weight_a), (hash_b, weight_b)| {
                weight_a.cmp(weight_b).then(hash_b.cmp(hash_a))
            })
            .map(|(hash, _)| hash)
    }

    /// The first block whose tallied weight reaches `quorum_delta`.
    pub fn quorum(&self, quorum_delta: Amount) -> Option<BlockHash> {
        self.reached(self.tally(), quorum_delta)
    }

    /// The first block whose final-vote weight reaches `quorum_delta`.
    pub fn final_quorum(&self, quorum_delta: Amount) -> Option<BlockHash> {
        self.reached(self.final_tally(), quorum_delta)
    }

    /// Number of voting representatives.
    pub fn len(&self) -> usize {
        self.votes.len()
    }

    /// True when no votes have been recorded.
    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// All recorded votes.
    pub fn all_votes(&self) -> Vec<Vote> {
        self.votes.values().copied().collect()
    }

    /// A representative's current vote, if any.
    pub fn find_vote(&self, representative: &Account) -> Option<Vote> {
        self.votes.get(representative).copied()
    }

    fn summarize(&self, timestamp_cutoff: u64) -> BTreeMap<BlockHash, Amount> {
        let mut result: BTreeMap<BlockHash, Amount> = BTreeMap::new();
        for vote in self.votes.values() {
            if vote.timestamp >= timestamp_cutoff {
                *result.entry(vote.hash).or_insert(Amount::ZERO) += vote.weight;
            }
        }
        result
    }

    fn reached(
        &self,
        tally: BTreeMap<BlockHash, Amount>,
        quorum_delta: Amount,
    ) -> Option<BlockHash> {
        debug_assert!(quorum_delta > Amount::ZERO);
        tally
            .into_iter()
            .find(|(_, weight)| *weight >= quorum_delta)
            .map(|(hash, _)| hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(fill: u8) -> Account {
        Account::from([fill; 32])
    }

    fn hash(fill: u8) -> BlockHash {
        BlockHash::from([fill; 32])
    }

    fn vote(representative: u8, block: u8, weight: u128, timestamp: u64) -> Vote {
        Vote {
            hash: hash(block),
            representative: rep(representative),
            weight: Amount::raw(weight),
            timestamp,
        }
    }

    #[test]
    fn test_newer_vote_replaces() {
        let mut tally = VoteTally::new();
        assert!(tally.vote(vote(1, 1, 100, 1)));
        // Same timestamp is a replay
        assert!(!tally.vote(vote(1, 2, 100, 1)));
        // Newer timestamp switches the candidate
        assert!(tally.vote(vote(1, 2, 100, 2)));
        assert_eq!(tally.tally().get(&hash(2)), Some(&Amount::raw(100)));
        assert_eq!(tally.tally().get(&hash(1)), None);
    }

    #[test]
    fn test_quorum_detection() {
        let mut tally = VoteTally::new();
        tally.vote(vote(1, 1, 60, 1));
        tally.vote(vote(2, 1, 50, 1));
        assert_eq!(tally.quorum(Amount::raw(100)), Some(hash(1)));
        assert_eq!(tally.quorum(Amount::raw(200)), None);
    }

    #[test]
    fn test_final_quorum_counts_final_only() {
        let mut tally = VoteTally::new();
        tally.vote(vote(1, 1, 60, 5));
        tally.vote(vote(2, 1, 60, FINAL_TIMESTAMP));
        assert_eq!(tally.quorum(Amount::raw(100)), Some(hash(1)));
        assert_eq!(tally.final_quorum(Amount::raw(100)), None);
        tally.vote(vote(1, 1, 60, FINAL_TIMESTAMP));
        assert_eq!(tally.final_quorum(Amount::raw(100)), Some(hash(1)));
    }

    #[test]
    fn test_leader_tie_breaks_to_lowest_hash() {
        let mut tally = VoteTally::new();
        tally.vote(vote(1, 2, 100, 1));
        tally.vote(vote(2, 1, 100, 1));
        assert_eq!(tally.leader(), Some(hash(1)));
    }
}
