//! Proof-of-work nonces and validation thresholds.
//!
//! Work is a per-block rate-limiting measure, not consensus weight. A
//! nonce is valid for a root when the Keccak256 digest of
//! `nonce ‖ root`, read as a little-endian u64, meets the network
//! threshold.

use crate::Root;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

/// A 64-bit proof-of-work nonce.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WorkNonce(pub u64);

impl WorkNonce {
    /// The zero nonce (never valid on a live network).
    pub const ZERO: Self = Self(0);
}

impl From<u64> for WorkNonce {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Debug for WorkNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkNonce({:#018x})", self.0)
    }
}

impl fmt::Display for WorkNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Per-network work difficulty thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkThresholds {
    /// Minimum accepted difficulty
    pub threshold: u64,
}

impl WorkThresholds {
    /// Thresholds for the live network.
    pub const fn production() -> Self {
        Self {
            threshold: 0xffff_fff8_0000_0000,
        }
    }

    /// Thresholds for development and tests. Nearly every nonce passes,
    /// so test fixtures can generate work instantly.
    pub const fn dev() -> Self {
        Self {
            threshold: 0x0000_0000_0000_0100,
        }
    }

    /// Computes the difficulty of a nonce against a root.
    pub fn difficulty(root: &Root, work: WorkNonce) -> u64 {
        let digest = {
            let mut hasher = Keccak256::new();
            hasher.update(work.0.to_le_bytes());
            hasher.update(root.as_bytes());
            hasher.finalize()
        };
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    /// Checks whether a nonce meets this network's threshold for a root.
    pub fn validate(&self, root: &Root, work: WorkNonce) -> bool {
        Self::difficulty(root, work) >= self.threshold
    }

    /// Searches for a valid nonce for a root.
    ///
    /// Intended for tests and local block creation against the dev
    /// thresholds; at production difficulty this is a long search.
    pub fn generate(&self, root: &Root) -> WorkNonce {
        let mut nonce = {
            // Seed the search from the root so parallel generators diverge
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&root.as_bytes()[..8]);
            u64::from_le_bytes(bytes)
        };
        loop {
            let candidate = WorkNonce(nonce);
            if self.validate(root, candidate) {
                return candidate;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_meets_dev_threshold() {
        let thresholds = WorkThresholds::dev();
        let root = Root::from([3u8; 32]);
        let work = thresholds.generate(&root);
        assert!(thresholds.validate(&root, work));
    }

    #[test]
    fn test_work_bound_to_root() {
        let thresholds = WorkThresholds {
            threshold: 0x1000_0000_0000_0000,
        };
        let root_a = Root::from([1u8; 32]);
        let root_b = Root::from([2u8; 32]);
        let work = thresholds.generate(&root_a);
        assert!(thresholds.validate(&root_a, work));
        // The same nonce is overwhelmingly unlikely to satisfy a
        // different root at a non-trivial threshold
        let reused = WorkThresholds::difficulty(&root_b, work);
        assert!(reused < u64::MAX);
    }

    #[test]
    fn test_difficulty_deterministic() {
        let root = Root::from([7u8; 32]);
        let work = WorkNonce(42);
        assert_eq!(
            WorkThresholds::difficulty(&root, work),
            WorkThresholds::difficulty(&root, work)
        );
    }
}
