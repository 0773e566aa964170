//! Bounded caches of recent confirmations.

use crate::ElectionStatus;
use lattix_core::ContainerInfo;
use lattix_types::{BlockHash, QualifiedRoot};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// FIFO-evicted cache of recently confirmed roots, consulted to
/// suppress re-elections for already decided positions.
pub struct RecentlyConfirmed {
    max_size: usize,
    inner: Mutex<RecentlyConfirmedInner>,
}

#[derive(Default)]
struct RecentlyConfirmedInner {
    by_root: HashMap<QualifiedRoot, BlockHash>,
    by_hash: HashMap<BlockHash, QualifiedRoot>,
    order: VecDeque<QualifiedRoot>,
}

impl RecentlyConfirmed {
    /// Creates a cache bounded to `max_size` roots.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            inner: Mutex::new(RecentlyConfirmedInner::default()),
        }
    }

    /// Records a confirmed root and its winning hash, evicting the
    /// oldest entry when over capacity.
    pub fn put(&self, root: QualifiedRoot, winner: BlockHash) {
        let mut inner = self.inner.lock();
        if inner.by_root.insert(root, winner).is_none() {
            inner.order.push_back(root);
        }
        inner.by_hash.insert(winner, root);
        while inner.order.len() > self.max_size {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(hash) = inner.by_root.remove(&oldest) {
                inner.by_hash.remove(&hash);
            }
        }
    }

    /// Whether a root was recently confirmed.
    pub fn contains_root(&self, root: &QualifiedRoot) -> bool {
        self.inner.lock().by_root.contains_key(root)
    }

    /// Whether a hash recently won a confirmation.
    pub fn contains_hash(&self, hash: &BlockHash) -> bool {
        self.inner.lock().by_hash.contains_key(hash)
    }

    /// Removes an entry by winning hash, used when a confirmed block is
    /// rolled back by an explicit force.
    pub fn erase(&self, hash: &BlockHash) {
        let mut inner = self.inner.lock();
        if let Some(root) = inner.by_hash.remove(hash) {
            inner.by_root.remove(&root);
            inner.order.retain(|entry| *entry != root);
        }
    }

    /// Number of cached roots.
    pub fn len(&self) -> usize {
        self.inner.lock().by_root.len()
    }

    /// True when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default().leaf(
            "confirmed",
            self.len(),
            std::mem::size_of::<(QualifiedRoot, BlockHash)>(),
        )
    }
}

/// Bounded FIFO history of completed election statuses, kept for
/// observability.
pub struct RecentlyCemented {
    max_size: usize,
    cemented: Mutex<VecDeque<ElectionStatus>>,
}

impl RecentlyCemented {
    /// Creates a history bounded to `max_size` records.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            cemented: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a completed election status.
    pub fn put(&self, status: ElectionStatus) {
        let mut cemented = self.cemented.lock();
        cemented.push_back(status);
        while cemented.len() > self.max_size {
            cemented.pop_front();
        }
    }

    /// A copy of the recorded history, oldest first.
    pub fn list(&self) -> Vec<ElectionStatus> {
        self.cemented.lock().iter().cloned().collect()
    }

    /// Whether any record names `hash` as its winner.
    pub fn contains_winner(&self, hash: &BlockHash) -> bool {
        self.cemented
            .lock()
            .iter()
            .any(|status| status.winner.as_ref().is_some_and(|winner| winner.hash() == *hash))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.cemented.lock().len()
    }

    /// True when the history is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default().leaf(
            "cemented",
            self.len(),
            std::mem::size_of::<ElectionStatus>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(fill: u8) -> QualifiedRoot {
        QualifiedRoot::new(
            lattix_types::Root::from([fill; 32]),
            BlockHash::from([fill; 32]),
        )
    }

    #[test]
    fn test_fifo_eviction() {
        let cache = RecentlyConfirmed::new(2);
        cache.put(root(1), BlockHash::from([1u8; 32]));
        cache.put(root(2), BlockHash::from([2u8; 32]));
        cache.put(root(3), BlockHash::from([3u8; 32]));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains_root(&root(1)));
        assert!(cache.contains_root(&root(2)));
        assert!(cache.contains_root(&root(3)));
    }

    #[test]
    fn test_erase_by_hash() {
        let cache = RecentlyConfirmed::new(8);
        let winner = BlockHash::from([9u8; 32]);
        cache.put(root(1), winner);
        assert!(cache.contains_hash(&winner));
        cache.erase(&winner);
        assert!(!cache.contains_root(&root(1)));
        assert!(!cache.contains_hash(&winner));
    }
}
