//! Batched confirmation requests and winner broadcasts.
//!
//! The request loop primes one solicitor per tick with the current
//! principal representatives; elections queue confirm-req entries and
//! winner broadcasts against it, and a single flush at the end of the
//! tick writes the accumulated frames to the representatives'
//! channels.

use crate::reps::Representative;
use crate::tally::VoteTally;
use bytes::{BufMut, Bytes, BytesMut};
use lattix_network::{TcpChannel, TrafficType};
use lattix_types::{Block, BlockHash, Root};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Cap on confirm-req entries queued per channel per tick.
const MAX_REQUESTS_PER_CHANNEL: usize = 255;
/// Cap on winner broadcasts per tick.
const MAX_BLOCK_BROADCASTS: usize = 30;
/// Roots per confirm-req frame.
const REQUEST_FRAME_ROOTS: usize = 7;

/// Accumulates one request-loop tick's worth of traffic towards
/// principal representatives.
pub struct ConfirmationSolicitor {
    representatives: Vec<Representative>,
    /// Pending confirm-req roots per channel
    requests: HashMap<u64, (Arc<TcpChannel>, Vec<(Root, BlockHash)>)>,
    broadcasts: Vec<Arc<Block>>,
    prepared: bool,
}

impl Default for ConfirmationSolicitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfirmationSolicitor {
    /// Creates an unprimed solicitor.
    pub fn new() -> Self {
        Self {
            representatives: Vec::new(),
            requests: HashMap::new(),
            broadcasts: Vec::new(),
            prepared: false,
        }
    }

    /// Primes the solicitor with the representatives to solicit this
    /// tick.
    pub fn prepare(&mut self, representatives: Vec<Representative>) {
        debug_assert!(!self.prepared);
        self.representatives = representatives;
        self.prepared = true;
    }

    /// Queues a confirmation request for an election's current block
    /// towards every representative that has not voted finally for it.
    /// Returns the number of representatives solicited.
    pub fn request(&mut self, block: &Arc<Block>, tally: &VoteTally) -> usize {
        debug_assert!(self.prepared);
        let root = block.root();
        let hash = block.hash();
        let mut count = 0;

        for representative in &self.representatives {
            let Some(channel) = &representative.channel else {
                continue;
            };
            // Skip representatives whose final vote is already in
            if tally
                .find_vote(&representative.account)
                .is_some_and(|vote| vote.is_final() && vote.hash == hash)
            {
                continue;
            }
            let slot = self
                .requests
                .entry(channel.id())
                .or_insert_with(|| (channel.clone(), Vec::new()));
            if slot.1.len() >= MAX_REQUESTS_PER_CHANNEL {
                continue;
            }
            slot.1.push((root, hash));
            count += 1;
        }
        count
    }

    /// Queues a winner broadcast. Returns false when the per-tick
    /// broadcast budget is exhausted.
    pub fn broadcast(&mut self, block: &Arc<Block>) -> bool {
        debug_assert!(self.prepared);
        if self.broadcasts.len() >= MAX_BLOCK_BROADCASTS {
            return false;
        }
        self.broadcasts.push(block.clone());
        true
    }

    /// Writes the accumulated frames to their channels.
    pub fn flush(&mut self) {
        debug_assert!(self.prepared);

        for (_, (channel, roots)) in self.requests.drain() {
            for frame_roots in roots.chunks(REQUEST_FRAME_ROOTS) {
                let frame = encode_confirm_req(frame_roots);
                channel.send_buffer(frame, TrafficType::Generic, None);
            }
        }

        if !self.broadcasts.is_empty() {
            trace!(count = self.broadcasts.len(), "broadcasting election winners");
        }
        for block in self.broadcasts.drain(..) {
            let frame = encode_block_broadcast(&block);
            for representative in &self.representatives {
                if let Some(channel) = &representative.channel {
                    channel.send_buffer(frame.clone(), TrafficType::BlockBroadcast, None);
                }
            }
        }
    }
}

const MESSAGE_CONFIRM_REQ: u8 = 0x04;
const MESSAGE_PUBLISH: u8 = 0x03;

/// Length-prefixed confirm-req frame listing `(root, hash)` pairs.
fn encode_confirm_req(roots: &[(Root, BlockHash)]) -> Bytes {
    let mut frame = BytesMut::with_capacity(2 + roots.len() * 64);
    frame.put_u8(MESSAGE_CONFIRM_REQ);
    frame.put_u8(roots.len() as u8);
    for (root, hash) in roots {
        frame.put_slice(root.as_bytes());
        frame.put_slice(hash.as_bytes());
    }
    frame.freeze()
}

/// Length-prefixed publish frame carrying the block contents.
fn encode_block_broadcast(block: &Arc<Block>) -> Bytes {
    let mut frame = BytesMut::with_capacity(1 + 1 + 32 * 4 + 16 + 8);
    frame.put_u8(MESSAGE_PUBLISH);
    frame.put_u8(block.block_type() as u8);
    frame.put_slice(block.account().as_bytes());
    frame.put_slice(block.previous().as_bytes());
    frame.put_slice(block.representative().as_bytes());
    frame.put_slice(&block.balance().to_be_bytes());
    frame.put_slice(block.link().as_bytes());
    frame.put_u64(block.work().0);
    frame.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattix_types::{Account, Amount};

    fn block() -> Arc<Block> {
        let account = Account::from([1u8; 32]);
        Arc::new(Block::send(
            account,
            BlockHash::from([2u8; 32]),
            account,
            Amount::raw(5),
            Account::from([3u8; 32]),
        ))
    }

    #[test]
    fn test_request_without_channels_solicits_nobody() {
        let mut solicitor = ConfirmationSolicitor::new();
        solicitor.prepare(vec![Representative {
            account: Account::from([9u8; 32]),
            channel: None,
        }]);
        assert_eq!(solicitor.request(&block(), &VoteTally::new()), 0);
        solicitor.flush();
    }

    #[test]
    fn test_broadcast_budget() {
        let mut solicitor = ConfirmationSolicitor::new();
        solicitor.prepare(Vec::new());
        let block = block();
        for _ in 0..MAX_BLOCK_BROADCASTS {
            assert!(solicitor.broadcast(&block));
        }
        assert!(!solicitor.broadcast(&block));
        solicitor.flush();
    }

    #[test]
    fn test_confirm_req_frame_layout() {
        let block = block();
        let frame = encode_confirm_req(&[(block.root(), block.hash())]);
        assert_eq!(frame[0], MESSAGE_CONFIRM_REQ);
        assert_eq!(frame[1], 1);
        assert_eq!(frame.len(), 2 + 64);
    }
}
