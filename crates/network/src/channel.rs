//! Outbound byte pipe over one socket.
//!
//! A channel owns a per-traffic-type send queue and one cooperative
//! sender task. Producers enqueue `(buffer, callback)` entries;
//! the sender pops small batches in weighted round-robin order,
//! acquires bandwidth from the shared outbound limiter in chunks, and
//! writes to the socket. All writes for one channel go through its
//! single task, serialising socket access without locks.

use crate::{OutboundLimiter, TrafficType};
use bytes::Bytes;
use lattix_core::{ContainerInfo, StatDetail, StatType, Stats};
use lattix_types::Account;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Completion callback for one queued buffer.
pub type WriteCallback = Box<dyn FnOnce(io::Result<usize>) + Send>;

type Entry = (Bytes, Option<WriteCallback>);

/// Absolute cap per traffic type; pushes beyond it are dropped.
const MAX_QUEUE_SIZE: usize = 128;
/// Entries popped per sender iteration.
const MAX_BATCH: usize = 8;
/// Bandwidth is acquired from the shared limiter in chunks of this
/// size, so the limiter lock is touched relatively infrequently.
const BANDWIDTH_CHUNK: u64 = 128 * 1024;

/// Per-traffic-type send queue with weighted round-robin pops.
#[derive(Default)]
pub struct ChannelQueue {
    queues: [VecDeque<Entry>; TrafficType::ALL.len()],
    current: Option<usize>,
    counter: usize,
}

impl ChannelQueue {
    /// True when every traffic type queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_empty())
    }

    /// Total queued entries.
    pub fn len(&self) -> usize {
        self.queues.iter().map(|queue| queue.len()).sum()
    }

    /// Queued entries for one traffic type.
    pub fn len_of(&self, traffic_type: TrafficType) -> usize {
        self.queues[traffic_type as usize].len()
    }

    /// Whether a traffic type is at its cap.
    pub fn full(&self, traffic_type: TrafficType) -> bool {
        self.len_of(traffic_type) >= MAX_QUEUE_SIZE
    }

    /// Enqueues an entry. Callers check [`ChannelQueue::full`] first.
    pub fn push(&mut self, traffic_type: TrafficType, entry: Entry) {
        debug_assert!(!self.full(traffic_type));
        self.queues[traffic_type as usize].push_back(entry);
    }

    /// Pops the next entry in weighted round-robin order. Must not be
    /// called on an empty queue.
    pub fn next(&mut self) -> (TrafficType, Entry) {
        debug_assert!(!self.is_empty());

        let should_seek = match self.current {
            None => true,
            Some(index) => {
                self.queues[index].is_empty() || self.counter >= TrafficType::ALL[index].priority()
            }
        };
        if should_seek {
            self.seek_next();
        }

        let index = self.current.expect("cursor set after seek");
        self.counter += 1;
        let entry = self.queues[index].pop_front().expect("non-empty after seek");
        (TrafficType::ALL[index], entry)
    }

    /// Pops up to `max_count` entries.
    pub fn next_batch(&mut self, max_count: usize) -> VecDeque<(TrafficType, Entry)> {
        let mut batch = VecDeque::new();
        while !self.is_empty() && batch.len() < max_count {
            batch.push_back(self.next());
        }
        batch
    }

    /// Removes and returns everything still queued.
    pub fn drain(&mut self) -> Vec<Entry> {
        self.current = None;
        self.counter = 0;
        self.queues
            .iter_mut()
            .flat_map(|queue| queue.drain(..))
            .collect()
    }

    fn seek_next(&mut self) {
        self.counter = 0;
        let start = self.current.map_or(0, |index| index + 1);
        for offset in 0..self.queues.len() {
            let index = (start + offset) % self.queues.len();
            if !self.queues[index].is_empty() {
                self.current = Some(index);
                return;
            }
        }
        unreachable!("seek on an empty channel queue");
    }
}

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// One outbound TCP channel.
pub struct TcpChannel {
    id: u64,
    remote: SocketAddr,
    local: SocketAddr,
    queue: Mutex<ChannelQueue>,
    notify: Notify,
    closed: AtomicBool,
    last_packet_sent: Mutex<Instant>,
    network_version: AtomicU8,
    node_id: Mutex<Option<Account>>,
    stats: Arc<Stats>,
    limiter: Arc<OutboundLimiter>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    /// Creates a channel for an established socket pair. The sender
    /// task is spawned separately with [`TcpChannel::start`].
    pub fn new(
        remote: SocketAddr,
        local: SocketAddr,
        stats: Arc<Stats>,
        limiter: Arc<OutboundLimiter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            local,
            queue: Mutex::new(ChannelQueue::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            last_packet_sent: Mutex::new(Instant::now()),
            network_version: AtomicU8::new(0),
            node_id: Mutex::new(None),
            stats,
            limiter,
            task: Mutex::new(None),
        })
    }

    /// Spawns the sender task writing to `writer` on the given runtime.
    pub fn start<W>(self: &Arc<Self>, writer: W, handle: &tokio::runtime::Handle)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let channel = self.clone();
        let task = handle.spawn(run_sender(channel, writer));
        *self.task.lock() = Some(task);
    }

    /// Queues a buffer for sending. Returns false, without invoking the
    /// callback, when the traffic type queue is at its cap or the
    /// channel is closed.
    pub fn send_buffer(
        &self,
        buffer: Bytes,
        traffic_type: TrafficType,
        callback: Option<WriteCallback>,
    ) -> bool {
        if !self.alive() {
            self.stats
                .inc(StatType::TcpChannelDrop, traffic_type.stat_detail());
            return false;
        }
        let mut queue = self.queue.lock();
        if queue.full(traffic_type) {
            drop(queue);
            self.stats.inc(StatType::TcpChannel, StatDetail::Drop);
            self.stats
                .inc(StatType::TcpChannelDrop, traffic_type.stat_detail());
            return false;
        }
        queue.push(traffic_type, (buffer, callback));
        drop(queue);
        self.stats.inc(StatType::TcpChannel, StatDetail::Queued);
        self.notify.notify_one();
        true
    }

    /// Whether the channel can still send.
    pub fn alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Closes the channel. The sender task drains its queue with
    /// aborted callbacks and exits.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(channel = self.id, remote = %self.remote, "closing channel");
        }
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Awaits sender task completion. Used on shutdown paths where the
    /// runtime is still alive.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Channel id, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote socket address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Local socket address.
    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// Time of the last successful socket write.
    pub fn last_packet_sent(&self) -> Instant {
        *self.last_packet_sent.lock()
    }

    /// Protocol version reported by the peer handshake.
    pub fn network_version(&self) -> u8 {
        self.network_version.load(Ordering::Relaxed)
    }

    /// Records the peer protocol version.
    pub fn set_network_version(&self, version: u8) {
        self.network_version.store(version, Ordering::Relaxed);
    }

    /// Peer node id, once known.
    pub fn node_id(&self) -> Option<Account> {
        *self.node_id.lock()
    }

    /// Records the peer node id.
    pub fn set_node_id(&self, node_id: Account) {
        *self.node_id.lock() = Some(node_id);
    }

    /// Total queued entries across traffic types.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queued entries for one traffic type.
    pub fn queue_len_of(&self, traffic_type: TrafficType) -> usize {
        self.queue.lock().len_of(traffic_type)
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        ContainerInfo::default().leaf("queue", self.queue_len(), std::mem::size_of::<Entry>())
    }

    fn record_sent(&self, size: usize, traffic_type: TrafficType) {
        self.stats.inc(StatType::TcpChannel, StatDetail::Send);
        self.stats
            .add(StatType::TcpChannelSend, traffic_type.stat_detail(), size as u64);
        *self.last_packet_sent.lock() = Instant::now();
    }
}

impl std::fmt::Debug for TcpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpChannel")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("alive", &self.alive())
            .finish()
    }
}

async fn run_sender<W>(channel: Arc<TcpChannel>, mut writer: W)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut allocated_bandwidth: u64 = 0;

    'outer: while channel.alive() {
        let batch = channel.queue.lock().next_batch(MAX_BATCH);
        if batch.is_empty() {
            channel.notify.notified().await;
            continue;
        }
        for (traffic_type, entry) in batch {
            if send_one(&channel, &mut writer, &mut allocated_bandwidth, traffic_type, entry)
                .await
                .is_err()
            {
                channel.close();
                break 'outer;
            }
        }
    }

    // Anything still queued at shutdown completes as aborted
    let remainder = channel.queue.lock().drain();
    for (_, callback) in remainder {
        channel.stats.inc(StatType::TcpChannelError, StatDetail::Aborted);
        if let Some(callback) = callback {
            callback(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "channel closed",
            )));
        }
    }
    let _ = writer.shutdown().await;
}

async fn send_one<W>(
    channel: &Arc<TcpChannel>,
    writer: &mut W,
    allocated_bandwidth: &mut u64,
    traffic_type: TrafficType,
    (buffer, callback): Entry,
) -> Result<(), ()>
where
    W: AsyncWrite + Unpin + Send,
{
    let size = buffer.len() as u64;

    // Refill the local reservoir in larger chunks so the shared limiter
    // is consulted relatively infrequently
    while *allocated_bandwidth < size {
        if !channel.alive() {
            if let Some(callback) = callback {
                callback(Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "channel closed",
                )));
            }
            return Err(());
        }
        let chunk = BANDWIDTH_CHUNK.max(size - *allocated_bandwidth);
        if channel.limiter.should_pass(chunk, traffic_type) {
            *allocated_bandwidth += chunk;
        } else {
            channel
                .stats
                .inc(StatType::TcpChannel, StatDetail::WaitBandwidth);
            // TODO: exponential backoff between bandwidth retries
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    *allocated_bandwidth -= size;

    match writer.write_all(&buffer).await {
        Ok(()) => {
            trace!(channel = channel.id, %traffic_type, size, "sent buffer");
            channel.record_sent(buffer.len(), traffic_type);
            if let Some(callback) = callback {
                callback(Ok(buffer.len()));
            }
            Ok(())
        }
        Err(error) => {
            let detail = match error.kind() {
                io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
                    StatDetail::Aborted
                }
                _ => StatDetail::WriteError,
            };
            channel.stats.inc(StatType::TcpChannelError, detail);
            debug!(channel = channel.id, %error, "channel write failed");
            if let Some(callback) = callback {
                callback(Err(error));
            }
            Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(size: usize) -> Entry {
        (Bytes::from(vec![0u8; size]), None)
    }

    #[test]
    fn test_queue_cap() {
        let mut queue = ChannelQueue::default();
        for _ in 0..MAX_QUEUE_SIZE {
            assert!(!queue.full(TrafficType::Generic));
            queue.push(TrafficType::Generic, entry(1));
        }
        assert!(queue.full(TrafficType::Generic));
        // Other traffic types are unaffected
        assert!(!queue.full(TrafficType::Bootstrap));
    }

    #[test]
    fn test_queue_priority_interleave() {
        let mut queue = ChannelQueue::default();
        for _ in 0..8 {
            queue.push(TrafficType::Generic, entry(1));
            queue.push(TrafficType::BlockBroadcast, entry(2));
        }
        let popped: Vec<TrafficType> = queue
            .next_batch(10)
            .into_iter()
            .map(|(traffic_type, _)| traffic_type)
            .collect();
        // Generic runs at weight 4, block broadcast at weight 1
        assert_eq!(
            popped,
            vec![
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::BlockBroadcast,
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::Generic,
                TrafficType::BlockBroadcast,
            ]
        );
    }

    #[test]
    fn test_queue_drain() {
        let mut queue = ChannelQueue::default();
        queue.push(TrafficType::Generic, entry(1));
        queue.push(TrafficType::Bootstrap, entry(1));
        assert_eq!(queue.drain().len(), 2);
        assert!(queue.is_empty());
    }
}
