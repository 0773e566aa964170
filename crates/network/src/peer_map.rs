//! Multi-indexed registry of realtime channels.
//!
//! The primary table is keyed by remote endpoint; secondary indices on
//! node id, IPv6 /64 subnet and protocol version are maintained on
//! every insert and erase. Ordering by `last_packet_sent` is computed
//! at query time since send activity changes outside the map's control.
//! Uniform random sampling backs gossip target selection.

use crate::listener::same_subnet;
use crate::TcpChannel;
use lattix_core::{ContainerInfo, StatDetail, StatType, Stats};
use lattix_types::Account;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

fn subnet_key(ip: &IpAddr) -> [u8; 8] {
    match ip {
        IpAddr::V4(v4) => {
            let mut key = [0u8; 8];
            key[..4].copy_from_slice(&v4.octets());
            key
        }
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => {
                let mut key = [0u8; 8];
                key[..4].copy_from_slice(&v4.octets());
                key
            }
            None => {
                let mut key = [0u8; 8];
                key.copy_from_slice(&v6.octets()[..8]);
                key
            }
        },
    }
}

#[derive(Default)]
struct Indexes {
    by_endpoint: HashMap<SocketAddr, Arc<TcpChannel>>,
    by_node_id: HashMap<Account, BTreeSet<SocketAddr>>,
    by_subnet: HashMap<[u8; 8], BTreeSet<SocketAddr>>,
    by_version: BTreeMap<u8, BTreeSet<SocketAddr>>,
}

impl Indexes {
    fn index(&mut self, channel: &Arc<TcpChannel>) {
        let endpoint = channel.remote();
        if let Some(node_id) = channel.node_id() {
            self.by_node_id.entry(node_id).or_default().insert(endpoint);
        }
        self.by_subnet
            .entry(subnet_key(&endpoint.ip()))
            .or_default()
            .insert(endpoint);
        self.by_version
            .entry(channel.network_version())
            .or_default()
            .insert(endpoint);
    }

    fn unindex(&mut self, channel: &Arc<TcpChannel>) {
        let endpoint = channel.remote();
        if let Some(node_id) = channel.node_id() {
            if let Some(set) = self.by_node_id.get_mut(&node_id) {
                set.remove(&endpoint);
                if set.is_empty() {
                    self.by_node_id.remove(&node_id);
                }
            }
        }
        let subnet = subnet_key(&endpoint.ip());
        if let Some(set) = self.by_subnet.get_mut(&subnet) {
            set.remove(&endpoint);
            if set.is_empty() {
                self.by_subnet.remove(&subnet);
            }
        }
        let version = channel.network_version();
        if let Some(set) = self.by_version.get_mut(&version) {
            set.remove(&endpoint);
            if set.is_empty() {
                self.by_version.remove(&version);
            }
        }
    }
}

/// Registry of channels with endpoint, node-id, subnet and version
/// indices.
pub struct PeerMap {
    stats: Arc<Stats>,
    indexes: Mutex<Indexes>,
}

impl PeerMap {
    /// Creates an empty map.
    pub fn new(stats: Arc<Stats>) -> Self {
        Self {
            stats,
            indexes: Mutex::new(Indexes::default()),
        }
    }

    /// Inserts a channel. Returns false when the endpoint is already
    /// present.
    pub fn insert(&self, channel: Arc<TcpChannel>) -> bool {
        let mut indexes = self.indexes.lock();
        if indexes.by_endpoint.contains_key(&channel.remote()) {
            return false;
        }
        indexes.index(&channel);
        indexes.by_endpoint.insert(channel.remote(), channel);
        true
    }

    /// Removes a channel by endpoint.
    pub fn erase(&self, endpoint: &SocketAddr) -> Option<Arc<TcpChannel>> {
        let mut indexes = self.indexes.lock();
        let channel = indexes.by_endpoint.remove(endpoint)?;
        indexes.unindex(&channel);
        Some(channel)
    }

    /// A channel by endpoint.
    pub fn get(&self, endpoint: &SocketAddr) -> Option<Arc<TcpChannel>> {
        self.indexes.lock().by_endpoint.get(endpoint).cloned()
    }

    /// Channels registered under a node id.
    pub fn by_node_id(&self, node_id: &Account) -> Vec<Arc<TcpChannel>> {
        let indexes = self.indexes.lock();
        indexes
            .by_node_id
            .get(node_id)
            .map(|endpoints| {
                endpoints
                    .iter()
                    .filter_map(|endpoint| indexes.by_endpoint.get(endpoint).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Records a channel's node id and indexes it.
    pub fn set_node_id(&self, endpoint: &SocketAddr, node_id: Account) {
        let mut indexes = self.indexes.lock();
        let Some(channel) = indexes.by_endpoint.get(endpoint).cloned() else {
            return;
        };
        indexes.unindex(&channel);
        channel.set_node_id(node_id);
        indexes.index(&channel);
    }

    /// Number of channels sharing the subnet of `ip`.
    pub fn count_subnet(&self, ip: &IpAddr) -> usize {
        self.indexes
            .lock()
            .by_subnet
            .get(&subnet_key(ip))
            .map_or(0, |set| set.len())
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.indexes.lock().by_endpoint.len()
    }

    /// True when no channels are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All channels, unordered.
    pub fn list(&self) -> Vec<Arc<TcpChannel>> {
        self.indexes.lock().by_endpoint.values().cloned().collect()
    }

    /// All channels ordered by the time of their last sent packet,
    /// oldest first. Used by keepalive and purge sweeps.
    pub fn list_by_last_packet_sent(&self) -> Vec<Arc<TcpChannel>> {
        let mut channels = self.list();
        channels.sort_by_key(|channel| channel.last_packet_sent());
        channels
    }

    /// A uniform random sample of channels, used for gossip fan-out.
    pub fn random_sample(&self, count: usize) -> Vec<Arc<TcpChannel>> {
        let mut channels = self.list();
        let mut rng = rand::thread_rng();
        channels.shuffle(&mut rng);
        channels.truncate(count);
        channels
    }

    /// Closes and removes channels that are dead, idle past `cutoff`,
    /// or below `min_version`. Channels still reporting version 0 have
    /// not completed their handshake and are only subject to the idle
    /// cutoff. Returns how many were purged.
    pub fn purge(&self, cutoff: Instant, min_version: u8) -> usize {
        let victims: Vec<Arc<TcpChannel>> = {
            let indexes = self.indexes.lock();
            indexes
                .by_endpoint
                .values()
                .filter(|channel| {
                    let version = channel.network_version();
                    !channel.alive()
                        || channel.last_packet_sent() < cutoff
                        || (version != 0 && version < min_version)
                })
                .cloned()
                .collect()
        };
        for channel in &victims {
            let version = channel.network_version();
            let detail = if version != 0 && version < min_version {
                StatDetail::PurgeVersion
            } else {
                StatDetail::PurgeIdle
            };
            self.stats.inc(StatType::PeerMap, detail);
            debug!(remote = %channel.remote(), "purging channel");
            channel.close();
            self.erase(&channel.remote());
        }
        victims.len()
    }

    /// Whether an endpoint shares a subnet with any registered channel.
    pub fn same_subnet_as_any(&self, ip: &IpAddr) -> bool {
        self.indexes
            .lock()
            .by_endpoint
            .keys()
            .any(|endpoint| same_subnet(&endpoint.ip(), ip))
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let indexes = self.indexes.lock();
        ContainerInfo::default()
            .leaf(
                "channels",
                indexes.by_endpoint.len(),
                std::mem::size_of::<Arc<TcpChannel>>(),
            )
            .leaf("node_ids", indexes.by_node_id.len(), std::mem::size_of::<Account>())
            .leaf("subnets", indexes.by_subnet.len(), 8)
            .leaf("versions", indexes.by_version.len(), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OutboundLimiter, OutboundLimiterConfig};

    fn channel(port: u16) -> Arc<TcpChannel> {
        let stats = Arc::new(Stats::new());
        let limiter = Arc::new(OutboundLimiter::new(OutboundLimiterConfig::default()));
        TcpChannel::new(
            SocketAddr::from(([192, 0, 2, 1], port)),
            SocketAddr::from(([127, 0, 0, 1], 7175)),
            stats,
            limiter,
        )
    }

    fn peer_map() -> PeerMap {
        PeerMap::new(Arc::new(Stats::new()))
    }

    #[test]
    fn test_insert_and_duplicate() {
        let map = peer_map();
        let first = channel(1000);
        assert!(map.insert(first.clone()));
        assert!(!map.insert(first));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_node_id_index() {
        let map = peer_map();
        let first = channel(1000);
        map.insert(first.clone());
        let node_id = Account::from([7u8; 32]);
        map.set_node_id(&first.remote(), node_id);
        let found = map.by_node_id(&node_id);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].remote(), first.remote());

        map.erase(&first.remote());
        assert!(map.by_node_id(&node_id).is_empty());
    }

    #[test]
    fn test_subnet_count() {
        let map = peer_map();
        map.insert(channel(1000));
        map.insert(channel(1001));
        assert_eq!(map.count_subnet(&"192.0.2.1".parse().unwrap()), 2);
    }

    #[test]
    fn test_purge_below_min_version() {
        let map = peer_map();
        let old = channel(1000);
        old.set_network_version(3);
        let new = channel(1001);
        new.set_network_version(20);
        map.insert(old.clone());
        map.insert(new);

        let purged = map.purge(Instant::now() - std::time::Duration::from_secs(3600), 10);
        assert_eq!(purged, 1);
        assert_eq!(map.len(), 1);
        assert!(!old.alive());
    }

    #[test]
    fn test_random_sample_bounded() {
        let map = peer_map();
        for port in 0..10 {
            map.insert(channel(2000 + port));
        }
        assert_eq!(map.random_sample(3).len(), 3);
        assert_eq!(map.random_sample(100).len(), 10);
    }
}
