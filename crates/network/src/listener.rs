//! Inbound TCP acceptor with admission control.
//!
//! One cooperative task accepts connections on `[::]:port`, refusing
//! peers that are excluded, over the per-IP cap, or (for IPv6) over the
//! per-/64-subnet cap. Accepted sockets become [`TcpChannel`]s tracked
//! in a weak connection table; a dedicated cleanup thread sweeps dead
//! entries once per second. Outbound connection attempts share the same
//! admission checks plus an attempt budget.

use crate::{OutboundLimiter, TcpChannel};
use lattix_core::{ContainerInfo, ObserverSet, StatDetail, StatType, Stats};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

/// Listener parameters.
#[derive(Debug, Clone)]
pub struct TcpListenerConfig {
    /// Listen port; 0 binds an ephemeral port
    pub port: u16,
    /// Cap on simultaneous inbound connections
    pub max_inbound_connections: usize,
    /// Admission cap per remote IP
    pub max_peers_per_ip: usize,
    /// Admission cap per IPv6 /64 subnet
    pub max_peers_per_subnetwork: usize,
}

impl Default for TcpListenerConfig {
    fn default() -> Self {
        Self {
            port: 7175,
            max_inbound_connections: 2048,
            max_peers_per_ip: 4,
            max_peers_per_subnetwork: 16,
        }
    }
}

/// Outcome of connection admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptResult {
    /// Connection admitted
    Accepted,
    /// Peer is on the excluded list
    Excluded,
    /// Too many connections from this IP
    TooManyPerIp,
    /// Too many connections from this IPv6 /64 subnet
    TooManyPerSubnetwork,
    /// Outbound attempt budget exhausted
    TooManyAttempts,
}

struct ConnectionEntry {
    remote: SocketAddr,
    channel: Weak<TcpChannel>,
}

struct AttemptEntry {
    remote: SocketAddr,
    started: Instant,
}

#[derive(Default)]
struct ListenerData {
    connections: Vec<ConnectionEntry>,
    attempts: Vec<AttemptEntry>,
    local: Option<SocketAddr>,
}

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);
/// Busy-loop guard between accepted connections.
const ACCEPT_PAUSE: Duration = Duration::from_millis(10);
/// Additional cooldown after an accept error.
const ERROR_COOLDOWN: Duration = Duration::from_millis(100);

/// Inbound acceptor, connection table and outbound connector.
pub struct TcpListenerService {
    config: TcpListenerConfig,
    stats: Arc<Stats>,
    limiter: Arc<OutboundLimiter>,
    data: Mutex<ListenerData>,
    excluded: Mutex<HashSet<IpAddr>>,
    stopped: AtomicBool,
    cleanup_signal: Mutex<bool>,
    cleanup_condition: Condvar,
    accept_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cleanup_thread: Mutex<Option<std::thread::JoinHandle<()>>>,

    /// Fired with each admitted channel, outside the table lock.
    pub connection_accepted: ObserverSet<Arc<TcpChannel>>,
}

impl TcpListenerService {
    /// Creates a stopped listener.
    pub fn new(
        config: TcpListenerConfig,
        stats: Arc<Stats>,
        limiter: Arc<OutboundLimiter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            stats,
            limiter,
            data: Mutex::new(ListenerData::default()),
            excluded: Mutex::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            cleanup_signal: Mutex::new(false),
            cleanup_condition: Condvar::new(),
            accept_task: Mutex::new(None),
            cleanup_thread: Mutex::new(None),
            connection_accepted: ObserverSet::new(),
        })
    }

    /// Binds the socket and spawns the acceptor task and cleanup
    /// thread. Fails fast if the port cannot be bound.
    pub fn start(self: &Arc<Self>, handle: &tokio::runtime::Handle) -> std::io::Result<()> {
        let std_listener =
            std::net::TcpListener::bind((Ipv6Addr::UNSPECIFIED, self.config.port)).map_err(
                |bind_error| {
                    error!(port = self.config.port, %bind_error, "error binding listener");
                    bind_error
                },
            )?;
        std_listener.set_nonblocking(true)?;
        let local = std_listener.local_addr()?;
        self.data.lock().local = Some(local);
        info!(%local, "listening for incoming connections");

        let this = self.clone();
        let task = handle.spawn(async move {
            let listener = match tokio::net::TcpListener::from_std(std_listener) {
                Ok(listener) => listener,
                Err(register_error) => {
                    error!(%register_error, "error registering listener with the runtime");
                    return;
                }
            };
            this.run_accepting(listener).await;
        });
        *self.accept_task.lock() = Some(task);

        let this = self.clone();
        *self.cleanup_thread.lock() = Some(
            std::thread::Builder::new()
                .name("tcp_cleanup".into())
                .spawn(move || this.run_cleanup())
                .expect("spawning tcp cleanup thread"),
        );
        Ok(())
    }

    /// Stops accepting, closes all tracked channels and joins the
    /// cleanup thread.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("stopping listener and closing all connections");

        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        {
            let mut signal = self.cleanup_signal.lock();
            *signal = true;
        }
        self.cleanup_condition.notify_all();
        if let Some(thread) = self.cleanup_thread.lock().take() {
            let _ = thread.join();
        }

        let connections = {
            let mut data = self.data.lock();
            std::mem::take(&mut data.connections)
        };
        for entry in connections {
            if let Some(channel) = entry.channel.upgrade() {
                channel.close();
            }
        }
    }

    /// The bound local address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.data.lock().local
    }

    /// Number of live tracked connections.
    pub fn connection_count(&self) -> usize {
        self.data
            .lock()
            .connections
            .iter()
            .filter(|entry| entry.channel.upgrade().is_some_and(|channel| channel.alive()))
            .count()
    }

    /// Number of in-flight outbound attempts.
    pub fn attempt_count(&self) -> usize {
        self.data.lock().attempts.len()
    }

    /// Adds an IP to the excluded list.
    pub fn exclude(&self, ip: IpAddr) {
        self.excluded.lock().insert(ip);
    }

    /// Initiates an outbound connection. Returns whether an attempt was
    /// started.
    pub fn connect(
        self: &Arc<Self>,
        remote: SocketAddr,
        handle: &tokio::runtime::Handle,
    ) -> bool {
        {
            let data = self.data.lock();
            let result = self.check_limits(&data, remote.ip(), true);
            if result != AcceptResult::Accepted {
                return false;
            }
        }
        self.data.lock().attempts.push(AttemptEntry {
            remote,
            started: Instant::now(),
        });
        self.stats
            .inc(StatType::TcpListener, StatDetail::ConnectInitiate);
        debug!(%remote, "initiating outgoing connection");

        let this = self.clone();
        handle.spawn(async move {
            match TcpStream::connect(remote).await {
                Ok(stream) => {
                    if this.accept_one(stream, remote, true).await != AcceptResult::Accepted {
                        this.stats
                            .inc(StatType::TcpListener, StatDetail::ConnectFailure);
                    }
                }
                Err(connect_error) => {
                    this.stats
                        .inc(StatType::TcpListener, StatDetail::ConnectError);
                    debug!(%remote, %connect_error, "error connecting");
                }
            }
            this.data
                .lock()
                .attempts
                .retain(|attempt| attempt.remote != remote);
        });
        true
    }

    /// Container size introspection.
    pub fn container_info(&self) -> ContainerInfo {
        let data = self.data.lock();
        ContainerInfo::default()
            .leaf(
                "connections",
                data.connections.len(),
                std::mem::size_of::<ConnectionEntry>(),
            )
            .leaf(
                "attempts",
                data.attempts.len(),
                std::mem::size_of::<AttemptEntry>(),
            )
    }

    fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn run_accepting(self: Arc<Self>, listener: tokio::net::TcpListener) {
        debug!("starting acceptor task");
        while !self.stopped() {
            self.wait_available_slots().await;
            if self.stopped() {
                break;
            }
            match listener.accept().await {
                Ok((stream, remote)) => {
                    if self.accept_one(stream, remote, false).await != AcceptResult::Accepted {
                        self.stats
                            .inc(StatType::TcpListener, StatDetail::AcceptFailure);
                    }
                    tokio::time::sleep(ACCEPT_PAUSE).await;
                }
                Err(accept_error) => {
                    self.stats
                        .inc(StatType::TcpListener, StatDetail::AcceptError);
                    if !self.stopped() {
                        warn!(%accept_error, "error accepting incoming connection");
                    }
                    tokio::time::sleep(ERROR_COOLDOWN).await;
                }
            }
        }
        debug!("stopped acceptor task");
    }

    /// Cooperatively waits while the connection table is at capacity.
    async fn wait_available_slots(&self) {
        let mut last_log = Instant::now() - Duration::from_secs(60);
        while self.connection_count() >= self.config.max_inbound_connections && !self.stopped() {
            if last_log.elapsed() >= Duration::from_secs(15) {
                last_log = Instant::now();
                warn!(
                    current = self.connection_count(),
                    max = self.config.max_inbound_connections,
                    "waiting for available slots to accept new connections"
                );
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn accept_one(
        self: &Arc<Self>,
        mut stream: TcpStream,
        remote: SocketAddr,
        outbound: bool,
    ) -> AcceptResult {
        let result = {
            let data = self.data.lock();
            self.check_limits(&data, remote.ip(), outbound)
        };
        if result != AcceptResult::Accepted {
            // Best effort graceful close to avoid zombie sockets
            use tokio::io::AsyncWriteExt;
            if let Err(close_error) = stream.shutdown().await {
                self.stats.inc(StatType::TcpListener, StatDetail::CloseError);
                debug!(%remote, %close_error, "error closing refused connection");
            }
            return result;
        }

        let local = stream
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0));
        let (mut read_half, write_half) = stream.into_split();
        let channel = TcpChannel::new(remote, local, self.stats.clone(), self.limiter.clone());
        channel.start(write_half, &tokio::runtime::Handle::current());

        // Drain the read side; EOF or error closes the channel. The
        // reader task holds the channel alive for the socket lifetime.
        let reader_channel = channel.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];
            loop {
                match read_half.read(&mut buffer).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            reader_channel.close();
        });

        self.data.lock().connections.push(ConnectionEntry {
            remote,
            channel: Arc::downgrade(&channel),
        });

        self.stats
            .inc(StatType::TcpListener, StatDetail::AcceptSuccess);
        debug!(%remote, outbound, "accepted connection");
        self.connection_accepted.notify(&channel);
        AcceptResult::Accepted
    }

    fn check_limits(&self, data: &ListenerData, ip: IpAddr, outbound: bool) -> AcceptResult {
        if self.excluded.lock().contains(&ip) {
            self.stats.inc(StatType::TcpListener, StatDetail::Excluded);
            debug!(%ip, "rejected connection from excluded peer");
            return AcceptResult::Excluded;
        }

        let per_ip = count_live(data, |entry| entry.remote.ip() == ip);
        if per_ip >= self.config.max_peers_per_ip {
            self.stats.inc(StatType::TcpListener, StatDetail::MaxPerIp);
            debug!(%ip, count = per_ip, "max connections per IP reached");
            return AcceptResult::TooManyPerIp;
        }

        // IPv4 address space is not big enough to justify subnet caps
        if !is_ipv4_or_mapped(&ip) {
            let per_subnet = count_live(data, |entry| same_subnet(&entry.remote.ip(), &ip));
            if per_subnet >= self.config.max_peers_per_subnetwork {
                self.stats
                    .inc(StatType::TcpListener, StatDetail::MaxPerSubnetwork);
                debug!(%ip, count = per_subnet, "max connections per subnetwork reached");
                return AcceptResult::TooManyPerSubnetwork;
            }
        }

        if outbound {
            let max_attempts = self.config.max_inbound_connections / 2;
            if data.attempts.len() > max_attempts {
                self.stats
                    .inc(StatType::TcpListener, StatDetail::MaxAttempts);
                return AcceptResult::TooManyAttempts;
            }
            if data.attempts.iter().any(|attempt| attempt.remote.ip() == ip) {
                self.stats
                    .inc(StatType::TcpListener, StatDetail::AttemptInProgress);
                debug!(%ip, "connection attempt already in progress");
                return AcceptResult::TooManyAttempts;
            }
        }

        AcceptResult::Accepted
    }

    fn run_cleanup(&self) {
        let mut signal = self.cleanup_signal.lock();
        while !self.stopped() {
            drop(signal);
            self.cleanup();
            signal = self.cleanup_signal.lock();
            let _ = self.cleanup_condition
                .wait_for(&mut signal, CLEANUP_INTERVAL);
        }
    }

    fn cleanup(&self) {
        let mut data = self.data.lock();
        let before = data.connections.len();
        data.connections.retain(|entry| {
            entry
                .channel
                .upgrade()
                .is_some_and(|channel| channel.alive())
        });
        let swept = before - data.connections.len();
        if swept > 0 {
            self.stats
                .add(StatType::TcpListener, StatDetail::EraseDead, swept as u64);
            debug!(swept, "evicted dead connections");
        }

        let cutoff = Instant::now() - ATTEMPT_TIMEOUT;
        data.attempts.retain(|attempt| attempt.started >= cutoff);
    }
}

fn count_live(data: &ListenerData, predicate: impl Fn(&ConnectionEntry) -> bool) -> usize {
    data.connections
        .iter()
        .filter(|entry| entry.channel.upgrade().is_some_and(|channel| channel.alive()))
        .filter(|entry| predicate(entry))
        .count()
}

/// Whether two addresses fall in the same IPv6 /64.
pub fn same_subnet(a: &IpAddr, b: &IpAddr) -> bool {
    match (a, b) {
        (IpAddr::V6(a), IpAddr::V6(b)) => a.octets()[..8] == b.octets()[..8],
        _ => a == b,
    }
}

/// Whether an address is IPv4 or an IPv4-mapped IPv6 address.
pub fn is_ipv4_or_mapped(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(_) => true,
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_subnet_v6() {
        let a: IpAddr = "2001:db8:1:1::1".parse().unwrap();
        let b: IpAddr = "2001:db8:1:1::2".parse().unwrap();
        let c: IpAddr = "2001:db8:2:1::1".parse().unwrap();
        assert!(same_subnet(&a, &b));
        assert!(!same_subnet(&a, &c));
    }

    #[test]
    fn test_v4_mapped_detected() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let mapped: IpAddr = "::ffff:192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(is_ipv4_or_mapped(&v4));
        assert!(is_ipv4_or_mapped(&mapped));
        assert!(!is_ipv4_or_mapped(&v6));
    }
}
