//! Listener admission tests over real sockets on loopback.

use lattix_core::Stats;
use lattix_network::{
    OutboundLimiter, OutboundLimiterConfig, TcpListenerConfig, TcpListenerService,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

fn service(config: TcpListenerConfig) -> Arc<TcpListenerService> {
    let stats = Arc::new(Stats::new());
    let limiter = Arc::new(OutboundLimiter::new(OutboundLimiterConfig::default()));
    TcpListenerService::new(config, stats, limiter)
}

fn config_on_free_port() -> TcpListenerConfig {
    TcpListenerConfig {
        port: 0,
        max_inbound_connections: 16,
        max_peers_per_ip: 2,
        max_peers_per_subnetwork: 4,
    }
}

async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(Instant::now() < deadline, "timed out");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_accepts_and_tracks_connections() {
    let listener = service(config_on_free_port());
    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_clone = accepted.clone();
    listener.connection_accepted.add(move |_| {
        accepted_clone.fetch_add(1, Ordering::SeqCst);
    });

    listener
        .start(&tokio::runtime::Handle::current())
        .unwrap();
    let local = listener.local_addr().unwrap();
    let target = SocketAddr::from(([127, 0, 0, 1], local.port()));

    let _client = TcpStream::connect(target).await.unwrap();
    wait_until(|| accepted.load(Ordering::SeqCst) == 1).await;
    wait_until(|| listener.connection_count() == 1).await;

    listener.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_per_ip_cap_rejects_excess() {
    let listener = service(config_on_free_port());
    listener
        .start(&tokio::runtime::Handle::current())
        .unwrap();
    let local = listener.local_addr().unwrap();
    let target = SocketAddr::from(([127, 0, 0, 1], local.port()));

    // Cap is 2 per IP; the third connection must be refused
    let _first = TcpStream::connect(target).await.unwrap();
    let _second = TcpStream::connect(target).await.unwrap();
    wait_until(|| listener.connection_count() == 2).await;

    let mut third = TcpStream::connect(target).await.unwrap();
    // The refused socket is shut down by the listener
    use tokio::io::AsyncReadExt;
    let mut buffer = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), third.read(&mut buffer))
        .await
        .expect("refusal should close the socket");
    assert_eq!(read.unwrap(), 0);
    assert_eq!(listener.connection_count(), 2);

    listener.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_excluded_peer_rejected() {
    let listener = service(config_on_free_port());
    listener.exclude("127.0.0.1".parse().unwrap());
    listener
        .start(&tokio::runtime::Handle::current())
        .unwrap();
    let local = listener.local_addr().unwrap();
    let target = SocketAddr::from(([127, 0, 0, 1], local.port()));

    let mut client = TcpStream::connect(target).await.unwrap();
    use tokio::io::AsyncReadExt;
    let mut buffer = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buffer))
        .await
        .expect("exclusion should close the socket");
    assert_eq!(read.unwrap(), 0);
    assert_eq!(listener.connection_count(), 0);

    listener.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dead_connections_swept() {
    let listener = service(config_on_free_port());
    listener
        .start(&tokio::runtime::Handle::current())
        .unwrap();
    let local = listener.local_addr().unwrap();
    let target = SocketAddr::from(([127, 0, 0, 1], local.port()));

    let client = TcpStream::connect(target).await.unwrap();
    wait_until(|| listener.connection_count() == 1).await;

    drop(client);
    // The reader observes EOF and the cleanup thread sweeps the entry
    wait_until(|| listener.connection_count() == 0).await;

    listener.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_closes_everything() {
    let listener = service(config_on_free_port());
    listener
        .start(&tokio::runtime::Handle::current())
        .unwrap();
    let local = listener.local_addr().unwrap();
    let target = SocketAddr::from(([127, 0, 0, 1], local.port()));

    let _client = TcpStream::connect(target).await.unwrap();
    wait_until(|| listener.connection_count() == 1).await;

    listener.stop();
    assert_eq!(listener.connection_count(), 0);

    // Stopping again is a no-op
    listener.stop();
}
