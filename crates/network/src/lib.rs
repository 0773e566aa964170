//! # Lattix Network
//!
//! The TCP transport substrate the node pushes and pulls bytes
//! through:
//!
//! - [`TrafficType`] - classification of outgoing bytes, driving
//!   per-channel queueing priority and bandwidth accounting
//! - [`OutboundLimiter`] - shared egress token buckets consulted by
//!   every channel
//! - [`TcpChannel`] - one socket, one cooperative sender task, one
//!   bounded send queue per traffic type
//! - [`TcpListenerService`] - inbound acceptor with per-IP and
//!   per-subnet admission plus a weak connection table
//! - [`PeerMap`] - multi-indexed registry of realtime channels

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod bandwidth;
pub mod channel;
pub mod listener;
pub mod peer_map;
pub mod traffic_type;

pub use bandwidth::{OutboundLimiter, OutboundLimiterConfig};
pub use channel::{ChannelQueue, TcpChannel, WriteCallback};
pub use listener::{AcceptResult, TcpListenerConfig, TcpListenerService};
pub use peer_map::PeerMap;
pub use traffic_type::TrafficType;
