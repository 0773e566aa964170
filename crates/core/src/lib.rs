//! # Lattix Core
//!
//! Generic plumbing shared by the Lattix node components:
//!
//! - [`FairQueue`] - bounded, weighted round-robin multi-source queue,
//!   reused by every ingress point that serves more than one producer
//! - [`ObserverSet`] - typed observer lists safe to notify from any
//!   thread, always invoked outside component mutexes
//! - [`TokenBucket`] and [`RateLimiter`] - token-bucket rate limiting
//!   for admission control and bandwidth shaping
//! - [`Stats`] - process-wide counter registry
//! - [`ContainerInfo`] - introspection tree of container sizes for
//!   monitoring

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod container_info;
pub mod fair_queue;
pub mod observer;
pub mod rate;
pub mod stats;

pub use container_info::ContainerInfo;
pub use fair_queue::{FairQueue, PushResult, QueueSource};
pub use observer::ObserverSet;
pub use rate::{RateLimiter, TokenBucket};
pub use stats::{StatDetail, StatType, Stats};
