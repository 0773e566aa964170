//! # Lattix Consensus
//!
//! The block ingestion and election pipeline:
//!
//! - [`BlockProcessor`] - fair-queued, batched admission of blocks into
//!   the ledger, one write transaction per batch
//! - [`Election`] - state machine over one qualified root, tallying
//!   representative votes until quorum
//! - [`ActiveElections`] - the bounded container of in-flight
//!   elections, its request loop and its cementing callbacks
//! - [`Bucket`] and [`PriorityScheduler`] - balance-tiered admission
//!   of blocks into elections
//! - [`ConfirmingSet`] - durable cementing of election winners
//! - [`VoteRouter`] - vote fan-in from the network to elections
//! - [`ConfirmationSolicitor`] - batched confirm-req and winner
//!   broadcasts towards principal representatives

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod active;
pub mod block_context;
pub mod block_source;
pub mod bucket;
pub mod confirming_set;
pub mod election;
pub mod processor;
pub mod recently;
pub mod reps;
pub mod scheduler;
pub mod solicitor;
pub mod tally;
pub mod vote_router;

pub use active::{ActiveElections, ActiveElectionsConfig, InsertResult};
pub use block_context::BlockContext;
pub use block_source::BlockSource;
pub use bucket::{Bucket, BucketConfig};
pub use confirming_set::{ConfirmingSet, ConfirmingSetConfig};
pub use election::{
    Election, ElectionBehavior, ElectionState, ElectionStatus, ElectionStatusType, VoteCode,
};
pub use processor::{BlockProcessor, BlockProcessorConfig};
pub use recently::{RecentlyCemented, RecentlyConfirmed};
pub use reps::{Representative, RepresentativeRegister};
pub use scheduler::{Bucketing, PriorityScheduler, PrioritySchedulerConfig};
pub use solicitor::ConfirmationSolicitor;
pub use tally::{Vote, VoteTally, FINAL_TIMESTAMP};
pub use vote_router::VoteRouter;
