//! # Lattix Ledger
//!
//! The ledger state machine and its storage substrate:
//!
//! - [`Store`] - multi-table KV store with logical read/write
//!   transactions
//! - [`WriteQueue`] - tagged slots serialising ledger writers
//! - [`Ledger`] - account-graph rules: `process`, `rollback`,
//!   `confirm`, `successor` and the queries the consensus pipeline
//!   needs
//! - [`UncheckedMap`] - parked blocks whose dependency has not arrived
//!
//! The storage engine itself is an in-memory table set; the rest of the
//! node only sees the transaction and table contract.

#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod ledger;
pub mod store;
pub mod unchecked;
pub mod write_queue;

pub use ledger::{BlockStatus, Ledger, LedgerError};
pub use store::{
    AccountInfo, ConfirmationHeightInfo, PendingInfo, PendingKey, ReadTransaction, Store, Table,
    Transaction, WriteTransaction,
};
pub use unchecked::UncheckedMap;
pub use write_queue::{WriteGuard, WriteQueue, Writer};
