//! # Lattix Types
//!
//! Core type definitions for the Lattix block-lattice node.
//!
//! This crate provides the fundamental types used throughout Lattix:
//! - [`BlockHash`], [`Root`], [`Link`] - 32-byte identifiers
//! - [`Account`] - 32-byte account public keys
//! - [`Amount`] - 128-bit balances in raw units
//! - [`Block`] and [`BlockSideband`] - the immutable block and the
//!   ledger-attached metadata that travels with it
//! - [`QualifiedRoot`] - the `(root, previous)` pair that identifies a
//!   position in an account chain; two blocks conflict iff they share it
//!
//! ## Example
//!
//! ```rust
//! use lattix_types::{Account, Amount, Block, BlockHash};
//!
//! let account = Account::from([7u8; 32]);
//! let block = Block::open(account, account, Amount::raw(100), BlockHash::from([1u8; 32]));
//!
//! assert_eq!(block.root().as_bytes(), account.as_bytes());
//! assert!(!block.hash().is_zero());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod account;
pub mod amount;
pub mod block;
pub mod hash;
pub mod work;

// Re-export main types at crate root
pub use account::Account;
pub use amount::Amount;
pub use block::{
    epoch_from_link, epoch_link, Block, BlockDetails, BlockSideband, BlockType, Epoch, Signature,
};
pub use hash::{BlockHash, HashOrAccount, Link, QualifiedRoot, Root};
pub use work::{WorkNonce, WorkThresholds};

/// Result type alias for Lattix type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Lattix types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid amount representation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
