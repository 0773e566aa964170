//! # Lattix
//!
//! Lattix is a delegated-proof-of-stake cryptocurrency node whose
//! ledger is an account-indexed graph of signed blocks rather than a
//! linear chain.
//!
//! This crate provides the node binary and can also be used as a
//! library for embedding a node into other applications.
//!
//! ## Components
//!
//! - [`Node`] - composition root wiring the ledger, block processor,
//!   elections, confirming set and TCP transport together
//!
//! ## Example
//!
//! ```rust,no_run
//! use lattix::Node;
//! use lattix_config::Config;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = Config::default();
//!     config.node.dev_network = true;
//!     config.tcp.port = 0;
//!
//!     let node = Node::new(config)?;
//!     node.start()?;
//!     // ...
//!     node.stop();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod node;

pub use node::Node;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "lattix.toml";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
