//! # Lattix Config
//!
//! Single-file typed configuration for the Lattix node, following the
//! one-`lattix.toml` philosophy: every tunable lives in one file, every
//! section has sane defaults, and the whole file is validated on load.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod genesis;

pub use config::{
    ActiveElectionsSection, BlockProcessorSection, BucketsSection, Config, ConfirmingSetSection,
    NetworkSection, NodeSection, TcpSection,
};
pub use error::{ConfigError, ConfigResult};
pub use genesis::GenesisSection;
