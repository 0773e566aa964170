//! Main configuration module.
//!
//! All node settings are defined in one `lattix.toml` file. Every
//! section has defaults matching the live network policy, so an empty
//! file is a valid configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::genesis::GenesisSection;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Main configuration struct containing all Lattix settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Node-wide settings
    pub node: NodeSection,
    /// Block processor admission and batching
    pub block_processor: BlockProcessorSection,
    /// Active elections container
    pub active: ActiveElectionsSection,
    /// Confirming set batching
    pub confirming_set: ConfirmingSetSection,
    /// Priority scheduler buckets
    pub buckets: BucketsSection,
    /// TCP listener and connection admission
    pub tcp: TcpSection,
    /// Network-wide parameters
    pub network: NetworkSection,
    /// Genesis account and supply
    pub genesis: GenesisSection,
}

/// Node-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeSection {
    /// Deadline for `add_blocking` submissions, in seconds
    pub block_process_timeout_secs: u64,
    /// Run with development work thresholds and fast election cadences
    pub dev_network: bool,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            block_process_timeout_secs: 300,
            dev_network: false,
        }
    }
}

/// Block processor admission and batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlockProcessorSection {
    /// Hard cap for `full()` backpressure
    pub full_size: usize,
    /// Blocks per write transaction
    pub batch_size: usize,
    /// Wall-clock bound per batch, in milliseconds
    pub batch_max_time_ms: u64,
}

impl Default for BlockProcessorSection {
    fn default() -> Self {
        Self {
            full_size: 65536,
            batch_size: 256,
            batch_max_time_ms: 500,
        }
    }
}

/// Active elections container settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActiveElectionsSection {
    /// Maximum number of simultaneous priority elections
    pub size: usize,
    /// Limit of hinted elections as a percentage of `size`
    pub hinted_limit_percentage: usize,
    /// Limit of optimistic elections as a percentage of `size`
    pub optimistic_limit_percentage: usize,
    /// Length of the recently-cemented history
    pub confirmation_history_size: usize,
    /// Size of the recently-confirmed suppression cache
    pub confirmation_cache: usize,
    /// Cleanup-thread trim threshold per bucket
    pub max_per_bucket: usize,
    /// Request-loop cadence, in milliseconds
    pub aec_loop_interval_ms: u64,
}

impl Default for ActiveElectionsSection {
    fn default() -> Self {
        Self {
            size: 5000,
            hinted_limit_percentage: 20,
            optimistic_limit_percentage: 10,
            confirmation_history_size: 2048,
            confirmation_cache: 65536,
            max_per_bucket: 150,
            aec_loop_interval_ms: 300,
        }
    }
}

/// Confirming set batching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConfirmingSetSection {
    /// Wall-clock bound per cementing batch, in milliseconds
    pub batch_time_ms: u64,
}

impl Default for ConfirmingSetSection {
    fn default() -> Self {
        Self { batch_time_ms: 500 }
    }
}

/// Priority scheduler buckets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BucketsSection {
    /// Queue cap per bucket
    pub max_blocks: usize,
    /// Elections each bucket may start regardless of global vacancy
    pub reserved_elections: usize,
    /// Soft cap of elections per bucket
    pub max_elections: usize,
}

impl Default for BucketsSection {
    fn default() -> Self {
        Self {
            max_blocks: 4096,
            reserved_elections: 100,
            max_elections: 150,
        }
    }
}

/// TCP listener and connection admission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TcpSection {
    /// Listen port
    pub port: u16,
    /// Acceptor cap on simultaneous inbound connections
    pub max_inbound_connections: usize,
    /// Admission cap per remote IP
    pub max_peers_per_ip: usize,
    /// Admission cap per IPv6 /64 subnet
    pub max_peers_per_subnetwork: usize,
    /// Keepalive period, in seconds
    pub keepalive_period_secs: u64,
    /// Idle timeout before a connection is purged, in seconds
    pub idle_timeout_secs: u64,
}

impl Default for TcpSection {
    fn default() -> Self {
        Self {
            port: 7175,
            max_inbound_connections: 2048,
            max_peers_per_ip: 4,
            max_peers_per_subnetwork: 16,
            keepalive_period_secs: 15,
            idle_timeout_secs: 120,
        }
    }
}

/// Network-wide parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSection {
    /// Channels below this protocol version are rejected on purge sweeps
    pub protocol_version_min: u8,
    /// Outbound bandwidth limit in bytes per second; 0 is unlimited
    pub outbound_bandwidth_limit: u64,
    /// Burst ratio applied to the outbound limit
    pub outbound_burst_ratio: f64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            protocol_version_min: 20,
            outbound_bandwidth_limit: 10 * 1024 * 1024,
            outbound_burst_ratio: 3.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        info!("Loading configuration from {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)?;

        debug!("Configuration parsed, validating");
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    ///
    /// Useful for tests or when configuration is provided inline.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialise the configuration back to TOML.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the configuration to a file, used by `lattix init`.
    pub fn write(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).map_err(|e| ConfigError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Validate that all values are within acceptable ranges and the
    /// configuration is internally consistent.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.block_processor.batch_size == 0 {
            return Err(ConfigError::invalid(
                "block_processor.batch_size",
                "must be greater than zero",
            ));
        }
        if self.block_processor.full_size < self.block_processor.batch_size {
            return Err(ConfigError::invalid(
                "block_processor.full_size",
                "must be at least batch_size",
            ));
        }
        if self.active.size == 0 {
            return Err(ConfigError::invalid("active.size", "must be greater than zero"));
        }
        if self.active.hinted_limit_percentage > 100 {
            return Err(ConfigError::invalid(
                "active.hinted_limit_percentage",
                "must be at most 100",
            ));
        }
        if self.active.optimistic_limit_percentage > 100 {
            return Err(ConfigError::invalid(
                "active.optimistic_limit_percentage",
                "must be at most 100",
            ));
        }
        if self.active.aec_loop_interval_ms == 0 {
            return Err(ConfigError::invalid(
                "active.aec_loop_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.buckets.max_blocks == 0 {
            return Err(ConfigError::invalid(
                "buckets.max_blocks",
                "must be greater than zero",
            ));
        }
        if self.buckets.reserved_elections > self.buckets.max_elections {
            return Err(ConfigError::invalid(
                "buckets.reserved_elections",
                "must be at most buckets.max_elections",
            ));
        }
        if self.tcp.max_inbound_connections == 0 {
            return Err(ConfigError::invalid(
                "tcp.max_inbound_connections",
                "must be greater than zero",
            ));
        }
        if self.tcp.max_peers_per_ip == 0 {
            return Err(ConfigError::invalid(
                "tcp.max_peers_per_ip",
                "must be greater than zero",
            ));
        }
        if self.tcp.max_peers_per_subnetwork < self.tcp.max_peers_per_ip {
            return Err(ConfigError::invalid(
                "tcp.max_peers_per_subnetwork",
                "must be at least max_peers_per_ip",
            ));
        }
        if self.network.outbound_burst_ratio < 1.0 {
            return Err(ConfigError::invalid(
                "network.outbound_burst_ratio",
                "must be at least 1.0",
            ));
        }
        self.genesis.validate()?;
        Ok(())
    }
}
