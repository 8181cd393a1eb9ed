//! Node configuration with TOML file support

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::params::Network;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

/// Configuration of a pc-node process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeConfig {
    /// Which network's consensus parameters to use
    #[serde(default = "default_network")]
    pub network: Network,

    /// Directory holding the block database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log filter, e.g. "info" or "debug,pc_core=trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "human" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Blocks the local mining loop produces before exiting (0 = until ctrl-c)
    #[serde(default)]
    pub mine_blocks: u64,

    /// Algorithm used by the local mining loop
    #[serde(default = "default_mining_algorithm")]
    pub mining_algorithm: String,
}

fn default_network() -> Network {
    Network::Regtest
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./pc_data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_mining_algorithm() -> String {
    "sha256d".to_string()
}

impl NodeConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            mine_blocks: 0,
            mining_algorithm: default_mining_algorithm(),
        }
    }
}
