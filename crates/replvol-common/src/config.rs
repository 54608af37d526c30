//! Configuration types for replvol
//!
//! This module defines the configuration structures shared by the volume
//! core, the store backends and the bench binary.

use crate::error::{Error, Result};
use crate::types::{BlockMetadata, SyncPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Volume geometry
    pub volume: VolumeConfig,
    /// Backing object store
    pub store: StoreConfig,
    /// Intent log
    pub intent_log: IntentLogConfig,
    /// Logging
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::configuration(format!("invalid TOML: {e}")))?;
        config.volume.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&s)
    }
}

/// Volume geometry
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Volume name, used for logging
    pub name: String,
    /// Addressable size in bytes
    pub size_bytes: u64,
    /// Data block size (default: 4 KB)
    pub block_size: u64,
    /// Size of one provenance record
    pub metadata_size: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            name: "vol0".to_string(),
            size_bytes: 64 * 1024 * 1024, // 64 MB
            block_size: 4096,
            metadata_size: BlockMetadata::ENCODED_LEN as u64,
        }
    }
}

impl VolumeConfig {
    /// Check geometry invariants
    pub fn validate(&self) -> Result<()> {
        if self.size_bytes == 0 {
            return Err(Error::configuration("volume size must be positive"));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::configuration(format!(
                "block size must be a power of two, got {}",
                self.block_size
            )));
        }
        if self.metadata_size < BlockMetadata::ENCODED_LEN as u64 {
            return Err(Error::configuration(format!(
                "metadata size must be at least {} bytes, got {}",
                BlockMetadata::ENCODED_LEN,
                self.metadata_size
            )));
        }
        Ok(())
    }
}

/// Object store backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Volatile, in-process store
    #[default]
    Memory,
    /// redb database file
    Redb,
}

/// Backing store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database path (redb backend)
    pub path: PathBuf,
    /// Page size the redb backend stores objects in
    pub page_size: u64,
    /// Dataset sync property
    pub sync_policy: SyncPolicy,
    /// Maximum concurrently assigned transactions (memory backend)
    pub max_open_txs: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: PathBuf::from("./replvol-data/volume.redb"),
            page_size: 4096,
            sync_policy: SyncPolicy::Standard,
            max_open_txs: 64,
        }
    }
}

/// Intent log configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentLogConfig {
    /// Journal file; `None` keeps the log in memory
    pub path: Option<PathBuf>,
    /// Size after which the journal reports it needs a checkpoint
    pub max_size: u64,
}

impl Default for IntentLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_size: 256 * 1024 * 1024, // 256 MB
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace / debug / info / warn / error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
