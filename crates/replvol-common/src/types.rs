//! Core types shared by the store backends and the volume core

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Logical objects backing a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectId {
    /// Raw block payload
    Data,
    /// One provenance record per data block
    Metadata,
}

impl ObjectId {
    /// Stable on-disk tag
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Data => 1,
            Self::Metadata => 2,
        }
    }
}

impl TryFrom<u8> for ObjectId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Data),
            2 => Ok(Self::Metadata),
            _ => Err(Error::Deserialization(format!("invalid object id: {value}"))),
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// Per-block provenance record
///
/// Stamped on every data block a write touches. The record is encoded as
/// `io_num` (little endian) followed by zero padding up to the volume's
/// metadata record size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Write generation that produced the block
    pub io_num: u64,
}

impl BlockMetadata {
    /// Minimum encoded size of a record
    pub const ENCODED_LEN: usize = 8;

    pub fn new(io_num: u64) -> Self {
        Self { io_num }
    }

    /// Encode into `out`, zero-filling any padding
    pub fn encode_into(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= Self::ENCODED_LEN);
        out[..Self::ENCODED_LEN].copy_from_slice(&self.io_num.to_le_bytes());
        out[Self::ENCODED_LEN..].fill(0);
    }

    /// Decode from a record of at least [`Self::ENCODED_LEN`] bytes
    pub fn decode(record: &[u8]) -> Result<Self> {
        let raw: [u8; Self::ENCODED_LEN] = record
            .get(..Self::ENCODED_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| {
                Error::Deserialization(format!("metadata record too small: {}", record.len()))
            })?;
        Ok(Self {
            io_num: u64::from_le_bytes(raw),
        })
    }
}

/// Volume health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VolumeStatus {
    /// All replicas in sync
    #[default]
    Healthy,
    /// Replica is missing writes; foreground writes are tracked
    Degraded,
}

/// Rebuild phase of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RebuildStatus {
    /// No rebuild running
    #[default]
    Idle,
    /// Rebuild replay is being applied
    InProgress,
}

impl From<u8> for VolumeStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl From<VolumeStatus> for u8 {
    fn from(status: VolumeStatus) -> u8 {
        match status {
            VolumeStatus::Healthy => 0,
            VolumeStatus::Degraded => 1,
        }
    }
}

impl From<u8> for RebuildStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::InProgress,
            _ => Self::Idle,
        }
    }
}

impl From<RebuildStatus> for u8 {
    fn from(status: RebuildStatus) -> u8 {
        match status {
            RebuildStatus::Idle => 0,
            RebuildStatus::InProgress => 1,
        }
    }
}

/// A byte range of the DATA object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IoChunk {
    pub offset: u64,
    pub len: u64,
}

impl IoChunk {
    pub fn new(offset: u64, len: u64) -> Self {
        Self { offset, len }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Durability policy of the backing dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Intent log is made durable on explicit flush only
    #[default]
    Standard,
    /// Every write call forces the intent log durable before returning
    Always,
    /// Flushes are no-ops
    Disabled,
}
