//! Error types for replvol
//!
//! This module defines the error type returned by the store, intent log and
//! lock collaborators. The volume core wraps it in its own error type.

use thiserror::Error;

/// Common result type for replvol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for replvol
#[derive(Debug, Error)]
pub enum Error {
    // Store errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("transaction could not be assigned: {0}")]
    AssignFailed(String),

    #[error("transaction not assigned")]
    NotAssigned,

    #[error("write to {object} at {offset}+{len} outside declared holds")]
    UndeclaredWrite {
        object: crate::ObjectId,
        offset: u64,
        len: u64,
    },

    #[error("read of {object} at {offset}+{len} failed: {reason}")]
    ReadFailed {
        object: crate::ObjectId,
        offset: u64,
        len: u64,
        reason: String,
    },

    #[error("storage error: {0}")]
    Storage(String),

    // Intent log errors
    #[error("journal error: {0}")]
    Journal(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a journal error
    pub fn journal(msg: impl Into<String>) -> Self {
        Self::Journal(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
