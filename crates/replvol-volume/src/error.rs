//! Volume I/O error types

use thiserror::Error;

/// Volume I/O error
#[derive(Error, Debug)]
pub enum VolumeError {
    /// A block transaction could not be admitted into a commit slot
    #[error("Transaction assignment failed for block at offset {offset}: {source}")]
    TxAssignFailed {
        offset: u64,
        #[source]
        source: replvol_common::Error,
    },

    /// Every byte of a rebuild range was already written by foreground I/O
    #[error("No rebuild work for range {offset}+{len}")]
    NoWork { offset: u64, len: u64 },

    /// Invalid request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid volume geometry
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Store, intent log or journal failure
    #[error(transparent)]
    Store(#[from] replvol_common::Error),
}

impl VolumeError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Whether a rebuild write found nothing left to apply
    #[must_use]
    pub fn is_no_work(&self) -> bool {
        matches!(self, Self::NoWork { .. })
    }

    /// Whether the store failed to move bytes to or from disk
    #[must_use]
    pub fn is_io(&self) -> bool {
        use replvol_common::Error;
        matches!(self, Self::Store(Error::DiskIo(_) | Error::ReadFailed { .. }))
    }
}

/// Result type for volume operations
pub type VolumeResult<T> = Result<T, VolumeError>;
