//! Rebuild replay planning
//!
//! A rebuild write carries data copied from a healthy replica. Anything a
//! foreground write stored in the meantime is newer, so the replay only
//! applies the parts of its range the tracker has not seen.

use crate::error::{VolumeError, VolumeResult};

use replvol_common::IoChunk;
use replvol_store::IncomingWriteTracker;
use tracing::debug;

/// Ordered chunks a rebuild write still has to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildPlan {
    offset: u64,
    chunks: Vec<IoChunk>,
}

impl RebuildPlan {
    /// Plan the replay of `[offset, offset + len)`
    ///
    /// Fails with [`VolumeError::NoWork`] when foreground writes already
    /// cover the whole range.
    pub fn for_range(tracker: &IncomingWriteTracker, offset: u64, len: u64) -> VolumeResult<Self> {
        let chunks = tracker.rebuild_chunks(offset, len);
        if chunks.is_empty() {
            debug!(offset, len, "rebuild range fully overwritten by foreground I/O");
            return Err(VolumeError::NoWork { offset, len });
        }
        Ok(Self { offset, chunks })
    }

    /// Plan covering the whole range in one chunk
    pub fn whole(offset: u64, len: u64) -> Self {
        Self {
            offset,
            chunks: vec![IoChunk::new(offset, len)],
        }
    }

    pub fn chunks(&self) -> &[IoChunk] {
        &self.chunks
    }

    /// Position of `chunk` within the caller's buffer
    pub fn buffer_offset(&self, chunk: &IoChunk) -> usize {
        (chunk.offset - self.offset) as usize
    }

    /// Bytes the plan will apply
    pub fn total_len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len).sum()
    }
}
