//! Foreground-write interval tracker
//!
//! While a volume is degraded every foreground write records its byte range
//! here. Rebuild replay later asks for the parts of its range that no
//! foreground write has touched, so stale replica data never overwrites
//! fresher application writes.
//!
//! ```text
//! recorded:        [2048 ───── 3072)
//! rebuild range: [0 ──────────────────────────── 8192)
//! chunks:        [0 ── 2048)       [3072 ─────── 8192)
//! ```

use parking_lot::Mutex;
use replvol_common::IoChunk;
use std::collections::BTreeMap;

/// Merged set of byte ranges written by foreground I/O
#[derive(Debug, Default)]
pub struct IncomingWriteTracker {
    /// start → end (exclusive); intervals are disjoint and non-adjacent
    intervals: Mutex<BTreeMap<u64, u64>>,
}

impl IncomingWriteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a foreground write of `[offset, offset + len)`
    pub fn record(&self, offset: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut start = offset;
        let mut end = offset.saturating_add(len);

        let mut intervals = self.intervals.lock();
        let touching: Vec<(u64, u64)> = intervals
            .range(..=end)
            .rev()
            .take_while(|&(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in touching {
            intervals.remove(&s);
            start = start.min(s);
            end = end.max(e);
        }
        intervals.insert(start, end);
    }

    /// Sub-ranges of `[offset, offset + len)` not covered by any recorded
    /// foreground write, in ascending offset order
    ///
    /// Runs under the tracker lock, so a concurrent `record` is either fully
    /// reflected in the result or not at all.
    pub fn rebuild_chunks(&self, offset: u64, len: u64) -> Vec<IoChunk> {
        let end = offset.saturating_add(len);
        let mut chunks = Vec::new();
        if len == 0 {
            return chunks;
        }

        let intervals = self.intervals.lock();
        let first = intervals
            .range(..=offset)
            .next_back()
            .filter(|&(_, &e)| e > offset)
            .map_or(offset, |(&s, _)| s);

        let mut cursor = offset;
        for (&s, &e) in intervals.range(first..end) {
            if s > cursor {
                chunks.push(IoChunk::new(cursor, s - cursor));
            }
            cursor = cursor.max(e);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            chunks.push(IoChunk::new(cursor, end - cursor));
        }
        chunks
    }

    /// Snapshot of the recorded intervals
    pub fn intervals(&self) -> Vec<IoChunk> {
        self.intervals
            .lock()
            .iter()
            .map(|(&s, &e)| IoChunk::new(s, e - s))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.lock().is_empty()
    }

    /// Forget every recorded write, e.g. once a rebuild has completed
    pub fn clear(&self) {
        self.intervals.lock().clear();
    }
}
