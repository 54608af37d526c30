//! Byte-range reader/writer locks
//!
//! A `RangeLockTable` is one locking domain. Within a domain a writer
//! excludes every overlapping holder while readers only exclude overlapping
//! writers; disjoint ranges never wait on each other. Locks are released when
//! the returned guard is dropped.

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Reader,
    Writer,
}

#[derive(Debug, Clone, Copy)]
struct HeldRange {
    id: u64,
    start: u64,
    end: u64,
    mode: LockMode,
}

impl HeldRange {
    fn conflicts(&self, start: u64, end: u64, mode: LockMode) -> bool {
        let overlaps = start < self.end && self.start < end;
        overlaps && (mode == LockMode::Writer || self.mode == LockMode::Writer)
    }
}

#[derive(Debug, Default)]
struct LockState {
    held: Vec<HeldRange>,
    next_id: u64,
}

/// One range-lock domain
#[derive(Debug, Default)]
pub struct RangeLockTable {
    state: Mutex<LockState>,
    released: Condvar,
}

impl RangeLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `[offset, offset + len)` can be held in `mode`
    ///
    /// A zero-length range is treated as a single byte so it still orders
    /// against writers of that offset.
    pub fn lock(&self, offset: u64, len: u64, mode: LockMode) -> RangeGuard<'_> {
        let start = offset;
        let end = offset.saturating_add(len.max(1));

        let mut state = self.state.lock();
        while state.held.iter().any(|h| h.conflicts(start, end, mode)) {
            self.released.wait(&mut state);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.held.push(HeldRange {
            id,
            start,
            end,
            mode,
        });
        trace!(id, start, end, ?mode, "range locked");

        RangeGuard { table: self, id }
    }

    /// Number of ranges currently held
    pub fn held(&self) -> usize {
        self.state.lock().held.len()
    }

    fn unlock(&self, id: u64) {
        let mut state = self.state.lock();
        if let Some(pos) = state.held.iter().position(|h| h.id == id) {
            state.held.swap_remove(pos);
        }
        drop(state);
        self.released.notify_all();
        trace!(id, "range unlocked");
    }
}

/// A held range; unlocks on drop
#[derive(Debug)]
pub struct RangeGuard<'a> {
    table: &'a RangeLockTable,
    id: u64,
}

impl Drop for RangeGuard<'_> {
    fn drop(&mut self) {
        self.table.unlock(self.id);
    }
}
