//! In-memory transactional object store
//!
//! Objects are dense byte vectors, grown on commit to the end of the highest
//! committed write; unwritten gaps read as zeros. Transaction
//! admission is bounded by `max_open_txs`: `assign` blocks while that many
//! transactions hold a slot. Faults can be injected for assignment and
//! reads so callers can exercise their failure paths.

use crate::object::{ObjectStore, Transaction, WriteHold, check_hold};

use parking_lot::{Condvar, Mutex, RwLock};
use replvol_common::{Error, ObjectId, Result, SyncPolicy};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug, Default)]
struct FaultPlan {
    /// Number of assignments that still succeed before one fails
    assign_countdown: Option<u64>,
    /// Ranges whose reads fail
    read_failures: Vec<WriteHold>,
}

/// Volatile object store
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
    open_txs: Mutex<usize>,
    slot_freed: Condvar,
    max_open_txs: usize,
    sync_policy: SyncPolicy,
    faults: Mutex<FaultPlan>,
    commits: AtomicU64,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new(sync_policy: SyncPolicy, max_open_txs: usize) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            open_txs: Mutex::new(0),
            slot_freed: Condvar::new(),
            max_open_txs: max_open_txs.max(1),
            sync_policy,
            faults: Mutex::new(FaultPlan::default()),
            commits: AtomicU64::new(0),
        }
    }

    /// Let `n` more assignments succeed, then fail the next one
    pub fn fail_assign_after(&self, n: u64) {
        self.faults.lock().assign_countdown = Some(n);
    }

    /// Fail every read that overlaps `[offset, offset + len)` of `object`
    pub fn fail_reads(&self, object: ObjectId, offset: u64, len: u64) {
        self.faults.lock().read_failures.push(WriteHold {
            object,
            offset,
            len,
        });
    }

    /// Remove all injected faults
    pub fn clear_faults(&self) {
        *self.faults.lock() = FaultPlan::default();
    }

    /// Number of committed transactions
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Current length of an object
    pub fn object_len(&self, object: ObjectId) -> u64 {
        self.objects
            .read()
            .get(&object)
            .map_or(0, |o| o.len() as u64)
    }

    fn acquire_slot(&self) -> Result<()> {
        {
            let mut faults = self.faults.lock();
            if let Some(remaining) = faults.assign_countdown {
                if remaining == 0 {
                    faults.assign_countdown = None;
                    return Err(Error::AssignFailed("injected assignment failure".into()));
                }
                faults.assign_countdown = Some(remaining - 1);
            }
        }

        let mut open = self.open_txs.lock();
        while *open >= self.max_open_txs {
            self.slot_freed.wait(&mut open);
        }
        *open += 1;
        Ok(())
    }

    fn release_slot(&self) {
        let mut open = self.open_txs.lock();
        *open -= 1;
        self.slot_freed.notify_one();
    }

    fn apply(&self, writes: Vec<(ObjectId, u64, Vec<u8>)>) {
        let mut objects = self.objects.write();
        for (object, offset, data) in writes {
            let obj = objects.entry(object).or_default();
            let start = offset as usize;
            let end = start + data.len();
            if obj.len() < end {
                obj.resize(end, 0);
            }
            obj[start..end].copy_from_slice(&data);
        }
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new(SyncPolicy::Standard, 64)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(MemoryTransaction {
            store: self,
            holds: Vec::new(),
            writes: Vec::new(),
            assigned: false,
        })
    }

    fn read(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        {
            let faults = self.faults.lock();
            let failed = faults.read_failures.iter().any(|f| {
                f.object == object && offset < f.offset + f.len && f.offset < offset + len
            });
            if failed {
                return Err(Error::ReadFailed {
                    object,
                    offset,
                    len,
                    reason: "injected read failure".into(),
                });
            }
        }

        buf.fill(0);
        let objects = self.objects.read();
        if let Some(obj) = objects.get(&object) {
            let start = (offset as usize).min(obj.len());
            let end = (offset as usize + buf.len()).min(obj.len());
            buf[..end - start].copy_from_slice(&obj[start..end]);
        }
        Ok(())
    }

    fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryObjectStore,
    holds: Vec<WriteHold>,
    writes: Vec<(ObjectId, u64, Vec<u8>)>,
    assigned: bool,
}

impl Transaction for MemoryTransaction<'_> {
    fn hold_write(&mut self, object: ObjectId, offset: u64, len: u64) {
        self.holds.push(WriteHold {
            object,
            offset,
            len,
        });
    }

    fn assign(&mut self) -> Result<()> {
        if !self.assigned {
            self.store.acquire_slot()?;
            self.assigned = true;
        }
        Ok(())
    }

    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> Result<()> {
        if !self.assigned {
            return Err(Error::NotAssigned);
        }
        check_hold(&self.holds, object, offset, data.len() as u64)?;
        self.writes.push((object, offset, data.to_vec()));
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        if !self.assigned {
            return Err(Error::NotAssigned);
        }
        let writes = std::mem::take(&mut self.writes);
        self.store.apply(writes);
        self.store.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        debug!("aborting transaction with {} staged writes", self.writes.len());
    }
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if self.assigned {
            self.store.release_slot();
        }
    }
}
