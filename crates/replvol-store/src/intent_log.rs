//! Intent log abstraction
//!
//! Every block write is appended to the intent log inside its transaction so
//! it can be replayed after a crash. `force_durable` makes all appended
//! records for an object stable.

use bytes::Bytes;
use parking_lot::Mutex;
use replvol_common::{BlockMetadata, ObjectId, Result};
use std::sync::atomic::{AtomicU64, Ordering};

/// One logged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Object the write applies to
    pub object: ObjectId,
    /// Byte offset within the object
    pub offset: u64,
    /// Number of bytes written
    pub length: u64,
    /// The caller requested synchronous semantics
    pub sync: bool,
    /// Provenance stamped alongside the data, if any
    pub metadata: Option<BlockMetadata>,
    /// Written bytes
    pub data: Bytes,
}

impl LogRecord {
    pub fn write(
        object: ObjectId,
        offset: u64,
        data: Bytes,
        sync: bool,
        metadata: Option<BlockMetadata>,
    ) -> Self {
        Self {
            object,
            offset,
            length: data.len() as u64,
            sync,
            metadata,
            data,
        }
    }
}

/// Write-ahead intent log
pub trait IntentLog: Send + Sync {
    /// Append a record, returning its sequence number
    fn append(&self, record: &LogRecord) -> Result<u64>;

    /// Make every record appended so far for `object` durable
    fn force_durable(&self, object: ObjectId) -> Result<()>;
}

/// Intent log kept in memory
#[derive(Debug, Default)]
pub struct MemoryIntentLog {
    records: Mutex<Vec<LogRecord>>,
    forced: AtomicU64,
}

impl MemoryIntentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every appended record
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Number of `force_durable` calls
    pub fn force_count(&self) -> u64 {
        self.forced.load(Ordering::Relaxed)
    }
}

impl IntentLog for MemoryIntentLog {
    fn append(&self, record: &LogRecord) -> Result<u64> {
        let mut records = self.records.lock();
        records.push(record.clone());
        Ok(records.len() as u64 - 1)
    }

    fn force_durable(&self, _object: ObjectId) -> Result<()> {
        self.forced.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
