//! replvol Store - collaborators of the volume I/O core
//!
//! This crate implements the services the volume core is written against:
//! - Transactional object store (in-memory and redb-backed)
//! - Intent log (in-memory and file journal)
//! - Interval (range) locks
//! - Foreground-write interval tracker used during rebuild

pub mod intent_log;
pub mod journal;
pub mod memory;
pub mod object;
pub mod range_lock;
pub mod redb_store;
pub mod tracker;

// Re-exports
pub use intent_log::{IntentLog, LogRecord, MemoryIntentLog};
pub use journal::FileIntentLog;
pub use memory::MemoryObjectStore;
pub use object::{ObjectStore, Transaction, WriteHold};
pub use range_lock::{LockMode, RangeGuard, RangeLockTable};
pub use redb_store::RedbObjectStore;
pub use tracker::IncomingWriteTracker;
