//! Transactional object store abstraction
//!
//! A store holds the two objects of a volume (DATA and METADATA) and applies
//! writes through short transactions. The protocol mirrors a copy-on-write
//! dataset: a transaction declares the byte ranges it will touch, is then
//! assigned to an ordered commit slot (blocking while the store applies
//! back-pressure), performs its writes and commits. Dropping a transaction
//! that has not been committed aborts it.

use replvol_common::{ObjectId, Result, SyncPolicy};

/// A byte range a transaction declared it will write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteHold {
    pub object: ObjectId,
    pub offset: u64,
    pub len: u64,
}

impl WriteHold {
    /// Whether `[offset, offset + len)` of `object` lies inside this hold
    pub fn covers(&self, object: ObjectId, offset: u64, len: u64) -> bool {
        self.object == object && offset >= self.offset && offset + len <= self.offset + self.len
    }
}

/// Check a write against a set of declared holds
pub(crate) fn check_hold(
    holds: &[WriteHold],
    object: ObjectId,
    offset: u64,
    len: u64,
) -> Result<()> {
    if holds.iter().any(|h| h.covers(object, offset, len)) {
        Ok(())
    } else {
        Err(replvol_common::Error::UndeclaredWrite {
            object,
            offset,
            len,
        })
    }
}

/// Transactional object store
pub trait ObjectStore: Send + Sync {
    /// Open a new, unassigned transaction
    fn begin(&self) -> Box<dyn Transaction + '_>;

    /// Read `buf.len()` bytes of `object` starting at `offset`
    ///
    /// Ranges never written read back as zeroes.
    fn read(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Durability policy of the dataset
    fn sync_policy(&self) -> SyncPolicy;
}

/// A single store transaction
pub trait Transaction {
    /// Declare intent to write `[offset, offset + len)` of `object`
    fn hold_write(&mut self, object: ObjectId, offset: u64, len: u64);

    /// Block until the transaction is admitted into an ordered commit slot
    fn assign(&mut self) -> Result<()>;

    /// Stage a write; the range must have been declared with `hold_write`
    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> Result<()>;

    /// Make all staged writes visible atomically
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all staged writes
    fn abort(self: Box<Self>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_covers() {
        let hold = WriteHold {
            object: ObjectId::Data,
            offset: 4096,
            len: 4096,
        };
        assert!(hold.covers(ObjectId::Data, 4096, 4096));
        assert!(hold.covers(ObjectId::Data, 5000, 100));
        assert!(!hold.covers(ObjectId::Data, 8000, 200));
        assert!(!hold.covers(ObjectId::Metadata, 4096, 8));
    }

    #[test]
    fn test_check_hold() {
        let holds = [
            WriteHold {
                object: ObjectId::Data,
                offset: 0,
                len: 100,
            },
            WriteHold {
                object: ObjectId::Metadata,
                offset: 0,
                len: 8,
            },
        ];
        assert!(check_hold(&holds, ObjectId::Metadata, 0, 8).is_ok());
        assert!(check_hold(&holds, ObjectId::Metadata, 8, 8).is_err());
    }
}
