//! Durable object store backed by redb.
//!
//! Each object is stored as fixed-size pages keyed by page index. A write
//! read-modify-writes the pages it touches inside one redb write
//! transaction. redb admits a single writer at a time, so `assign` is the
//! point where a transaction waits for its ordered commit slot.

use crate::object::{ObjectStore, Transaction, WriteHold, check_hold};

use redb::{Database, Durability, ReadableTable, TableDefinition, WriteTransaction};
use replvol_common::{Error, ObjectId, Result, SyncPolicy};
use std::fmt::Display;
use std::path::Path;
use tracing::{info, warn};

/// DATA object pages: page index → page bytes
const DATA_PAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("data_pages");
/// METADATA object pages: page index → page bytes
const META_PAGES: TableDefinition<u64, &[u8]> = TableDefinition::new("meta_pages");

fn table_for(object: ObjectId) -> TableDefinition<'static, u64, &'static [u8]> {
    match object {
        ObjectId::Data => DATA_PAGES,
        ObjectId::Metadata => META_PAGES,
    }
}

fn storage_err(e: impl Display) -> Error {
    Error::storage(format!("redb: {e}"))
}

/// Pages touched by `[offset, offset + len)`, with the byte ranges involved
fn page_slices(
    offset: u64,
    len: u64,
    page_size: u64,
) -> impl Iterator<Item = (u64, usize, usize, usize)> {
    let end = offset + len;
    let first = offset / page_size;
    let last = if len == 0 { first } else { (end - 1) / page_size + 1 };
    (first..last).map(move |page| {
        let page_start = page * page_size;
        let start = offset.max(page_start);
        let stop = end.min(page_start + page_size);
        (
            page,
            (start - page_start) as usize,
            (stop - page_start) as usize,
            (start - offset) as usize,
        )
    })
}

/// Persistent object store backed by redb.
pub struct RedbObjectStore {
    db: Database,
    page_size: u64,
    sync_policy: SyncPolicy,
}

impl RedbObjectStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>, page_size: u64, sync_policy: SyncPolicy) -> Result<Self> {
        if page_size == 0 {
            return Err(Error::configuration("page size must be positive"));
        }
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(storage_err)?;

        // Create both tables eagerly so read txns never miss them
        let wtx = db.begin_write().map_err(storage_err)?;
        {
            let _t = wtx.open_table(DATA_PAGES).map_err(storage_err)?;
            let _t = wtx.open_table(META_PAGES).map_err(storage_err)?;
        }
        wtx.commit().map_err(storage_err)?;

        info!(
            "Opened redb object store at {:?}: page_size={}, sync={:?}",
            path, page_size, sync_policy
        );

        Ok(Self {
            db,
            page_size,
            sync_policy,
        })
    }

    fn durability(&self) -> Durability {
        match self.sync_policy {
            SyncPolicy::Always => Durability::Immediate,
            SyncPolicy::Standard => Durability::Eventual,
            SyncPolicy::Disabled => Durability::None,
        }
    }
}

impl ObjectStore for RedbObjectStore {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(RedbTransaction {
            store: self,
            holds: Vec::new(),
            txn: None,
        })
    }

    fn read(&self, object: ObjectId, offset: u64, buf: &mut [u8]) -> Result<()> {
        let rtx = self.db.begin_read().map_err(storage_err)?;
        let table = rtx.open_table(table_for(object)).map_err(storage_err)?;

        for (page, start, stop, at) in page_slices(offset, buf.len() as u64, self.page_size) {
            let found = table.get(page).map_err(|e| Error::ReadFailed {
                object,
                offset: page * self.page_size + start as u64,
                len: (stop - start) as u64,
                reason: e.to_string(),
            })?;
            let dst = &mut buf[at..at + (stop - start)];
            match found {
                Some(guard) => dst.copy_from_slice(&guard.value()[start..stop]),
                None => dst.fill(0),
            }
        }
        Ok(())
    }

    fn sync_policy(&self) -> SyncPolicy {
        self.sync_policy
    }
}

struct RedbTransaction<'a> {
    store: &'a RedbObjectStore,
    holds: Vec<WriteHold>,
    txn: Option<WriteTransaction>,
}

impl Transaction for RedbTransaction<'_> {
    fn hold_write(&mut self, object: ObjectId, offset: u64, len: u64) {
        self.holds.push(WriteHold {
            object,
            offset,
            len,
        });
    }

    fn assign(&mut self) -> Result<()> {
        if self.txn.is_none() {
            let mut txn = self
                .store
                .db
                .begin_write()
                .map_err(|e| Error::AssignFailed(e.to_string()))?;
            txn.set_durability(self.store.durability());
            self.txn = Some(txn);
        }
        Ok(())
    }

    fn write(&mut self, object: ObjectId, offset: u64, data: &[u8]) -> Result<()> {
        check_hold(&self.holds, object, offset, data.len() as u64)?;
        let txn = self.txn.as_ref().ok_or(Error::NotAssigned)?;
        let page_size = self.store.page_size as usize;

        let mut table = txn.open_table(table_for(object)).map_err(storage_err)?;
        for (page, start, stop, at) in page_slices(offset, data.len() as u64, page_size as u64) {
            let mut bytes = table
                .get(page)
                .map_err(storage_err)?
                .map_or_else(|| vec![0u8; page_size], |g| g.value().to_vec());
            bytes[start..stop].copy_from_slice(&data[at..at + (stop - start)]);
            table.insert(page, bytes.as_slice()).map_err(storage_err)?;
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let txn = self.txn.take().ok_or(Error::NotAssigned)?;
        txn.commit().map_err(storage_err)
    }

    fn abort(mut self: Box<Self>) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = txn.abort() {
                warn!("Failed to abort redb transaction: {}", e);
            }
        }
    }
}
