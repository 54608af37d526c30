//! Volume write path
//!
//! A write holds the DATA range for its whole length and commits one
//! transaction per block. Each transaction carries the block's data, its
//! provenance records when supplied, and an intent-log record. A failure
//! stops the call at the failing block; earlier blocks stay committed.

use crate::error::{VolumeError, VolumeResult};
use crate::layout::BlockSpan;
use crate::lock::{LockDomain, VolumeLocks};
use crate::rebuild::RebuildPlan;
use crate::volume::Volume;

use bytes::Bytes;
use replvol_common::{BlockMetadata, ObjectId, RebuildStatus, SyncPolicy, VolumeStatus};
use replvol_store::{LockMode, LogRecord};
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{debug, warn};

/// Provenance to stamp on every block of one write call
struct Stamp<'a> {
    record: BlockMetadata,
    /// Records for the whole request, replicated
    filler: &'a [u8],
}

impl Volume {
    /// Write `buf` at `offset`
    ///
    /// `metadata`, when given, is stamped on every block the write touches.
    /// `is_rebuild` marks data replayed from a healthy replica: while a
    /// rebuild is in progress such a write only lands on bytes no foreground
    /// write has touched, and fails with [`VolumeError::NoWork`] if there
    /// are none. Bytes past the end of the volume are ignored.
    pub fn write(
        &self,
        buf: &[u8],
        offset: u64,
        metadata: Option<&BlockMetadata>,
        is_rebuild: bool,
    ) -> VolumeResult<()> {
        if buf.is_empty() {
            return Err(VolumeError::invalid_argument("zero-length write"));
        }
        let len = (buf.len() as u64).min(self.layout.volsize().saturating_sub(offset));
        if len == 0 {
            return Ok(());
        }
        let buf = &buf[..len as usize];
        let start = Instant::now();

        let filler = metadata.map(|md| self.layout.filler(md, self.layout.map(offset, len)));
        let stamp = metadata.zip(filler.as_deref()).map(|(md, filler)| Stamp {
            record: *md,
            filler,
        });

        let result = {
            let _range = self.locks.acquire(LockDomain::Data, offset, len, LockMode::Writer);
            self.write_locked(buf, offset, stamp.as_ref(), is_rebuild)
        };

        let result = if self.store.sync_policy() == SyncPolicy::Always {
            let forced = self.log.force_durable(ObjectId::Data);
            result.and(forced.map_err(VolumeError::from))
        } else {
            result
        };

        match &result {
            Ok(()) => self.stats.record_write(len, start.elapsed().as_micros() as u64),
            Err(e) if e.is_no_work() => self.stats.record_no_work(),
            Err(e) => {
                warn!("Volume {} write at {}+{} failed: {}", self.name, offset, len, e);
                self.stats.record_failure();
            }
        }
        result
    }

    fn write_locked(
        &self,
        buf: &[u8],
        offset: u64,
        stamp: Option<&Stamp<'_>>,
        is_rebuild: bool,
    ) -> VolumeResult<()> {
        let len = buf.len() as u64;
        let degraded = self.status() == VolumeStatus::Degraded;
        let replaying = is_rebuild && self.rebuild_status() == RebuildStatus::InProgress;

        if !is_rebuild && degraded {
            self.tracker.record(offset, len);
        }

        let plan = if replaying {
            let plan = RebuildPlan::for_range(&self.tracker, offset, len)?;
            debug!(
                "Volume {} rebuild write {}+{} applies {} bytes in {} chunks",
                self.name,
                offset,
                len,
                plan.total_len(),
                plan.chunks().len()
            );
            plan
        } else {
            RebuildPlan::whole(offset, len)
        };

        for chunk in plan.chunks() {
            if replaying {
                self.rebuild_bytes.fetch_add(chunk.len, Ordering::Relaxed);
                self.stats.record_rebuild_chunk();
                debug!(
                    "Volume {} applying rebuild chunk {}+{}",
                    self.name, chunk.offset, chunk.len
                );
            }
            let base = plan.buffer_offset(chunk);
            for span in self.layout.spans(chunk.offset, chunk.len) {
                let at = base + (span.offset - chunk.offset) as usize;
                self.write_block(&buf[at..at + span.len as usize], span, stamp)?;
            }
        }
        Ok(())
    }

    /// Commit one block in its own transaction
    fn write_block(
        &self,
        data: &[u8],
        span: BlockSpan,
        stamp: Option<&Stamp<'_>>,
    ) -> VolumeResult<()> {
        let meta_range = stamp.map(|_| self.layout.map(span.offset, span.len));

        let mut tx = self.store.begin();
        tx.hold_write(ObjectId::Data, span.offset, span.len);
        if let Some(range) = meta_range {
            tx.hold_write(ObjectId::Metadata, range.offset, range.len);
        }

        if let Err(source) = tx.assign() {
            warn!(
                "Volume {} transaction assignment failed at {}: {}",
                self.name, span.offset, source
            );
            tx.abort();
            self.stats.record_assign_failure();
            return Err(VolumeError::TxAssignFailed {
                offset: span.offset,
                source,
            });
        }

        tx.write(ObjectId::Data, span.offset, data)?;

        if let (Some(stamp), Some(range)) = (stamp, meta_range) {
            let records = self
                .locks
                .acquire(LockDomain::Metadata, range.offset, range.len, LockMode::Writer);
            let filler = &stamp.filler[..range.len as usize];
            let filled = tx.write(ObjectId::Metadata, range.offset, filler);
            VolumeLocks::release(records);
            filled?;
        }

        self.log.append(&LogRecord::write(
            ObjectId::Data,
            span.offset,
            Bytes::copy_from_slice(data),
            self.store.sync_policy() == SyncPolicy::Always,
            stamp.map(|s| s.record),
        ))?;

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replvol_common::config::VolumeConfig;
    use replvol_store::{MemoryIntentLog, MemoryObjectStore};
    use std::sync::Arc;

    const BS: usize = 4096;

    fn volume_with(
        store: Arc<MemoryObjectStore>,
        size_bytes: u64,
    ) -> (Volume, Arc<MemoryIntentLog>) {
        let log = Arc::new(MemoryIntentLog::new());
        let config = VolumeConfig {
            size_bytes,
            ..VolumeConfig::default()
        };
        let volume = Volume::open(&config, store, log.clone()).unwrap();
        (volume, log)
    }

    fn read_data(volume: &Volume, offset: u64, len: u64) -> Vec<u8> {
        volume.read(offset, len, false).unwrap().data.to_vec()
    }

    #[test]
    fn test_zero_length_rejected() {
        let (volume, log) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        assert!(matches!(
            volume.write(&[], 0, None, false),
            Err(VolumeError::InvalidArgument(_))
        ));
        assert!(log.records().is_empty());
    }

    #[test]
    fn test_one_transaction_per_block() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, log) = volume_with(store.clone(), 1 << 20);

        volume
            .write(&vec![7u8; 10000], 100, Some(&BlockMetadata::new(3)), false)
            .unwrap();

        assert_eq!(store.commits(), 3);
        let records = log.records();
        assert_eq!(
            records.iter().map(|r| (r.offset, r.length)).collect::<Vec<_>>(),
            vec![(100, 3996), (4096, 4096), (8192, 1908)]
        );
        assert!(records.iter().all(|r| r.metadata == Some(BlockMetadata::new(3))));
        assert!(records.iter().all(|r| !r.sync));
        assert_eq!(store.object_len(ObjectId::Metadata), 24);
    }

    #[test]
    fn test_write_without_metadata_leaves_records_alone() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, _) = volume_with(store.clone(), 1 << 20);
        volume.write(&[1u8; BS], 0, None, false).unwrap();
        assert_eq!(store.object_len(ObjectId::Metadata), 0);
    }

    #[test]
    fn test_write_clipped_at_volsize() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, _) = volume_with(store.clone(), 8192);
        volume.write(&[9u8; BS], 6144, None, false).unwrap();
        assert_eq!(store.object_len(ObjectId::Data), 8192);
        assert_eq!(read_data(&volume, 6144, 4096), vec![9u8; 2048]);
    }

    #[test]
    fn test_write_past_volsize_has_no_effect() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, log) = volume_with(store.clone(), 8192);
        volume.set_status(VolumeStatus::Degraded);

        let md = BlockMetadata::new(1);
        volume.write(&[1u8; 100], u64::MAX - 10, Some(&md), false).unwrap();
        volume.write(&[1u8; 100], u64::MAX - 10, None, false).unwrap();
        volume.write(&[1u8; 100], 8192, Some(&md), false).unwrap();

        assert!(volume.tracker().is_empty());
        assert!(log.records().is_empty());
        assert_eq!(store.commits(), 0);
        assert_eq!(store.object_len(ObjectId::Data), 0);
        assert_eq!(store.object_len(ObjectId::Metadata), 0);
    }

    #[test]
    fn test_degraded_write_tracks_clipped_range() {
        let (volume, _) = volume_with(Arc::new(MemoryObjectStore::default()), 8192);
        volume.set_status(VolumeStatus::Degraded);
        volume
            .write(&[1u8; BS], 6144, Some(&BlockMetadata::new(2)), false)
            .unwrap();
        assert_eq!(
            volume.tracker().intervals(),
            vec![replvol_common::IoChunk::new(6144, 2048)]
        );
    }

    #[test]
    fn test_foreground_write_tracked_only_when_degraded() {
        let (volume, _) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        volume.write(&[1u8; 100], 0, None, false).unwrap();
        assert!(volume.tracker().is_empty());

        volume.set_status(VolumeStatus::Degraded);
        volume.write(&[1u8; 100], 4096, None, false).unwrap();
        volume.write(&[1u8; 100], 8192, None, true).unwrap();
        assert_eq!(
            volume.tracker().intervals(),
            vec![replvol_common::IoChunk::new(4096, 100)]
        );
    }

    #[test]
    fn test_rebuild_applies_complement_only() {
        let (volume, _) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        volume.set_status(VolumeStatus::Degraded);
        volume.set_rebuild_status(RebuildStatus::InProgress);

        volume
            .write(&[0xFF; 1024], 2048, Some(&BlockMetadata::new(5)), false)
            .unwrap();
        volume
            .write(&[0x11; 8192], 0, Some(&BlockMetadata::new(3)), true)
            .unwrap();

        let data = read_data(&volume, 0, 8192);
        assert!(data[..2048].iter().all(|b| *b == 0x11));
        assert!(data[2048..3072].iter().all(|b| *b == 0xFF));
        assert!(data[3072..].iter().all(|b| *b == 0x11));
        assert_eq!(volume.rebuild_bytes(), 2048 + 5120);
        assert_eq!(volume.stats().rebuild_chunks, 2);
    }

    #[test]
    fn test_rebuild_of_covered_range_is_no_work() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, log) = volume_with(store.clone(), 1 << 20);
        volume.set_status(VolumeStatus::Degraded);
        volume.set_rebuild_status(RebuildStatus::InProgress);

        volume.write(&[1u8; 8192], 0, None, false).unwrap();
        let commits = store.commits();

        let err = volume.write(&[2u8; 4096], 4096, None, true).unwrap_err();
        assert!(err.is_no_work());
        assert_eq!(store.commits(), commits);
        assert_eq!(log.records().len(), 2);
        assert_eq!(volume.rebuild_bytes(), 0);
        assert_eq!(volume.stats().rebuild_no_work, 1);
    }

    #[test]
    fn test_rebuild_write_while_idle_is_unsplit() {
        let (volume, _) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        volume.set_status(VolumeStatus::Degraded);
        volume.write(&[1u8; 1024], 1024, None, false).unwrap();

        volume.write(&[2u8; 4096], 0, None, true).unwrap();
        assert_eq!(read_data(&volume, 0, 4096), vec![2u8; 4096]);
        assert_eq!(volume.rebuild_bytes(), 0);
    }

    #[test]
    fn test_assign_failure_keeps_earlier_blocks() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, _) = volume_with(store.clone(), 1 << 20);

        volume.write(&vec![1u8; 4 * BS], 0, None, false).unwrap();

        // blocks 0 and 1 succeed, block 2 fails
        store.fail_assign_after(2);
        let err = volume.write(&vec![2u8; 4 * BS], 0, None, false).unwrap_err();
        assert!(matches!(err, VolumeError::TxAssignFailed { offset: 8192, .. }));

        let data = read_data(&volume, 0, 4 * BS as u64);
        assert!(data[..2 * BS].iter().all(|b| *b == 2));
        assert!(data[2 * BS..].iter().all(|b| *b == 1));

        let stats = volume.stats();
        assert_eq!(stats.assign_failures, 1);
        assert_eq!(stats.failed_ops, 1);
        assert_eq!(stats.write_ops, 1);
    }

    #[test]
    fn test_failed_writes_release_range_locks() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, _) = volume_with(store.clone(), 1 << 20);
        let md = BlockMetadata::new(3);

        store.fail_assign_after(1);
        assert!(volume.write(&vec![1u8; 2 * BS], 0, Some(&md), false).is_err());
        assert_eq!(volume.locks().held(LockDomain::Data), 0);
        assert_eq!(volume.locks().held(LockDomain::Metadata), 0);

        volume.set_status(VolumeStatus::Degraded);
        volume.write(&[2u8; BS], 0, None, false).unwrap();
        volume.set_rebuild_status(RebuildStatus::InProgress);
        let err = volume.write(&[3u8; BS], 0, Some(&md), true).unwrap_err();
        assert!(err.is_no_work());
        assert_eq!(volume.locks().held(LockDomain::Data), 0);
        assert_eq!(volume.locks().held(LockDomain::Metadata), 0);
    }

    #[test]
    fn test_rebuild_failure_discards_remaining_chunks() {
        let store = Arc::new(MemoryObjectStore::default());
        let (volume, _) = volume_with(store.clone(), 1 << 20);
        volume.write(&[1u8; 2 * BS], 0, None, false).unwrap();

        volume.set_status(VolumeStatus::Degraded);
        volume
            .write(&[0xFFu8; 1024], 2048, Some(&BlockMetadata::new(8)), false)
            .unwrap();
        volume.set_rebuild_status(RebuildStatus::InProgress);

        // chunk [0, 2048) commits, chunk [3072, 8192) fails on its first block
        store.fail_assign_after(1);
        let err = volume
            .write(&[0x11u8; 2 * BS], 0, Some(&BlockMetadata::new(5)), true)
            .unwrap_err();
        assert!(matches!(err, VolumeError::TxAssignFailed { offset: 3072, .. }));
        assert_eq!(volume.locks().held(LockDomain::Data), 0);
        assert_eq!(volume.locks().held(LockDomain::Metadata), 0);

        let data = read_data(&volume, 0, 2 * BS as u64);
        assert!(data[..2048].iter().all(|b| *b == 0x11));
        assert!(data[2048..3072].iter().all(|b| *b == 0xFF));
        assert!(data[3072..].iter().all(|b| *b == 1));

        // both chunks were attempted
        assert_eq!(volume.rebuild_bytes(), 7168);
    }

    #[test]
    fn test_sync_always_forces_log_even_on_failure() {
        let store = Arc::new(MemoryObjectStore::new(SyncPolicy::Always, 8));
        let (volume, log) = volume_with(store.clone(), 1 << 20);

        volume.write(&[1u8; BS], 0, None, false).unwrap();
        assert_eq!(log.force_count(), 1);
        assert!(log.records()[0].sync);

        store.fail_assign_after(0);
        assert!(volume.write(&[1u8; BS], 0, None, false).is_err());
        assert_eq!(log.force_count(), 2);
    }

    #[test]
    fn test_standard_policy_does_not_force() {
        let (volume, log) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        volume.write(&[1u8; BS], 0, None, false).unwrap();
        assert_eq!(log.force_count(), 0);
    }

    #[test]
    fn test_disjoint_writers_proceed() {
        let store = Arc::new(MemoryObjectStore::new(SyncPolicy::Standard, 4));
        let (volume, _) = volume_with(store, 1 << 20);

        std::thread::scope(|s| {
            for t in 0..8u8 {
                let volume = &volume;
                s.spawn(move || {
                    let offset = u64::from(t) * 2 * BS as u64;
                    for round in 0..50u8 {
                        let fill = t.wrapping_mul(31).wrapping_add(round);
                        volume.write(&vec![fill; 2 * BS], offset, None, false).unwrap();
                    }
                });
            }
        });

        for t in 0..8u8 {
            let data = read_data(&volume, u64::from(t) * 2 * BS as u64, 2 * BS as u64);
            let expected = t.wrapping_mul(31).wrapping_add(49);
            assert!(data.iter().all(|b| *b == expected));
        }
    }

    #[test]
    fn test_overlapping_writers_serialize() {
        let (volume, _) = volume_with(Arc::new(MemoryObjectStore::default()), 1 << 20);
        let len = 3 * BS + 500;

        std::thread::scope(|s| {
            for fill in [0xAAu8, 0x55] {
                let volume = &volume;
                s.spawn(move || {
                    let md = BlockMetadata::new(u64::from(fill));
                    for _ in 0..100 {
                        volume.write(&vec![fill; len], 1000, Some(&md), false).unwrap();
                    }
                });
            }
        });

        let read = volume.read(1000, len as u64, true).unwrap();
        let first = read.data[0];
        assert!(first == 0xAA || first == 0x55);
        assert!(read.data.iter().all(|b| *b == first));

        let provenance = read.provenance.unwrap();
        assert_eq!(provenance.len(), 1);
        assert_eq!(provenance.extents()[0].io_num, u64::from(first));
    }
}
