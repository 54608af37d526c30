//! Volume read path

use crate::error::{VolumeError, VolumeResult};
use crate::layout::BlockSpan;
use crate::lock::{LockDomain, VolumeLocks};
use crate::provenance::ProvenanceList;
use crate::volume::Volume;

use bytes::{Bytes, BytesMut};
use replvol_common::{BlockMetadata, ObjectId};
use replvol_store::LockMode;
use std::time::Instant;
use tracing::warn;

/// Result of a volume read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRead {
    /// Bytes inside the volume, starting at the requested offset
    pub data: Bytes,
    /// Provenance of `data`, when requested
    pub provenance: Option<ProvenanceList>,
}

impl Volume {
    /// Read `len` bytes at `offset`, clipped to the end of the volume
    ///
    /// With `want_provenance` the result also carries the run-length list of
    /// write generations covering the returned bytes.
    pub fn read(&self, offset: u64, len: u64, want_provenance: bool) -> VolumeResult<VolumeRead> {
        if len == 0 || offset >= self.layout.volsize() {
            return Err(VolumeError::invalid_argument(format!(
                "read of {offset}+{len} outside volume of {} bytes",
                self.layout.volsize()
            )));
        }
        let start = Instant::now();

        let result = {
            let _range = self.locks.acquire(LockDomain::Data, offset, len, LockMode::Reader);
            self.read_locked(offset, len, want_provenance)
        };

        match &result {
            Ok(read) => self
                .stats
                .record_read(read.data.len() as u64, start.elapsed().as_micros() as u64),
            Err(e) => {
                warn!("Volume {} read at {}+{} failed: {}", self.name, offset, len, e);
                self.stats.record_failure();
            }
        }
        result
    }

    fn read_locked(
        &self,
        offset: u64,
        len: u64,
        want_provenance: bool,
    ) -> VolumeResult<VolumeRead> {
        let readable = offset.saturating_add(len).min(self.layout.volsize()) - offset;
        let mut data = BytesMut::zeroed(readable as usize);
        let mut provenance = want_provenance.then(ProvenanceList::new);

        for span in self.layout.spans(offset, len) {
            let at = (span.offset - offset) as usize;
            self.store
                .read(ObjectId::Data, span.offset, &mut data[at..at + span.len as usize])?;
            if let Some(list) = provenance.as_mut() {
                self.read_provenance(span, list)?;
            }
        }

        Ok(VolumeRead {
            data: data.freeze(),
            provenance,
        })
    }

    /// Append the provenance of one block span to `list`
    fn read_provenance(&self, span: BlockSpan, list: &mut ProvenanceList) -> VolumeResult<()> {
        let range = self.layout.map(span.offset, span.len);
        let mut records = vec![0u8; range.len as usize];
        let guard = self
            .locks
            .acquire(LockDomain::Metadata, range.offset, range.len, LockMode::Reader);
        let fetched = self.store.read(ObjectId::Metadata, range.offset, &mut records);
        VolumeLocks::release(guard);
        fetched?;

        let count = self.layout.record_count(range);
        let meta_block_size = self.layout.meta_block_size();
        debug_assert!(meta_block_size * count >= span.len);
        debug_assert!(meta_block_size * count < span.len + self.layout.block_size());

        let record_size = self.layout.record_size() as usize;
        for (i, record) in records.chunks_exact(record_size).enumerate() {
            let record_offset = range.offset + (i * record_size) as u64;
            let block_start = self.layout.block_offset(record_offset);
            let block_end = block_start + meta_block_size;
            let covered = span.end().min(block_end) - span.offset.max(block_start);
            list.push(BlockMetadata::decode(record)?.io_num, covered);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ProvenanceExtent;
    use rand::Rng;
    use replvol_common::SyncPolicy;
    use replvol_common::config::VolumeConfig;
    use replvol_store::{MemoryIntentLog, MemoryObjectStore, RedbObjectStore};
    use std::sync::Arc;

    fn volume(size_bytes: u64) -> (Volume, Arc<MemoryObjectStore>) {
        let store = Arc::new(MemoryObjectStore::default());
        let config = VolumeConfig {
            size_bytes,
            ..VolumeConfig::default()
        };
        let log = Arc::new(MemoryIntentLog::new());
        let volume = Volume::open(&config, store.clone(), log).unwrap();
        (volume, store)
    }

    #[test]
    fn test_random_round_trip() {
        let (volume, _) = volume(1 << 20);
        let mut rng = rand::thread_rng();

        for _ in 0..50 {
            let len = rng.gen_range(1..20_000u64);
            let offset = rng.gen_range(0..(1 << 20) - len);
            let buf: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();

            volume.write(&buf, offset, None, false).unwrap();
            let read = volume.read(offset, len, false).unwrap();
            assert_eq!(read.data.as_ref(), buf.as_slice());
            assert!(read.provenance.is_none());
        }
    }

    #[test]
    fn test_provenance_constant_for_single_write() {
        let (volume, _) = volume(1 << 20);
        volume
            .write(&vec![3u8; 10000], 100, Some(&BlockMetadata::new(77)), false)
            .unwrap();

        let read = volume.read(100, 10000, true).unwrap();
        let provenance = read.provenance.unwrap();
        assert_eq!(
            provenance.extents(),
            &[ProvenanceExtent { io_num: 77, length: 10000 }]
        );
        assert_eq!(provenance.total_len(), read.data.len() as u64);
    }

    #[test]
    fn test_newer_write_supersedes() {
        let (volume, _) = volume(1 << 20);
        volume
            .write(&[1u8; 8192], 4096, Some(&BlockMetadata::new(10)), false)
            .unwrap();
        volume
            .write(&[2u8; 8192], 4096, Some(&BlockMetadata::new(11)), false)
            .unwrap();

        let read = volume.read(4096, 8192, true).unwrap();
        assert!(read.data.iter().all(|b| *b == 2));
        assert_eq!(
            read.provenance.unwrap().extents(),
            &[ProvenanceExtent { io_num: 11, length: 8192 }]
        );
    }

    #[test]
    fn test_provenance_runs_follow_blocks() {
        let (volume, _) = volume(1 << 20);
        volume
            .write(&[1u8; 12288], 0, Some(&BlockMetadata::new(1)), false)
            .unwrap();
        volume
            .write(&[2u8; 10], 4100, Some(&BlockMetadata::new(2)), false)
            .unwrap();

        let read = volume.read(2000, 8000, true).unwrap();
        assert_eq!(
            read.provenance.unwrap().extents(),
            &[
                ProvenanceExtent { io_num: 1, length: 2096 },
                ProvenanceExtent { io_num: 2, length: 4096 },
                ProvenanceExtent { io_num: 1, length: 1808 },
            ]
        );
    }

    #[test]
    fn test_unwritten_blocks_read_zero_generation() {
        let (volume, _) = volume(1 << 20);
        let read = volume.read(0, 4096, true).unwrap();
        assert!(read.data.iter().all(|b| *b == 0));
        assert_eq!(
            read.provenance.unwrap().extents(),
            &[ProvenanceExtent { io_num: 0, length: 4096 }]
        );
    }

    #[test]
    fn test_read_clipped_at_volsize() {
        let (volume, _) = volume(10000);
        volume
            .write(&[5u8; 2000], 8000, Some(&BlockMetadata::new(4)), false)
            .unwrap();

        let read = volume.read(8000, 4096, true).unwrap();
        assert_eq!(read.data.len(), 2000);
        assert_eq!(read.provenance.unwrap().total_len(), 2000);
    }

    #[test]
    fn test_invalid_reads() {
        let (volume, _) = volume(10000);
        assert!(matches!(
            volume.read(0, 0, false),
            Err(VolumeError::InvalidArgument(_))
        ));
        assert!(matches!(
            volume.read(10000, 1, false),
            Err(VolumeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_store_failure_returns_no_list() {
        let (volume, store) = volume(1 << 20);
        volume
            .write(&[1u8; 8192], 0, Some(&BlockMetadata::new(1)), false)
            .unwrap();

        store.fail_reads(ObjectId::Metadata, 8, 8);
        let err = volume.read(0, 8192, true).unwrap_err();
        assert!(err.is_io());
        assert!(volume.read(0, 8192, false).is_ok());

        store.clear_faults();
        store.fail_reads(ObjectId::Data, 4096, 1);
        assert!(volume.read(0, 8192, false).is_err());
        assert_eq!(volume.stats().failed_ops, 2);
    }

    #[test]
    fn test_failed_reads_release_range_locks() {
        let (volume, store) = volume(1 << 20);
        volume
            .write(&[1u8; 8192], 0, Some(&BlockMetadata::new(1)), false)
            .unwrap();

        store.fail_reads(ObjectId::Data, 4096, 1);
        assert!(volume.read(0, 8192, true).is_err());
        assert_eq!(volume.locks().held(LockDomain::Data), 0);
        assert_eq!(volume.locks().held(LockDomain::Metadata), 0);

        store.clear_faults();
        store.fail_reads(ObjectId::Metadata, 0, 8);
        assert!(volume.read(0, 8192, true).is_err());
        assert_eq!(volume.locks().held(LockDomain::Data), 0);
        assert_eq!(volume.locks().held(LockDomain::Metadata), 0);
    }

    #[test]
    fn test_redb_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.redb");
        let config = VolumeConfig {
            size_bytes: 1 << 20,
            ..VolumeConfig::default()
        };
        let payload: Vec<u8> = (0..10000u32).map(|i| (i % 253) as u8).collect();

        {
            let store = Arc::new(RedbObjectStore::open(&path, 4096, SyncPolicy::Always).unwrap());
            let volume = Volume::open(&config, store, Arc::new(MemoryIntentLog::new())).unwrap();
            volume
                .write(&payload, 100, Some(&BlockMetadata::new(9)), false)
                .unwrap();
        }

        let store = Arc::new(RedbObjectStore::open(&path, 4096, SyncPolicy::Always).unwrap());
        let volume = Volume::open(&config, store, Arc::new(MemoryIntentLog::new())).unwrap();
        let read = volume.read(100, 10000, true).unwrap();
        assert_eq!(read.data.as_ref(), payload.as_slice());
        assert_eq!(
            read.provenance.unwrap().extents(),
            &[ProvenanceExtent { io_num: 9, length: 10000 }]
        );
    }
}
