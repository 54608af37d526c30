//! Block layout of a volume
//!
//! Maps DATA byte ranges onto the METADATA object and splits requests into
//! per-block spans.
//!
//! ```text
//! DATA      |  block 0  |  block 1  |  block 2  | ...
//!           0         4096        8192
//! METADATA  | rec 0 | rec 1 | rec 2 | ...
//!           0       8      16
//! ```

use crate::error::{VolumeError, VolumeResult};

use replvol_common::BlockMetadata;
use replvol_common::config::VolumeConfig;

/// A byte range of the METADATA object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataRange {
    pub offset: u64,
    pub len: u64,
}

/// A piece of a request that stays within one data block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpan {
    pub offset: u64,
    pub len: u64,
}

impl BlockSpan {
    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Geometry of a volume's DATA and METADATA objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataLayout {
    /// Addressable DATA bytes
    volsize: u64,
    /// DATA block size
    block_size: u64,
    /// Bytes of one provenance record
    record_size: u64,
    /// DATA bytes described by one record
    meta_block_size: u64,
}

impl MetadataLayout {
    /// Build the layout for a volume; every size must be positive
    pub fn new(config: &VolumeConfig) -> VolumeResult<Self> {
        config
            .validate()
            .map_err(|e| VolumeError::Configuration(e.to_string()))?;
        Ok(Self {
            volsize: config.size_bytes,
            block_size: config.block_size,
            record_size: config.metadata_size,
            meta_block_size: config.block_size,
        })
    }

    pub fn volsize(&self) -> u64 {
        self.volsize
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn record_size(&self) -> u64 {
        self.record_size
    }

    pub fn meta_block_size(&self) -> u64 {
        self.meta_block_size
    }

    /// METADATA range holding the records of every block that
    /// `[offset, offset + len)` touches
    pub fn map(&self, offset: u64, len: u64) -> MetadataRange {
        debug_assert!(len > 0, "metadata mapping of an empty range");
        let first = offset / self.meta_block_size;
        let last = (offset.saturating_add(len) - 1) / self.meta_block_size;
        MetadataRange {
            offset: first * self.record_size,
            len: (last - first + 1) * self.record_size,
        }
    }

    /// Number of records in a mapped range
    pub fn record_count(&self, range: MetadataRange) -> u64 {
        range.len / self.record_size
    }

    /// DATA offset of the block described by the record at `record_offset`
    pub fn block_offset(&self, record_offset: u64) -> u64 {
        record_offset / self.record_size * self.meta_block_size
    }

    /// Per-block spans of `[offset, offset + len)`, clipped to the volume
    pub fn spans(&self, offset: u64, len: u64) -> BlockSpans {
        BlockSpans {
            pos: offset,
            end: offset.saturating_add(len).min(self.volsize),
            block_size: self.block_size,
        }
    }

    /// `record` replicated across `range`
    pub fn filler(&self, record: &BlockMetadata, range: MetadataRange) -> Vec<u8> {
        let mut buf = vec![0u8; range.len as usize];
        for slot in buf.chunks_exact_mut(self.record_size as usize) {
            record.encode_into(slot);
        }
        buf
    }
}

/// Iterator over the per-block pieces of a byte range
///
/// The first piece runs to the next block boundary, middle pieces are whole
/// blocks and the last piece is the remainder. Iteration stops at the end of
/// the volume.
#[derive(Debug, Clone)]
pub struct BlockSpans {
    pos: u64,
    end: u64,
    block_size: u64,
}

impl Iterator for BlockSpans {
    type Item = BlockSpan;

    fn next(&mut self) -> Option<BlockSpan> {
        if self.pos >= self.end {
            return None;
        }
        let boundary = (self.pos / self.block_size + 1) * self.block_size;
        let stop = boundary.min(self.end);
        let span = BlockSpan {
            offset: self.pos,
            len: stop - self.pos,
        };
        self.pos = stop;
        Some(span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(size_bytes: u64) -> MetadataLayout {
        MetadataLayout::new(&VolumeConfig {
            size_bytes,
            ..VolumeConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_map_single_block() {
        let layout = layout(1 << 20);
        assert_eq!(layout.map(0, 1), MetadataRange { offset: 0, len: 8 });
        assert_eq!(layout.map(4096, 4096), MetadataRange { offset: 8, len: 8 });
        assert_eq!(layout.map(5000, 100), MetadataRange { offset: 8, len: 8 });
    }

    #[test]
    fn test_map_spanning_blocks() {
        let layout = layout(1 << 20);
        // blocks 0..=2
        let range = layout.map(100, 10000);
        assert_eq!(range, MetadataRange { offset: 0, len: 24 });
        assert_eq!(layout.record_count(range), 3);
        assert_eq!(range.len % layout.record_size(), 0);

        assert_eq!(layout.map(4095, 2), MetadataRange { offset: 0, len: 16 });
        assert_eq!(layout.block_offset(16), 8192);
    }

    #[test]
    fn test_spans_first_partial_then_whole_blocks() {
        let layout = layout(1 << 20);
        let spans: Vec<_> = layout.spans(100, 10000).collect();
        assert_eq!(
            spans.iter().map(|s| s.len).collect::<Vec<_>>(),
            vec![3996, 4096, 1908]
        );
        assert_eq!(spans.iter().map(|s| s.len).sum::<u64>(), 10000);
        assert_eq!(spans[1].offset, 4096);
        assert_eq!(spans[2].end(), 10100);
    }

    #[test]
    fn test_spans_aligned() {
        let layout = layout(1 << 20);
        let spans: Vec<_> = layout.spans(8192, 8192).collect();
        assert_eq!(
            spans,
            vec![
                BlockSpan { offset: 8192, len: 4096 },
                BlockSpan { offset: 12288, len: 4096 },
            ]
        );
    }

    #[test]
    fn test_spans_clip_at_volsize() {
        let layout = layout(10000);
        let spans: Vec<_> = layout.spans(8000, 4000).collect();
        assert_eq!(
            spans,
            vec![
                BlockSpan { offset: 8000, len: 192 },
                BlockSpan { offset: 8192, len: 1808 },
            ]
        );
        assert_eq!(layout.spans(10000, 10).count(), 0);
        assert_eq!(layout.spans(0, 0).count(), 0);
    }

    #[test]
    fn test_filler_replicates_record() {
        let layout = MetadataLayout::new(&VolumeConfig {
            metadata_size: 16,
            ..VolumeConfig::default()
        })
        .unwrap();
        let range = layout.map(0, 3 * 4096);
        let filler = layout.filler(&BlockMetadata::new(42), range);
        assert_eq!(filler.len(), 48);
        for record in filler.chunks(16) {
            assert_eq!(BlockMetadata::decode(record).unwrap().io_num, 42);
            assert!(record[8..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_rejects_zero_sizes() {
        let bad = VolumeConfig {
            block_size: 0,
            ..VolumeConfig::default()
        };
        assert!(matches!(
            MetadataLayout::new(&bad),
            Err(VolumeError::Configuration(_))
        ));
        let bad = VolumeConfig {
            size_bytes: 0,
            ..VolumeConfig::default()
        };
        assert!(MetadataLayout::new(&bad).is_err());
    }
}
