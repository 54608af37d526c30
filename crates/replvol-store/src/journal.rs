//! File-backed intent log
//!
//! Persists every logged write to an append-only journal file before the
//! owning transaction commits, so writes acknowledged to the caller can be
//! replayed after a crash.
//!
//! File layout:
//! ```text
//! +-------+---------+----------+------------+
//! | Magic | Version | Sequence | Checkpoint |   header, 28 bytes
//! | 8B    | 4B      | 8B       | 8B         |
//! +-------+---------+----------+------------+
//! | Entry | Entry | ...                          entries, see JournalEntry
//! ```

use crate::intent_log::{IntentLog, LogRecord};

use bytes::Bytes;
use parking_lot::Mutex;
use replvol_common::{BlockMetadata, Error, ObjectId, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Magic number for journal file header
const JOURNAL_MAGIC: u64 = 0x52564F4C5F494C47; // "RVOL_ILG"

/// Journal file version
const JOURNAL_VERSION: u32 = 1;

/// Header size: magic + version + sequence + checkpoint
const HEADER_SIZE: u64 = 8 + 4 + 8 + 8;

const FLAG_SYNC: u8 = 0b01;
const FLAG_METADATA: u8 = 0b10;

/// Journal entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// A logged object write
    Write = 1,
    /// Checkpoint (all prior entries can be discarded)
    Checkpoint = 2,
}

impl TryFrom<u8> for EntryType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Write),
            2 => Ok(Self::Checkpoint),
            _ => Err(Error::journal(format!("invalid entry type: {value}"))),
        }
    }
}

/// A single journal entry
///
/// ```text
/// +-----+------+--------+--------+-------+--------+------+---------+--------+
/// | Seq | Type | Object | Offset | Flags | IoNum  | Len  | Data    | CRC32C |
/// | 8B  | 1B   | 1B     | 8B     | 1B    | 8B     | 4B   | Len B   | 4B     |
/// +-----+------+--------+--------+-------+--------+------+---------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    pub sequence: u64,
    pub entry_type: EntryType,
    pub object: ObjectId,
    pub offset: u64,
    pub sync: bool,
    pub metadata: Option<BlockMetadata>,
    pub data: Bytes,
}

impl JournalEntry {
    fn write(sequence: u64, record: &LogRecord) -> Self {
        Self {
            sequence,
            entry_type: EntryType::Write,
            object: record.object,
            offset: record.offset,
            sync: record.sync,
            metadata: record.metadata,
            data: record.data.clone(),
        }
    }

    fn checkpoint(sequence: u64) -> Self {
        Self {
            sequence,
            entry_type: EntryType::Checkpoint,
            object: ObjectId::Data,
            offset: 0,
            sync: false,
            metadata: None,
            data: Bytes::new(),
        }
    }

    /// Serialize to bytes, checksum last
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(35 + self.data.len());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.push(self.entry_type as u8);
        buf.push(self.object.as_u8());
        buf.extend_from_slice(&self.offset.to_le_bytes());

        let mut flags = 0u8;
        if self.sync {
            flags |= FLAG_SYNC;
        }
        if self.metadata.is_some() {
            flags |= FLAG_METADATA;
        }
        buf.push(flags);
        buf.extend_from_slice(&self.metadata.map_or(0, |m| m.io_num).to_le_bytes());

        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);

        let crc = crc32c::crc32c(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize from reader, verifying the checksum
    pub fn deserialize<R: Read>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; 31];
        read_exact(reader, &mut fixed)?;

        let sequence = u64::from_le_bytes(le_array(&fixed[0..8]));
        let entry_type = EntryType::try_from(fixed[8])?;
        let object = ObjectId::try_from(fixed[9])?;
        let offset = u64::from_le_bytes(le_array(&fixed[10..18]));
        let flags = fixed[18];
        let io_num = u64::from_le_bytes(le_array(&fixed[19..27]));
        let data_len = u32::from_le_bytes(le_array(&fixed[27..31])) as usize;

        let mut data = vec![0u8; data_len];
        read_exact(reader, &mut data)?;

        let mut crc_buf = [0u8; 4];
        read_exact(reader, &mut crc_buf)?;
        let stored = u32::from_le_bytes(crc_buf);

        let computed = crc32c::crc32c_append(crc32c::crc32c(&fixed), &data);
        if computed != stored {
            return Err(Error::journal(format!(
                "entry {sequence} failed checksum"
            )));
        }

        Ok(Self {
            sequence,
            entry_type,
            object,
            offset,
            sync: flags & FLAG_SYNC != 0,
            metadata: (flags & FLAG_METADATA != 0).then(|| BlockMetadata::new(io_num)),
            data: Bytes::from(data),
        })
    }

    /// Serialized size in bytes
    pub fn serialized_size(&self) -> u64 {
        35 + self.data.len() as u64
    }

    fn into_record(self) -> LogRecord {
        LogRecord::write(self.object, self.offset, self.data, self.sync, self.metadata)
    }
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
    reader
        .read_exact(buf)
        .map_err(|e| Error::journal(e.to_string()))
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Result of scanning a journal file
struct Scan {
    entries: Vec<JournalEntry>,
    /// Byte offset just past the last valid entry
    valid_end: u64,
}

/// Intent log persisted to a journal file
pub struct FileIntentLog {
    /// Journal file path
    path: PathBuf,
    /// Journal file writer
    writer: Mutex<BufWriter<File>>,
    /// Next sequence number
    sequence: AtomicU64,
    /// Last checkpoint sequence
    last_checkpoint: AtomicU64,
    /// Size after which a checkpoint is due
    max_size: u64,
    /// Current journal size
    current_size: AtomicU64,
}

impl FileIntentLog {
    /// Create or open a journal at the given path
    pub fn open<P: AsRef<Path>>(path: P, max_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::journal(format!("failed to create journal dir: {e}")))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::journal(format!("failed to open journal: {e}")))?;

        let file_len = file
            .metadata()
            .map_err(|e| Error::journal(format!("failed to stat journal: {e}")))?
            .len();

        let (sequence, last_checkpoint) = if file_len > 0 {
            let (_, header_checkpoint) = Self::read_header(&file)?;
            let scan = Self::scan(&file)?;
            if scan.valid_end < file_len {
                warn!(
                    "Truncating torn journal tail at {:?}: {} -> {} bytes",
                    path, file_len, scan.valid_end
                );
                file.set_len(scan.valid_end)
                    .map_err(|e| Error::journal(format!("failed to truncate journal: {e}")))?;
            }
            let next = scan.entries.last().map_or(0, |e| e.sequence + 1);
            let checkpoint = scan
                .entries
                .iter()
                .rev()
                .find(|e| e.entry_type == EntryType::Checkpoint)
                .map_or(header_checkpoint, |e| e.sequence);
            (next, checkpoint)
        } else {
            let mut writer = BufWriter::new(&file);
            Self::write_header(&mut writer, 0, 0)?;
            (0, 0)
        };

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::journal(format!("failed to reopen journal: {e}")))?;

        let current_size = file
            .metadata()
            .map_err(|e| Error::journal(format!("failed to stat journal: {e}")))?
            .len();

        info!(
            "Opened intent log at {:?}: seq={}, checkpoint={}, size={}",
            path, sequence, last_checkpoint, current_size
        );

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
            sequence: AtomicU64::new(sequence),
            last_checkpoint: AtomicU64::new(last_checkpoint),
            max_size,
            current_size: AtomicU64::new(current_size),
        })
    }

    /// Write journal header
    fn write_header<W: Write>(writer: &mut W, sequence: u64, checkpoint: u64) -> Result<()> {
        let mut header = Vec::with_capacity(HEADER_SIZE as usize);
        header.extend_from_slice(&JOURNAL_MAGIC.to_le_bytes());
        header.extend_from_slice(&JOURNAL_VERSION.to_le_bytes());
        header.extend_from_slice(&sequence.to_le_bytes());
        header.extend_from_slice(&checkpoint.to_le_bytes());
        writer
            .write_all(&header)
            .map_err(|e| Error::journal(format!("failed to write header: {e}")))?;
        writer
            .flush()
            .map_err(|e| Error::journal(format!("failed to flush header: {e}")))
    }

    /// Read journal header, returning (sequence, checkpoint)
    fn read_header(file: &File) -> Result<(u64, u64)> {
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::journal(format!("failed to seek: {e}")))?;

        let mut header = [0u8; HEADER_SIZE as usize];
        read_exact(&mut reader, &mut header)?;

        if u64::from_le_bytes(le_array(&header[0..8])) != JOURNAL_MAGIC {
            return Err(Error::journal("invalid journal magic"));
        }
        let version = u32::from_le_bytes(le_array(&header[8..12]));
        if version != JOURNAL_VERSION {
            return Err(Error::journal(format!(
                "unsupported journal version: {version}"
            )));
        }
        Ok((
            u64::from_le_bytes(le_array(&header[12..20])),
            u64::from_le_bytes(le_array(&header[20..28])),
        ))
    }

    /// Read every valid entry after the header
    fn scan(file: &File) -> Result<Scan> {
        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(HEADER_SIZE))
            .map_err(|e| Error::journal(format!("failed to seek past header: {e}")))?;

        let mut entries = Vec::new();
        let mut valid_end = HEADER_SIZE;
        loop {
            match JournalEntry::deserialize(&mut reader) {
                Ok(entry) => {
                    valid_end += entry.serialized_size();
                    entries.push(entry);
                }
                Err(e) => {
                    debug!("Journal scan stopped at {}: {}", valid_end, e);
                    break;
                }
            }
        }
        Ok(Scan { entries, valid_end })
    }

    fn append_entry(&self, make: impl FnOnce(u64) -> JournalEntry) -> Result<u64> {
        let mut writer = self.writer.lock();
        let seq = self.sequence.load(Ordering::SeqCst);
        let data = make(seq).serialize();
        writer
            .write_all(&data)
            .map_err(|e| Error::journal(format!("write failed: {e}")))?;
        writer
            .flush()
            .map_err(|e| Error::journal(format!("flush failed: {e}")))?;

        self.sequence.store(seq + 1, Ordering::SeqCst);
        self.current_size
            .fetch_add(data.len() as u64, Ordering::SeqCst);
        Ok(seq)
    }

    /// Write a checkpoint; entries before it are no longer replayed
    pub fn checkpoint(&self) -> Result<u64> {
        let seq = self.append_entry(JournalEntry::checkpoint)?;
        self.last_checkpoint.store(seq, Ordering::SeqCst);
        debug!("Intent log checkpoint at sequence {}", seq);
        Ok(seq)
    }

    /// Records appended after the last checkpoint, in log order
    pub fn recover(&self) -> Result<Vec<LogRecord>> {
        let file = File::open(&self.path)
            .map_err(|e| Error::journal(format!("failed to open for recovery: {e}")))?;
        let scan = Self::scan(&file)?;

        let last_checkpoint = scan
            .entries
            .iter()
            .rev()
            .find(|e| e.entry_type == EntryType::Checkpoint)
            .map(|e| e.sequence);

        let records: Vec<_> = scan
            .entries
            .into_iter()
            .filter(|e| e.entry_type == EntryType::Write)
            .filter(|e| last_checkpoint.is_none_or(|cp| e.sequence > cp))
            .map(JournalEntry::into_record)
            .collect();

        info!("Recovered {} intent log records", records.len());
        Ok(records)
    }

    /// Next sequence number to be assigned
    pub fn next_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Sequence of the last checkpoint
    pub fn last_checkpoint(&self) -> u64 {
        self.last_checkpoint.load(Ordering::SeqCst)
    }

    /// Check if the journal has grown past its size limit
    pub fn needs_checkpoint(&self) -> bool {
        self.current_size.load(Ordering::SeqCst) > self.max_size
    }

    /// Sync journal to disk
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer
            .flush()
            .map_err(|e| Error::journal(format!("flush failed: {e}")))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| Error::journal(format!("sync failed: {e}")))
    }
}

impl IntentLog for FileIntentLog {
    fn append(&self, record: &LogRecord) -> Result<u64> {
        self.append_entry(|seq| JournalEntry::write(seq, record))
    }

    fn force_durable(&self, _object: ObjectId) -> Result<()> {
        self.sync()
    }
}
