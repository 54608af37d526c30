//! Per-volume I/O statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// I/O statistics counters
#[derive(Debug, Default)]
pub struct VolumeIoStats {
    /// Completed read calls
    read_ops: AtomicU64,
    /// Completed write calls
    write_ops: AtomicU64,
    /// Bytes returned by reads
    read_bytes: AtomicU64,
    /// Bytes accepted by writes
    write_bytes: AtomicU64,
    /// Total read latency (microseconds)
    read_latency_sum: AtomicU64,
    /// Total write latency (microseconds)
    write_latency_sum: AtomicU64,
    /// Calls that returned an error
    failed_ops: AtomicU64,
    /// Block transactions that could not be assigned
    assign_failures: AtomicU64,
    /// Rebuild chunks applied
    rebuild_chunks: AtomicU64,
    /// Rebuild writes that found nothing to apply
    rebuild_no_work: AtomicU64,
}

impl VolumeIoStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed read
    pub fn record_read(&self, bytes: u64, latency_us: u64) {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        self.read_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.read_latency_sum.fetch_add(latency_us, Ordering::Relaxed);
    }

    /// Record a completed write
    pub fn record_write(&self, bytes: u64, latency_us: u64) {
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        self.write_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.write_latency_sum.fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_assign_failure(&self) {
        self.assign_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rebuild_chunk(&self) {
        self.rebuild_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_work(&self) {
        self.rebuild_no_work.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> VolumeIoSnapshot {
        VolumeIoSnapshot {
            read_ops: self.read_ops.load(Ordering::Relaxed),
            write_ops: self.write_ops.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
            read_latency_sum_us: self.read_latency_sum.load(Ordering::Relaxed),
            write_latency_sum_us: self.write_latency_sum.load(Ordering::Relaxed),
            failed_ops: self.failed_ops.load(Ordering::Relaxed),
            assign_failures: self.assign_failures.load(Ordering::Relaxed),
            rebuild_chunks: self.rebuild_chunks.load(Ordering::Relaxed),
            rebuild_no_work: self.rebuild_no_work.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`VolumeIoStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VolumeIoSnapshot {
    pub read_ops: u64,
    pub write_ops: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub read_latency_sum_us: u64,
    pub write_latency_sum_us: u64,
    pub failed_ops: u64,
    pub assign_failures: u64,
    pub rebuild_chunks: u64,
    pub rebuild_no_work: u64,
}

impl VolumeIoSnapshot {
    /// Average read latency in microseconds
    pub fn avg_read_latency_us(&self) -> u64 {
        if self.read_ops == 0 {
            return 0;
        }
        self.read_latency_sum_us / self.read_ops
    }

    /// Average write latency in microseconds
    pub fn avg_write_latency_us(&self) -> u64 {
        if self.write_ops == 0 {
            return 0;
        }
        self.write_latency_sum_us / self.write_ops
    }
}
