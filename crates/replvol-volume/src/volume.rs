//! Volume handle and status control

use crate::error::VolumeResult;
use crate::layout::MetadataLayout;
use crate::lock::VolumeLocks;
use crate::stats::{VolumeIoSnapshot, VolumeIoStats};

use replvol_common::config::VolumeConfig;
use replvol_common::{ObjectId, RebuildStatus, SyncPolicy, VolumeStatus};
use replvol_store::{IncomingWriteTracker, IntentLog, ObjectStore, RangeGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tracing::{debug, info};

/// An open volume over a transactional object store
///
/// Reads and writes may be issued concurrently from many threads. The health
/// and rebuild flags are not synchronized internally: callers that flip them
/// while I/O is in flight should hold [`Volume::lock_volume`] around the
/// change.
pub struct Volume {
    pub(crate) name: String,
    pub(crate) layout: MetadataLayout,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) log: Arc<dyn IntentLog>,
    pub(crate) locks: VolumeLocks,
    pub(crate) tracker: IncomingWriteTracker,
    status: AtomicU8,
    rebuild_status: AtomicU8,
    pub(crate) rebuild_bytes: AtomicU64,
    pub(crate) stats: VolumeIoStats,
}

impl Volume {
    /// Open a volume over `store`, logging writes to `log`
    pub fn open(
        config: &VolumeConfig,
        store: Arc<dyn ObjectStore>,
        log: Arc<dyn IntentLog>,
    ) -> VolumeResult<Self> {
        let layout = MetadataLayout::new(config)?;
        info!(
            "Opened volume {}: size={}, block_size={}, metadata_size={}, sync={:?}",
            config.name,
            layout.volsize(),
            layout.block_size(),
            layout.record_size(),
            store.sync_policy()
        );
        Ok(Self {
            name: config.name.clone(),
            layout,
            store,
            log,
            locks: VolumeLocks::new(),
            tracker: IncomingWriteTracker::new(),
            status: AtomicU8::new(VolumeStatus::Healthy.into()),
            rebuild_status: AtomicU8::new(RebuildStatus::Idle.into()),
            rebuild_bytes: AtomicU64::new(0),
            stats: VolumeIoStats::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &MetadataLayout {
        &self.layout
    }

    pub fn volsize(&self) -> u64 {
        self.layout.volsize()
    }

    pub fn status(&self) -> VolumeStatus {
        VolumeStatus::from(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: VolumeStatus) {
        let prev = VolumeStatus::from(self.status.swap(status.into(), Ordering::Relaxed));
        if prev != status {
            info!("Volume {} status {:?} -> {:?}", self.name, prev, status);
        }
    }

    pub fn rebuild_status(&self) -> RebuildStatus {
        RebuildStatus::from(self.rebuild_status.load(Ordering::Relaxed))
    }

    pub fn set_rebuild_status(&self, status: RebuildStatus) {
        let prev = RebuildStatus::from(self.rebuild_status.swap(status.into(), Ordering::Relaxed));
        if prev != status {
            info!("Volume {} rebuild {:?} -> {:?}", self.name, prev, status);
        }
    }

    /// Hold the whole DATA range exclusively
    pub fn lock_volume(&self) -> RangeGuard<'_> {
        self.locks.lock_volume()
    }

    pub fn locks(&self) -> &VolumeLocks {
        &self.locks
    }

    /// Foreground writes recorded while degraded
    pub fn tracker(&self) -> &IncomingWriteTracker {
        &self.tracker
    }

    /// Bytes of rebuild chunks attempted so far
    ///
    /// A chunk is counted before it is applied, so after a failed rebuild
    /// write this includes the chunks that never landed.
    pub fn rebuild_bytes(&self) -> u64 {
        self.rebuild_bytes.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> VolumeIoSnapshot {
        self.stats.snapshot()
    }

    /// Make every logged DATA write durable
    ///
    /// A no-op when the dataset has syncing disabled.
    pub fn flush(&self) -> VolumeResult<()> {
        if self.store.sync_policy() == SyncPolicy::Disabled {
            debug!("Volume {} flush skipped: sync disabled", self.name);
            return Ok(());
        }
        self.log.force_durable(ObjectId::Data)?;
        Ok(())
    }
}
