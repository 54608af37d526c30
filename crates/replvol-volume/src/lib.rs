//! replvol Volume
//!
//! Block-level read/write path of a replicated volume built on a
//! transactional object store. A volume exposes two objects: DATA holds raw
//! blocks and METADATA holds one provenance record per block.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │  Volume::write / Volume::read            │
//! │   - DATA range lock (whole request)      │
//! │   - RebuildPlan (rebuild writes)         │
//! │   - BlockSpans → one tx per block        │
//! │   - METADATA range lock (per block)      │
//! └────────┬─────────────────────┬───────────┘
//!          │                     │
//! ┌────────▼────────┐   ┌────────▼────────┐
//! │  ObjectStore    │   │  IntentLog      │
//! │  (memory/redb)  │   │  (memory/file)  │
//! └─────────────────┘   └─────────────────┘
//! ```
//!
//! While a volume is degraded, foreground writes are recorded in an
//! [`replvol_store::IncomingWriteTracker`]. A rebuild write issued while the
//! rebuild is in progress only applies the byte ranges no foreground write
//! has touched.

pub mod error;
pub mod layout;
pub mod lock;
pub mod provenance;
pub mod read;
pub mod rebuild;
pub mod stats;
pub mod volume;
pub mod write;

pub use error::{VolumeError, VolumeResult};
pub use layout::{BlockSpan, BlockSpans, MetadataLayout, MetadataRange};
pub use lock::{LockDomain, VolumeLocks};
pub use provenance::{ProvenanceExtent, ProvenanceList};
pub use read::VolumeRead;
pub use rebuild::RebuildPlan;
pub use stats::{VolumeIoSnapshot, VolumeIoStats};
pub use volume::Volume;
