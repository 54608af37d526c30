//! replvol bench - randomized workload driver
//!
//! Opens a volume over the configured store and intent log, runs concurrent
//! write/verify rounds with provenance and optionally walks the volume
//! through a degraded window followed by rebuild replay.

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use replvol_common::config::StoreBackend;
use replvol_common::{BlockMetadata, Config, RebuildStatus, SyncPolicy, VolumeStatus};
use replvol_store::{
    FileIntentLog, IntentLog, MemoryIntentLog, MemoryObjectStore, ObjectStore, RedbObjectStore,
};
use replvol_volume::Volume;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "replvol-bench")]
#[command(about = "Randomized write/verify workload for a replvol volume")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "replvol.toml")]
    config: PathBuf,

    /// Store backend (memory or redb)
    #[arg(long)]
    backend: Option<String>,

    /// redb database path
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Intent log journal path (in-memory log when unset)
    #[arg(long)]
    log_path: Option<PathBuf>,

    /// Sync policy (standard, always, disabled)
    #[arg(long)]
    sync: Option<String>,

    /// Worker threads
    #[arg(short, long, default_value = "4")]
    threads: u64,

    /// Write/verify rounds per worker
    #[arg(long, default_value = "1000")]
    ops: u64,

    /// Largest write in bytes
    #[arg(long, default_value = "65536")]
    max_len: u64,

    /// RNG seed
    #[arg(long, default_value = "1")]
    seed: u64,

    /// Simulate a degraded window followed by rebuild replay
    #[arg(long)]
    rebuild: bool,

    /// Log level
    #[arg(long, env = "REPLVOL_LOG", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_sync(s: &str) -> Result<SyncPolicy> {
    match s {
        "standard" => Ok(SyncPolicy::Standard),
        "always" => Ok(SyncPolicy::Always),
        "disabled" => Ok(SyncPolicy::Disabled),
        other => bail!("unknown sync policy: {other}"),
    }
}

fn parse_backend(s: &str) -> Result<StoreBackend> {
    match s {
        "memory" => Ok(StoreBackend::Memory),
        "redb" => Ok(StoreBackend::Redb),
        other => bail!("unknown store backend: {other}"),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        Config::default()
    };

    // CLI takes precedence
    if let Some(backend) = &args.backend {
        config.store.backend = parse_backend(backend)?;
    }
    if let Some(path) = &args.store_path {
        config.store.path.clone_from(path);
    }
    if let Some(path) = &args.log_path {
        config.intent_log.path = Some(path.clone());
    }
    if let Some(sync) = &args.sync {
        config.store.sync_policy = parse_sync(sync)?;
    }
    if args.log_level != "info" {
        config.logging.level.clone_from(&args.log_level);
    }
    Ok(config)
}

fn init_logging(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.to_string().into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn open_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store = &config.store;
    Ok(match store.backend {
        StoreBackend::Memory => Arc::new(MemoryObjectStore::new(
            store.sync_policy,
            store.max_open_txs,
        )),
        StoreBackend::Redb => Arc::new(
            RedbObjectStore::open(&store.path, store.page_size, store.sync_policy)
                .context("failed to open redb store")?,
        ),
    })
}

/// Per-worker region size, rounded down so no two workers share a block
fn worker_region(volsize: u64, threads: u64, block_size: u64) -> u64 {
    volsize / threads / block_size * block_size
}

/// Write random ranges inside a private region and read them back
fn worker(
    volume: &Volume,
    id: u64,
    region: (u64, u64),
    args: &Args,
    io_num: &AtomicU64,
) -> Result<()> {
    let (base, size) = region;
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_add(id));

    for _ in 0..args.ops {
        let len = rng.gen_range(1..=args.max_len.clamp(1, size));
        let offset = base + rng.gen_range(0..=size - len);
        let generation = io_num.fetch_add(1, Ordering::Relaxed);
        let buf: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();

        volume.write(&buf, offset, Some(&BlockMetadata::new(generation)), false)?;

        let read = volume.read(offset, len, true)?;
        if read.data.as_ref() != buf.as_slice() {
            bail!("worker {id}: data mismatch at {offset}+{len}");
        }
        let provenance = read.provenance.unwrap_or_default();
        if provenance.len() != 1 || provenance.extents()[0].io_num != generation {
            bail!("worker {id}: provenance mismatch at {offset}+{len}: {provenance:?}");
        }
    }
    Ok(())
}

/// Degrade the volume, write in the foreground, then replay the whole
/// volume as a rebuild and check the foreground data survived
fn simulate_rebuild(volume: &Volume, args: &Args, io_num: &AtomicU64) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(args.seed.wrapping_mul(7919));
    let volsize = volume.volsize();
    let step = (1u64 << 20).min(volsize);

    {
        let _quiesce = volume.lock_volume();
        volume.set_status(VolumeStatus::Degraded);
    }

    let mut foreground = Vec::new();
    for _ in 0..16 {
        let len = rng.gen_range(1..=args.max_len.clamp(1, volsize));
        let offset = rng.gen_range(0..=volsize - len);
        let fill: u8 = rng.gen_range(1..=u8::MAX);
        let generation = io_num.fetch_add(1, Ordering::Relaxed);
        let md = BlockMetadata::new(generation);
        volume.write(&vec![fill; len as usize], offset, Some(&md), false)?;
        foreground.push((offset, len, fill));
    }
    info!("Tracked {} foreground intervals", volume.tracker().intervals().len());

    {
        let _quiesce = volume.lock_volume();
        volume.set_rebuild_status(RebuildStatus::InProgress);
    }

    let replay = vec![0u8; step as usize];
    let mut no_work = 0u64;
    let mut offset = 0;
    while offset < volsize {
        let len = step.min(volsize - offset);
        match volume.write(&replay[..len as usize], offset, Some(&BlockMetadata::new(0)), true) {
            Ok(()) => {}
            Err(e) if e.is_no_work() => no_work += 1,
            Err(e) => return Err(e.into()),
        }
        offset += len;
    }

    // later foreground writes win over earlier ones
    let mut expected = std::collections::BTreeMap::new();
    for (offset, len, fill) in &foreground {
        for pos in *offset..offset + len {
            expected.insert(pos, *fill);
        }
    }
    for (offset, len, _) in &foreground {
        let read = volume.read(*offset, *len, false)?;
        for (i, byte) in read.data.iter().enumerate() {
            let pos = offset + i as u64;
            if expected.get(&pos) != Some(byte) {
                bail!("rebuild replay overwrote foreground byte at {pos}");
            }
        }
    }

    {
        let _quiesce = volume.lock_volume();
        volume.set_rebuild_status(RebuildStatus::Idle);
        volume.set_status(VolumeStatus::Healthy);
        volume.tracker().clear();
    }
    info!(
        "Rebuild replay applied {} bytes ({} ranges had no work)",
        volume.rebuild_bytes(),
        no_work
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_logging(&config.logging.level, args.log_json);

    info!("Starting replvol bench");
    info!("Config file: {}", args.config.display());
    info!("Store backend: {:?}", config.store.backend);

    let store = open_store(&config)?;

    let journal = match &config.intent_log.path {
        Some(path) => {
            let journal = Arc::new(
                FileIntentLog::open(path, config.intent_log.max_size)
                    .context("failed to open intent log")?,
            );
            let pending = journal.recover()?;
            if !pending.is_empty() {
                warn!("Intent log holds {} records since last checkpoint", pending.len());
            }
            Some(journal)
        }
        None => None,
    };
    let log: Arc<dyn IntentLog> = match &journal {
        Some(journal) => Arc::clone(journal) as Arc<dyn IntentLog>,
        None => Arc::new(MemoryIntentLog::new()),
    };

    let volume = Volume::open(&config.volume, store, log)?;
    let io_num = AtomicU64::new(1);
    let threads = args.threads.max(1);
    let region = worker_region(volume.volsize(), threads, volume.layout().block_size());
    if region == 0 {
        bail!("volume too small for {threads} workers");
    }

    let start = Instant::now();
    std::thread::scope(|s| -> Result<()> {
        let handles: Vec<_> = (0..threads)
            .map(|id| {
                let (volume, args, io_num) = (&volume, &args, &io_num);
                s.spawn(move || worker(volume, id, (id * region, region), args, io_num))
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("worker panicked"))??;
        }
        Ok(())
    })?;
    let elapsed = start.elapsed();

    if args.rebuild {
        simulate_rebuild(&volume, &args, &io_num)?;
    }

    volume.flush()?;
    if let Some(journal) = &journal {
        if journal.needs_checkpoint() {
            let seq = journal.checkpoint()?;
            info!("Intent log checkpointed at sequence {}", seq);
        }
    }

    let stats = volume.stats();
    info!(
        "Completed {} writes ({} bytes) and {} reads ({} bytes) in {:.2?}",
        stats.write_ops, stats.write_bytes, stats.read_ops, stats.read_bytes, elapsed
    );
    info!(
        "Latency: write avg {} us, read avg {} us",
        stats.avg_write_latency_us(),
        stats.avg_read_latency_us()
    );
    info!(
        "Failures: {} calls, {} transaction assignments; rebuild chunks {}",
        stats.failed_ops, stats.assign_failures, stats.rebuild_chunks
    );
    Ok(())
}
