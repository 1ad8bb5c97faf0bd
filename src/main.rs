//! Tiered Cache Workload Driver
//!
//! Hammers a cache with concurrent writers and readers, verifies every value
//! read back, and reports tier occupancy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Workload Driver                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Writers    │───▶│  TierCache   │◀───│   Readers    │       │
//! │  │ put / remove │    │ heap/off/disk│    │ get + verify │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiered_cache::adapters::{CompressedSerializer, FileStore, InMemoryStore, JsonSerializer};
use tiered_cache::cache::{
    kb, BackgroundPolicy, BatchPolicy, CacheConfig, ImmediatePolicy, NoopPolicy, TierCache,
    TimedPolicy,
};
use tiered_cache::domain::{BackingStore, EvictionPolicy, Serializer};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PolicyKind {
    Immediate,
    Batch,
    Timed,
    Background,
    Noop,
}

/// Tiered cache workload driver
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML cache configuration (overrides the sizing flags below)
    #[arg(long, env = "CACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Heap entries limit
    #[arg(long, env = "CACHE_ENTRIES_LIMIT", default_value = "1000")]
    entries_limit: usize,

    /// Off-heap page size in KB
    #[arg(long, env = "CACHE_PAGE_SIZE_KB", default_value = "256")]
    page_size_kb: usize,

    /// Maximum number of off-heap pages
    #[arg(long, env = "CACHE_MAX_PAGES", default_value = "4")]
    max_pages: usize,

    /// Backing store
    #[arg(long, value_enum, env = "CACHE_STORE", default_value = "memory")]
    store: StoreKind,

    /// Directory for the file store
    #[arg(long, env = "CACHE_STORE_DIR", default_value = "./tiered-cache-data")]
    store_dir: PathBuf,

    /// Overflow disposal policy
    #[arg(long, value_enum, env = "CACHE_POLICY", default_value = "immediate")]
    policy: PolicyKind,

    /// Mutations per disposal for batch and background policies
    #[arg(long, env = "CACHE_BATCH_SIZE", default_value = "64")]
    batch_size: usize,

    /// Minimum interval between disposals for the timed policy, in milliseconds
    #[arg(long, env = "CACHE_INTERVAL_MS", default_value = "50")]
    interval_ms: u64,

    /// LZ4-compress serialized values
    #[arg(long, env = "CACHE_COMPRESS")]
    compress: bool,

    /// Number of distinct keys
    #[arg(long, default_value = "10000")]
    keys: u64,

    /// Smallest value body in bytes
    #[arg(long, default_value = "16")]
    min_value_size: usize,

    /// Largest value body in bytes
    #[arg(long, default_value = "2048")]
    max_value_size: usize,

    /// Writer threads
    #[arg(long, default_value = "4")]
    writers: usize,

    /// Reader threads
    #[arg(long, default_value = "4")]
    readers: usize,

    /// Operations per thread
    #[arg(long, default_value = "20000")]
    ops: u64,

    /// Percentage of writer operations that remove instead of put
    #[arg(long, default_value = "5")]
    remove_percent: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Workload
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    id: u64,
    body: String,
}

impl Payload {
    /// Body is the hex id repeated to `size` bytes, so any read can be checked
    fn for_key(id: u64, size: usize) -> Self {
        let seed = format!("{:016x}", id);
        Self {
            id,
            body: seed.chars().cycle().take(size).collect(),
        }
    }

    fn matches(&self, id: u64, args: &Args) -> bool {
        let size = self.body.len();
        size >= args.min_value_size
            && size <= args.max_value_size
            && *self == Payload::for_key(id, size)
    }
}

fn key(id: u64) -> String {
    format!("key-{}", id)
}

#[derive(Debug, Default)]
struct Counters {
    puts: AtomicU64,
    removes: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    mismatches: AtomicU64,
    errors: AtomicU64,
}

fn run_writer(cache: &TierCache<Payload>, args: &Args, counters: &Counters) {
    let mut rng = rand::thread_rng();
    for _ in 0..args.ops {
        let id = rng.gen_range(0..args.keys);
        let result = if rng.gen_range(0..100) < args.remove_percent {
            counters.removes.fetch_add(1, Ordering::Relaxed);
            cache.remove(&key(id)).map(|_| ())
        } else {
            counters.puts.fetch_add(1, Ordering::Relaxed);
            let size = rng.gen_range(args.min_value_size..=args.max_value_size);
            cache.put(key(id), Payload::for_key(id, size)).map(|_| ())
        };
        if let Err(e) = result {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(id, error = %e, "writer operation failed");
        }
    }
}

fn run_reader(cache: &TierCache<Payload>, args: &Args, counters: &Counters) {
    let mut rng = rand::thread_rng();
    for _ in 0..args.ops {
        let id = rng.gen_range(0..args.keys);
        match cache.get(&key(id)) {
            Ok(Some(value)) => {
                counters.hits.fetch_add(1, Ordering::Relaxed);
                if !value.matches(id, args) {
                    counters.mismatches.fetch_add(1, Ordering::Relaxed);
                    error!(
                        id,
                        got = value.id,
                        size = value.body.len(),
                        "value read back does not match"
                    );
                }
            }
            Ok(None) => {
                counters.misses.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(id, error = %e, "read failed");
            }
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default()
            .with_entries_limit(args.entries_limit)
            .with_pages(kb(args.page_size_kb), args.max_pages),
    };
    if args.keys == 0 {
        bail!("--keys must be at least 1");
    }
    if args.min_value_size > args.max_value_size {
        bail!(
            "--min-value-size ({}) exceeds --max-value-size ({})",
            args.min_value_size,
            args.max_value_size
        );
    }

    info!("Starting tiered cache workload");
    info!("  Entries limit: {:?}", config.entries_limit);
    info!(
        "  Pages: {} x {} bytes",
        config.max_pages, config.page_size
    );
    info!("  Store: {:?}", args.store);
    info!("  Policy: {:?}", args.policy);
    info!(
        "  Threads: {} writers, {} readers, {} ops each",
        args.writers, args.readers, args.ops
    );
    info!(
        "  Value sizes: {}..={} bytes",
        args.min_value_size, args.max_value_size
    );

    let store: Arc<dyn BackingStore> = match args.store {
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
        StoreKind::File => Arc::new(FileStore::open(&args.store_dir)?),
    };
    let serializer: Arc<dyn Serializer<Payload>> = if args.compress {
        Arc::new(CompressedSerializer::new(JsonSerializer::new()))
    } else {
        Arc::new(JsonSerializer::new())
    };
    let policy: Arc<dyn EvictionPolicy> = match args.policy {
        PolicyKind::Immediate => Arc::new(ImmediatePolicy),
        PolicyKind::Batch => Arc::new(BatchPolicy::new(args.batch_size)),
        PolicyKind::Timed => Arc::new(TimedPolicy::new(Duration::from_millis(args.interval_ms))),
        PolicyKind::Background => Arc::new(BackgroundPolicy::spawn(args.batch_size)?),
        PolicyKind::Noop => Arc::new(NoopPolicy),
    };

    let cache: TierCache<Payload> = TierCache::builder(config)
        .shared_serializer(serializer)
        .shared_store(store)
        .shared_policy(policy)
        .build()?;

    let clean_up_store = args.store == StoreKind::File;
    let counters = Arc::new(Counters::default());
    let started = Instant::now();
    let workers = {
        let cache = cache.clone();
        let counters = counters.clone();
        tokio::task::spawn_blocking(move || {
            std::thread::scope(|scope| {
                for _ in 0..args.writers {
                    scope.spawn(|| run_writer(&cache, &args, &counters));
                }
                for _ in 0..args.readers {
                    scope.spawn(|| run_reader(&cache, &args, &counters));
                }
            });
        })
    };
    workers.await.context("workload threads panicked")?;
    let elapsed = started.elapsed();

    // Final sweep so the report reflects a settled cache
    cache.dispose_expired()?;
    cache.dispose_overflow()?;

    let stats = cache.stats()?;
    let metrics = cache.metrics().snapshot();
    info!("Workload finished in {:?}", elapsed);
    info!(
        puts = counters.puts.load(Ordering::Relaxed),
        removes = counters.removes.load(Ordering::Relaxed),
        hits = counters.hits.load(Ordering::Relaxed),
        misses = counters.misses.load(Ordering::Relaxed),
        errors = counters.errors.load(Ordering::Relaxed),
        "operations"
    );
    info!(
        off_heap_to_heap = metrics.promotions_off_heap_to_heap,
        disk_to_heap = metrics.promotions_disk_to_heap,
        heap_to_off_heap = metrics.demotions_heap_to_off_heap,
        off_heap_to_disk = metrics.demotions_off_heap_to_disk,
        skipped = metrics.skipped_demotions,
        get_latency = ?metrics.get_latency,
        put_latency = ?metrics.put_latency,
        "tier movement"
    );
    info!("{}", stats);

    let mismatches = counters.mismatches.load(Ordering::Relaxed);
    if clean_up_store {
        cache.reset()?;
    }
    if mismatches > 0 {
        bail!("{} values read back did not match what was written", mismatches);
    }

    info!("Tiered cache workload completed");
    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["tiered-cache"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_payload_matches_any_size_in_range() {
        let args = args(&["--min-value-size", "8", "--max-value-size", "64"]);
        for size in [8, 17, 64] {
            assert!(Payload::for_key(42, size).matches(42, &args));
        }
    }

    #[test]
    fn test_payload_mismatches_detected() {
        let args = args(&["--min-value-size", "8", "--max-value-size", "64"]);
        assert!(!Payload::for_key(42, 32).matches(43, &args));
        assert!(!Payload::for_key(42, 4).matches(42, &args));
        assert!(!Payload::for_key(42, 65).matches(42, &args));

        let mut corrupted = Payload::for_key(42, 32);
        corrupted.body.replace_range(0..1, "z");
        assert!(!corrupted.matches(42, &args));
    }

    #[test]
    fn test_random_sizes_stay_in_range() {
        let args = args(&["--min-value-size", "10", "--max-value-size", "20"]);
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let size = rng.gen_range(args.min_value_size..=args.max_value_size);
            assert!((10..=20).contains(&size));
        }
    }
}
