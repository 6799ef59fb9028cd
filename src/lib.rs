//! facetdb: a multi-modal embedded database
//!
//! One record-oriented API over five storage personalities:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Database                             │
//! │   stamping · MVCC versions · TTL cleaner · stats collector   │
//! ├──────────┬──────────┬───────────┬───────────┬────────────────┤
//! │  Memory  │   Disk   │ Columnar  │  Vector   │     Hybrid     │
//! │ skip map │ B-tree + │ column    │ HNSW      │ memory + disk  │
//! │          │   WAL    │ blocks    │ graph     │ + vector + col │
//! └──────────┴──────────┴───────────┴───────────┴────────────────┘
//! ```
//!
//! The hybrid mode serves reads from memory and fans writes out to disk,
//! vector and columnar tiers through a bounded async pipeline. Callers who
//! need synchronous durability should select the disk mode.

pub mod columnar;
pub mod config;
pub mod engine;
pub mod error;
pub mod mvcc;
pub mod stats;
pub mod types;
pub mod vector;
pub mod wal;

pub use columnar::{AggregateOp, AggregateQuery, AggregateResult, Filter, FilterOp};
pub use config::Config;
pub use engine::Engine;
pub use error::{FacetError, Result};
pub use stats::EngineStats;
pub use types::{Mode, Operation, Record, Snapshot, Value};

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mvcc::MvccManager;
use stats::StatsRecorder;

/// Current version of facetdb
pub const VERSION: &str = "1.0.0";

/// Sweep period of the TTL cleaner
const TTL_CLEAN_INTERVAL: Duration = Duration::from_secs(60);

/// Refresh period of the stats collector
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// A facetdb database instance
pub struct Database {
    config: Config,
    engine: Arc<dyn Engine>,
    mvcc: Arc<MvccManager>,
    stats: Arc<StatsRecorder>,
    last_version: AtomicU64,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Database {
    /// Open or create a database with the given configuration
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let engine = engine::open(&config).await?;
        let mvcc = Arc::new(MvccManager::new());
        let stats = Arc::new(StatsRecorder::new());
        let (shutdown, _) = watch::channel(false);

        let db = Self {
            config,
            engine,
            mvcc,
            stats,
            last_version: AtomicU64::new(0),
            shutdown,
            tasks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        db.spawn_background_tasks();

        info!(mode = %db.config.mode, "opened database");
        Ok(db)
    }

    /// Open an in-memory database
    pub async fn open_memory() -> Result<Self> {
        Self::open(Config::memory()).await
    }

    /// Open a persistent database under `data_dir`
    pub async fn open_disk(data_dir: impl Into<std::path::PathBuf>) -> Result<Self> {
        Self::open(Config::disk(data_dir)).await
    }

    /// Open a vector-optimized database for the given dimension
    pub async fn open_vector(dimensions: usize) -> Result<Self> {
        Self::open(Config::vector(dimensions)).await
    }

    /// Retrieve a record by key
    pub async fn get(&self, key: &str) -> Result<Record> {
        self.ensure_open()?;
        let start = Instant::now();

        let result = self.bounded(self.engine.get(key)).await;
        match &result {
            Ok(record) => {
                if self.config.mode != Mode::Memory
                    && self.config.enable_checksum
                    && !record.verify_checksum()?
                {
                    self.stats.record_query(start.elapsed());
                    return Err(FacetError::Corruption(format!(
                        "record checksum mismatch for key {}",
                        key
                    )));
                }
                self.stats.record_hit();
            }
            Err(e) if e.is_not_found() => self.stats.record_miss(),
            Err(_) => {}
        }

        self.stats.record_query(start.elapsed());
        result
    }

    /// Store a record
    pub async fn put(&self, key: &str, mut record: Record) -> Result<()> {
        self.ensure_open()?;
        let start = Instant::now();

        self.stamp(key, &mut record)?;
        self.mvcc.add_version(key, record.clone(), record.version);
        let result = self.bounded(self.engine.put(key, record)).await;

        self.stats.record_query(start.elapsed());
        result
    }

    /// Remove a record
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let start = Instant::now();

        self.mvcc.mark_deleted(key, self.next_version());
        let result = self.bounded(self.engine.delete(key)).await;

        self.stats.record_query(start.elapsed());
        result
    }

    /// Retrieve records in `[start, end)`, ascending, up to `limit`
    pub async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let begin = Instant::now();
        let result = self.bounded(self.engine.scan(start, end, limit)).await;
        self.stats.record_query(begin.elapsed());
        result
    }

    /// Store multiple records efficiently
    pub async fn batch_put(&self, entries: HashMap<String, Record>) -> Result<()> {
        self.ensure_open()?;
        let start = Instant::now();

        let mut stamped = Vec::with_capacity(entries.len());
        for (key, mut record) in entries {
            self.stamp(&key, &mut record)?;
            self.mvcc.add_version(&key, record.clone(), record.version);
            stamped.push((key, record));
        }
        let result = self.bounded(self.engine.batch_put(stamped)).await;

        self.stats.record_query(start.elapsed());
        result
    }

    /// k-nearest-neighbor search over indexed vectors
    pub async fn vector_search(&self, query: &[f32], k: usize) -> Result<(Vec<String>, Vec<f32>)> {
        self.ensure_open()?;
        let start = Instant::now();

        let result = self.bounded(self.engine.search(query, k)).await;
        self.stats.record_query(start.elapsed());

        let pairs = result?;
        let mut ids = Vec::with_capacity(pairs.len());
        let mut scores = Vec::with_capacity(pairs.len());
        for (id, score) in pairs {
            ids.push(id);
            scores.push(score);
        }
        Ok((ids, scores))
    }

    /// Run an aggregation over a column
    pub fn aggregate(&self, query: &AggregateQuery) -> Result<AggregateResult> {
        self.ensure_open()?;
        let start = Instant::now();
        let result = self.engine.aggregate(query);
        self.stats.record_query(start.elapsed());
        result
    }

    /// Time-travel read: the record visible as of a transaction id
    pub fn get_as_of(&self, key: &str, as_of_tx: u64) -> Result<Record> {
        self.ensure_open()?;
        self.mvcc.get(key, as_of_tx)
    }

    /// The latest MVCC version of a key
    pub fn get_latest(&self, key: &str) -> Result<Record> {
        self.ensure_open()?;
        self.mvcc.get_latest(key)
    }

    /// Create a point-in-time snapshot of the memory table
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.ensure_open()?;
        self.engine.snapshot()
    }

    /// Restore the memory table from a snapshot
    pub async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        self.ensure_open()?;
        self.engine.restore(snapshot).await
    }

    /// Persist a snapshot and truncate the WAL (disk and hybrid modes)
    pub async fn checkpoint(&self) -> Result<()> {
        self.ensure_open()?;
        self.engine.checkpoint().await
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let gauges = self.engine.gauges();
        self.stats.set_records_total(gauges.records_total);
        self.stats.set_wal_size(gauges.wal_size);
        self.stats.snapshot()
    }

    /// Shut down background tasks and close the engine
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.engine.close().await?;
        info!("database closed");
        Ok(())
    }

    // =========================================================================
    // Convenience helpers
    // =========================================================================

    /// Store a single value under `key`
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let mut data = HashMap::new();
        data.insert("value".to_string(), value.into());
        self.put(key, Record::with_id(key, data)).await
    }

    /// Retrieve a string value stored with [`Database::set`]
    pub async fn get_string(&self, key: &str) -> Result<String> {
        let record = self.get(key).await?;
        Ok(record
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    /// Store a value that expires after `ttl_secs` seconds
    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: impl Into<Value>,
        ttl_secs: i64,
    ) -> Result<()> {
        let mut data = HashMap::new();
        data.insert("value".to_string(), value.into());
        let record = Record::with_id(key, data)
            .with_expiration(Utc::now() + chrono::Duration::seconds(ttl_secs));
        self.put(key, record).await
    }

    /// Store a vector with optional metadata
    pub async fn set_vector(
        &self,
        key: &str,
        vector: Vec<f32>,
        metadata: HashMap<String, Value>,
    ) -> Result<()> {
        let record = Record::with_id(key, metadata).with_vector(vector);
        self.put(key, record).await
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FacetError::Closed);
        }
        Ok(())
    }

    /// Bound an engine call by the configured query timeout
    async fn bounded<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.config.limits.query_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(FacetError::Timeout),
        }
    }

    /// Assign id, timestamps, a strictly increasing version and the checksum
    fn stamp(&self, key: &str, record: &mut Record) -> Result<()> {
        if record.id.is_empty() {
            record.id = key.to_string();
        }

        let now = Utc::now();
        if record.created_at.timestamp_nanos_opt().unwrap_or(0) == 0 {
            record.created_at = now;
        }
        record.updated_at = now;
        record.version = self.next_version();
        record.checksum = record.compute_checksum()?;
        Ok(())
    }

    /// Nanosecond-clock version, bumped past the previous one on collision
    fn next_version(&self) -> u64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let prev = self
            .last_version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(0);
        now.max(prev + 1)
    }

    fn spawn_background_tasks(&self) {
        let mut tasks = self.tasks.lock();

        // TTL cleaner: expired records leave through the standard delete
        // path so the WAL and indexes stay consistent.
        let engine = self.engine.clone();
        let mvcc = self.mvcc.clone();
        let version_source = Arc::new(AtomicU64::new(0));
        let mut shutdown_rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TTL_CLEAN_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {
                        sweep_expired(&engine, &mvcc, &version_source).await;
                    }
                }
            }
        }));

        // Stats collector: refresh gauges from current engine state.
        let engine = self.engine.clone();
        let stats = self.stats.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATS_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => return,
                    _ = ticker.tick() => {
                        let gauges = engine.gauges();
                        stats.set_records_total(gauges.records_total);
                        stats.set_wal_size(gauges.wal_size);
                        debug!(records = gauges.records_total, wal_size = gauges.wal_size, "refreshed stats");
                    }
                }
            }
        }));
    }
}

async fn sweep_expired(
    engine: &Arc<dyn Engine>,
    mvcc: &Arc<MvccManager>,
    version_source: &Arc<AtomicU64>,
) {
    let expired = engine.expired_keys();
    if expired.is_empty() {
        return;
    }

    let mut removed = 0usize;
    for key in expired {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let tx = now.max(version_source.fetch_max(now, Ordering::SeqCst) + 1);
        mvcc.mark_deleted(&key, tx);
        match engine.delete(&key).await {
            Ok(()) => removed += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(key = %key, error = %e, "TTL sweep delete failed"),
        }
    }

    if removed > 0 {
        info!(removed, "TTL cleaner removed expired records");
    }
}
