//! Storage engines and the shared engine contract
//!
//! Every engine personality exposes the same record-oriented contract; the
//! factory dispatches on the configured mode. Outer surfaces (SQL, RPC,
//! HTTP) consume `dyn Engine` and stay free of storage details.

pub mod columnar;
pub mod disk;
pub mod hybrid;
pub mod memory;
pub mod vector;

use async_trait::async_trait;
use std::sync::Arc;

use crate::columnar::{AggregateQuery, AggregateResult};
use crate::config::Config;
use crate::error::{FacetError, Result};
use crate::types::{Mode, Record, Snapshot};

pub use columnar::ColumnarEngine;
pub use disk::DiskEngine;
pub use hybrid::HybridEngine;
pub use memory::MemoryEngine;
pub use vector::VectorEngine;

/// Gauges refreshed by the stats collector
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineGauges {
    pub records_total: i64,
    pub wal_size: i64,
}

/// The record-oriented contract shared by every engine personality
#[async_trait]
pub trait Engine: Send + Sync {
    /// Store a record under a key. The caller has already stamped version,
    /// timestamps and checksum.
    async fn put(&self, key: &str, record: Record) -> Result<()>;

    /// Fetch a record by key; expired records are logically absent
    async fn get(&self, key: &str) -> Result<Record>;

    /// Remove a record by key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Ascending scan over `[start, end)`; an empty end is unbounded and a
    /// zero limit means no limit
    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>>;

    /// Store multiple records; atomic in memory but not across tiers
    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()>;

    /// k-nearest-neighbor search, available on vector-capable engines
    async fn search(&self, _query: &[f32], _k: usize) -> Result<Vec<(String, f32)>> {
        Err(FacetError::InvalidMode(
            "vector search requires vector or hybrid mode".to_string(),
        ))
    }

    /// Columnar aggregation, available on columnar-capable engines
    fn aggregate(&self, _query: &AggregateQuery) -> Result<AggregateResult> {
        Err(FacetError::InvalidMode(
            "aggregation requires columnar or hybrid mode".to_string(),
        ))
    }

    /// Point-in-time copy of the engine's memory view
    fn snapshot(&self) -> Result<Snapshot>;

    /// Replace the memory view from a snapshot after verifying its checksum.
    /// Vector and columnar state is not repopulated; it recovers on
    /// subsequent writes.
    async fn restore(&self, snapshot: Snapshot) -> Result<()>;

    /// Persist a snapshot and truncate the WAL, available on WAL-backed
    /// engines
    async fn checkpoint(&self) -> Result<()> {
        Err(FacetError::InvalidMode(
            "checkpointing requires disk or hybrid mode".to_string(),
        ))
    }

    /// Keys whose expiration has passed, for the TTL cleaner
    fn expired_keys(&self) -> Vec<String>;

    /// Current gauge values
    fn gauges(&self) -> EngineGauges;

    /// Flush and release resources
    async fn close(&self) -> Result<()>;
}

/// Construct the engine for the configured mode
pub async fn open(config: &Config) -> Result<Arc<dyn Engine>> {
    config.validate()?;

    let engine: Arc<dyn Engine> = match config.mode {
        Mode::Memory => Arc::new(MemoryEngine::new()),
        Mode::Disk => Arc::new(DiskEngine::open(config).await?),
        Mode::Columnar => Arc::new(ColumnarEngine::new(config)),
        Mode::Vector => Arc::new(VectorEngine::new(config)),
        Mode::Hybrid => Arc::new(HybridEngine::open(config).await?),
    };

    Ok(engine)
}
