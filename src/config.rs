//! Configuration for facetdb

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{FacetError, Result};
use crate::types::{Compression, Mode};

/// Main database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Engine composition
    pub mode: Mode,

    /// Data directory
    pub data_dir: PathBuf,

    /// WAL file path (defaults to data_dir/wal.log)
    pub wal_path: Option<PathBuf>,

    /// Snapshot directory (defaults to data_dir/snapshots)
    pub snapshot_dir: Option<PathBuf>,

    /// Memory sizing
    pub memory: MemoryConfig,

    /// WAL behavior
    pub wal: WalConfig,

    /// Columnar store tunables
    pub columnar: ColumnarConfig,

    /// Vector index tunables
    pub vector: VectorConfig,

    /// Host-level limits
    pub limits: LimitsConfig,

    /// Verify record checksums on read
    pub enable_checksum: bool,
}

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Soft upper bound on the memory table (MB)
    pub max_memory_mb: usize,

    /// Hot-tier cache sizing (MB)
    pub cache_size_mb: usize,

    /// Memtable flush threshold (MB)
    pub memtable_size_mb: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_memory_mb: 2048,
            cache_size_mb: 256,
            memtable_size_mb: 64,
        }
    }
}

/// Write-Ahead Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Enable WAL
    pub enabled: bool,

    /// Entries buffered before an automatic flush
    pub batch_size: usize,

    /// Flushes between durable syncs; 0 syncs on every flush
    pub sync_interval: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 1000,
            sync_interval: 0,
        }
    }
}

/// Columnar store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnarConfig {
    /// Rows per sealed block
    pub block_size: usize,

    /// Codec applied when sealing a block
    pub compression: Compression,
}

impl Default for ColumnarConfig {
    fn default() -> Self {
        Self {
            block_size: 10_000,
            compression: Compression::Zstd,
        }
    }
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector dimension
    pub dimensions: usize,

    /// HNSW neighbors per level above zero (level zero uses 2M)
    pub hnsw_m: usize,

    /// HNSW candidate list size during construction and search
    pub hnsw_ef: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            hnsw_m: 16,
            hnsw_ef: 200,
        }
    }
}

/// Host-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound for a single query
    pub query_timeout: Duration,

    /// Maximum concurrent connections the host surface may accept
    pub max_connections: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            max_connections: 1024,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Hybrid,
            data_dir: PathBuf::from("./data"),
            wal_path: None,
            snapshot_dir: None,
            memory: MemoryConfig::default(),
            wal: WalConfig::default(),
            columnar: ColumnarConfig::default(),
            vector: VectorConfig::default(),
            limits: LimitsConfig::default(),
            enable_checksum: true,
        }
    }
}

impl Config {
    /// Pure in-memory configuration, no durability
    pub fn memory() -> Self {
        let mut config = Self::default();
        config.mode = Mode::Memory;
        config.wal.enabled = false;
        config
    }

    /// Durable configuration backed by a WAL under `data_dir`
    pub fn disk(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.mode = Mode::Disk;
        config.data_dir = data_dir.into();
        config.wal.enabled = true;
        config
    }

    /// Columnar analytics configuration
    pub fn columnar() -> Self {
        let mut config = Self::default();
        config.mode = Mode::Columnar;
        config.wal.enabled = false;
        config
    }

    /// Vector search configuration for a given dimension
    pub fn vector(dimensions: usize) -> Self {
        let mut config = Self::default();
        config.mode = Mode::Vector;
        config.wal.enabled = false;
        config.vector.dimensions = dimensions;
        config
    }

    /// Hybrid configuration layering all tiers under `data_dir`
    pub fn hybrid(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.mode = Mode::Hybrid;
        config.data_dir = data_dir.into();
        config.wal.enabled = true;
        config
    }

    /// Effective WAL path
    pub fn wal_path(&self) -> PathBuf {
        self.wal_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("wal.log"))
    }

    /// Effective snapshot directory
    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("snapshots"))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.columnar.block_size == 0 {
            return Err(FacetError::InvalidConfig(
                "columnar block_size must be > 0".to_string(),
            ));
        }
        if matches!(self.mode, Mode::Vector | Mode::Hybrid) {
            if self.vector.dimensions == 0 {
                return Err(FacetError::InvalidConfig(
                    "vector dimensions must be > 0".to_string(),
                ));
            }
            if self.vector.hnsw_m < 2 {
                return Err(FacetError::InvalidConfig(
                    "hnsw_m must be >= 2".to_string(),
                ));
            }
            if self.vector.hnsw_ef == 0 {
                return Err(FacetError::InvalidConfig(
                    "hnsw_ef must be > 0".to_string(),
                ));
            }
        }
        if self.wal.enabled && self.wal.batch_size == 0 {
            return Err(FacetError::InvalidConfig(
                "wal batch_size must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
