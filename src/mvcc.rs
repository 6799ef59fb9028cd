//! Multi-version concurrency control
//!
//! Each key owns an append-only chain of versions ordered by transaction id.
//! Callers supply the transaction id; the database uses its strictly
//! increasing record-version counter, so a version number addresses the
//! chain entry its put produced. Reads walk the chain newest-first, which
//! makes time-travel lookups a bounded scan. Chains are capped to a small
//! retention window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::error::{FacetError, Result};
use crate::types::Record;

/// Versions retained per key before the oldest are dropped
const VERSION_RETENTION: usize = 10;

/// A single entry in a key's version chain
#[derive(Debug, Clone)]
pub struct VersionedRecord {
    pub tx_id: u64,
    pub timestamp: DateTime<Utc>,
    pub record: Option<Record>,
    pub deleted: bool,
}

/// Manages per-key version chains
pub struct MvccManager {
    versions: DashMap<String, Vec<VersionedRecord>>,
}

impl MvccManager {
    pub fn new() -> Self {
        Self {
            versions: DashMap::new(),
        }
    }

    /// Append a new live version to the key's chain
    pub fn add_version(&self, key: &str, record: Record, tx_id: u64) {
        let mut chain = self.versions.entry(key.to_string()).or_default();
        chain.push(VersionedRecord {
            tx_id,
            timestamp: Utc::now(),
            record: Some(record),
            deleted: false,
        });

        if chain.len() > VERSION_RETENTION {
            let drop_count = chain.len() - VERSION_RETENTION;
            chain.drain(..drop_count);
        }
    }

    /// Append a tombstone to the key's chain
    pub fn mark_deleted(&self, key: &str, tx_id: u64) {
        let mut chain = self.versions.entry(key.to_string()).or_default();
        chain.push(VersionedRecord {
            tx_id,
            timestamp: Utc::now(),
            record: None,
            deleted: true,
        });
    }

    /// Time-travel read: the newest live version with `tx_id <= as_of_tx`
    pub fn get(&self, key: &str, as_of_tx: u64) -> Result<Record> {
        let chain = self
            .versions
            .get(key)
            .ok_or_else(|| FacetError::KeyNotFound(key.to_string()))?;

        for version in chain.iter().rev() {
            if version.tx_id <= as_of_tx && !version.deleted {
                if let Some(record) = &version.record {
                    return Ok(record.clone());
                }
            }
        }

        Err(FacetError::KeyNotFound(key.to_string()))
    }

    /// The newest live version of the key
    pub fn get_latest(&self, key: &str) -> Result<Record> {
        self.get(key, u64::MAX)
    }

    /// Drop versions older than `max_age`, preserving chain order
    pub fn cleanup(&self, max_age: chrono::Duration) {
        let cutoff = Utc::now() - max_age;
        for mut entry in self.versions.iter_mut() {
            entry.value_mut().retain(|v| v.timestamp > cutoff);
        }
        self.versions.retain(|_, chain| !chain.is_empty());
    }

    /// Number of retained versions for a key
    pub fn version_count(&self, key: &str) -> usize {
        self.versions.get(key).map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for MvccManager {
    fn default() -> Self {
        Self::new()
    }
}
