//! In-memory engine
//!
//! Records live in a lock-free ordered skip map, which gives point reads,
//! ordered range scans and TTL sweeps without a global lock. No durability.

use async_trait::async_trait;
use crossbeam_skiplist::SkipMap;
use std::collections::HashMap;
use std::ops::Bound;

use super::{Engine, EngineGauges};
use crate::error::{FacetError, Result};
use crate::types::{Record, Snapshot};

pub struct MemoryEngine {
    records: SkipMap<String, Record>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            records: SkipMap::new(),
        }
    }

    pub fn insert(&self, key: &str, record: Record) {
        self.records.insert(key.to_string(), record);
    }

    pub fn fetch(&self, key: &str) -> Result<Record> {
        let record = self
            .records
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FacetError::KeyNotFound(key.to_string()))?;

        if record.is_expired() {
            return Err(FacetError::KeyNotFound(key.to_string()));
        }
        Ok(record)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.records
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| FacetError::KeyNotFound(key.to_string()))
    }

    pub fn range_scan(&self, start: &str, end: &str, limit: usize) -> Vec<Record> {
        let upper: Bound<&str> = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };

        let mut records = Vec::new();
        for entry in self
            .records
            .range::<str, _>((Bound::Included(start), upper))
        {
            if limit > 0 && records.len() >= limit {
                break;
            }
            let record = entry.value().clone();
            if !record.is_expired() {
                records.push(record);
            }
        }
        records
    }

    pub fn to_map(&self) -> HashMap<String, Record> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn replace_all(&self, records: HashMap<String, Record>) {
        for entry in self.records.iter() {
            entry.remove();
        }
        for (key, record) in records {
            self.records.insert(key, record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn collect_expired(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.value().is_expired())
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn put(&self, key: &str, record: Record) -> Result<()> {
        self.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Record> {
        self.fetch(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.remove(key)
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        Ok(self.range_scan(start, end, limit))
    }

    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()> {
        for (key, record) in entries {
            self.insert(&key, record);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::build(self.to_map()))
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        if !snapshot.verify_checksum() {
            return Err(FacetError::ChecksumMismatch {
                expected: snapshot.compute_checksum(),
                actual: snapshot.checksum,
            });
        }
        self.replace_all(snapshot.records);
        Ok(())
    }

    fn expired_keys(&self) -> Vec<String> {
        self.collect_expired()
    }

    fn gauges(&self) -> EngineGauges {
        EngineGauges {
            records_total: self.len() as i64,
            wal_size: 0,
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
