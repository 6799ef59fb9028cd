//! Columnar engine wrapper
//!
//! Bridges the record contract onto the columnar store: every put shreds
//! the record into columns while a memory map keeps point reads fast. The
//! store is append-only, so delete only removes the map reference.

use async_trait::async_trait;

use super::{Engine, EngineGauges, MemoryEngine};
use crate::columnar::{AggregateQuery, AggregateResult, ColumnarStats, ColumnarStore};
use crate::config::Config;
use crate::error::Result;
use crate::types::{Record, Snapshot};

pub struct ColumnarEngine {
    memory: MemoryEngine,
    store: ColumnarStore,
}

impl ColumnarEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            memory: MemoryEngine::new(),
            store: ColumnarStore::new(config.columnar.block_size, config.columnar.compression),
        }
    }

    pub fn store_stats(&self) -> ColumnarStats {
        self.store.stats()
    }
}

#[async_trait]
impl Engine for ColumnarEngine {
    async fn put(&self, key: &str, record: Record) -> Result<()> {
        self.store.insert_batch(std::slice::from_ref(&record))?;
        self.memory.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Record> {
        self.memory.fetch(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Sealed blocks are immutable; analytic scans may still observe the
        // deleted values until blocks are rewritten.
        self.memory.remove(key)
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        Ok(self.memory.range_scan(start, end, limit))
    }

    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()> {
        let records: Vec<Record> = entries.iter().map(|(_, r)| r.clone()).collect();
        self.store.insert_batch(&records)?;
        for (key, record) in entries {
            self.memory.insert(&key, record);
        }
        Ok(())
    }

    fn aggregate(&self, query: &AggregateQuery) -> Result<AggregateResult> {
        self.store.aggregate(query)
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::build(self.memory.to_map()))
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        Engine::restore(&self.memory, snapshot).await
    }

    fn expired_keys(&self) -> Vec<String> {
        self.memory.collect_expired()
    }

    fn gauges(&self) -> EngineGauges {
        EngineGauges {
            records_total: self.memory.len() as i64,
            wal_size: 0,
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
