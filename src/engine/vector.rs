//! Vector engine wrapper
//!
//! Bridges the record contract onto the HNSW index. Every put must carry an
//! embedding, either in the record's vector field or as a `vector` entry in
//! its data map. Re-putting a key replaces its vector in the index.

use async_trait::async_trait;

use super::{Engine, EngineGauges, MemoryEngine};
use crate::config::Config;
use crate::error::{FacetError, Result};
use crate::types::{Record, Snapshot};
use crate::vector::{HnswIndex, HnswStats};

pub struct VectorEngine {
    memory: MemoryEngine,
    index: HnswIndex,
}

impl VectorEngine {
    pub fn new(config: &Config) -> Self {
        Self {
            memory: MemoryEngine::new(),
            index: HnswIndex::new(
                config.vector.dimensions,
                config.vector.hnsw_m,
                config.vector.hnsw_ef,
            ),
        }
    }

    pub fn index_stats(&self) -> HnswStats {
        self.index.stats()
    }
}

#[async_trait]
impl Engine for VectorEngine {
    async fn put(&self, key: &str, record: Record) -> Result<()> {
        let vector = record.embedding().ok_or_else(|| {
            FacetError::InvalidQuery(format!("record {} carries no vector", key))
        })?;

        // Updates replace the node rather than failing on the duplicate id.
        if self.index.contains(key) {
            self.index.delete(key)?;
        }
        self.index.insert(key, vector)?;
        self.memory.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Record> {
        self.memory.fetch(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.memory.remove(key)?;
        self.index.delete(key)
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        Ok(self.memory.range_scan(start, end, limit))
    }

    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()> {
        for (key, record) in entries {
            self.put(&key, record).await?;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        Ok(self.index.search(query, k))
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::collections::HashMap;

    fn vector_record(id: &str, v: Vec<f32>) -> Record {
        Record::with_id(id, HashMap::new()).with_vector(v)
    }

    #[tokio::test]
    async fn test_put_requires_vector() {
        let engine = VectorEngine::new(&Config::vector(3));
        let bare = Record::with_id("x", HashMap::new());
        assert!(engine.put("x", bare).await.is_err());

        // Vector carried in the data map also works.
        let mut data = HashMap::new();
        data.insert("vector".to_string(), Value::Vector(vec![1.0, 0.0, 0.0]));
        engine
            .put("y", Record::with_id("y", data))
            .await
            .unwrap();
        assert!(engine.get("y").await.is_ok());
    }

    #[tokio::test]
    async fn test_search_ranks_by_similarity() {
        let engine = VectorEngine::new(&Config::vector(3));
        engine
            .put("vec1", vector_record("vec1", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        engine
            .put("vec2", vector_record("vec2", vec![0.9, 0.1, 0.0]))
            .await
            .unwrap();
        engine
            .put("vec3", vector_record("vec3", vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();

        let results = engine.search(&[0.95, 0.05, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].0 == "vec1" || results[0].0 == "vec2");
        assert!(results[0].1 >= 0.9);
    }

    #[tokio::test]
    async fn test_update_replaces_vector() {
        let engine = VectorEngine::new(&Config::vector(3));
        engine
            .put("a", vector_record("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        engine
            .put("a", vector_record("a", vec![0.0, 0.0, 1.0]))
            .await
            .unwrap();

        let results = engine.search(&[0.0, 0.0, 1.0], 1).await.unwrap();
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 >= 0.999);
    }

    #[tokio::test]
    async fn test_delete_unlinks_both_sides() {
        let engine = VectorEngine::new(&Config::vector(3));
        engine
            .put("a", vector_record("a", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        engine.delete("a").await.unwrap();

        assert!(engine.get("a").await.is_err());
        assert!(engine.search(&[1.0, 0.0, 0.0], 1).await.unwrap().is_empty());
    }
}
