//! Durable engine: ordered B-tree index backed by the write-ahead log
//!
//! Mutations hit the WAL before the tree, so the tree can always be rebuilt
//! by replay. A checkpoint persists the current state as a snapshot file and
//! truncates the log; recovery loads the checkpoint named by the log's
//! checkpoint entry, then replays everything after it.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::PathBuf;
use tracing::{info, warn};

use super::{Engine, EngineGauges};
use crate::config::Config;
use crate::error::{FacetError, Result};
use crate::types::{Operation, Record, Snapshot};
use crate::wal::WriteAheadLog;

pub struct DiskEngine {
    tree: RwLock<BTreeMap<String, Record>>,
    wal: Option<WriteAheadLog>,
    snapshot_dir: PathBuf,
}

impl DiskEngine {
    /// Open the engine, replaying the WAL into the tree
    pub async fn open(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let snapshot_dir = config.snapshot_dir();
        std::fs::create_dir_all(&snapshot_dir)?;

        let wal = if config.wal.enabled {
            Some(WriteAheadLog::open(config.wal_path(), &config.wal)?)
        } else {
            None
        };

        let engine = Self {
            tree: RwLock::new(BTreeMap::new()),
            wal,
            snapshot_dir,
        };
        engine.recover().await?;
        Ok(engine)
    }

    async fn recover(&self) -> Result<()> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };

        let entries = wal
            .read_all()
            .await
            .map_err(|e| FacetError::WalRecoveryFailed(e.to_string()))?;
        let count = entries.len();

        let mut tree = self.tree.write();
        for entry in entries {
            match entry.op {
                Operation::Put | Operation::Batch => {
                    if let Some(record) = entry.record {
                        tree.insert(entry.key, record);
                    }
                }
                Operation::Delete => {
                    tree.remove(&entry.key);
                }
                Operation::Checkpoint => {
                    match self.load_checkpoint(&entry.key) {
                        Ok(snapshot) => {
                            *tree = snapshot.records.into_iter().collect();
                        }
                        Err(e) => {
                            warn!(file = %entry.key, error = %e, "checkpoint unreadable, continuing with replay")
                        }
                    };
                }
            }
        }

        if count > 0 {
            info!(entries = count, records = tree.len(), "recovered from WAL");
        }
        Ok(())
    }

    fn load_checkpoint(&self, name: &str) -> Result<Snapshot> {
        let bytes = std::fs::read(self.snapshot_dir.join(name))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| FacetError::RestoreFailed(e.to_string()))?;
        if !snapshot.verify_checksum() {
            return Err(FacetError::ChecksumMismatch {
                expected: snapshot.compute_checksum(),
                actual: snapshot.checksum,
            });
        }
        Ok(snapshot)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tree.read().contains_key(key)
    }

    pub fn wal_size(&self) -> u64 {
        self.wal.as_ref().map(|w| w.size()).unwrap_or(0)
    }
}

#[async_trait]
impl Engine for DiskEngine {
    async fn put(&self, key: &str, record: Record) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.append(Operation::Put, key, Some(record.clone())).await?;
        }
        self.tree.write().insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Record> {
        let record = self
            .tree
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| FacetError::KeyNotFound(key.to_string()))?;

        if record.is_expired() {
            return Err(FacetError::KeyNotFound(key.to_string()));
        }
        Ok(record)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if !self.contains(key) {
            return Err(FacetError::KeyNotFound(key.to_string()));
        }
        if let Some(wal) = &self.wal {
            wal.append(Operation::Delete, key, None).await?;
        }
        self.tree.write().remove(key);
        Ok(())
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        let upper: Bound<&str> = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end)
        };

        let tree = self.tree.read();
        let mut records = Vec::new();
        for (_, record) in tree.range::<str, _>((Bound::Included(start), upper)) {
            if limit > 0 && records.len() >= limit {
                break;
            }
            if !record.is_expired() {
                records.push(record.clone());
            }
        }
        Ok(records)
    }

    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()> {
        if let Some(wal) = &self.wal {
            for (key, record) in &entries {
                wal.append(Operation::Batch, key.clone(), Some(record.clone()))
                    .await?;
            }
        }

        let mut tree = self.tree.write();
        for (key, record) in entries {
            tree.insert(key, record);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let records = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Snapshot::build(records))
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        if !snapshot.verify_checksum() {
            return Err(FacetError::ChecksumMismatch {
                expected: snapshot.compute_checksum(),
                actual: snapshot.checksum,
            });
        }
        *self.tree.write() = snapshot.records.into_iter().collect();
        Ok(())
    }

    async fn checkpoint(&self) -> Result<()> {
        let snapshot = self.snapshot()?;
        let name = format!("checkpoint-{}.snap", snapshot.version);

        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| FacetError::SnapshotFailed(e.to_string()))?;
        std::fs::write(self.snapshot_dir.join(&name), bytes)
            .map_err(|e| FacetError::SnapshotFailed(e.to_string()))?;

        if let Some(wal) = &self.wal {
            wal.truncate().await?;
            wal.append(Operation::Checkpoint, name.as_str(), None).await?;
            wal.flush().await?;
        }

        info!(checkpoint = %name, records = snapshot.records.len(), "checkpoint complete");
        Ok(())
    }

    fn expired_keys(&self) -> Vec<String> {
        self.tree
            .read()
            .iter()
            .filter(|(_, record)| record.is_expired())
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn gauges(&self) -> EngineGauges {
        EngineGauges {
            records_total: self.tree.read().len() as i64,
            wal_size: self.wal_size() as i64,
        }
    }

    async fn close(&self) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn record(id: &str, index: i64) -> Record {
        let mut data = HashMap::new();
        data.insert("index".to_string(), Value::from(index));
        Record::with_id(id, data)
    }

    #[tokio::test]
    async fn test_recovery_replays_wal() {
        let dir = TempDir::new().unwrap();
        let config = Config::disk(dir.path());

        {
            let engine = DiskEngine::open(&config).await.unwrap();
            engine.put("a", record("a", 1)).await.unwrap();
            engine.put("b", record("b", 2)).await.unwrap();
            engine.delete("a").await.unwrap();
            engine.close().await.unwrap();
        }

        let engine = DiskEngine::open(&config).await.unwrap();
        assert!(engine.get("a").await.is_err());
        let b = engine.get("b").await.unwrap();
        assert_eq!(b.get("index"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_scan_is_ordered_and_bounded() {
        let dir = TempDir::new().unwrap();
        let engine = DiskEngine::open(&Config::disk(dir.path())).await.unwrap();

        for key in ["d", "b", "a", "c", "e"] {
            engine.put(key, record(key, 0)).await.unwrap();
        }

        let records = engine.scan("b", "e", 0).await.unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_checkpoint_truncates_and_recovers() {
        let dir = TempDir::new().unwrap();
        let config = Config::disk(dir.path());

        {
            let engine = DiskEngine::open(&config).await.unwrap();
            for i in 0..20i64 {
                let key = format!("k{:02}", i);
                engine.put(&key, record(&key, i)).await.unwrap();
            }
            engine.checkpoint().await.unwrap();
            // Post-checkpoint writes land in the fresh log.
            engine.put("extra", record("extra", 99)).await.unwrap();
            engine.close().await.unwrap();
        }

        let engine = DiskEngine::open(&config).await.unwrap();
        assert_eq!(engine.gauges().records_total, 21);
        assert!(engine.get("k00").await.is_ok());
        assert!(engine.get("extra").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_missing_key() {
        let dir = TempDir::new().unwrap();
        let engine = DiskEngine::open(&Config::disk(dir.path())).await.unwrap();
        assert!(engine.delete("ghost").await.is_err());
    }
}
