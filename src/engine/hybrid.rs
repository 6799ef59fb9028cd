//! Hybrid engine: memory, disk, vector and columnar tiers composed
//!
//! Writes land in memory synchronously (read-your-writes), hit the vector
//! index synchronously when the record carries an embedding, and reach disk
//! and the columnar store through a bounded channel drained by a single
//! background worker. The enqueue waits at most 100 ms; a timeout surfaces
//! as queue-full backpressure. Reads consult memory first and repopulate it
//! from disk on a miss. Durability lags the enqueue by one worker cycle;
//! close() drains the queue before shutting the tiers down.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{ColumnarEngine, DiskEngine, Engine, EngineGauges, MemoryEngine, VectorEngine};
use crate::columnar::{AggregateQuery, AggregateResult};
use crate::config::Config;
use crate::error::{FacetError, Result};
use crate::types::{Record, Snapshot};

const WRITE_QUEUE_DEPTH: usize = 1000;
const ENQUEUE_WAIT: Duration = Duration::from_millis(100);

pub struct HybridEngine {
    memory: Arc<MemoryEngine>,
    disk: Arc<DiskEngine>,
    vector: Arc<VectorEngine>,
    columnar: Arc<ColumnarEngine>,
    write_tx: mpsc::Sender<Record>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HybridEngine {
    pub async fn open(config: &Config) -> Result<Self> {
        let memory = Arc::new(MemoryEngine::new());
        let disk = Arc::new(DiskEngine::open(config).await?);
        let vector = Arc::new(VectorEngine::new(config));
        let columnar = Arc::new(ColumnarEngine::new(config));

        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_worker(
            disk.clone(),
            columnar.clone(),
            write_rx,
            shutdown_rx,
        ));

        Ok(Self {
            memory,
            disk,
            vector,
            columnar,
            write_tx,
            shutdown,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Single consumer of the write queue. On shutdown the residue is flushed
/// before exiting so close() never loses acknowledged writes.
async fn run_worker(
    disk: Arc<DiskEngine>,
    columnar: Arc<ColumnarEngine>,
    mut write_rx: mpsc::Receiver<Record>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let mut drained = 0usize;
                while let Ok(record) = write_rx.try_recv() {
                    flush_record(&disk, &columnar, record).await;
                    drained += 1;
                }
                if drained > 0 {
                    info!(drained, "flushed residual writes on shutdown");
                }
                return;
            }
            maybe = write_rx.recv() => {
                match maybe {
                    Some(record) => flush_record(&disk, &columnar, record).await,
                    None => return,
                }
            }
        }
    }
}

async fn flush_record(disk: &DiskEngine, columnar: &ColumnarEngine, record: Record) {
    let key = record.id.clone();
    if let Err(e) = Engine::put(disk, &key, record.clone()).await {
        error!(key = %key, error = %e, "async disk write failed");
    }
    if let Err(e) = Engine::put(columnar, &key, record).await {
        error!(key = %key, error = %e, "async columnar write failed");
    }
}

#[async_trait]
impl Engine for HybridEngine {
    async fn put(&self, key: &str, record: Record) -> Result<()> {
        // Memory first for read-your-writes.
        self.memory.insert(key, record.clone());

        if record.embedding().is_some() {
            Engine::put(&*self.vector, key, record.clone()).await?;
        }

        match tokio::time::timeout(ENQUEUE_WAIT, self.write_tx.send(record)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(FacetError::Closed),
            Err(_) => Err(FacetError::QueueFull),
        }
    }

    async fn get(&self, key: &str) -> Result<Record> {
        match self.memory.fetch(key) {
            Ok(record) => Ok(record),
            Err(FacetError::KeyNotFound(_)) => {
                let record = Engine::get(&*self.disk, key).await?;
                self.memory.insert(key, record.clone());
                Ok(record)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // Synchronous across every tier; the vector and columnar tiers only
        // hold the key when the record carried an embedding or was flushed.
        let memory_had_it = self.memory.remove(key).is_ok();
        let _ = Engine::delete(&*self.vector, key).await;
        let _ = Engine::delete(&*self.columnar, key).await;

        match Engine::delete(&*self.disk, key).await {
            Ok(()) => Ok(()),
            Err(FacetError::KeyNotFound(_)) if memory_had_it => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn scan(&self, start: &str, end: &str, limit: usize) -> Result<Vec<Record>> {
        // Disk is authoritative for flushed rows; memory overlays anything
        // fresher than the last worker cycle.
        let mut merged: BTreeMap<String, Record> = BTreeMap::new();
        for record in Engine::scan(&*self.disk, start, end, 0).await? {
            merged.insert(record.id.clone(), record);
        }
        for record in self.memory.range_scan(start, end, 0) {
            merged.insert(record.id.clone(), record);
        }

        let mut records: Vec<Record> = merged.into_values().collect();
        if limit > 0 {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn batch_put(&self, entries: Vec<(String, Record)>) -> Result<()> {
        for (key, record) in entries {
            self.put(&key, record).await?;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        Engine::search(&*self.vector, query, k).await
    }

    fn aggregate(&self, query: &AggregateQuery) -> Result<AggregateResult> {
        Engine::aggregate(&*self.columnar, query)
    }

    fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot::build(self.memory.to_map()))
    }

    async fn restore(&self, snapshot: Snapshot) -> Result<()> {
        Engine::restore(&*self.memory, snapshot.clone()).await?;
        // Rebuild the disk index from the same record set. The vector index
        // and columnar blocks recover on subsequent writes.
        Engine::restore(&*self.disk, snapshot).await
    }

    async fn checkpoint(&self) -> Result<()> {
        self.disk.checkpoint().await
    }

    fn expired_keys(&self) -> Vec<String> {
        self.memory.collect_expired()
    }

    fn gauges(&self) -> EngineGauges {
        EngineGauges {
            records_total: self.memory.len() as i64,
            wal_size: self.disk.wal_size() as i64,
        }
    }

    async fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }

        Engine::close(&*self.memory).await?;
        Engine::close(&*self.vector).await?;
        Engine::close(&*self.columnar).await?;
        Engine::close(&*self.disk).await
    }
}
