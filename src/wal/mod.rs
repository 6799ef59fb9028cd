//! Write-Ahead Log for durability
//!
//! Every mutation is appended here before it is acknowledged. Entries are
//! buffered and written as frames: a 4-byte little-endian length prefix
//! followed by the canonical JSON serialization of the entry. The embedded
//! CRC-32 is computed over the serialization with the checksum field zeroed.
//! Recovery tolerates a torn tail: any frame that fails to decode or fails
//! its CRC is skipped.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::WalConfig;
use crate::error::{FacetError, Result};
use crate::types::{canonical_json, Operation, Record};

/// Upper bound on a single frame; a length prefix beyond this is treated as
/// tail corruption.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log sequence number, strictly monotonic per log
    pub lsn: u64,

    /// Unix nanosecond timestamp assigned at append time
    pub timestamp_ns: u64,

    /// PUT, DELETE, BATCH or CHECKPOINT
    pub op: Operation,

    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,

    /// CRC-32 of the canonical serialization with this field zeroed
    pub checksum: u32,
}

/// WAL statistics
#[derive(Debug, Clone)]
pub struct WalStats {
    pub write_count: u64,
    pub flush_count: u64,
    pub size: u64,
    pub path: PathBuf,
}

pub struct WriteAheadLog {
    path: PathBuf,
    file: Mutex<File>,
    buffer: Mutex<Vec<LogEntry>>,
    last_lsn: AtomicU64,
    offset: AtomicU64,
    batch_size: usize,
    sync_interval: u64,
    write_count: AtomicU64,
    flush_count: AtomicU64,
}

impl WriteAheadLog {
    /// Open or create a WAL file
    pub fn open(path: impl AsRef<Path>, config: &WalConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path,
            file: Mutex::new(file),
            buffer: Mutex::new(Vec::with_capacity(config.batch_size)),
            last_lsn: AtomicU64::new(0),
            offset: AtomicU64::new(size),
            batch_size: config.batch_size,
            sync_interval: config.sync_interval,
            write_count: AtomicU64::new(0),
            flush_count: AtomicU64::new(0),
        })
    }

    /// Append an entry to the buffer, assigning its timestamp, LSN and CRC.
    /// Triggers a flush once the buffer reaches the batch size.
    pub async fn append(
        &self,
        op: Operation,
        key: impl Into<String>,
        record: Option<Record>,
    ) -> Result<u64> {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let prev = self
            .last_lsn
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(now.max(prev + 1))
            })
            .unwrap_or(0);
        let lsn = now.max(prev + 1);

        let mut entry = LogEntry {
            lsn,
            timestamp_ns: now,
            op,
            key: key.into(),
            record,
            checksum: 0,
        };
        entry.checksum = crc32fast::hash(&canonical_json(&entry)?);

        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(entry);
            buffer.len() >= self.batch_size
        };
        self.write_count.fetch_add(1, Ordering::Relaxed);

        if should_flush {
            self.flush().await?;
        }

        Ok(lsn)
    }

    /// Write buffered entries to disk and sync according to the sync policy
    pub async fn flush(&self) -> Result<()> {
        let entries = {
            let mut buffer = self.buffer.lock().await;
            if buffer.is_empty() {
                return Ok(());
            }
            std::mem::take(&mut *buffer)
        };

        let mut file = self.file.lock().await;
        for entry in &entries {
            let data = canonical_json(entry)?;
            let len = data.len() as u32;
            file.write_all(&len.to_le_bytes())
                .map_err(|e| FacetError::WalWriteFailed(e.to_string()))?;
            file.write_all(&data)
                .map_err(|e| FacetError::WalWriteFailed(e.to_string()))?;
            self.offset
                .fetch_add(4 + data.len() as u64, Ordering::Relaxed);
        }

        let flushes = self.flush_count.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sync_interval == 0 || flushes % self.sync_interval == 0 {
            file.sync_all()
                .map_err(|e| FacetError::WalWriteFailed(e.to_string()))?;
        }

        debug!(entries = entries.len(), "flushed WAL batch");
        Ok(())
    }

    /// Read every recoverable entry, in append order. Entries that fail to
    /// decode or fail their CRC are skipped; a torn tail is expected after a
    /// crash. The file position is restored to the end for appending.
    pub async fn read_all(&self) -> Result<Vec<LogEntry>> {
        self.flush().await?;

        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            if file.read_exact(&mut len_buf).is_err() {
                break;
            }
            let len = u32::from_le_bytes(len_buf);
            if len == 0 || len > MAX_FRAME_LEN {
                warn!(len, "implausible WAL frame length, stopping recovery");
                break;
            }

            let mut data = vec![0u8; len as usize];
            if file.read_exact(&mut data).is_err() {
                break;
            }

            let mut entry: LogEntry = match serde_json::from_slice(&data) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping undecodable WAL frame");
                    continue;
                }
            };

            let stored = entry.checksum;
            entry.checksum = 0;
            let computed = crc32fast::hash(&canonical_json(&entry)?);
            if computed != stored {
                warn!(lsn = entry.lsn, "skipping WAL frame with CRC mismatch");
                continue;
            }
            entry.checksum = stored;
            entries.push(entry);
        }

        file.seek(SeekFrom::End(0))?;
        Ok(entries)
    }

    /// Atomically replace the log with an empty file. Used after a
    /// successful checkpoint.
    pub async fn truncate(&self) -> Result<()> {
        self.buffer.lock().await.clear();

        let mut file = self.file.lock().await;
        *file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.offset.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Current size of the WAL file in bytes
    pub fn size(&self) -> u64 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Flush remaining entries and release the log
    pub async fn close(&self) -> Result<()> {
        self.flush().await
    }

    pub fn stats(&self) -> WalStats {
        WalStats {
            write_count: self.write_count.load(Ordering::Relaxed),
            flush_count: self.flush_count.load(Ordering::Relaxed),
            size: self.size(),
            path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_record(id: &str) -> Record {
        let mut data = HashMap::new();
        data.insert("name".to_string(), Value::from(id));
        Record::with_id(id, data)
    }

    #[tokio::test]
    async fn test_append_flush_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("wal.log"), &WalConfig::default()).unwrap();

        for i in 0..5 {
            let key = format!("k{}", i);
            wal.append(Operation::Put, &key, Some(sample_record(&key)))
                .await
                .unwrap();
        }
        wal.append(Operation::Delete, "k0", None).await.unwrap();
        wal.flush().await.unwrap();

        let entries = wal.read_all().await.unwrap();
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].key, "k0");
        assert_eq!(entries[0].op, Operation::Put);
        assert_eq!(entries[5].op, Operation::Delete);

        // LSNs are strictly monotonic
        for pair in entries.windows(2) {
            assert!(pair[1].lsn > pair[0].lsn);
        }
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        {
            let wal = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
            wal.append(Operation::Put, "a", Some(sample_record("a")))
                .await
                .unwrap();
            wal.close().await.unwrap();
        }

        let wal = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
        let entries = wal.read_all().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "a");
    }

    #[tokio::test]
    async fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let wal = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
        wal.append(Operation::Put, "a", Some(sample_record("a")))
            .await
            .unwrap();
        wal.append(Operation::Put, "b", Some(sample_record("b")))
            .await
            .unwrap();
        wal.flush().await.unwrap();

        // Simulate a crash mid-frame: a length prefix promising more bytes
        // than were ever written.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(b"partial").unwrap();
        }

        let reopened = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
        let entries = reopened.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");

        let wal = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
        wal.append(Operation::Put, "a", Some(sample_record("a")))
            .await
            .unwrap();
        wal.flush().await.unwrap();

        // A well-framed entry whose CRC does not match its contents.
        {
            let mut bogus = LogEntry {
                lsn: 1,
                timestamp_ns: 1,
                op: Operation::Put,
                key: "evil".to_string(),
                record: None,
                checksum: 0,
            };
            bogus.checksum = 0xDEADBEEF;
            let data = canonical_json(&bogus).unwrap();
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&(data.len() as u32).to_le_bytes()).unwrap();
            file.write_all(&data).unwrap();
        }

        let wal = WriteAheadLog::open(&path, &WalConfig::default()).unwrap();
        wal.append(Operation::Put, "b", Some(sample_record("b")))
            .await
            .unwrap();
        wal.flush().await.unwrap();

        let entries = wal.read_all().await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_truncate_resets_log() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("wal.log"), &WalConfig::default()).unwrap();

        wal.append(Operation::Put, "a", Some(sample_record("a")))
            .await
            .unwrap();
        wal.flush().await.unwrap();
        assert!(wal.size() > 0);

        wal.truncate().await.unwrap();
        assert_eq!(wal.size(), 0);
        assert!(wal.read_all().await.unwrap().is_empty());
    }
}
