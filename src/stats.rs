//! Engine statistics plumbing
//!
//! Counters are plain atomics owned by the database instance; the background
//! stats collector refreshes the gauges from current engine state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub records_total: i64,
    pub memory_used: i64,
    pub disk_used: i64,
    pub cache_hit_ratio: f64,
    pub avg_query_time: Duration,
    pub wal_size: i64,
}

/// Internal counters behind `EngineStats`
#[derive(Debug, Default)]
pub struct StatsRecorder {
    records_total: AtomicI64,
    memory_used: AtomicI64,
    disk_used: AtomicI64,
    wal_size: AtomicI64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    total_queries: AtomicU64,
    total_query_time_ns: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self, elapsed: Duration) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_query_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_records_total(&self, value: i64) {
        self.records_total.store(value, Ordering::Relaxed);
    }

    pub fn set_memory_used(&self, value: i64) {
        self.memory_used.store(value, Ordering::Relaxed);
    }

    pub fn set_disk_used(&self, value: i64) {
        self.disk_used.store(value, Ordering::Relaxed);
    }

    pub fn set_wal_size(&self, value: i64) {
        self.wal_size.store(value, Ordering::Relaxed);
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn snapshot(&self) -> EngineStats {
        let queries = self.total_queries.load(Ordering::Relaxed);
        let avg_query_time = if queries > 0 {
            Duration::from_nanos(self.total_query_time_ns.load(Ordering::Relaxed) / queries)
        } else {
            Duration::ZERO
        };

        EngineStats {
            records_total: self.records_total.load(Ordering::Relaxed),
            memory_used: self.memory_used.load(Ordering::Relaxed),
            disk_used: self.disk_used.load(Ordering::Relaxed),
            cache_hit_ratio: self.hit_ratio(),
            avg_query_time,
            wal_size: self.wal_size.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio() {
        let recorder = StatsRecorder::new();
        assert_eq!(recorder.hit_ratio(), 0.0);

        recorder.record_hit();
        recorder.record_hit();
        recorder.record_hit();
        recorder.record_miss();
        assert!((recorder.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_averages_query_time() {
        let recorder = StatsRecorder::new();
        recorder.record_query(Duration::from_micros(100));
        recorder.record_query(Duration::from_micros(300));
        recorder.set_records_total(42);

        let stats = recorder.snapshot();
        assert_eq!(stats.records_total, 42);
        assert_eq!(stats.avg_query_time, Duration::from_micros(200));
    }
}
