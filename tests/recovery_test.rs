use facetdb::{Config, Database, Record, Value};
use std::collections::HashMap;
use tempfile::TempDir;

fn record(id: &str, value: i64) -> Record {
    let mut data = HashMap::new();
    data.insert("v".to_string(), Value::from(value));
    Record::with_id(id, data)
}

#[tokio::test]
async fn test_disk_recovery_replays_wal() {
    let dir = TempDir::new().unwrap();
    let config = Config::disk(dir.path());

    {
        let db = Database::open(config.clone()).await.unwrap();
        for i in 0..25i64 {
            let key = format!("k{:02}", i);
            db.put(&key, record(&key, i)).await.unwrap();
        }
        db.delete("k00").await.unwrap();
        db.delete("k01").await.unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open(config).await.unwrap();
    assert!(db.get("k00").await.is_err());
    assert!(db.get("k01").await.is_err());
    for i in 2..25i64 {
        let key = format!("k{:02}", i);
        let got = db.get(&key).await.unwrap();
        assert_eq!(got.get("v"), Some(&Value::Int(i)));
    }
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_recovered_records_pass_checksum_verification() {
    let dir = TempDir::new().unwrap();
    let config = Config::disk(dir.path());
    assert!(config.enable_checksum);

    {
        let db = Database::open(config.clone()).await.unwrap();
        let rec = record("k", 7);
        db.put("k", rec).await.unwrap();
        db.close().await.unwrap();
    }

    // get() verifies the stored checksum against the canonical
    // serialization; a replayed record must still match.
    let db = Database::open(config).await.unwrap();
    let got = db.get("k").await.unwrap();
    assert!(got.verify_checksum().unwrap());
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_checkpoint_then_recover() {
    let dir = TempDir::new().unwrap();
    let config = Config::disk(dir.path());

    {
        let db = Database::open(config.clone()).await.unwrap();
        for i in 0..30i64 {
            let key = format!("k{:02}", i);
            db.put(&key, record(&key, i)).await.unwrap();
        }
        db.checkpoint().await.unwrap();
        db.put("after", record("after", 99)).await.unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open(config).await.unwrap();
    for i in 0..30i64 {
        let key = format!("k{:02}", i);
        assert!(db.get(&key).await.is_ok(), "missing {} after checkpoint", key);
    }
    let after = db.get("after").await.unwrap();
    assert_eq!(after.get("v"), Some(&Value::Int(99)));

    let stats = db.stats();
    assert_eq!(stats.records_total, 31);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_batch_put_is_durable() {
    let dir = TempDir::new().unwrap();
    let config = Config::disk(dir.path());

    {
        let db = Database::open(config.clone()).await.unwrap();
        let mut entries = HashMap::new();
        for i in 0..40i64 {
            let key = format!("b{:02}", i);
            entries.insert(key.clone(), record(&key, i));
        }
        db.batch_put(entries).await.unwrap();
        db.close().await.unwrap();
    }

    let db = Database::open(config).await.unwrap();
    assert_eq!(db.scan("b", "c", 0).await.unwrap().len(), 40);
    db.close().await.unwrap();
}

#[tokio::test]
async fn test_wal_grows_and_truncates() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::disk(dir.path());
    // A small batch size so appends flush to the file as we go.
    config.wal.batch_size = 2;

    let db = Database::open(config).await.unwrap();
    for i in 0..10i64 {
        let key = format!("k{}", i);
        db.put(&key, record(&key, i)).await.unwrap();
    }

    let before = db.stats().wal_size;
    assert!(before > 0);

    db.checkpoint().await.unwrap();
    let after = db.stats().wal_size;
    assert!(after < before, "WAL did not shrink: {} -> {}", before, after);

    db.close().await.unwrap();
}
