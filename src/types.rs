//! Core types for facetdb

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::Result;

/// Engine composition selected at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Memory,
    Disk,
    Columnar,
    Vector,
    Hybrid,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Memory => "memory",
            Mode::Disk => "disk",
            Mode::Columnar => "columnar",
            Mode::Vector => "vector",
            Mode::Hybrid => "hybrid",
        };
        write!(f, "{}", s)
    }
}

/// Operation tag carried by WAL entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Put,
    Delete,
    Batch,
    Checkpoint,
}

/// Compression codec for sealed columnar blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    Lz4,
    Zstd,
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd
    }
}

/// Value type supporting multiple data types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
    /// Vector embedding for similarity search
    Vector(Vec<f32>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract an embedding. Untagged deserialization turns a `Vector` back
    /// into an `Array` of numbers, so numeric arrays are coerced here.
    pub fn as_vector(&self) -> Option<Vec<f32>> {
        match self {
            Value::Vector(v) => Some(v.clone()),
            Value::Array(items) if !items.is_empty() => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::Float(f) => out.push(*f as f32),
                        Value::Int(i) => out.push(*i as f32),
                        _ => return None,
                    }
                }
                Some(out)
            }
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

/// A record stored in the database.
///
/// Records are immutable once written for a given version; an update
/// produces a new version through the engine's stamping path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Primary key
    pub id: String,

    /// Record data
    #[serde(default)]
    pub data: HashMap<String, Value>,

    /// Dense embedding, if the record carries one
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vector: Vec<f32>,

    /// Monotonically assigned version (nanosecond timestamp)
    #[serde(default)]
    pub version: u64,

    /// Absolute expiration instant; the record is logically absent past it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// CRC-32 of the canonical serialization with this field zeroed
    #[serde(default)]
    pub checksum: u32,

    /// Creation timestamp
    #[serde(default)]
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Create a new record with an auto-generated ID
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), data)
    }

    /// Create a record with a specific ID
    pub fn with_id(id: impl Into<String>, data: HashMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            data,
            vector: Vec::new(),
            version: 0,
            expires_at: None,
            checksum: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach an embedding
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = vector;
        self
    }

    /// Attach an absolute expiration instant
    pub fn with_expiration(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
        self.updated_at = Utc::now();
    }

    /// Check if the record has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expiry) => Utc::now() > expiry,
            None => false,
        }
    }

    /// The embedding carried by this record: the `vector` field when set,
    /// otherwise a `vector` entry in the data map.
    pub fn embedding(&self) -> Option<Vec<f32>> {
        if !self.vector.is_empty() {
            return Some(self.vector.clone());
        }
        self.data.get("vector").and_then(|v| v.as_vector())
    }

    /// CRC-32 of the canonical serialization with `checksum` zeroed
    pub fn compute_checksum(&self) -> Result<u32> {
        let mut zeroed = self.clone();
        zeroed.checksum = 0;
        Ok(crc32fast::hash(&canonical_json(&zeroed)?))
    }

    /// Verify the stored checksum against the record contents
    pub fn verify_checksum(&self) -> Result<bool> {
        Ok(self.checksum == self.compute_checksum()?)
    }
}

/// A point-in-time copy of the memory table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub records: HashMap<String, Record>,
    pub created_at: DateTime<Utc>,
    pub checksum: u32,
}

impl Snapshot {
    /// Build a snapshot over a record set, stamping version and checksum
    pub fn build(records: HashMap<String, Record>) -> Self {
        let now = Utc::now();
        let mut snap = Self {
            version: now.timestamp_nanos_opt().unwrap_or(0) as u64,
            records,
            created_at: now,
            checksum: 0,
        };
        snap.checksum = snap.compute_checksum();
        snap
    }

    /// Snapshot checksum over (version, creation nanos, record count).
    /// Record contents are excluded so the value is independent of map order.
    pub fn compute_checksum(&self) -> u32 {
        let data = format!(
            "{}|{}|{}|",
            self.version,
            self.created_at.timestamp_nanos_opt().unwrap_or(0),
            self.records.len()
        );
        crc32fast::hash(data.as_bytes())
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == self.compute_checksum()
    }
}

/// Serialize to canonical JSON bytes: object keys are sorted, so the same
/// logical value always produces the same bytes regardless of map iteration
/// order. Checksums and WAL frames are computed over this form.
pub(crate) fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&sort_json(tree))?)
}

fn sort_json(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_json(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_json).collect())
        }
        other => other,
    }
}
