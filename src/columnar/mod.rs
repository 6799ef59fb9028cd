//! Column-oriented analytics store
//!
//! Records are shredded into named, typed columns. Once the synthetic `id`
//! column reaches the configured block size the current stretch of every
//! column is sealed: values are encoded into a length-prefixed stream,
//! compressed, and the in-memory array is released. Aggregates decode sealed
//! segments on demand, so they always observe every inserted row.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{FacetError, Result};
use crate::types::{Compression, Record, Value};

/// Column element types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Float,
    String,
    Bool,
    Json,
    Vector,
}

impl ColumnType {
    fn tag(self) -> u8 {
        match self {
            ColumnType::Int => 0,
            ColumnType::Float => 1,
            ColumnType::String => 2,
            ColumnType::Bool => 3,
            ColumnType::Json => 4,
            ColumnType::Vector => 5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ColumnType::Int),
            1 => Ok(ColumnType::Float),
            2 => Ok(ColumnType::String),
            3 => Ok(ColumnType::Bool),
            4 => Ok(ColumnType::Json),
            5 => Ok(ColumnType::Vector),
            _ => Err(FacetError::Corruption(format!(
                "unknown column type tag: {}",
                tag
            ))),
        }
    }

    /// Infer the column type from the first value written. A null first
    /// value defaults to string.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Int(_) => ColumnType::Int,
            Value::Float(_) => ColumnType::Float,
            Value::String(_) => ColumnType::String,
            Value::Bool(_) => ColumnType::Bool,
            Value::Vector(_) => ColumnType::Vector,
            Value::Array(_) | Value::Object(_) | Value::Bytes(_) => ColumnType::Json,
            Value::Null => ColumnType::String,
        }
    }
}

/// A named, typed chunk of values with running statistics
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    /// In-memory values for the unsealed stretch
    pub data: Vec<Value>,
    /// One compressed payload per sealed stretch
    pub sealed: Vec<Vec<u8>>,
    pub min: Option<Value>,
    pub max: Option<Value>,
    pub null_count: usize,
    pub row_count: usize,
}

impl Column {
    fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            data: Vec::new(),
            sealed: Vec::new(),
            min: None,
            max: None,
            null_count: 0,
            row_count: 0,
        }
    }

    fn push(&mut self, value: Value) {
        self.data.push(value);
        self.row_count += 1;
    }

    fn compressed_size(&self) -> usize {
        self.sealed.iter().map(|s| s.len()).sum()
    }
}

/// A sealed, immutable group of column chunks sharing a row range
#[derive(Debug, Clone)]
pub struct Block {
    pub id: u32,
    pub min_key: String,
    pub max_key: String,
    pub row_count: usize,
    pub checksum: u32,
    pub created_at: DateTime<Utc>,
}

/// Aggregation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Comparison operators for aggregate filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

/// Value predicate applied to the aggregated column
#[derive(Debug, Clone)]
pub struct Filter {
    pub operator: FilterOp,
    pub value: Value,
}

impl Filter {
    fn matches(&self, value: &Value) -> bool {
        let Some(ordering) = compare_values(value, &self.value) else {
            return false;
        };
        match self.operator {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Ge => ordering != Ordering::Less,
            FilterOp::Le => ordering != Ordering::Greater,
        }
    }
}

/// An aggregation request
#[derive(Debug, Clone)]
pub struct AggregateQuery {
    pub column: String,
    pub op: AggregateOp,
    pub filter: Option<Filter>,
}

/// Aggregation result
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub value: Value,
    pub count: i64,
    pub duration: Duration,
    pub scanned_rows: i64,
}

/// Columnar store statistics
#[derive(Debug, Clone, Default)]
pub struct ColumnarStats {
    pub column_count: usize,
    pub block_count: usize,
    pub row_count: usize,
    pub compressed_size: usize,
    pub uncompressed_size: usize,
    pub compression_ratio: f64,
}

pub struct ColumnarStore {
    columns: RwLock<HashMap<String, Column>>,
    blocks: RwLock<Vec<Block>>,
    block_size: usize,
    compression: Compression,
}

impl ColumnarStore {
    pub fn new(block_size: usize, compression: Compression) -> Self {
        Self {
            columns: RwLock::new(HashMap::new()),
            blocks: RwLock::new(Vec::new()),
            block_size,
            compression,
        }
    }

    /// Shred a batch of records into columns, sealing a block once the id
    /// column reaches the block size.
    pub fn insert_batch(&self, records: &[Record]) -> Result<()> {
        let mut columns = self.columns.write();

        for record in records {
            Self::append(&mut columns, "id", Value::String(record.id.clone()));
            Self::append(&mut columns, "version", Value::Int(record.version as i64));

            for (name, value) in &record.data {
                Self::append(&mut columns, name, value.clone());
            }

            if !record.vector.is_empty() {
                Self::append(&mut columns, "vector", Value::Vector(record.vector.clone()));
            }
        }

        let should_seal = columns
            .get("id")
            .map(|col| col.data.len() >= self.block_size)
            .unwrap_or(false);
        if should_seal {
            self.seal_block(&mut columns)?;
        }

        Ok(())
    }

    fn append(columns: &mut HashMap<String, Column>, name: &str, value: Value) {
        match columns.get_mut(name) {
            Some(col) => col.push(value),
            None => {
                let mut col = Column::new(name, ColumnType::infer(&value));
                col.push(value);
                columns.insert(name.to_string(), col);
            }
        }
    }

    /// Seal the current stretch of every column into a compressed block
    fn seal_block(&self, columns: &mut HashMap<String, Column>) -> Result<()> {
        let (min_key, max_key, row_count) = match columns.get("id") {
            Some(id_col) if !id_col.data.is_empty() => (
                id_col
                    .data
                    .first()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                id_col
                    .data
                    .last()
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                id_col.data.len(),
            ),
            _ => return Ok(()),
        };

        let mut blocks = self.blocks.write();
        let id = blocks.len() as u32;
        let created_at = Utc::now();
        let header = format!("{}|{}|{}|{}", id, min_key, max_key, row_count);

        for col in columns.values_mut() {
            if col.data.is_empty() {
                continue;
            }
            update_column_stats(col);
            let encoded = encode_column(col)?;
            let compressed = compress(&encoded, self.compression)?;
            col.sealed.push(compressed);
            col.data = Vec::new();
        }

        blocks.push(Block {
            id,
            min_key,
            max_key,
            row_count,
            checksum: crc32fast::hash(header.as_bytes()),
            created_at,
        });

        debug!(block = id, rows = row_count, "sealed columnar block");
        Ok(())
    }

    /// Run an aggregation over a column, decoding sealed segments on demand
    pub fn aggregate(&self, query: &AggregateQuery) -> Result<AggregateResult> {
        let start = Instant::now();
        let columns = self.columns.read();

        let col = columns
            .get(&query.column)
            .ok_or_else(|| FacetError::ColumnNotFound(query.column.clone()))?;

        let mut data = Vec::with_capacity(col.row_count);
        for segment in &col.sealed {
            let raw = decompress(segment, self.compression)?;
            data.extend(decode_column(&raw)?);
        }
        data.extend(col.data.iter().cloned());
        let scanned_rows = data.len() as i64;

        if let Some(filter) = &query.filter {
            data.retain(|v| filter.matches(v));
        }
        let count = data.len() as i64;

        let value = match query.op {
            AggregateOp::Count => Value::Int(count),
            AggregateOp::Sum => sum_values(&data),
            AggregateOp::Avg => {
                if data.is_empty() {
                    Value::Null
                } else {
                    let sum = match sum_values(&data) {
                        Value::Int(i) => i as f64,
                        Value::Float(f) => f,
                        _ => 0.0,
                    };
                    Value::Float(sum / data.len() as f64)
                }
            }
            AggregateOp::Min => extreme(&data, Ordering::Less),
            AggregateOp::Max => extreme(&data, Ordering::Greater),
        };

        Ok(AggregateResult {
            value,
            count,
            duration: start.elapsed(),
            scanned_rows,
        })
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.read().keys().cloned().collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn row_count(&self) -> usize {
        self.columns
            .read()
            .get("id")
            .map(|col| col.row_count)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> ColumnarStats {
        let columns = self.columns.read();

        let mut compressed_size = 0usize;
        let mut uncompressed_size = 0usize;
        for col in columns.values() {
            compressed_size += col.compressed_size();
            uncompressed_size += col.row_count * 8;
        }
        let row_count = columns.get("id").map(|col| col.row_count).unwrap_or(0);

        ColumnarStats {
            column_count: columns.len(),
            block_count: self.blocks.read().len(),
            row_count,
            compressed_size,
            uncompressed_size,
            compression_ratio: uncompressed_size as f64 / (compressed_size + 1) as f64,
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a column's in-memory values: 1 type byte, 4-byte LE row count,
/// then fixed-width little-endian numbers or length-prefixed payloads.
fn encode_column(col: &Column) -> Result<Vec<u8>> {
    let mut buf = BytesMut::with_capacity(col.data.len() * 8 + 8);
    buf.put_u8(col.column_type.tag());
    buf.put_u32_le(col.data.len() as u32);

    for value in &col.data {
        match col.column_type {
            ColumnType::Int => buf.put_i64_le(value.as_i64().unwrap_or(0)),
            ColumnType::Float => buf.put_f64_le(value.as_f64().unwrap_or(0.0)),
            ColumnType::Bool => buf.put_u8(value.as_bool().unwrap_or(false) as u8),
            ColumnType::String => {
                let s = value.as_str().unwrap_or_default();
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            ColumnType::Json => {
                let s = serde_json::to_string(value)?;
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            ColumnType::Vector => {
                let empty = Vec::new();
                let v = match value {
                    Value::Vector(v) => v,
                    _ => &empty,
                };
                buf.put_u32_le(v.len() as u32);
                for f in v {
                    buf.put_f32_le(*f);
                }
            }
        }
    }

    Ok(buf.to_vec())
}

fn decode_column(raw: &[u8]) -> Result<Vec<Value>> {
    let mut buf = raw;
    if buf.remaining() < 5 {
        return Err(FacetError::Corruption(
            "columnar segment too short".to_string(),
        ));
    }

    let column_type = ColumnType::from_tag(buf.get_u8())?;
    let row_count = buf.get_u32_le() as usize;

    let mut values = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        let value = match column_type {
            ColumnType::Int => {
                ensure_remaining(buf, 8)?;
                Value::Int(buf.get_i64_le())
            }
            ColumnType::Float => {
                ensure_remaining(buf, 8)?;
                Value::Float(buf.get_f64_le())
            }
            ColumnType::Bool => {
                ensure_remaining(buf, 1)?;
                Value::Bool(buf.get_u8() != 0)
            }
            ColumnType::String => Value::String(read_string(&mut buf)?),
            ColumnType::Json => serde_json::from_str(&read_string(&mut buf)?)?,
            ColumnType::Vector => {
                ensure_remaining(buf, 4)?;
                let len = buf.get_u32_le() as usize;
                ensure_remaining(buf, len * 4)?;
                let mut v = Vec::with_capacity(len);
                for _ in 0..len {
                    v.push(buf.get_f32_le());
                }
                Value::Vector(v)
            }
        };
        values.push(value);
    }

    Ok(values)
}

fn read_string(buf: &mut &[u8]) -> Result<String> {
    ensure_remaining(*buf, 4)?;
    let len = buf.get_u32_le() as usize;
    ensure_remaining(*buf, len)?;
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec())
        .map_err(|e| FacetError::Corruption(format!("invalid UTF-8 in column: {}", e)))
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(FacetError::Corruption(
            "truncated columnar segment".to_string(),
        ));
    }
    Ok(())
}

fn compress(raw: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(raw.to_vec()),
        Compression::Lz4 => Ok(lz4_flex::compress_prepend_size(raw)),
        Compression::Zstd => {
            zstd::encode_all(raw, 0).map_err(|e| FacetError::Serialization(e.to_string()))
        }
    }
}

fn decompress(data: &[u8], codec: Compression) -> Result<Vec<u8>> {
    match codec {
        Compression::None => Ok(data.to_vec()),
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map_err(|e| FacetError::Corruption(format!("lz4 decompression failed: {}", e))),
        Compression::Zstd => zstd::decode_all(data)
            .map_err(|e| FacetError::Corruption(format!("zstd decompression failed: {}", e))),
    }
}

// =============================================================================
// Statistics and value arithmetic
// =============================================================================

fn update_column_stats(col: &mut Column) {
    for value in &col.data {
        if value.is_null() {
            col.null_count += 1;
            continue;
        }
        let lower = match &col.min {
            Some(min) => compare_values(value, min) == Some(Ordering::Less),
            None => true,
        };
        if lower {
            col.min = Some(value.clone());
        }
        let higher = match &col.max {
            Some(max) => compare_values(value, max) == Some(Ordering::Greater),
            None => true,
        };
        if higher {
            col.max = Some(value.clone());
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x.partial_cmp(y),
        (Value::Int(x), Value::Float(y)) => (*x as f64).partial_cmp(y),
        (Value::Float(x), Value::Int(y)) => x.partial_cmp(&(*y as f64)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sum numeric values; promotes to float when any float is present
fn sum_values(data: &[Value]) -> Value {
    let mut int_sum: i64 = 0;
    let mut float_sum: f64 = 0.0;
    let mut has_float = false;

    for value in data {
        match value {
            Value::Int(i) => int_sum += i,
            Value::Float(f) => {
                float_sum += f;
                has_float = true;
            }
            _ => {}
        }
    }

    if has_float {
        Value::Float(float_sum + int_sum as f64)
    } else {
        Value::Int(int_sum)
    }
}

fn extreme(data: &[Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in data {
        if value.is_null() {
            continue;
        }
        match best {
            None => best = Some(value),
            Some(current) => {
                if compare_values(value, current) == Some(wanted) {
                    best = Some(value);
                }
            }
        }
    }
    best.cloned().unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn record(id: &str, fields: Vec<(&str, Value)>) -> Record {
        let mut data = HashMap::new();
        for (k, v) in fields {
            data.insert(k.to_string(), v);
        }
        Record::with_id(id, data)
    }

    #[test]
    fn test_type_inference() {
        assert_eq!(ColumnType::infer(&Value::Int(1)), ColumnType::Int);
        assert_eq!(ColumnType::infer(&Value::Float(1.0)), ColumnType::Float);
        assert_eq!(ColumnType::infer(&Value::from("x")), ColumnType::String);
        assert_eq!(ColumnType::infer(&Value::Bool(true)), ColumnType::Bool);
        assert_eq!(ColumnType::infer(&Value::Array(vec![])), ColumnType::Json);
        assert_eq!(ColumnType::infer(&Value::Null), ColumnType::String);
    }

    #[test]
    fn test_aggregate_consistency() {
        let store = ColumnarStore::new(10_000, Compression::Zstd);
        let records: Vec<Record> = (1..=10)
            .map(|i| record(&format!("r{:02}", i), vec![("amount", Value::Int(i))]))
            .collect();
        store.insert_batch(&records).unwrap();

        let sum = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Sum,
                filter: None,
            })
            .unwrap();
        assert_eq!(sum.value, Value::Int(55));
        assert_eq!(sum.count, 10);

        let count = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Count,
                filter: None,
            })
            .unwrap();
        assert_eq!(count.value, Value::Int(10));

        let min = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Min,
                filter: None,
            })
            .unwrap();
        assert_eq!(min.value, Value::Int(1));

        let max = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Max,
                filter: None,
            })
            .unwrap();
        assert_eq!(max.value, Value::Int(10));

        let avg = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Avg,
                filter: None,
            })
            .unwrap();
        assert_eq!(avg.value, Value::Float(5.5));
    }

    #[test]
    fn test_aggregates_span_sealed_blocks() {
        // Block size 4 forces multiple seals over 10 rows.
        let store = ColumnarStore::new(4, Compression::Zstd);
        for i in 1..=10i64 {
            let records = vec![record(
                &format!("r{:02}", i),
                vec![("amount", Value::Int(i))],
            )];
            store.insert_batch(&records).unwrap();
        }

        assert!(store.block_count() >= 2);

        let sum = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Sum,
                filter: None,
            })
            .unwrap();
        assert_eq!(sum.value, Value::Int(55));
        assert_eq!(sum.scanned_rows, 10);
    }

    #[test]
    fn test_mixed_numeric_sum_promotes_to_float() {
        let store = ColumnarStore::new(10_000, Compression::None);
        store
            .insert_batch(&[
                record("a", vec![("v", Value::Int(1))]),
                record("b", vec![("v", Value::Float(0.5))]),
            ])
            .unwrap();

        let sum = store
            .aggregate(&AggregateQuery {
                column: "v".to_string(),
                op: AggregateOp::Sum,
                filter: None,
            })
            .unwrap();
        assert_eq!(sum.value, Value::Float(1.5));
    }

    #[test]
    fn test_filtered_aggregate() {
        let store = ColumnarStore::new(10_000, Compression::Lz4);
        let records: Vec<Record> = (1..=10)
            .map(|i| record(&format!("r{:02}", i), vec![("amount", Value::Int(i))]))
            .collect();
        store.insert_batch(&records).unwrap();

        let sum = store
            .aggregate(&AggregateQuery {
                column: "amount".to_string(),
                op: AggregateOp::Sum,
                filter: Some(Filter {
                    operator: FilterOp::Gt,
                    value: Value::Int(7),
                }),
            })
            .unwrap();
        assert_eq!(sum.value, Value::Int(27)); // 8 + 9 + 10
        assert_eq!(sum.count, 3);
        assert_eq!(sum.scanned_rows, 10);
    }

    #[test]
    fn test_missing_column_errors() {
        let store = ColumnarStore::new(10_000, Compression::Zstd);
        let err = store
            .aggregate(&AggregateQuery {
                column: "nope".to_string(),
                op: AggregateOp::Count,
                filter: None,
            })
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_seal_roundtrip_preserves_values() {
        for codec in [Compression::None, Compression::Lz4, Compression::Zstd] {
            let store = ColumnarStore::new(3, codec);
            store
                .insert_batch(&[
                    record("a", vec![("s", Value::from("alpha")), ("f", Value::Float(1.25))]),
                    record("b", vec![("s", Value::from("beta")), ("f", Value::Float(2.5))]),
                    record("c", vec![("s", Value::from("gamma")), ("f", Value::Float(4.0))]),
                ])
                .unwrap();

            assert_eq!(store.block_count(), 1);

            let sum = store
                .aggregate(&AggregateQuery {
                    column: "f".to_string(),
                    op: AggregateOp::Sum,
                    filter: None,
                })
                .unwrap();
            assert_eq!(sum.value, Value::Float(7.75));

            let min = store
                .aggregate(&AggregateQuery {
                    column: "s".to_string(),
                    op: AggregateOp::Min,
                    filter: None,
                })
                .unwrap();
            assert_eq!(min.value, Value::from("alpha"));
        }
    }

    #[test]
    fn test_synthetic_columns_and_stats() {
        let store = ColumnarStore::new(2, Compression::Zstd);
        let rec = record("a", vec![("x", Value::Int(1))]).with_vector(vec![0.1, 0.2]);
        store.insert_batch(&[rec]).unwrap();
        store
            .insert_batch(&[record("b", vec![("x", Value::Int(2))])])
            .unwrap();

        let mut names = store.column_names();
        names.sort();
        assert_eq!(names, vec!["id", "vector", "version", "x"]);
        assert_eq!(store.row_count(), 2);

        let stats = store.stats();
        assert_eq!(stats.block_count, 1);
        assert!(stats.compressed_size > 0);
    }
}
