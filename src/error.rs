//! Error types for facetdb

use thiserror::Error;

/// Result type for facetdb operations
pub type Result<T> = std::result::Result<T, FacetError>;

/// facetdb error types
#[derive(Error, Debug)]
pub enum FacetError {
    // Lookup errors
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    // Integrity errors
    #[error("data corruption detected: {0}")]
    Corruption(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    // Validation errors
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    #[error("invalid vector: expected dimension {expected}, got {actual}")]
    InvalidVector { expected: usize, actual: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // WAL errors
    #[error("WAL write failed: {0}")]
    WalWriteFailed(String),

    #[error("WAL recovery failed: {0}")]
    WalRecoveryFailed(String),

    // Snapshot errors
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),

    #[error("restore failed: {0}")]
    RestoreFailed(String),

    // Resource errors
    #[error("async write queue full")]
    QueueFull,

    #[error("memory limit exceeded: {used} / {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },

    #[error("connection limit reached: {0}")]
    ConnectionLimit(usize),

    // Lifecycle errors
    #[error("operation timed out")]
    Timeout,

    #[error("database is closed")]
    Closed,

    // System errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for FacetError {
    fn from(e: serde_json::Error) -> Self {
        FacetError::Serialization(e.to_string())
    }
}

impl FacetError {
    /// Check if the error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FacetError::QueueFull | FacetError::Timeout | FacetError::Io(_)
        )
    }

    /// Check if the error indicates data corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FacetError::Corruption(_) | FacetError::ChecksumMismatch { .. }
        )
    }

    /// Check if the error is an absent-key signal rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FacetError::KeyNotFound(_) | FacetError::ColumnNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(FacetError::QueueFull.is_retryable());
        assert!(!FacetError::KeyNotFound("k".into()).is_retryable());

        assert!(FacetError::ChecksumMismatch {
            expected: 1,
            actual: 2
        }
        .is_corruption());
        assert!(FacetError::Corruption("bad block".into()).is_corruption());
        assert!(!FacetError::Timeout.is_corruption());

        assert!(FacetError::KeyNotFound("k".into()).is_not_found());
        assert!(FacetError::ColumnNotFound("c".into()).is_not_found());
    }
}
