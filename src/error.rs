//! Error types for the storage engine.

use crate::types::PageId;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage engine
///
/// Contract violations (wrong-type header accessors, out-of-range slot
/// indices, unpinning a page with pin count zero) are panics, not variants.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error from the underlying file system
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A row with the same primary key already exists
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Record exceeds the capacity of an empty page
    #[error("record too large: {size} bytes (max: {max})")]
    RecordTooLarge { size: usize, max: usize },

    /// A primary-key column holds NULL
    #[error("primary key column '{0}' is null")]
    NullPrimaryKey(String),

    /// Two values of different types were compared
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// A value does not fit its column's declared maximum length
    #[error("value for column '{column}' is {length} bytes, max {max}")]
    ValueTooLong {
        column: String,
        length: usize,
        max: usize,
    },

    /// Named table does not exist in the catalog
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Table definition failed validation
    #[error("invalid table definition: {0}")]
    InvalidDefinition(String),

    /// Data corruption detected in a stored page (short read, malformed
    /// record, page type on disk not matching the expected type)
    #[error("corruption in page {page_id}: {reason}")]
    Corruption { page_id: PageId, reason: String },

    /// Malformed bytes outside the context of a specific page
    #[error("malformed data: {0}")]
    MalformedData(String),

    /// Buffer pool has no unpinned frame to evict
    #[error("buffer pool exhausted: no available frames")]
    BufferPoolExhausted,

    /// Catalog bootstrap file could not be parsed
    #[error("invalid catalog file '{file}': {reason}")]
    InvalidCatalogFile { file: String, reason: String },
}

impl StorageError {
    /// Create a corruption error for a page
    pub fn corruption(page_id: PageId, reason: impl Into<String>) -> Self {
        Self::Corruption {
            page_id,
            reason: reason.into(),
        }
    }

    /// Create a malformed-data error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedData(reason.into())
    }

    /// Create an invalid-definition error
    pub fn invalid_definition(reason: impl Into<String>) -> Self {
        Self::InvalidDefinition(reason.into())
    }
}
