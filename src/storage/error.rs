//! Storage layer error types.

use crate::catalog::TableId;
use crate::concurrency::lock::LockError;
use crate::storage::page::PageId;
use crate::transaction::TransactionId;
use thiserror::Error;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("transaction {tx} aborted due to deadlock on {page}, retry")]
    Deadlock { tx: TransactionId, page: PageId },

    #[error("Page not found: {0}")]
    PageNotFound(PageId),

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Tuple not found: slot {slot} of {page_id} is empty")]
    TupleNotFound { page_id: PageId, slot: u16 },

    #[error("Tuple has no record id")]
    MissingRecordId,

    #[error("Page is full: {0} has no free slot")]
    PageFull(PageId),

    #[error("Schema mismatch: tuple schema does not match table {0}")]
    SchemaMismatch(TableId),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid page size: expected {expected} bytes, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Buffer pool is full: every resident page is pinned")]
    BufferPoolFull,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the failed transaction may simply be retried from the start.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Deadlock { .. })
    }
}

impl From<LockError> for StorageError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Deadlock { tx, page } => StorageError::Deadlock { tx, page },
        }
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
