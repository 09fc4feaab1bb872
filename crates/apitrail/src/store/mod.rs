//! Audit record storage.
//!
//! The store is append-only for the capture path; deletes exist only for the
//! administrative surface and the retention job.

mod file;
mod memory;
mod query;

pub use file::{FileAuditStore, FileAuditStoreConfig};
pub use memory::InMemoryAuditStore;
pub use query::{LogQuery, LogQueryBuilder};

use crate::record::{AuditRecord, NewAuditRecord};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to write a record.
    #[error("failed to write audit record: {0}")]
    WriteError(String),

    /// Failed to read records.
    #[error("failed to read audit records: {0}")]
    ReadError(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// IO error.
    #[error("io error: {0}")]
    IoError(String),
}

/// Trait for audit record storage backends.
pub trait AuditStore: Send + Sync {
    /// Insert a record, returning the assigned monotonic id.
    fn insert(&self, record: NewAuditRecord) -> StoreResult<u64>;

    /// Fetch a record by id.
    fn get(&self, id: u64) -> StoreResult<Option<AuditRecord>>;

    /// Execute a filtered query.
    fn query(&self, query: &LogQuery) -> StoreResult<Vec<AuditRecord>>;

    /// Count records matching the query, ignoring pagination.
    fn count(&self, query: &LogQuery) -> StoreResult<u64>;

    /// Total number of stored records.
    fn total_count(&self) -> StoreResult<u64>;

    /// Delete a record by id. Returns whether a record was removed.
    fn delete(&self, id: u64) -> StoreResult<bool>;

    /// Delete every record, returning the number removed.
    fn delete_all(&self) -> StoreResult<u64>;

    /// Delete records with a timestamp strictly older than `cutoff`,
    /// returning the number removed.
    fn delete_older_than(&self, cutoff: i64) -> StoreResult<u64>;

    /// Timestamp of the n-th newest record (1-indexed), or `None` when fewer
    /// than `n` records exist.
    fn nth_newest_timestamp(&self, n: u64) -> StoreResult<Option<i64>>;

    /// Create a query builder bound to this store.
    fn find(&self) -> LogQueryBuilder<'_>
    where
        Self: Sized,
    {
        LogQueryBuilder::new(self)
    }
}
