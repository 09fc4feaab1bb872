//! In-memory audit store.

use super::query::LogQuery;
use super::{AuditStore, StoreError, StoreResult};
use crate::record::{AuditRecord, NewAuditRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// In-memory audit store (development, testing, small deployments).
///
/// Records live in insertion order behind an `RwLock`; ids come from an
/// atomic counter so they stay monotonic across concurrent inserts.
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
    next_id: AtomicU64,
}

impl InMemoryAuditStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore for InMemoryAuditStore {
    fn insert(&self, record: NewAuditRecord) -> StoreResult<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        records.push(record.into_record(id));
        Ok(id)
    }

    fn get(&self, id: u64) -> StoreResult<Option<AuditRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadError(format!("lock poisoned: {}", e)))?;

        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    fn query(&self, query: &LogQuery) -> StoreResult<Vec<AuditRecord>> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadError(format!("lock poisoned: {}", e)))?;

        let mut results: Vec<AuditRecord> = records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();

        if query.newest_first {
            results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        } else {
            results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        }

        let offset = query.offset.unwrap_or(0);
        let results = results.into_iter().skip(offset);

        Ok(match query.limit {
            Some(limit) => results.take(limit).collect(),
            None => results.collect(),
        })
    }

    fn count(&self, query: &LogQuery) -> StoreResult<u64> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadError(format!("lock poisoned: {}", e)))?;

        Ok(records.iter().filter(|r| query.matches(r)).count() as u64)
    }

    fn total_count(&self) -> StoreResult<u64> {
        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadError(format!("lock poisoned: {}", e)))?;

        Ok(records.len() as u64)
    }

    fn delete(&self, id: u64) -> StoreResult<bool> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }

    fn delete_all(&self) -> StoreResult<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        let removed = records.len() as u64;
        records.clear();
        Ok(removed)
    }

    fn delete_older_than(&self, cutoff: i64) -> StoreResult<u64> {
        let mut records = self
            .records
            .write()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        let before = records.len();
        records.retain(|r| r.timestamp >= cutoff);
        Ok((before - records.len()) as u64)
    }

    fn nth_newest_timestamp(&self, n: u64) -> StoreResult<Option<i64>> {
        if n == 0 {
            return Ok(None);
        }

        let records = self
            .records
            .read()
            .map_err(|e| StoreError::ReadError(format!("lock poisoned: {}", e)))?;

        let mut timestamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        Ok(timestamps.get(n as usize - 1).copied())
    }
}
