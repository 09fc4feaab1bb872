//! File-based audit store (JSON Lines format).

use super::query::LogQuery;
use super::{AuditStore, StoreError, StoreResult};
use crate::record::{AuditRecord, NewAuditRecord};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Configuration for the file-based audit store.
#[derive(Debug, Clone)]
pub struct FileAuditStoreConfig {
    /// Path to the audit log file.
    pub file_path: PathBuf,
    /// Whether to create the file (and parent directories) when missing.
    pub create_if_missing: bool,
}

impl FileAuditStoreConfig {
    /// Create a configuration for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: path.into(),
            create_if_missing: true,
        }
    }
}

/// File-backed audit store: one JSON record per line.
///
/// Inserts append; deletes rewrite the file. Corrupted lines are skipped with
/// a warning rather than failing the read.
pub struct FileAuditStore {
    config: FileAuditStoreConfig,
    writer: Mutex<Option<File>>,
    next_id: AtomicU64,
}

impl FileAuditStore {
    /// Open a store with the given configuration.
    pub fn new(config: FileAuditStoreConfig) -> StoreResult<Self> {
        let store = Self {
            config,
            writer: Mutex::new(None),
            next_id: AtomicU64::new(1),
        };

        store.open_writer()?;

        let max_id = store
            .read_all_records()?
            .iter()
            .map(|r| r.id)
            .max()
            .unwrap_or(0);
        store.next_id.store(max_id + 1, Ordering::SeqCst);

        Ok(store)
    }

    /// Open a store at `path` with default configuration.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::new(FileAuditStoreConfig::new(path))
    }

    fn open_writer(&self) -> StoreResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        if let Some(parent) = self.config.file_path.parent() {
            if !parent.exists() && self.config.create_if_missing {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::IoError(format!("failed to create directories: {}", e)))?;
            }
        }

        let file = OpenOptions::new()
            .create(self.config.create_if_missing)
            .append(true)
            .open(&self.config.file_path)
            .map_err(|e| StoreError::IoError(format!("failed to open file: {}", e)))?;

        *writer = Some(file);
        Ok(())
    }

    fn read_all_records(&self) -> StoreResult<Vec<AuditRecord>> {
        let path = &self.config.file_path;

        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .map_err(|e| StoreError::IoError(format!("failed to open file for reading: {}", e)))?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();

        for line in reader.lines() {
            let line = line.map_err(|e| StoreError::IoError(format!("failed to read line: {}", e)))?;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<AuditRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    tracing::warn!(error = %err, "skipping corrupted audit record line");
                }
            }
        }

        Ok(records)
    }

    /// Replace the file contents with the given records.
    fn rewrite(&self, records: &[AuditRecord]) -> StoreResult<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        *writer = None;

        let mut file = File::create(&self.config.file_path)
            .map_err(|e| StoreError::IoError(format!("failed to rewrite file: {}", e)))?;

        for record in records {
            let json = serde_json::to_string(record)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?;
            writeln!(file, "{}", json)
                .map_err(|e| StoreError::IoError(format!("failed to write: {}", e)))?;
        }

        drop(writer);
        self.open_writer()
    }
}

impl AuditStore for FileAuditStore {
    fn insert(&self, record: NewAuditRecord) -> StoreResult<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = record.into_record(id);

        let json = serde_json::to_string(&record)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|e| StoreError::WriteError(format!("lock poisoned: {}", e)))?;

        let file = writer
            .as_mut()
            .ok_or_else(|| StoreError::WriteError("file not open".to_string()))?;

        writeln!(file, "{}", json)
            .map_err(|e| StoreError::IoError(format!("failed to write: {}", e)))?;
        file.flush()
            .map_err(|e| StoreError::IoError(format!("failed to flush: {}", e)))?;

        Ok(id)
    }

    fn get(&self, id: u64) -> StoreResult<Option<AuditRecord>> {
        Ok(self.read_all_records()?.into_iter().find(|r| r.id == id))
    }

    fn query(&self, query: &LogQuery) -> StoreResult<Vec<AuditRecord>> {
        let mut results: Vec<AuditRecord> = self
            .read_all_records()?
            .into_iter()
            .filter(|r| query.matches(r))
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
        Ok(self
            .read_all_records()?
            .iter()
            .filter(|r| query.matches(r))
            .count() as u64)
    }

    fn total_count(&self) -> StoreResult<u64> {
        Ok(self.read_all_records()?.len() as u64)
    }

    fn delete(&self, id: u64) -> StoreResult<bool> {
        let records = self.read_all_records()?;
        let before = records.len();
        let kept: Vec<AuditRecord> = records.into_iter().filter(|r| r.id != id).collect();

        let removed = kept.len() < before;
        if removed {
            self.rewrite(&kept)?;
        }
        Ok(removed)
    }

    fn delete_all(&self) -> StoreResult<u64> {
        let removed = self.total_count()?;
        self.rewrite(&[])?;
        Ok(removed)
    }

    fn delete_older_than(&self, cutoff: i64) -> StoreResult<u64> {
        let records = self.read_all_records()?;
        let before = records.len();
        let kept: Vec<AuditRecord> = records
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect();

        let removed = (before - kept.len()) as u64;
        if removed > 0 {
            self.rewrite(&kept)?;
        }
        Ok(removed)
    }

    fn nth_newest_timestamp(&self, n: u64) -> StoreResult<Option<i64>> {
        if n == 0 {
            return Ok(None);
        }

        let mut timestamps: Vec<i64> = self
            .read_all_records()?
            .iter()
            .map(|r| r.timestamp)
            .collect();
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        Ok(timestamps.get(n as usize - 1).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::sample_new_record;
    use tempfile::TempDir;

    fn temp_store() -> (FileAuditStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileAuditStore::open(dir.path().join("audit.jsonl")).unwrap();
        (store, dir)
    }

    #[test]
    fn insert_and_get_round_trip() {
        let (store, _dir) = temp_store();

        let id = store.insert(sample_new_record(1_000)).unwrap();
        let record = store.get(id).unwrap().unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.timestamp, 1_000);
    }

    #[test]
    fn ids_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        let first_id = {
            let store = FileAuditStore::open(&path).unwrap();
            store.insert(sample_new_record(1_000)).unwrap()
        };

        let store = FileAuditStore::open(&path).unwrap();
        let second_id = store.insert(sample_new_record(1_001)).unwrap();

        assert!(second_id > first_id);
        assert_eq!(store.total_count().unwrap(), 2);
    }

    #[test]
    fn corrupted_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let store = FileAuditStore::open(&path).unwrap();
            store.insert(sample_new_record(1_000)).unwrap();
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(b"{not json}\n")
            .unwrap();

        let store = FileAuditStore::open(&path).unwrap();
        assert_eq!(store.total_count().unwrap(), 1);
    }

    #[test]
    fn delete_rewrites_the_file() {
        let (store, _dir) = temp_store();

        let id = store.insert(sample_new_record(1_000)).unwrap();
        store.insert(sample_new_record(1_001)).unwrap();

        assert!(store.delete(id).unwrap());
        assert!(!store.delete(id).unwrap());
        assert_eq!(store.total_count().unwrap(), 1);
    }

    #[test]
    fn delete_older_than_keeps_the_cutoff_record() {
        let (store, _dir) = temp_store();
        for ts in [100, 200, 300] {
            store.insert(sample_new_record(ts)).unwrap();
        }

        assert_eq!(store.delete_older_than(200).unwrap(), 1);
        assert_eq!(store.total_count().unwrap(), 2);
        assert_eq!(store.nth_newest_timestamp(2).unwrap(), Some(200));
    }
}
