//! RocksDB-backed durable store.
//!
//! Thin wrapper exposing exactly the surface the record stores need:
//! point reads/writes, atomic multi-row batches, and ordered scans. All
//! commit-step atomicity in the engine reduces to one `batch_write` here.

use crate::config::StorageConfig;
use crate::errors::{FairspinResult, StorageError};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;

#[derive(Clone)]
pub struct Storage {
    db: Arc<DB>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(path: P, config: &StorageConfig) -> FairspinResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(config.write_buffer_size_mb * 1024 * 1024);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_target_file_size_base(config.target_file_size_mb * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn get(&self, key: &[u8]) -> FairspinResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> FairspinResult<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// Write every row in one atomic batch. Either all rows land or none do.
    pub fn batch_write(&self, items: &[(Vec<u8>, Vec<u8>)]) -> FairspinResult<()> {
        let mut batch = WriteBatch::default();
        for (key, value) in items {
            batch.put(key, value);
        }
        self.db
            .write(batch)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    /// All rows whose key starts with `prefix`, in key order, up to `limit`.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        limit: usize,
    ) -> FairspinResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) =
                item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Rows with `start <= key < end`, in key order.
    pub fn scan_range(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> FairspinResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(start, Direction::Forward));
        for item in iter {
            let (key, value) =
                item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if key.as_ref() >= end {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    /// Count of rows under `prefix`; used for windowed frequency checks.
    pub fn count_prefix(&self, prefix: &[u8]) -> FairspinResult<usize> {
        let mut count = 0usize;
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn temp_storage() -> (tempfile::TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), &StorageConfig::default()).unwrap();
        (dir, storage)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, storage) = temp_storage();
        storage.put(b"k1", b"v1").unwrap();
        assert_eq!(storage.get(b"k1").unwrap(), Some(b"v1".to_vec()));
        assert_eq!(storage.get(b"missing").unwrap(), None);
    }

    #[test]
    fn batch_write_is_atomic_per_call() {
        let (_dir, storage) = temp_storage();
        let items = vec![
            (b"a:1".to_vec(), b"one".to_vec()),
            (b"a:2".to_vec(), b"two".to_vec()),
            (b"b:1".to_vec(), b"three".to_vec()),
        ];
        storage.batch_write(&items).unwrap();
        assert_eq!(storage.scan_prefix(b"a:", 10).unwrap().len(), 2);
        assert_eq!(storage.count_prefix(b"b:").unwrap(), 1);
    }

    #[test]
    fn scan_range_is_half_open() {
        let (_dir, storage) = temp_storage();
        for i in 0u8..5 {
            storage.put(&[b't', i], &[i]).unwrap();
        }
        let rows = storage.scan_range(&[b't', 1], &[b't', 4]).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, vec![b't', 1]);
        assert_eq!(rows[2].0, vec![b't', 3]);
    }
}
