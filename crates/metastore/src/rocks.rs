//! RocksDB-backed store

use rocksdb::{Direction, IteratorMode, Options, ReadOptions, WriteOptions, DB};
use std::path::Path;
use tracing::info;

use crate::store::{BatchOp, ScanIter, Store, StoreError, StoreResult, WriteBatch};

fn backend(e: rocksdb::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Metadata store on a single RocksDB instance
///
/// Every write is synced: metadata volume is small and losing an
/// acknowledged commit would break the master's invariants.
pub struct RocksStore {
    db: DB,
    path: String,
    write_opts: WriteOptions,
}

impl RocksStore {
    /// Open (or create) a store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, &path_str).map_err(backend)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);

        info!("RocksDB metastore opened at: {}", path_str);

        Ok(Self {
            db,
            path: path_str,
            write_opts,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Store for RocksStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.db.get(key).map_err(backend)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.db
            .put_opt(key, value, &self.write_opts)
            .map_err(backend)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.db.delete_opt(key, &self.write_opts).map_err(backend)
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> StoreResult<ScanIter<'_>> {
        let mut read_opts = ReadOptions::default();
        if !end.is_empty() {
            read_opts.set_iterate_upper_bound(end.to_vec());
        }
        let iter = self
            .db
            .iterator_opt(IteratorMode::From(start, Direction::Forward), read_opts);

        let mut pairs = Vec::new();
        for item in iter {
            let (key, value) = item.map_err(backend)?;
            pairs.push((key.to_vec(), value.to_vec()));
        }
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut wb = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => wb.put(key, value),
                BatchOp::Delete { key } => wb.delete(key),
            }
        }
        self.db.write_opt(wb, &self.write_opts).map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix_range;
    use tempfile::TempDir;

    #[test]
    fn test_rocks_store_roundtrip_and_scan() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksStore::open(temp_dir.path()).unwrap();

        let mut batch = store.new_batch();
        batch.put(b"schema node 1".to_vec(), b"n1".to_vec());
        batch.put(b"schema node 2".to_vec(), b"n2".to_vec());
        batch.put(b"schema range 1".to_vec(), b"r1".to_vec());
        store.write_batch(batch).unwrap();

        let (start, end) = prefix_range(b"schema node ");
        let nodes: Vec<_> = store.scan(&start, &end).unwrap().map(|kv| kv.unwrap().1).collect();
        assert_eq!(nodes, vec![b"n1".to_vec(), b"n2".to_vec()]);

        store.delete(b"schema node 1").unwrap();
        assert_eq!(store.get(b"schema node 1").unwrap(), None);
    }

    #[test]
    fn test_rocks_store_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = RocksStore::open(temp_dir.path()).unwrap();
            store.put(b"$auto_increment_id", &7u64.to_be_bytes()).unwrap();
        }
        let store = RocksStore::open(temp_dir.path()).unwrap();
        assert_eq!(
            store.get(b"$auto_increment_id").unwrap(),
            Some(7u64.to_be_bytes().to_vec())
        );
    }
}
