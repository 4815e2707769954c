//! In-memory ordered store

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

use crate::store::{BatchOp, ScanIter, Store, StoreResult, WriteBatch};

/// `BTreeMap`-backed store
///
/// A batch is applied under a single write lock, so readers observe either
/// none or all of its operations.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> StoreResult<ScanIter<'_>> {
        let upper = if end.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Excluded(end.to_vec())
        };
        // Snapshot the range so the lock is not held by the caller
        let pairs: Vec<_> = self
            .data
            .read()
            .range((Bound::Included(start.to_vec()), upper))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(pairs.into_iter().map(Ok)))
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut data = self.data.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    data.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }
}
