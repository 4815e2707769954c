//! Storage trait and batch types

/// Storage error
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("store is closed")]
    Closed,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A key and its value
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Iterator returned by `Store::scan`, in ascending key order
pub type ScanIter<'a> = Box<dyn Iterator<Item = StoreResult<KvPair>> + Send + 'a>;

/// Single mutation inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Ordered set of mutations applied atomically by `Store::write_batch`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Ordered key-value store
///
/// Keys are opaque byte strings; callers own every prefix convention.
pub trait Store: Send + Sync {
    /// Read a single key
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Write a single key
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove a single key (no-op when absent)
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Iterate `[start, end)`; an empty `end` means unbounded
    fn scan(&self, start: &[u8], end: &[u8]) -> StoreResult<ScanIter<'_>>;

    /// Apply every operation of `batch` atomically, in order
    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()>;

    /// Start an empty batch
    fn new_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }
}
