//! Metastore - ordered key-value storage for cluster metadata
//!
//! The master keeps every piece of persistent metadata in a single ordered
//! key space. This crate provides the storage contract it relies on:
//!
//! - point reads and writes (`get` / `put` / `delete`)
//! - half-open range scans (`scan(start, end)`)
//! - atomic multi-key batches (`WriteBatch` + `Store::write_batch`)
//!
//! ## Backends
//!
//! - `MemoryStore`: `BTreeMap` behind a `parking_lot::RwLock`, used by tests
//!   and single-process deployments
//! - `RocksStore`: RocksDB-backed (enable the `rocksdb` feature)

mod key;
mod memory;
#[cfg(feature = "rocksdb")]
mod rocks;
mod store;

pub use key::{prefix_end, prefix_range};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStore;
pub use store::{BatchOp, KvPair, ScanIter, Store, StoreError, StoreResult, WriteBatch};
