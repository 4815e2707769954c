//! Shared test fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use master::metadata::{Peer, PeerId, RangeEpoch, RangeId, RangeMeta};
use master::schema::{Column, DataType};
use master::{Cluster, MasterConfig, MasterError, RangeServerClient, Result};
use metastore::{MemoryStore, ScanIter, Store, StoreError, StoreResult, WriteBatch};

/// Call recorded by `MockRangeServer`
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateRange { addr: String, range_id: RangeId },
    DeleteRange { addr: String, range_id: RangeId, peer_id: PeerId },
    ChangePeer { addr: String, range_id: RangeId, remove: Option<Peer>, add: Option<Peer> },
    TransferLeader { addr: String, range_id: RangeId, to: Peer },
}

/// Range server client that records every call
#[derive(Default)]
pub struct MockRangeServer {
    calls: Mutex<Vec<Call>>,
    pub fail_create: AtomicBool,
    /// Refuse creates on this address only
    pub fail_create_on: Mutex<Option<String>>,
    pub fail_delete: AtomicBool,
    pub closed: AtomicBool,
    /// Runs after every accepted create
    pub on_create: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl MockRangeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn create_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::CreateRange { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl RangeServerClient for MockRangeServer {
    async fn create_range(&self, addr: &str, range: &RangeMeta) -> Result<()> {
        if self.fail_create.load(Ordering::SeqCst)
            || self.fail_create_on.lock().as_deref() == Some(addr)
        {
            return Err(MasterError::Rpc("create refused".to_string()));
        }
        self.record(Call::CreateRange {
            addr: addr.to_string(),
            range_id: range.id,
        });
        if let Some(hook) = self.on_create.lock().as_ref() {
            hook();
        }
        Ok(())
    }

    async fn delete_range(&self, addr: &str, range_id: RangeId, peer_id: PeerId) -> Result<()> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(MasterError::Rpc("delete refused".to_string()));
        }
        self.record(Call::DeleteRange {
            addr: addr.to_string(),
            range_id,
            peer_id,
        });
        Ok(())
    }

    async fn change_peer(
        &self,
        addr: &str,
        range_id: RangeId,
        _epoch: RangeEpoch,
        remove: Option<Peer>,
        add: Option<Peer>,
    ) -> Result<()> {
        self.record(Call::ChangePeer {
            addr: addr.to_string(),
            range_id,
            remove,
            add,
        });
        Ok(())
    }

    async fn transfer_leader(&self, addr: &str, range_id: RangeId, to: Peer) -> Result<()> {
        self.record(Call::TransferLeader {
            addr: addr.to_string(),
            range_id,
            to,
        });
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Store wrapper counting committed batches
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    batches: AtomicUsize,
    pub fail_batches: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

impl Store for CountingStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.delete(key)
    }

    fn scan(&self, start: &[u8], end: &[u8]) -> StoreResult<ScanIter<'_>> {
        self.inner.scan(start, end)
    }

    fn write_batch(&self, batch: WriteBatch) -> StoreResult<()> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.write_batch(batch)
    }
}

/// Config with fast worker intervals and an unreachable alarm gateway
pub fn test_config() -> MasterConfig {
    let mut config = MasterConfig::default();
    config.alarm.gateway_addr = "http://127.0.0.1:1/alarm".to_string();
    config.alarm.request_timeout_secs = 1;
    config.workers.failover_interval_ms = 20;
    config.workers.delete_table_interval_ms = 20;
    config.workers.trash_replica_gc_interval_ms = 20;
    config.workers.create_table_interval_ms = 20;
    config.workers.range_hb_check_interval_ms = 20;
    config.workers.balance_leader_interval_ms = 20;
    config.workers.balance_range_interval_ms = 20;
    config.workers.balance_node_ops_interval_ms = 20;
    config.workers.event_dispatch_interval_ms = 20;
    config
}

pub struct TestCluster {
    pub cluster: Arc<Cluster>,
    pub store: Arc<CountingStore>,
    pub client: Arc<MockRangeServer>,
}

impl TestCluster {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: MasterConfig) -> Self {
        let store = CountingStore::new();
        Self::open(config, store)
    }

    /// Cluster over an existing store, caches loaded
    pub fn reopen(store: Arc<CountingStore>) -> Result<Self> {
        let t = Self::open(test_config(), store);
        t.cluster.load_cache()?;
        Ok(t)
    }

    fn open(config: MasterConfig, store: Arc<CountingStore>) -> Self {
        let client = MockRangeServer::new();
        let cluster = Cluster::new(config, store.clone(), client.clone()).unwrap();
        Self {
            cluster: Arc::new(cluster),
            store,
            client,
        }
    }

    /// Register `n` nodes on distinct IPs
    pub fn add_nodes(&self, n: usize) -> Vec<u64> {
        (0..n)
            .map(|i| {
                self.cluster
                    .add_node(&format!("10.0.0.{}:6060", i + 1))
                    .unwrap()
                    .id()
            })
            .collect()
    }
}

pub fn columns() -> Vec<Column> {
    vec![
        Column::primary("id", DataType::Varchar),
        Column::new("value", DataType::Binary),
    ]
}

pub fn split_keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}
