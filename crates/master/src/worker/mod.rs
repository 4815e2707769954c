//! Background workers
//!
//! Each worker runs on its own interval in a dedicated task and calls back
//! into the cluster's public operations. Workers are started and stopped by
//! name at runtime.

mod tasks;

pub use tasks::{
    BalanceLeaderWorker, BalanceNodeOpsWorker, BalanceRangeWorker, CreateTableWorker,
    DeleteTableWorker, EventDispatchWorker, FailoverWorker, RangeHbCheckWorker,
    TrashReplicaGcWorker,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cluster::Cluster;
use crate::config::WorkerConfig;
use crate::error::{MasterError, Result};

pub const FAILOVER: &str = "failover";
pub const DELETE_TABLE: &str = "delete_table";
pub const TRASH_REPLICA_GC: &str = "trash_replica_gc";
pub const CREATE_TABLE: &str = "create_table";
pub const RANGE_HB_CHECK: &str = "range_hb_check";
pub const BALANCE_LEADER: &str = "balance_leader";
pub const BALANCE_RANGE: &str = "balance_range";
pub const BALANCE_NODE_OPS: &str = "balance_node_ops";
pub const EVENT_DISPATCHER: &str = "event_dispatcher";

/// Periodic background task
#[async_trait]
pub trait Worker: Send + Sync {
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    /// One tick; errors are logged and the next tick runs as scheduled
    async fn work(&self, cluster: &Cluster) -> Result<()>;
}

/// Every worker the cluster knows, with intervals from `config`
pub fn default_workers(config: &WorkerConfig) -> Vec<Arc<dyn Worker>> {
    let ms = Duration::from_millis;
    vec![
        Arc::new(FailoverWorker::new(ms(config.failover_interval_ms))),
        Arc::new(DeleteTableWorker::new(ms(config.delete_table_interval_ms))),
        Arc::new(TrashReplicaGcWorker::new(ms(config.trash_replica_gc_interval_ms))),
        Arc::new(CreateTableWorker::new(ms(config.create_table_interval_ms))),
        Arc::new(RangeHbCheckWorker::new(ms(config.range_hb_check_interval_ms))),
        Arc::new(BalanceLeaderWorker::new(ms(config.balance_leader_interval_ms))),
        Arc::new(BalanceRangeWorker::new(ms(config.balance_range_interval_ms))),
        Arc::new(BalanceNodeOpsWorker::new(ms(config.balance_node_ops_interval_ms))),
        Arc::new(EventDispatchWorker::new(ms(config.event_dispatch_interval_ms))),
    ]
}

struct WorkerHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// Running workers by name
#[derive(Default)]
pub struct WorkerManager {
    workers: Mutex<BTreeMap<String, WorkerHandle>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `worker`; fails if a worker with the same name runs
    pub fn add(&self, cluster: Weak<Cluster>, worker: Arc<dyn Worker>) -> Result<()> {
        let name = worker.name();
        let mut workers = self.workers.lock();
        if workers.contains_key(name) {
            return Err(MasterError::duplicate("worker", name));
        }

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(run_worker(cluster, worker.clone(), shutdown.clone()));
        workers.insert(name.to_string(), WorkerHandle { shutdown, handle });
        info!("worker {} started, interval {:?}", name, worker.interval());
        Ok(())
    }

    /// Signal a worker to stop after its current tick
    pub fn remove(&self, name: &str) -> Result<()> {
        let handle = self
            .workers
            .lock()
            .remove(name)
            .ok_or_else(|| MasterError::not_found("worker", name))?;
        handle.shutdown.notify_one();
        info!("worker {} stopped", name);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        self.workers.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop every worker and wait for their tasks to finish
    pub async fn stop_all(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers.values() {
            handle.shutdown.notify_one();
        }
        for (name, handle) in workers {
            if let Err(e) = handle.handle.await {
                error!("worker {} task failed: {}", name, e);
            }
        }
    }
}

async fn run_worker(cluster: Weak<Cluster>, worker: Arc<dyn Worker>, shutdown: Arc<Notify>) {
    let mut ticker = interval(worker.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            _ = ticker.tick() => {}
        }

        let Some(cluster) = cluster.upgrade() else {
            break;
        };
        debug!("worker {} tick", worker.name());
        if let Err(e) = worker.work(&cluster).await {
            if e.is_persistence() {
                error!("worker {} failed: {}", worker.name(), e);
            } else {
                warn!("worker {} failed: {}", worker.name(), e);
            }
        }
    }
    debug!("worker {} exited", worker.name());
}
