//! Cluster orchestrator
//!
//! Owns every metadata cache and is the only writer of cluster metadata to
//! the store. Lock order is cluster → database → table.

mod load;
mod node;
mod persist;
mod range;
mod schedule;
mod table;

pub use node::NodeHeartbeat;
pub use range::RangeHeartbeat;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

use metastore::Store;

use crate::alarm::{AlarmDelivery, AlarmMessage, AlarmReporter, CompareType, ReceiverBook};
use crate::cache::{
    CreateTableCache, DbCache, NodeCache, RangeCache, RangeMetaCache, TableCache, UnhealthyRanges,
};
use crate::config::MasterConfig;
use crate::error::{MasterError, Result};
use crate::event::{EventDispatcher, RangeEvent};
use crate::id::{IdGenerator, StoreIdGenerator};
use crate::keys;
use crate::metadata::{RangeId, TableId};
use crate::rpc::RangeServerClient;
use crate::worker::{self, Worker, WorkerManager};

/// Scheduling switches; `true` means the behaviour is disabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSwitches {
    pub failover_disabled: bool,
    pub transfer_disabled: bool,
}

/// Cluster metadata and placement engine
pub struct Cluster {
    cluster_id: u64,
    config: MasterConfig,
    store: Arc<dyn Store>,
    id_gen: Arc<dyn IdGenerator>,
    client: Arc<dyn RangeServerClient>,

    /// Cluster-wide lock for cross-entity operations
    lock: Mutex<()>,
    switches: RwLock<ScheduleSwitches>,
    table_switches: RwLock<HashMap<TableId, ScheduleSwitches>>,

    dbs: DbCache,
    working_tables: TableCache,
    deleting_tables: TableCache,
    creating_tables: CreateTableCache,
    nodes: NodeCache,
    ranges: RangeCache,
    pre_gc_ranges: RangeMetaCache,
    deleted_ranges: RangeMetaCache,
    unhealthy_ranges: UnhealthyRanges,

    workers: WorkerManager,
    events: EventDispatcher,
    alarm: AlarmReporter,
    alarm_delivery: Mutex<Option<AlarmDelivery>>,
    alarm_shutdown: Arc<Notify>,

    closing: AtomicBool,
    closed: AtomicBool,
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cluster")
            .field("cluster_id", &self.cluster_id)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Create an empty cluster; call `load_cache` before `start`
    pub fn new(
        config: MasterConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn RangeServerClient>,
    ) -> Result<Self> {
        let id_gen: Arc<dyn IdGenerator> = Arc::new(StoreIdGenerator::new(store.clone()));
        Self::with_id_generator(config, store, client, id_gen)
    }

    pub fn with_id_generator(
        config: MasterConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn RangeServerClient>,
        id_gen: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;
        let receivers = Arc::new(ReceiverBook::new(config.alarm.receivers.clone()));
        let (alarm, delivery) = AlarmReporter::new(&config.alarm, receivers)
            .map_err(|e| MasterError::Rpc(format!("alarm reporter: {}", e)))?;
        let unhealthy_ranges = UnhealthyRanges::new(config.schedule.unhealthy_range_ttl());

        info!("cluster {} initialized", config.cluster.cluster_id);

        Ok(Self {
            cluster_id: config.cluster.cluster_id,
            config,
            store,
            id_gen,
            client,
            lock: Mutex::new(()),
            switches: RwLock::new(ScheduleSwitches::default()),
            table_switches: RwLock::new(HashMap::new()),
            dbs: DbCache::new(),
            working_tables: TableCache::new(),
            deleting_tables: TableCache::new(),
            creating_tables: CreateTableCache::new(),
            nodes: NodeCache::new(),
            ranges: RangeCache::new(),
            pre_gc_ranges: RangeMetaCache::new(),
            deleted_ranges: RangeMetaCache::new(),
            unhealthy_ranges,
            workers: WorkerManager::new(),
            events: EventDispatcher::new(),
            alarm,
            alarm_delivery: Mutex::new(Some(delivery)),
            alarm_shutdown: Arc::new(Notify::new()),
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn cluster_id(&self) -> u64 {
        self.cluster_id
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(MasterError::Closed);
        }
        Ok(())
    }

    pub(crate) fn gen_id(&self) -> Result<u64> {
        self.id_gen.gen_id()
    }

    pub fn databases(&self) -> &DbCache {
        &self.dbs
    }

    pub fn working_tables(&self) -> &TableCache {
        &self.working_tables
    }

    pub fn deleting_tables(&self) -> &TableCache {
        &self.deleting_tables
    }

    pub fn creating_tables(&self) -> &CreateTableCache {
        &self.creating_tables
    }

    pub fn nodes(&self) -> &NodeCache {
        &self.nodes
    }

    pub fn ranges(&self) -> &RangeCache {
        &self.ranges
    }

    pub fn pre_gc_ranges(&self) -> &RangeMetaCache {
        &self.pre_gc_ranges
    }

    pub fn deleted_ranges(&self) -> &RangeMetaCache {
        &self.deleted_ranges
    }

    pub fn unhealthy_ranges(&self) -> &UnhealthyRanges {
        &self.unhealthy_ranges
    }

    pub fn schedule_switches(&self) -> ScheduleSwitches {
        *self.switches.read()
    }

    pub fn is_auto_failover_enabled(&self) -> bool {
        !self.switches.read().failover_disabled
    }

    pub fn is_auto_transfer_enabled(&self) -> bool {
        !self.switches.read().transfer_disabled
    }

    /// Per-table switches; tables without any are fully enabled
    pub fn table_switches(&self, table_id: TableId) -> ScheduleSwitches {
        self.table_switches
            .read()
            .get(&table_id)
            .copied()
            .unwrap_or_default()
    }

    /// Persist the cluster-wide switches
    ///
    /// Both flags are written in one batch; unchanged values write nothing.
    /// The in-memory switches change only after the commit succeeds.
    pub fn update_auto_schedule_info(
        &self,
        failover_disabled: bool,
        transfer_disabled: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        let next = ScheduleSwitches {
            failover_disabled,
            transfer_disabled,
        };
        if *self.switches.read() == next {
            return Ok(());
        }

        let mut batch = self.store.new_batch();
        batch.put(
            keys::auto_failover_key(self.cluster_id),
            keys::flag_value(failover_disabled),
        );
        batch.put(
            keys::auto_transfer_key(self.cluster_id),
            keys::flag_value(transfer_disabled),
        );
        self.commit(batch)?;

        *self.switches.write() = next;
        info!(
            "auto schedule updated: failover disabled={}, transfer disabled={}",
            failover_disabled, transfer_disabled
        );
        Ok(())
    }

    /// Start the alarm delivery task and the configured workers
    pub fn start(self: &Arc<Self>) -> Result<()> {
        self.ensure_open()?;

        if let Some(delivery) = self.alarm_delivery.lock().take() {
            tokio::spawn(delivery.run(self.alarm_shutdown.clone()));
        }

        let enabled = &self.config.workers.enabled;
        for w in worker::default_workers(&self.config.workers) {
            if enabled.is_empty() || enabled.iter().any(|n| n == w.name()) {
                self.add_worker(w)?;
            }
        }
        info!(
            "cluster {} started with workers {:?}",
            self.cluster_id,
            self.get_all_worker()
        );
        Ok(())
    }

    /// Stop workers, alarm delivery and range server connections
    ///
    /// Safe to call more than once; in-flight worker ticks complete first.
    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.workers.stop_all().await;
        self.alarm_shutdown.notify_one();
        self.client.close();
        self.closed.store(true, Ordering::SeqCst);
        info!("cluster {} closed", self.cluster_id);
    }

    /// Start a background worker
    pub fn add_worker(self: &Arc<Self>, worker: Arc<dyn Worker>) -> Result<()> {
        self.ensure_open()?;
        self.workers.add(Arc::downgrade(self), worker)
    }

    /// Stop a background worker by name
    pub fn remove_worker(&self, name: &str) -> Result<()> {
        self.workers.remove(name)
    }

    /// Names of running workers
    pub fn get_all_worker(&self) -> Vec<String> {
        self.workers.names()
    }

    /// Queue an event; false when the range already has one
    pub fn add_event(&self, event: RangeEvent) -> bool {
        let accepted = self.events.push(event.clone());
        if accepted {
            info!("event queued: {}", event);
        }
        accepted
    }

    pub fn get_event(&self, range_id: RangeId) -> Option<RangeEvent> {
        self.events.peek(range_id)
    }

    pub fn remove_event(&self, range_id: RangeId) -> Option<RangeEvent> {
        self.events.remove(range_id)
    }

    pub fn get_events(&self) -> Vec<RangeEvent> {
        self.events.events()
    }

    /// Queue an alarm for this cluster
    pub fn report_alarm(
        &self,
        rule_name: &str,
        alarm_value: f64,
        compare_type: CompareType,
        threshold: f64,
        remarks: Vec<String>,
    ) {
        let accepted = self.alarm.report(AlarmMessage {
            cluster_id: self.cluster_id,
            app_name: "master".to_string(),
            ip_addr: format!("master-{}", self.config.cluster.node_id),
            rule_name: rule_name.to_string(),
            alarm_value,
            compare_type,
            threshold,
            remarks,
        });
        if !accepted {
            warn!("alarm {} dropped", rule_name);
        }
    }
}
