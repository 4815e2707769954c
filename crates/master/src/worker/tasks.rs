//! Worker implementations

use async_trait::async_trait;
use std::time::Duration;

use super::{
    Worker, BALANCE_LEADER, BALANCE_NODE_OPS, BALANCE_RANGE, CREATE_TABLE, DELETE_TABLE,
    EVENT_DISPATCHER, FAILOVER, RANGE_HB_CHECK, TRASH_REPLICA_GC,
};
use crate::cluster::Cluster;
use crate::error::Result;

/// Marks silent nodes offline and queues peer changes for ranges missing
/// healthy replicas
pub struct FailoverWorker {
    interval: Duration,
}

impl FailoverWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for FailoverWorker {
    fn name(&self) -> &'static str {
        FAILOVER
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.check_node_heartbeats()?;
        if !cluster.is_auto_failover_enabled() {
            return Ok(());
        }
        cluster.schedule_failover();
        Ok(())
    }
}

/// Physically removes deleted tables past their retention window
pub struct DeleteTableWorker {
    interval: Duration,
}

impl DeleteTableWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for DeleteTableWorker {
    fn name(&self) -> &'static str {
        DELETE_TABLE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.purge_deleted_tables().map(|_| ())
    }
}

/// Collects trash replicas and pre-GC ranges on their nodes
pub struct TrashReplicaGcWorker {
    interval: Duration,
}

impl TrashReplicaGcWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for TrashReplicaGcWorker {
    fn name(&self) -> &'static str {
        TRASH_REPLICA_GC
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.gc_trash_replicas().await?;
        cluster.flush_pre_gc_ranges().await
    }
}

/// Creates the pending ranges of tables under creation
pub struct CreateTableWorker {
    interval: Duration,
}

impl CreateTableWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for CreateTableWorker {
    fn name(&self) -> &'static str {
        CREATE_TABLE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.progress_creating_tables().await
    }
}

/// Flags ranges whose heartbeat went silent
pub struct RangeHbCheckWorker {
    interval: Duration,
}

impl RangeHbCheckWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for RangeHbCheckWorker {
    fn name(&self) -> &'static str {
        RANGE_HB_CHECK
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.check_range_heartbeats();
        Ok(())
    }
}

/// Evens out leader counts across nodes
pub struct BalanceLeaderWorker {
    interval: Duration,
}

impl BalanceLeaderWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for BalanceLeaderWorker {
    fn name(&self) -> &'static str {
        BALANCE_LEADER
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        if cluster.is_auto_transfer_enabled() {
            cluster.balance_leaders();
        }
        Ok(())
    }
}

/// Evens out range counts across nodes
pub struct BalanceRangeWorker {
    interval: Duration,
}

impl BalanceRangeWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for BalanceRangeWorker {
    fn name(&self) -> &'static str {
        BALANCE_RANGE
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        if cluster.is_auto_transfer_enabled() {
            cluster.balance_ranges();
        }
        Ok(())
    }
}

/// Moves leadership away from nodes with outsized write load
pub struct BalanceNodeOpsWorker {
    interval: Duration,
}

impl BalanceNodeOpsWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for BalanceNodeOpsWorker {
    fn name(&self) -> &'static str {
        BALANCE_NODE_OPS
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        if cluster.is_auto_transfer_enabled() {
            cluster.balance_node_ops();
        }
        Ok(())
    }
}

/// Executes queued range events
pub struct EventDispatchWorker {
    interval: Duration,
}

impl EventDispatchWorker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Worker for EventDispatchWorker {
    fn name(&self) -> &'static str {
        EVENT_DISPATCHER
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn work(&self, cluster: &Cluster) -> Result<()> {
        cluster.dispatch_events().await;
        Ok(())
    }
}
