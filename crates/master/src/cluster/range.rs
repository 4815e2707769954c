//! Range lifecycle, placement and event execution

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use super::persist::{put_entity, range_delete_ops};
use super::Cluster;
use crate::error::{MasterError, Result};
use crate::event::{EventKind, RangeEvent};
use crate::keys;
use crate::metadata::{
    DownPeer, Node, Peer, Range, RangeEpoch, RangeId, RangeMeta, RangeStats, RangeToCreate,
    Replica, Table,
};
use crate::scheduler::{self, select_node};

/// Range state reported by its leader
#[derive(Debug, Clone)]
pub struct RangeHeartbeat {
    pub range: RangeMeta,
    pub leader: Option<Peer>,
    pub down_peers: Vec<DownPeer>,
    pub stats: RangeStats,
}

impl Cluster {
    pub fn find_range(&self, id: RangeId) -> Result<Range> {
        self.ranges
            .find(id)
            .ok_or_else(|| MasterError::not_found("range", id))
    }

    /// Persist and cache a new range
    ///
    /// The owning table must be live and the interval must not overlap a
    /// sibling range.
    pub fn add_range(&self, meta: RangeMeta) -> Result<()> {
        self.ensure_open()?;
        if !self.working_tables.contains(meta.table_id) {
            return Err(MasterError::not_found("table", meta.table_id));
        }
        if self.ranges.contains(meta.id) {
            return Err(MasterError::duplicate("range", meta.id));
        }
        self.ranges.add(Range::new(meta.clone(), None))?;
        if let Err(e) = self.put_one(keys::range_key(meta.id), &meta) {
            self.ranges.remove(meta.id);
            return Err(e);
        }
        debug!("range {} of table {} added", meta.id, meta.table_id);
        Ok(())
    }

    /// Delete a live range
    ///
    /// One batch writes a trash replica per peer, removes the range record
    /// and stores the deleted-range snapshot.
    pub fn delete_range(&self, id: RangeId) -> Result<()> {
        let range = self.find_range(id)?;
        let mut batch = self.store.new_batch();
        let replicas = range_delete_ops(&mut batch, &range.meta)?;
        self.commit(batch)?;

        self.ranges.remove(id);
        self.unhealthy_ranges.clear(id);
        for replica in replicas {
            self.add_trash_replica(replica);
        }
        self.deleted_ranges.add(range.meta);
        info!("range {} deleted", id);
        Ok(())
    }

    /// Swap `old_id` for `new` in one batch; peers in `to_gc` become trash
    pub fn replace_range(&self, old_id: RangeId, new: RangeMeta, to_gc: Vec<Peer>) -> Result<()> {
        self.ensure_open()?;
        let old = self.find_range(old_id)?;
        if old.table_id() != new.table_id {
            return Err(MasterError::IllegalState(format!(
                "range {} of table {} cannot replace range {} of table {}",
                new.id,
                new.table_id,
                old_id,
                old.table_id()
            )));
        }

        self.ranges.remove(old_id);
        if let Err(e) = self.ranges.add(Range::new(new.clone(), None)) {
            self.restore_range(old);
            return Err(e);
        }

        let replicas = match self.commit_replace(&old.meta, &new, &to_gc) {
            Ok(replicas) => replicas,
            Err(e) => {
                self.ranges.remove(new.id);
                self.restore_range(old);
                return Err(e);
            }
        };

        for replica in replicas {
            self.add_trash_replica(replica);
        }
        info!("range {} replaced by range {}", old_id, new.id);
        Ok(())
    }

    fn commit_replace(&self, old: &RangeMeta, new: &RangeMeta, to_gc: &[Peer]) -> Result<Vec<Replica>> {
        let mut batch = self.store.new_batch();
        batch.delete(keys::range_key(old.id));
        put_entity(&mut batch, keys::range_key(new.id), new)?;
        let mut replicas = Vec::with_capacity(to_gc.len());
        for peer in to_gc {
            let replica = Replica::of(old, *peer);
            put_entity(&mut batch, keys::replica_key(peer.id), &replica)?;
            replicas.push(replica);
        }
        self.commit(batch)?;
        Ok(replicas)
    }

    fn restore_range(&self, range: Range) {
        let id = range.id();
        if let Err(e) = self.ranges.add(range) {
            error!("restore range {} failed: {}", id, e);
        }
    }

    /// Apply a leader report
    ///
    /// A report older than the cached epoch fails with `StaleEpoch`. A newer
    /// epoch is persisted; peers that left the range become trash replicas.
    pub fn range_heartbeat(&self, report: RangeHeartbeat) -> Result<()> {
        self.ensure_open()?;
        let id = report.range.id;
        let cached = self.find_range(id)?;
        let got = report.range.epoch;
        let current = cached.meta.epoch;
        if got.is_stale(&current) {
            warn!("range {} heartbeat with stale epoch {} < {}", id, got, current);
            return Err(MasterError::StaleEpoch {
                kind: "range",
                id,
                got: got.to_string(),
                current: current.to_string(),
            });
        }

        let mut meta = cached.meta.clone();
        let mut removed = Vec::new();
        if got != current {
            let next = RangeMeta {
                table_id: cached.meta.table_id,
                primary_keys: cached.meta.primary_keys.clone(),
                ..report.range.clone()
            };
            removed = cached
                .meta
                .peers
                .iter()
                .filter(|p| !next.peers.iter().any(|n| n.id == p.id))
                .map(|p| Replica::of(&cached.meta, *p))
                .collect::<Vec<_>>();

            self.ranges.check_overlap(&next)?;
            let mut batch = self.store.new_batch();
            put_entity(&mut batch, keys::range_key(id), &next)?;
            for replica in &removed {
                put_entity(&mut batch, keys::replica_key(replica.peer.id), replica)?;
            }
            self.commit(batch)?;
            info!("range {} epoch {} -> {}", id, current, got);
            meta = next;
        }

        let bounds_changed =
            meta.start_key != cached.meta.start_key || meta.end_key != cached.meta.end_key;
        let now = Utc::now();
        if bounds_changed {
            let mut range = Range::new(meta, report.leader);
            range.down_peers = report.down_peers;
            range.stats = report.stats;
            range.last_heartbeat = Some(now);
            self.ranges.add(range)?;
        } else {
            self.ranges.update(id, |range| {
                range.meta = meta;
                range.leader = report.leader;
                range.down_peers = report.down_peers;
                range.stats = report.stats;
                range.last_heartbeat = Some(now);
            });
        }

        self.unhealthy_ranges.clear(id);
        for replica in removed {
            self.add_trash_replica(replica);
        }
        Ok(())
    }

    /// Stage a range snapshot for garbage collection
    pub fn add_pre_gc_range(&self, meta: RangeMeta) -> Result<()> {
        self.put_one(keys::pre_gc_key(meta.id), &meta)?;
        self.pre_gc_ranges.add(meta);
        Ok(())
    }

    pub fn remove_pre_gc_range(&self, id: RangeId) -> Result<()> {
        self.delete_one(keys::pre_gc_key(id))?;
        self.pre_gc_ranges.remove(id);
        Ok(())
    }

    /// Flag ranges whose last heartbeat is older than the timeout
    pub fn check_range_heartbeats(&self) -> Vec<RangeId> {
        let timeout = chrono::Duration::seconds(
            self.config.schedule.range_heartbeat_timeout_secs as i64,
        );
        let now = Utc::now();
        let mut silent = Vec::new();
        for range in self.ranges.all() {
            // Ranges never heard from are not flagged until they had a chance
            let Some(last) = range.last_heartbeat else {
                continue;
            };
            if now - last > timeout {
                self.unhealthy_ranges.mark(range.id());
                silent.push(range.id());
            }
        }
        if !silent.is_empty() {
            warn!("{} ranges missed heartbeats: {:?}", silent.len(), silent);
        }
        silent
    }

    /// Pick a node for a new peer of `range`
    ///
    /// The node must pass the selector pipeline, which excludes every IP
    /// already hosting a peer of the range.
    pub fn select_node_for_add_peer(&self, range: &Range) -> Result<Node> {
        let ips: HashSet<String> = range
            .peers()
            .iter()
            .filter_map(|p| self.nodes.find(p.node_id))
            .map(|n| n.ip().to_string())
            .collect();
        let selectors = scheduler::add_peer_pipeline(ips, &self.config.schedule);
        let nodes = self.nodes.all();
        select_node(&nodes, &selectors)
            .cloned()
            .ok_or(MasterError::NoEligibleNode { range_id: range.id() })
    }

    /// Allocate a peer id and pick its node
    pub fn alloc_peer_and_select_node(&self, range: &Range) -> Result<(Peer, Node)> {
        let node = self.select_node_for_add_peer(range)?;
        let peer = Peer {
            id: self.gen_id()?,
            node_id: node.id(),
        };
        Ok((peer, node))
    }

    /// Nodes for the replicas of a new range, up to `replica_num`
    fn select_nodes_for_new_range(&self, range_id: RangeId) -> Result<Vec<Node>> {
        let nodes = self.nodes.all();
        let mut chosen: Vec<Node> = Vec::new();
        while chosen.len() < self.config.schedule.replica_num {
            let ips = chosen.iter().map(|n| n.ip().to_string()).collect();
            let selectors = scheduler::add_peer_pipeline(ips, &self.config.schedule);
            match select_node(&nodes, &selectors) {
                Some(node) => chosen.push(node.clone()),
                None => break,
            }
        }
        if chosen.is_empty() {
            return Err(MasterError::NoEligibleNode { range_id });
        }
        if chosen.len() < self.config.schedule.replica_num {
            warn!(
                "range {} placed on {} of {} replicas",
                range_id,
                chosen.len(),
                self.config.schedule.replica_num
            );
        }
        Ok(chosen)
    }

    /// Create the range covering `req` on freshly selected nodes
    pub(super) async fn create_range_by_scope(&self, table: &Table, req: &RangeToCreate) -> Result<RangeId> {
        let snapshot = table.snapshot();
        let range_id = self.gen_id()?;
        let nodes = self.select_nodes_for_new_range(range_id)?;
        let mut peers = Vec::with_capacity(nodes.len());
        for node in &nodes {
            peers.push(Peer {
                id: self.gen_id()?,
                node_id: node.id(),
            });
        }
        let meta = RangeMeta {
            id: range_id,
            start_key: req.start_key.clone(),
            end_key: req.end_key.clone(),
            epoch: RangeEpoch::default(),
            table_id: snapshot.id,
            primary_keys: snapshot.pk_columns(),
            peers,
        };

        let mut created = Vec::with_capacity(nodes.len());
        for (node, peer) in nodes.iter().zip(&meta.peers) {
            if let Err(e) = self.client.create_range(node.address(), &meta).await {
                self.trash_created_peers(&meta, &created);
                return Err(e);
            }
            created.push(*peer);
        }
        // The table may have been canceled while the calls were in flight
        if let Err(e) = self.add_range(meta.clone()) {
            self.trash_created_peers(&meta, &created);
            return Err(e);
        }
        for node in &nodes {
            self.nodes.update(node.id(), |n| n.stats.range_count += 1);
        }
        Ok(range_id)
    }

    /// Record peers created remotely for a range that never reached the
    /// cache, so the trash GC removes them
    fn trash_created_peers(&self, meta: &RangeMeta, created: &[Peer]) {
        if created.is_empty() {
            return;
        }
        let mut batch = self.store.new_batch();
        let mut replicas = Vec::with_capacity(created.len());
        for peer in created {
            let replica = Replica::of(meta, *peer);
            if let Err(e) = put_entity(&mut batch, keys::replica_key(peer.id), &replica) {
                error!("range {}: encode trash replica {}: {}", meta.id, peer.id, e);
                return;
            }
            replicas.push(replica);
        }
        if self.commit(batch).is_err() {
            return;
        }
        for replica in replicas {
            self.add_trash_replica(replica);
        }
        warn!(
            "range {} not created, {} replicas left for gc",
            meta.id,
            created.len()
        );
    }

    /// Execute every queued event once
    ///
    /// Events leave the queue whatever the outcome; the detecting worker
    /// queues them again if the condition persists.
    pub async fn dispatch_events(&self) {
        for event in self.events.events() {
            match self.execute_event(&event).await {
                Ok(()) => info!("event done: {}", event),
                Err(e) => warn!("event failed: {}: {}", event, e),
            }
            self.events.remove(event.range_id);
        }
    }

    /// Send the command of `event` to the range leader
    pub async fn execute_event(&self, event: &RangeEvent) -> Result<()> {
        let range = self.find_range(event.range_id)?;
        let leader = range.leader_node().ok_or_else(|| {
            MasterError::IllegalState(format!("range {} has no leader", range.id()))
        })?;
        let addr = self
            .nodes
            .find(leader)
            .map(|n| n.address().to_string())
            .ok_or_else(|| MasterError::not_found("node", leader))?;

        match &event.kind {
            EventKind::ChangePeer { remove, add_node } => {
                let add = match add_node {
                    Some(node_id) => Some(Peer {
                        id: self.gen_id()?,
                        node_id: *node_id,
                    }),
                    None => None,
                };
                self.client
                    .change_peer(&addr, range.id(), range.meta.epoch, *remove, add)
                    .await
            }
            EventKind::TransferLeader { to } => {
                self.client.transfer_leader(&addr, range.id(), *to).await
            }
        }
    }

    /// Queue an event built by a detection path
    pub(super) fn push_event(&self, range_id: RangeId, kind: EventKind, source: &'static str) -> bool {
        self.add_event(RangeEvent::new(range_id, kind, source))
    }
}
