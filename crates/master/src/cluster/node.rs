//! Node lifecycle and replica garbage collection

use chrono::Utc;
use tracing::{info, warn};

use super::Cluster;
use crate::alarm::CompareType;
use crate::error::{MasterError, Result};
use crate::keys;
use crate::metadata::{Node, NodeId, NodeMeta, NodeState, Replica};

/// Load statistics reported by a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeHeartbeat {
    pub node_id: NodeId,
    pub range_count: u64,
    pub leader_count: u64,
    pub write_ops: u64,
    pub used_size: u64,
    pub capacity: u64,
}

impl Cluster {
    pub fn find_node(&self, id: NodeId) -> Result<Node> {
        self.nodes
            .find(id)
            .ok_or_else(|| MasterError::not_found("node", id))
    }

    /// Register a node; a known address returns the existing node
    pub fn add_node(&self, address: &str) -> Result<Node> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        if let Some(node) = self.nodes.all().into_iter().find(|n| n.address() == address) {
            if node.meta.state == NodeState::Tombstone {
                return Err(MasterError::IllegalState(format!(
                    "node {} at {} is decommissioned",
                    node.id(),
                    address
                )));
            }
            info!("node {} re-registered at {}", node.id(), address);
            return Ok(node);
        }

        let meta = NodeMeta {
            id: self.gen_id()?,
            address: address.to_string(),
            state: NodeState::Login,
            create_time: Utc::now().timestamp(),
        };
        self.put_one(keys::node_key(meta.id), &meta)?;
        let node = Node::new(meta);
        self.nodes.add(node.clone());
        info!("node {} registered at {}", node.id(), address);
        Ok(node)
    }

    /// Record node statistics; an offline node comes back online
    pub fn node_heartbeat(&self, hb: NodeHeartbeat) -> Result<()> {
        self.ensure_open()?;
        let node = self.find_node(hb.node_id)?;
        if node.meta.state == NodeState::Offline {
            self.set_node_state(hb.node_id, NodeState::Login)?;
            info!("node {} is back online", hb.node_id);
        }
        self.nodes.update(hb.node_id, |n| {
            n.stats.range_count = hb.range_count;
            n.stats.leader_count = hb.leader_count;
            n.stats.write_ops = hb.write_ops;
            n.stats.used_size = hb.used_size;
            n.stats.capacity = hb.capacity;
            n.stats.last_heartbeat = Some(Utc::now());
        });
        Ok(())
    }

    pub fn set_node_state(&self, id: NodeId, state: NodeState) -> Result<()> {
        let node = self.find_node(id)?;
        let prev = node.meta.state;
        if prev == state {
            return Ok(());
        }
        let meta = NodeMeta {
            state,
            ..node.meta
        };
        self.put_one(keys::node_key(id), &meta)?;
        self.nodes.update(id, |n| n.meta = meta);
        info!("node {} state {} -> {}", id, prev, state);
        Ok(())
    }

    /// Remove a node that hosts no live peer
    ///
    /// Its pending trash replicas go with it.
    pub fn delete_node(&self, id: NodeId) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        let node = self.find_node(id)?;
        let hosted = self.ranges.node_ranges(id);
        if !hosted.is_empty() {
            return Err(MasterError::IllegalState(format!(
                "node {} still hosts {} ranges",
                id,
                hosted.len()
            )));
        }

        let mut batch = self.store.new_batch();
        batch.delete(keys::node_key(id));
        for peer_id in node.trash_replicas.keys() {
            batch.delete(keys::replica_key(*peer_id));
        }
        self.commit(batch)?;
        self.nodes.remove(id);
        info!("node {} deleted", id);
        Ok(())
    }

    /// Mark nodes silent past the heartbeat timeout offline
    pub fn check_node_heartbeats(&self) -> Result<Vec<NodeId>> {
        let timeout = self.config.schedule.node_heartbeat_timeout_secs as i64;
        let now = Utc::now();
        let mut offline = Vec::new();
        for node in self.nodes.all() {
            if !node.is_login() {
                continue;
            }
            let Some(last) = node.stats.last_heartbeat else {
                continue;
            };
            let silent = (now - last).num_seconds();
            if silent > timeout {
                warn!("node {} silent for {}s, marking offline", node.id(), silent);
                self.set_node_state(node.id(), NodeState::Offline)?;
                self.report_alarm(
                    "node_heartbeat_timeout",
                    silent as f64,
                    CompareType::Greater,
                    timeout as f64,
                    vec![format!("node {} at {}", node.id(), node.address())],
                );
                offline.push(node.id());
            }
        }
        Ok(offline)
    }

    /// Attach a trash replica to its node; unknown nodes are skipped
    pub(super) fn add_trash_replica(&self, replica: Replica) {
        let node_id = replica.peer.node_id;
        let peer_id = replica.peer.id;
        if self
            .nodes
            .update(node_id, |n| n.add_trash_replica(replica))
            .is_none()
        {
            warn!("trash replica {} on unknown node {}", peer_id, node_id);
        }
    }

    /// Ask nodes to drop their trash replicas
    ///
    /// A replica record is removed once its node confirmed the deletion.
    /// Failed calls are retried on the next run.
    pub async fn gc_trash_replicas(&self) -> Result<()> {
        for node in self.nodes.all() {
            if !node.is_login() {
                continue;
            }
            for replica in node.trash_replicas.values() {
                if let Err(e) = self
                    .client
                    .delete_range(node.address(), replica.range_id, replica.peer.id)
                    .await
                {
                    warn!(
                        "gc replica {} of range {} on node {}: {}",
                        replica.peer.id,
                        replica.range_id,
                        node.id(),
                        e
                    );
                    continue;
                }
                self.delete_one(keys::replica_key(replica.peer.id))?;
                self.nodes
                    .update(node.id(), |n| n.remove_trash_replica(replica.peer.id));
                info!(
                    "replica {} of range {} collected on node {}",
                    replica.peer.id,
                    replica.range_id,
                    node.id()
                );
            }
        }
        Ok(())
    }

    /// Drop staged ranges on every node holding a peer
    pub async fn flush_pre_gc_ranges(&self) -> Result<()> {
        for meta in self.pre_gc_ranges.all() {
            let mut done = true;
            for peer in &meta.peers {
                let Some(node) = self.nodes.find(peer.node_id) else {
                    warn!("pre-gc range {}: unknown node {}", meta.id, peer.node_id);
                    continue;
                };
                if let Err(e) = self.client.delete_range(node.address(), meta.id, peer.id).await {
                    warn!("pre-gc range {} on node {}: {}", meta.id, node.id(), e);
                    done = false;
                }
            }
            if done {
                self.remove_pre_gc_range(meta.id)?;
                info!("pre-gc range {} flushed", meta.id);
            }
        }
        Ok(())
    }
}
