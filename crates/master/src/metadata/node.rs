//! Node definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{NodeId, PeerId, Replica};

/// Node state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Registered and accepting new replicas
    Login,
    /// Registered but not accepting new replicas
    Logout,
    /// Heartbeat timeout
    Offline,
    /// Decommissioned
    Tombstone,
}

impl Default for NodeState {
    fn default() -> Self {
        Self::Login
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Login => write!(f, "login"),
            NodeState::Logout => write!(f, "logout"),
            NodeState::Offline => write!(f, "offline"),
            NodeState::Tombstone => write!(f, "tombstone"),
        }
    }
}

/// Persisted node record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: NodeId,
    /// Server address (host:port)
    pub address: String,
    pub state: NodeState,
    /// Unix seconds
    pub create_time: i64,
}

/// Liveness and load statistics fed by node heartbeats
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeStats {
    pub range_count: u64,
    pub leader_count: u64,
    /// Recent write operations per second
    pub write_ops: u64,
    pub used_size: u64,
    pub capacity: u64,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

/// Storage node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub meta: NodeMeta,
    pub stats: NodeStats,
    /// Replicas left behind by deleted ranges or replaced peers
    pub trash_replicas: BTreeMap<PeerId, Replica>,
}

impl Node {
    pub fn new(meta: NodeMeta) -> Self {
        Self {
            meta,
            stats: NodeStats::default(),
            trash_replicas: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.meta.id
    }

    pub fn address(&self) -> &str {
        &self.meta.address
    }

    /// Host part of the address, port stripped
    pub fn ip(&self) -> &str {
        self.meta
            .address
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(&self.meta.address)
    }

    pub fn is_login(&self) -> bool {
        self.meta.state == NodeState::Login
    }

    pub fn range_count(&self) -> u64 {
        self.stats.range_count
    }

    /// Used storage / capacity; zero while capacity is unknown
    pub fn used_ratio(&self) -> f64 {
        if self.stats.capacity == 0 {
            return 0.0;
        }
        self.stats.used_size as f64 / self.stats.capacity as f64
    }

    pub fn available_ratio(&self) -> f64 {
        1.0 - self.used_ratio()
    }

    pub fn add_trash_replica(&mut self, replica: Replica) {
        self.trash_replicas.insert(replica.peer.id, replica);
    }

    pub fn remove_trash_replica(&mut self, peer_id: PeerId) -> Option<Replica> {
        self.trash_replicas.remove(&peer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(address: &str) -> Node {
        Node::new(NodeMeta {
            id: 1,
            address: address.to_string(),
            state: NodeState::Login,
            create_time: 0,
        })
    }

    #[test]
    fn test_ip_strips_port() {
        assert_eq!(node("10.0.0.1:6060").ip(), "10.0.0.1");
        assert_eq!(node("10.0.0.1").ip(), "10.0.0.1");
    }

    #[test]
    fn test_ratios() {
        let mut n = node("1.1.1.1:1");
        assert_eq!(n.used_ratio(), 0.0);
        n.stats.capacity = 100;
        n.stats.used_size = 25;
        assert!((n.used_ratio() - 0.25).abs() < f64::EPSILON);
        assert!((n.available_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
