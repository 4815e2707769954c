//! Range, peer and replica definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{NodeId, PeerId, RangeId, TableId};
use crate::schema::Column;

/// Range epoch: `conf_ver` changes with membership, `version` with key bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

impl RangeEpoch {
    pub fn new(conf_ver: u64, version: u64) -> Self {
        Self { conf_ver, version }
    }

    /// Either component is behind `current`
    pub fn is_stale(&self, current: &RangeEpoch) -> bool {
        self.conf_ver < current.conf_ver || self.version < current.version
    }
}

impl Default for RangeEpoch {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl std::fmt::Display for RangeEpoch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.conf_ver, self.version)
    }
}

/// One replica of a range, bound to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    pub id: PeerId,
    pub node_id: NodeId,
}

/// Persisted range record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeMeta {
    pub id: RangeId,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub epoch: RangeEpoch,
    pub table_id: TableId,
    pub primary_keys: Vec<Column>,
    pub peers: Vec<Peer>,
}

impl RangeMeta {
    pub fn peer_on_node(&self, node_id: NodeId) -> Option<&Peer> {
        self.peers.iter().find(|p| p.node_id == node_id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.peers.iter().map(|p| p.node_id).collect()
    }

    /// `[start, end)` intersects `[other_start, other_end)`
    pub fn overlaps(&self, start: &[u8], end: &[u8]) -> bool {
        self.start_key.as_slice() < end && start < self.end_key.as_slice()
    }
}

/// Peer reported down by the range leader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownPeer {
    pub peer: Peer,
    pub down_seconds: u64,
}

/// Persisted placement of a peer whose data still has to be collected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub range_id: RangeId,
    pub peer: Peer,
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

impl Replica {
    pub fn of(range: &RangeMeta, peer: Peer) -> Self {
        Self {
            range_id: range.id,
            peer,
            start_key: range.start_key.clone(),
            end_key: range.end_key.clone(),
        }
    }
}

/// Load reported with range heartbeats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeStats {
    pub bytes_written: u64,
    pub keys_written: u64,
    pub approximate_size: u64,
}

/// Live range
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub meta: RangeMeta,
    pub leader: Option<Peer>,
    pub down_peers: Vec<DownPeer>,
    pub stats: RangeStats,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl Range {
    pub fn new(meta: RangeMeta, leader: Option<Peer>) -> Self {
        Self {
            meta,
            leader,
            down_peers: Vec::new(),
            stats: RangeStats::default(),
            last_heartbeat: None,
        }
    }

    pub fn id(&self) -> RangeId {
        self.meta.id
    }

    pub fn table_id(&self) -> TableId {
        self.meta.table_id
    }

    pub fn peers(&self) -> &[Peer] {
        &self.meta.peers
    }

    pub fn leader_node(&self) -> Option<NodeId> {
        self.leader.map(|p| p.node_id)
    }

    pub fn is_down(&self, peer_id: PeerId) -> bool {
        self.down_peers.iter().any(|d| d.peer.id == peer_id)
    }
}
