//! Cluster metadata definitions
//!
//! Contains the core entities: databases, tables, ranges, peers and nodes

mod database;
mod node;
mod range;
mod table;

pub use database::{Database, DatabaseMeta, TableIndex};
pub use node::{Node, NodeMeta, NodeState, NodeStats};
pub use range::{
    DownPeer, Peer, Range, RangeEpoch, RangeMeta, RangeStats, Replica,
};
pub use table::{CreateTable, RangeToCreate, Table, TableEpoch, TableMeta, TableStatus};

pub type DbId = u64;
pub type TableId = u64;
pub type RangeId = u64;
pub type NodeId = u64;
pub type PeerId = u64;
