//! Replica placement
//!
//! A pipeline of node selectors decides which nodes may take a new replica;
//! worst-peer selection decides which replica to evict.

mod placement;
mod selector;

pub use placement::{select_node, select_worst_peer};
pub use selector::{
    DifferIpSelector, NodeLoginSelector, NodeSelector, StorageThresholdSelector,
    WriterOpsThresholdSelector,
};

use std::collections::HashSet;

use crate::config::ScheduleConfig;

/// Standard pipeline for adding a peer to a range whose peers sit on `ips`
pub fn add_peer_pipeline(ips: HashSet<String>, config: &ScheduleConfig) -> Vec<Box<dyn NodeSelector>> {
    vec![
        Box::new(NodeLoginSelector),
        Box::new(DifferIpSelector::new(ips)),
        Box::new(WriterOpsThresholdSelector::new(config.max_write_ops)),
        Box::new(StorageThresholdSelector::new(config.max_storage_ratio)),
    ]
}
