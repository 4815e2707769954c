//! Node selectors

use std::collections::HashSet;

use crate::metadata::Node;

/// Predicate deciding whether a node may host a new replica
pub trait NodeSelector: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_select(&self, node: &Node) -> bool;
}

/// Node is logged in
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeLoginSelector;

impl NodeSelector for NodeLoginSelector {
    fn name(&self) -> &'static str {
        "node_login"
    }

    fn can_select(&self, node: &Node) -> bool {
        node.is_login()
    }
}

/// Node's IP differs from every IP already holding a peer
#[derive(Debug, Clone, Default)]
pub struct DifferIpSelector {
    ips: HashSet<String>,
}

impl DifferIpSelector {
    pub fn new(ips: HashSet<String>) -> Self {
        Self { ips }
    }
}

impl NodeSelector for DifferIpSelector {
    fn name(&self) -> &'static str {
        "differ_ip"
    }

    fn can_select(&self, node: &Node) -> bool {
        !self.ips.contains(node.ip())
    }
}

/// Node's recent write rate is below the threshold
#[derive(Debug, Clone, Copy)]
pub struct WriterOpsThresholdSelector {
    max_write_ops: u64,
}

impl WriterOpsThresholdSelector {
    pub fn new(max_write_ops: u64) -> Self {
        Self { max_write_ops }
    }
}

impl NodeSelector for WriterOpsThresholdSelector {
    fn name(&self) -> &'static str {
        "writer_ops_threshold"
    }

    fn can_select(&self, node: &Node) -> bool {
        node.stats.write_ops < self.max_write_ops
    }
}

/// Node's used storage ratio is below the threshold
#[derive(Debug, Clone, Copy)]
pub struct StorageThresholdSelector {
    max_ratio: f64,
}

impl StorageThresholdSelector {
    pub fn new(max_ratio: f64) -> Self {
        Self { max_ratio }
    }
}

impl NodeSelector for StorageThresholdSelector {
    fn name(&self) -> &'static str {
        "storage_threshold"
    }

    fn can_select(&self, node: &Node) -> bool {
        node.used_ratio() < self.max_ratio
    }
}
