//! Node and peer selection

use std::collections::HashMap;
use tracing::debug;

use super::NodeSelector;
use crate::metadata::{Node, Peer, Range};

/// Pick the eligible node with the fewest ranges
///
/// A node is eligible when every selector accepts it. Ties keep the first
/// node in iteration order.
pub fn select_node<'a>(nodes: &'a [Node], selectors: &[Box<dyn NodeSelector>]) -> Option<&'a Node> {
    let mut best: Option<&Node> = None;
    for node in nodes {
        if let Some(rejected) = selectors.iter().find(|s| !s.can_select(node)) {
            debug!("node {} rejected by selector {}", node.id(), rejected.name());
            continue;
        }
        match best {
            Some(b) if b.range_count() <= node.range_count() => {}
            _ => best = Some(node),
        }
    }
    best
}

/// Pick the peer to evict from `range`
///
/// A down peer wins outright. Otherwise peers co-located on a shared IP form
/// the pool, falling back to every peer; within the pool the peer whose node
/// has the lowest available ratio is chosen.
pub fn select_worst_peer(range: &Range, nodes: &HashMap<u64, Node>) -> Option<Peer> {
    if let Some(down) = range.down_peers.first() {
        return Some(down.peer);
    }

    let located: Vec<(Peer, &Node)> = range
        .peers()
        .iter()
        .filter_map(|p| nodes.get(&p.node_id).map(|n| (*p, n)))
        .collect();

    let mut by_ip: HashMap<&str, usize> = HashMap::new();
    for (_, node) in &located {
        *by_ip.entry(node.ip()).or_default() += 1;
    }
    let shared_ip = located
        .iter()
        .map(|(_, n)| n.ip())
        .find(|ip| by_ip.get(ip).copied().unwrap_or(0) > 1);

    let pool: Vec<&(Peer, &Node)> = match shared_ip {
        Some(ip) => located.iter().filter(|(_, n)| n.ip() == ip).collect(),
        None => located.iter().collect(),
    };

    let mut worst: Option<&(Peer, &Node)> = None;
    for candidate in pool {
        match worst {
            Some((_, w)) if w.available_ratio() <= candidate.1.available_ratio() => {}
            _ => worst = Some(candidate),
        }
    }
    worst.map(|(peer, _)| *peer)
}
