//! Failover and balance detection
//!
//! Each pass inspects the caches and queues range events; execution is left
//! to the event dispatcher.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use super::Cluster;
use crate::alarm::CompareType;
use crate::error::MasterError;
use crate::event::EventKind;
use crate::metadata::{Node, NodeId, NodeState, Peer, Range};
use crate::scheduler::{self, select_worst_peer};
use crate::worker::{BALANCE_LEADER, BALANCE_NODE_OPS, BALANCE_RANGE, FAILOVER};

impl Cluster {
    fn node_map(&self) -> HashMap<NodeId, Node> {
        self.nodes.all().into_iter().map(|n| (n.id(), n)).collect()
    }

    /// Range is eligible for automatic scheduling
    fn schedulable(&self, range: &Range, transfer: bool) -> bool {
        if !self.working_tables.contains(range.table_id()) {
            return false;
        }
        if self.events.peek(range.id()).is_some() {
            return false;
        }
        let switches = self.table_switches(range.table_id());
        if transfer {
            !switches.transfer_disabled
        } else {
            !switches.failover_disabled
        }
    }

    /// Queue peer changes for ranges with failed, missing or surplus
    /// replicas; returns the number of events queued
    pub fn schedule_failover(&self) -> usize {
        let replica_num = self.config.schedule.replica_num;
        let nodes = self.node_map();
        let mut queued = 0;

        for range in self.ranges.all() {
            if !self.schedulable(&range, false) {
                continue;
            }
            let failed_peer = range.peers().iter().copied().find(|p| {
                nodes
                    .get(&p.node_id)
                    .map(|n| matches!(n.meta.state, NodeState::Offline | NodeState::Tombstone))
                    .unwrap_or(true)
            });
            let peers = range.peers().len();

            let (remove, need_add) = if peers > replica_num {
                (select_worst_peer(&range, &nodes), false)
            } else if !range.down_peers.is_empty() {
                (select_worst_peer(&range, &nodes), true)
            } else if failed_peer.is_some() {
                (failed_peer, true)
            } else if peers < replica_num {
                (None, true)
            } else {
                continue;
            };

            let add_node = if need_add {
                match self.select_node_for_add_peer(&range) {
                    Ok(node) => Some(node.id()),
                    Err(MasterError::NoEligibleNode { range_id }) => {
                        warn!("failover of range {}: no eligible node", range_id);
                        self.report_alarm(
                            "no_eligible_node",
                            0.0,
                            CompareType::Equal,
                            0.0,
                            vec![format!("range {} has {} of {} peers", range_id, peers, replica_num)],
                        );
                        None
                    }
                    Err(e) => {
                        warn!("failover of range {}: {}", range.id(), e);
                        None
                    }
                }
            } else {
                None
            };
            if remove.is_none() && add_node.is_none() {
                continue;
            }
            if self.push_event(range.id(), EventKind::ChangePeer { remove, add_node }, FAILOVER) {
                queued += 1;
            }
        }
        queued
    }

    fn login_nodes(&self) -> Vec<Node> {
        self.nodes.all().into_iter().filter(|n| n.is_login()).collect()
    }

    /// Move one leader from the node leading the most ranges to the node
    /// leading the fewest when their difference exceeds the threshold
    pub fn balance_leaders(&self) -> usize {
        let nodes = self.login_nodes();
        let (Some(hot), Some(cold)) = (
            nodes.iter().max_by_key(|n| n.stats.leader_count),
            nodes.iter().min_by_key(|n| n.stats.leader_count),
        ) else {
            return 0;
        };
        let skew = hot.stats.leader_count - cold.stats.leader_count;
        if skew <= self.config.schedule.leader_balance_threshold {
            return 0;
        }
        debug!("leader skew {} between node {} and node {}", skew, hot.id(), cold.id());

        for range in self.ranges.node_ranges(hot.id()) {
            if range.leader_node() != Some(hot.id()) || !self.schedulable(&range, true) {
                continue;
            }
            if let Some(to) = range.meta.peer_on_node(cold.id()).copied() {
                if self.push_event(range.id(), EventKind::TransferLeader { to }, BALANCE_LEADER) {
                    return 1;
                }
            }
        }
        0
    }

    /// Move one replica from the node with the most ranges to the node with
    /// the fewest when their difference exceeds the threshold
    pub fn balance_ranges(&self) -> usize {
        let nodes = self.login_nodes();
        let (Some(hot), Some(cold)) = (
            nodes.iter().max_by_key(|n| n.stats.range_count),
            nodes.iter().min_by_key(|n| n.stats.range_count),
        ) else {
            return 0;
        };
        let skew = hot.stats.range_count - cold.stats.range_count;
        if skew <= self.config.schedule.range_balance_threshold {
            return 0;
        }
        debug!("range skew {} between node {} and node {}", skew, hot.id(), cold.id());

        let all = self.node_map();
        for range in self.ranges.node_ranges(hot.id()) {
            // Leaders move through balance_leaders first
            if range.leader_node() == Some(hot.id()) || !self.schedulable(&range, true) {
                continue;
            }
            if range.meta.peer_on_node(cold.id()).is_some() {
                continue;
            }
            let Some(remove) = range.meta.peer_on_node(hot.id()).copied() else {
                continue;
            };
            let ips: HashSet<String> = range
                .peers()
                .iter()
                .filter(|p| p.id != remove.id)
                .filter_map(|p| all.get(&p.node_id))
                .map(|n| n.ip().to_string())
                .collect();
            let selectors = scheduler::add_peer_pipeline(ips, &self.config.schedule);
            if !selectors.iter().all(|s| s.can_select(cold)) {
                continue;
            }
            let kind = EventKind::ChangePeer {
                remove: Some(remove),
                add_node: Some(cold.id()),
            };
            if self.push_event(range.id(), kind, BALANCE_RANGE) {
                return 1;
            }
        }
        0
    }

    /// Move one leader off the node with the highest write load when it
    /// exceeds the least loaded node by the configured ratio
    pub fn balance_node_ops(&self) -> usize {
        let nodes = self.login_nodes();
        let (Some(hot), Some(cold)) = (
            nodes.iter().max_by_key(|n| n.stats.write_ops),
            nodes.iter().min_by_key(|n| n.stats.write_ops),
        ) else {
            return 0;
        };
        if hot.id() == cold.id()
            || (hot.stats.write_ops as f64)
                <= (cold.stats.write_ops.max(1) as f64) * self.config.schedule.ops_balance_ratio
        {
            return 0;
        }
        debug!(
            "write ops skew {} vs {} between node {} and node {}",
            hot.stats.write_ops,
            cold.stats.write_ops,
            hot.id(),
            cold.id()
        );

        let ops: HashMap<NodeId, u64> = nodes.iter().map(|n| (n.id(), n.stats.write_ops)).collect();
        for range in self.ranges.node_ranges(hot.id()) {
            if range.leader_node() != Some(hot.id()) || !self.schedulable(&range, true) {
                continue;
            }
            // Coolest login follower
            let target: Option<Peer> = range
                .peers()
                .iter()
                .filter(|p| p.node_id != hot.id() && !range.is_down(p.id))
                .filter_map(|p| ops.get(&p.node_id).map(|o| (*p, *o)))
                .filter(|(_, o)| *o < hot.stats.write_ops)
                .min_by_key(|(_, o)| *o)
                .map(|(p, _)| p);
            if let Some(to) = target {
                if self.push_event(range.id(), EventKind::TransferLeader { to }, BALANCE_NODE_OPS) {
                    return 1;
                }
            }
        }
        0
    }
}
