//! Per-range reconciliation events
//!
//! Detection paths (failover, balancing) push events here; the dispatcher
//! worker executes them. At most one event per range is outstanding.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

use crate::metadata::{NodeId, Peer, RangeId};

/// What has to happen to a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Membership change: drop `remove` and/or add a new peer on `add_node`
    ChangePeer {
        remove: Option<Peer>,
        add_node: Option<NodeId>,
    },
    /// Move leadership to `to`
    TransferLeader { to: Peer },
}

/// Pending event of one range
#[derive(Debug, Clone)]
pub struct RangeEvent {
    pub range_id: RangeId,
    pub kind: EventKind,
    /// Name of the worker that detected the condition
    pub source: &'static str,
    pub created_at: Instant,
}

impl RangeEvent {
    pub fn new(range_id: RangeId, kind: EventKind, source: &'static str) -> Self {
        Self {
            range_id,
            kind,
            source,
            created_at: Instant::now(),
        }
    }
}

impl fmt::Display for RangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::ChangePeer { remove, add_node } => write!(
                f,
                "range {} change peer (remove {:?}, add on node {:?}) from {}",
                self.range_id,
                remove.map(|p| p.id),
                add_node,
                self.source
            ),
            EventKind::TransferLeader { to } => write!(
                f,
                "range {} transfer leader to peer {} from {}",
                self.range_id, to.id, self.source
            ),
        }
    }
}

/// Deduplicating mailbox keyed by range id
#[derive(Default)]
pub struct EventDispatcher {
    events: Mutex<BTreeMap<RangeId, RangeEvent>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event`; returns false when the range already has one
    pub fn push(&self, event: RangeEvent) -> bool {
        let mut events = self.events.lock();
        if events.contains_key(&event.range_id) {
            return false;
        }
        events.insert(event.range_id, event);
        true
    }

    pub fn peek(&self, range_id: RangeId) -> Option<RangeEvent> {
        self.events.lock().get(&range_id).cloned()
    }

    pub fn remove(&self, range_id: RangeId) -> Option<RangeEvent> {
        self.events.lock().remove(&range_id)
    }

    /// Snapshot of every queued event, by range id
    pub fn events(&self) -> Vec<RangeEvent> {
        self.events.lock().values().cloned().collect()
    }

    /// Take every queued event
    pub fn drain(&self) -> Vec<RangeEvent> {
        std::mem::take(&mut *self.events.lock()).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
