//! In-memory entity caches owned by the cluster
//!
//! Each cache guards its own index with a `parking_lot::RwLock`. Ranges and
//! nodes live in separate id-indexed maps; peers refer to nodes by id.

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{MasterError, Result};
use crate::metadata::{
    CreateTable, Database, Node, NodeId, Range, RangeId, RangeMeta, Table, TableId,
};

/// Databases by name and id
#[derive(Default)]
pub struct DbCache {
    inner: RwLock<DbIndex>,
}

#[derive(Default)]
struct DbIndex {
    by_name: HashMap<String, Arc<Database>>,
    by_id: HashMap<u64, Arc<Database>>,
}

impl DbCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, db: Arc<Database>) {
        let mut inner = self.inner.write();
        inner.by_id.insert(db.id(), db.clone());
        inner.by_name.insert(db.name().to_string(), db);
    }

    pub fn find(&self, name: &str) -> Option<Arc<Database>> {
        self.inner.read().by_name.get(name).cloned()
    }

    pub fn find_by_id(&self, id: u64) -> Option<Arc<Database>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Database>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tables by id (working or deleting set)
#[derive(Default)]
pub struct TableCache {
    tables: RwLock<HashMap<TableId, Arc<Table>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, table: Arc<Table>) {
        self.tables.write().insert(table.id(), table);
    }

    pub fn find(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.read().get(&id).cloned()
    }

    pub fn remove(&self, id: TableId) -> Option<Arc<Table>> {
        self.tables.write().remove(&id)
    }

    pub fn contains(&self, id: TableId) -> bool {
        self.tables.read().contains_key(&id)
    }

    pub fn all(&self) -> Vec<Arc<Table>> {
        self.tables.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Tables still being created
#[derive(Default)]
pub struct CreateTableCache {
    jobs: RwLock<HashMap<TableId, Arc<CreateTable>>>,
}

impl CreateTableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, job: Arc<CreateTable>) {
        self.jobs.write().insert(job.table().id(), job);
    }

    pub fn find(&self, id: TableId) -> Option<Arc<CreateTable>> {
        self.jobs.read().get(&id).cloned()
    }

    pub fn remove(&self, id: TableId) -> Option<Arc<CreateTable>> {
        self.jobs.write().remove(&id)
    }

    pub fn contains(&self, id: TableId) -> bool {
        self.jobs.read().contains_key(&id)
    }

    pub fn all(&self) -> Vec<Arc<CreateTable>> {
        self.jobs.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Nodes by id
#[derive(Default)]
pub struct NodeCache {
    nodes: RwLock<BTreeMap<NodeId, Node>>,
}

impl NodeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, node: Node) {
        self.nodes.write().insert(node.id(), node);
    }

    pub fn find(&self, id: NodeId) -> Option<Node> {
        self.nodes.read().get(&id).cloned()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.read().contains_key(&id)
    }

    pub fn remove(&self, id: NodeId) -> Option<Node> {
        self.nodes.write().remove(&id)
    }

    /// Mutate a node in place; returns `None` when it does not exist
    pub fn update<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.nodes.write().get_mut(&id).map(f)
    }

    /// Snapshot of every node, in id order
    pub fn all(&self) -> Vec<Node> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct RangeIndex {
    ranges: HashMap<RangeId, Range>,
    /// table id -> start key -> range id
    by_table: HashMap<TableId, BTreeMap<Vec<u8>, RangeId>>,
}

impl RangeIndex {
    fn overlapping(&self, meta: &RangeMeta) -> Option<RangeId> {
        let siblings = self.by_table.get(&meta.table_id)?;
        // Only the sibling starting right before `end` can overlap
        siblings
            .range(..meta.end_key.clone())
            .rev()
            .map(|(_, id)| *id)
            .find(|id| *id != meta.id)
            .filter(|id| {
                self.ranges
                    .get(id)
                    .map(|r| r.meta.overlaps(&meta.start_key, &meta.end_key))
                    .unwrap_or(false)
            })
    }

    fn unlink(&mut self, range: &Range) {
        if let Some(siblings) = self.by_table.get_mut(&range.meta.table_id) {
            if siblings.get(&range.meta.start_key) == Some(&range.meta.id) {
                siblings.remove(&range.meta.start_key);
            }
            if siblings.is_empty() {
                self.by_table.remove(&range.meta.table_id);
            }
        }
    }
}

/// Live ranges by id, with a per-table ordered index
#[derive(Default)]
pub struct RangeCache {
    inner: RwLock<RangeIndex>,
}

impl RangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a range
    ///
    /// Fails with `IllegalState` when the key interval overlaps a sibling
    /// range of the same table.
    pub fn add(&self, range: Range) -> Result<()> {
        let mut inner = self.inner.write();
        let previous = inner.ranges.get(&range.meta.id).cloned();
        if let Some(prev) = &previous {
            inner.unlink(prev);
        }
        if let Some(other) = inner.overlapping(&range.meta) {
            if let Some(prev) = previous {
                inner
                    .by_table
                    .entry(prev.meta.table_id)
                    .or_default()
                    .insert(prev.meta.start_key.clone(), prev.meta.id);
            }
            return Err(MasterError::IllegalState(format!(
                "range {} overlaps range {} of table {}",
                range.meta.id, other, range.meta.table_id
            )));
        }
        inner
            .by_table
            .entry(range.meta.table_id)
            .or_default()
            .insert(range.meta.start_key.clone(), range.meta.id);
        inner.ranges.insert(range.meta.id, range);
        Ok(())
    }

    /// Fail with `IllegalState` when `meta` would overlap a sibling range;
    /// the cached entry with the same id is ignored
    pub fn check_overlap(&self, meta: &RangeMeta) -> Result<()> {
        match self.inner.read().overlapping(meta) {
            Some(other) => Err(MasterError::IllegalState(format!(
                "range {} overlaps range {} of table {}",
                meta.id, other, meta.table_id
            ))),
            None => Ok(()),
        }
    }

    pub fn find(&self, id: RangeId) -> Option<Range> {
        self.inner.read().ranges.get(&id).cloned()
    }

    pub fn contains(&self, id: RangeId) -> bool {
        self.inner.read().ranges.contains_key(&id)
    }

    pub fn remove(&self, id: RangeId) -> Option<Range> {
        let mut inner = self.inner.write();
        let range = inner.ranges.remove(&id)?;
        inner.unlink(&range);
        Some(range)
    }

    /// Mutate a range in place without touching its key interval
    pub fn update<R>(&self, id: RangeId, f: impl FnOnce(&mut Range) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        let range = inner.ranges.get_mut(&id)?;
        let (start, end) = (range.meta.start_key.clone(), range.meta.end_key.clone());
        let out = f(&mut *range);
        debug_assert!(range.meta.start_key == start && range.meta.end_key == end);
        Some(out)
    }

    /// Ranges of a table ordered by start key
    pub fn table_ranges(&self, table_id: TableId) -> Vec<Range> {
        let inner = self.inner.read();
        inner
            .by_table
            .get(&table_id)
            .map(|siblings| {
                siblings
                    .values()
                    .filter_map(|id| inner.ranges.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Range> {
        self.inner.read().ranges.values().cloned().collect()
    }

    /// Ranges with a peer on `node_id`
    pub fn node_ranges(&self, node_id: NodeId) -> Vec<Range> {
        self.inner
            .read()
            .ranges
            .values()
            .filter(|r| r.meta.peer_on_node(node_id).is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Range snapshots by id (pre-GC and deleted ranges)
#[derive(Default)]
pub struct RangeMetaCache {
    ranges: RwLock<HashMap<RangeId, RangeMeta>>,
}

impl RangeMetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, meta: RangeMeta) {
        self.ranges.write().insert(meta.id, meta);
    }

    pub fn find(&self, id: RangeId) -> Option<RangeMeta> {
        self.ranges.read().get(&id).cloned()
    }

    pub fn remove(&self, id: RangeId) -> Option<RangeMeta> {
        self.ranges.write().remove(&id)
    }

    pub fn all(&self) -> Vec<RangeMeta> {
        self.ranges.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ranges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ranges flagged by the heartbeat check, forgotten after a TTL
pub struct UnhealthyRanges {
    ttl: Duration,
    ranges: Mutex<HashMap<RangeId, Instant>>,
}

impl UnhealthyRanges {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            ranges: Mutex::new(HashMap::new()),
        }
    }

    pub fn mark(&self, id: RangeId) {
        self.ranges.lock().insert(id, Instant::now());
    }

    pub fn clear(&self, id: RangeId) {
        self.ranges.lock().remove(&id);
    }

    /// Ids still within the TTL; expired entries are dropped
    pub fn ids(&self) -> Vec<RangeId> {
        let mut ranges = self.ranges.lock();
        let ttl = self.ttl;
        ranges.retain(|_, at| at.elapsed() < ttl);
        let mut ids: Vec<_> = ranges.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
