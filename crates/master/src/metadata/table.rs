//! Table definitions and the table lifecycle state machine

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DbId, TableId};
use crate::error::{MasterError, Result};
use crate::schema::Column;

/// Table status
///
/// Legal transitions:
/// ```text
/// Init ──► Prepare ──► Running ──► Delete ──► Deleting
///                         │                      ▲
///                         └──────────────────────┘
/// ```
///
/// Tables still being created leave through cancellation, not deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableStatus {
    /// Accepted, not yet persisted
    Init,
    /// Persisted, ranges being created
    Prepare,
    /// Serving
    Running,
    /// Marked deleted, kept for the retention window
    Delete,
    /// Marked for immediate physical cleanup
    Deleting,
}

impl TableStatus {
    pub fn can_transition_to(self, next: TableStatus) -> bool {
        use TableStatus::*;
        matches!(
            (self, next),
            (Init, Prepare)
                | (Prepare, Running)
                | (Running, Delete)
                | (Running, Deleting)
                | (Delete, Deleting)
        )
    }

    /// Still being created (cancelable)
    pub fn is_creating(self) -> bool {
        matches!(self, TableStatus::Init | TableStatus::Prepare)
    }

    pub fn is_deleted(self) -> bool {
        matches!(self, TableStatus::Delete | TableStatus::Deleting)
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableStatus::Init => write!(f, "init"),
            TableStatus::Prepare => write!(f, "prepare"),
            TableStatus::Running => write!(f, "running"),
            TableStatus::Delete => write!(f, "delete"),
            TableStatus::Deleting => write!(f, "deleting"),
        }
    }
}

/// Table epoch, bumped on schema (`conf_ver`) and range-set (`version`) changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEpoch {
    pub conf_ver: u64,
    pub version: u64,
}

impl Default for TableEpoch {
    fn default() -> Self {
        Self {
            conf_ver: 1,
            version: 1,
        }
    }
}

/// Persisted table record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub id: TableId,
    pub name: String,
    pub db_id: DbId,
    pub db_name: String,
    pub columns: Vec<Column>,
    /// Regex-matched dynamic columns
    pub regexes: Vec<Column>,
    pub epoch: TableEpoch,
    pub status: TableStatus,
    /// Unix seconds
    pub create_time: i64,
    pub pk_dup_check: bool,
    /// Opaque expansion field; holds the big-endian deletion time (unix
    /// seconds, 8 bytes) once the table is deleted
    pub expand: Vec<u8>,
}

impl TableMeta {
    /// Move to `next`, rejecting transitions outside the state machine
    pub fn transition(&mut self, next: TableStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MasterError::IllegalState(format!(
                "table {}.{} cannot move from {} to {}",
                self.db_name, self.name, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    pub fn pk_columns(&self) -> Vec<Column> {
        self.columns.iter().filter(|c| c.primary_key).cloned().collect()
    }

    /// First declared primary-key column
    pub fn first_pk_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.primary_key)
    }

    pub fn set_delete_time(&mut self, at: DateTime<Utc>) {
        self.expand = (at.timestamp() as u64).to_be_bytes().to_vec();
    }

    /// Deletion time decoded from the expansion field
    pub fn delete_time(&self) -> Option<DateTime<Utc>> {
        let bytes: [u8; 8] = self.expand.as_slice().try_into().ok()?;
        Utc.timestamp_opt(u64::from_be_bytes(bytes) as i64, 0).single()
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db_name, self.name)
    }
}

/// Live table
///
/// The inner `RwLock` is the table's schema lock. Mutations take the write
/// guard, persist a modified clone and only then swap it in, so the store
/// never sees a half-applied change.
pub struct Table {
    meta: RwLock<TableMeta>,
}

impl Table {
    pub fn new(meta: TableMeta) -> Self {
        Self {
            meta: RwLock::new(meta),
        }
    }

    pub fn meta(&self) -> RwLockReadGuard<'_, TableMeta> {
        self.meta.read()
    }

    /// Acquire the schema lock
    pub fn schema_lock(&self) -> RwLockWriteGuard<'_, TableMeta> {
        self.meta.write()
    }

    /// Deep copy of the current record
    pub fn snapshot(&self) -> TableMeta {
        self.meta.read().clone()
    }

    pub fn id(&self) -> TableId {
        self.meta.read().id
    }

    pub fn name(&self) -> String {
        self.meta.read().name.clone()
    }

    pub fn db_name(&self) -> String {
        self.meta.read().db_name.clone()
    }

    pub fn status(&self) -> TableStatus {
        self.meta.read().status
    }

    pub fn delete_time(&self) -> Option<DateTime<Utc>> {
        self.meta.read().delete_time()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta.read();
        write!(f, "Table({}:{} {})", meta.id, meta.full_name(), meta.status)
    }
}

/// `[start_key, end_key)` waiting to be created on a range server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeToCreate {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
}

/// Creation job of a table
///
/// Holds the queue of ranges still to create remotely and a countdown that
/// reaches zero once every range exists.
pub struct CreateTable {
    table: Arc<Table>,
    pending: Mutex<VecDeque<RangeToCreate>>,
    remaining: AtomicUsize,
}

impl CreateTable {
    pub fn new(table: Arc<Table>, ranges: Vec<RangeToCreate>) -> Self {
        let remaining = AtomicUsize::new(ranges.len());
        Self {
            table,
            pending: Mutex::new(ranges.into()),
            remaining,
        }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn pop_pending(&self) -> Option<RangeToCreate> {
        self.pending.lock().pop_front()
    }

    /// Put a failed request back for the next attempt
    pub fn requeue(&self, req: RangeToCreate) {
        self.pending.lock().push_back(req);
    }

    /// Record one created range; returns how many are still missing
    pub fn complete_one(&self) -> usize {
        let prev = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn pending_ranges(&self) -> Vec<RangeToCreate> {
        self.pending.lock().iter().cloned().collect()
    }
}
