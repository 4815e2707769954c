//! Database definitions

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::{DbId, Table, TableId};

/// Persisted database record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMeta {
    pub id: DbId,
    pub name: String,
    /// Opaque user properties
    pub properties: String,
    pub version: u64,
    /// Unix seconds
    pub create_time: i64,
}

/// Tables of one database, indexed by name and id
#[derive(Default)]
pub struct TableIndex {
    by_name: HashMap<String, Arc<Table>>,
    by_id: HashMap<TableId, Arc<Table>>,
}

impl TableIndex {
    pub fn find(&self, name: &str) -> Option<Arc<Table>> {
        self.by_name.get(name).cloned()
    }

    pub fn find_by_id(&self, id: TableId) -> Option<Arc<Table>> {
        self.by_id.get(&id).cloned()
    }

    pub fn add(&mut self, table: Arc<Table>) {
        let (id, name) = {
            let meta = table.meta();
            (meta.id, meta.name.clone())
        };
        self.by_name.insert(name, table.clone());
        self.by_id.insert(id, table);
    }

    pub fn remove_by_id(&mut self, id: TableId) -> Option<Arc<Table>> {
        let table = self.by_id.remove(&id)?;
        self.by_name.retain(|_, t| t.id() != id);
        Some(table)
    }

    pub fn remove_by_name(&mut self, name: &str) -> Option<Arc<Table>> {
        let table = self.by_name.remove(name)?;
        self.by_id.remove(&table.id());
        Some(table)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Table>> {
        self.by_id.values().cloned().collect()
    }
}

/// Database with its table membership
///
/// The table index mutex is the database lock: every membership change and
/// every create-table existence check happens while holding it.
pub struct Database {
    meta: DatabaseMeta,
    tables: Mutex<TableIndex>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(meta: DatabaseMeta) -> Self {
        Self {
            meta,
            tables: Mutex::new(TableIndex::default()),
        }
    }

    pub fn meta(&self) -> &DatabaseMeta {
        &self.meta
    }

    pub fn id(&self) -> DbId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    /// Acquire the database lock
    pub fn lock(&self) -> MutexGuard<'_, TableIndex> {
        self.tables.lock()
    }

    pub fn find_table(&self, name: &str) -> Option<Arc<Table>> {
        self.tables.lock().find(name)
    }

    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.lock().all()
    }
}
