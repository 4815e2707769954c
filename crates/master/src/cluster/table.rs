//! Database and table lifecycle

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::persist::{put_entity, range_delete_ops};
use super::{Cluster, ScheduleSwitches};
use crate::error::{MasterError, Result};
use crate::keys;
use crate::metadata::{
    CreateTable, Database, DatabaseMeta, RangeToCreate, Table, TableEpoch, TableMeta, TableStatus,
};
use crate::schema::{self, Column};

impl Cluster {
    /// Create a database; an existing name fails with `DuplicateEntity`
    pub fn create_database(&self, name: &str, properties: &str) -> Result<Arc<Database>> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        if self.dbs.find(name).is_some() {
            warn!("create database {}: already exists", name);
            return Err(MasterError::duplicate("database", name));
        }

        let meta = DatabaseMeta {
            id: self.gen_id()?,
            name: name.to_string(),
            properties: properties.to_string(),
            version: 1,
            create_time: Utc::now().timestamp(),
        };
        self.put_one(keys::db_key(meta.id), &meta)?;

        let db = Arc::new(Database::new(meta));
        self.dbs.add(db.clone());
        info!("database {} created, id {}", db.name(), db.id());
        Ok(db)
    }

    pub fn find_database(&self, name: &str) -> Result<Arc<Database>> {
        self.dbs
            .find(name)
            .ok_or_else(|| MasterError::not_found("database", name))
    }

    pub fn find_table(&self, db_name: &str, table_name: &str) -> Result<Arc<Table>> {
        self.find_database(db_name)?
            .find_table(table_name)
            .ok_or_else(|| MasterError::not_found("table", format!("{}.{}", db_name, table_name)))
    }

    /// Register a table and queue the creation of its ranges
    ///
    /// The table starts in `Init`; the create-table worker persists it,
    /// creates one range per split interval and finally marks it `Running`.
    /// Split keys are raw values of the first primary-key column.
    pub fn create_table(
        &self,
        db_name: &str,
        table_name: &str,
        columns: Vec<Column>,
        regexes: Vec<Column>,
        pk_dup_check: bool,
        split_keys: &[String],
    ) -> Result<Arc<Table>> {
        self.ensure_open()?;
        schema::validate_columns(&columns)?;

        let db = self.find_database(db_name)?;
        let mut tables = db.lock();
        if tables.find(table_name).is_some() {
            warn!("create table {}.{}: already exists", db_name, table_name);
            return Err(MasterError::duplicate(
                "table",
                format!("{}.{}", db_name, table_name),
            ));
        }

        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, col)| Column {
                id: i as u64 + 1,
                ..col
            })
            .collect();
        let meta = TableMeta {
            id: self.gen_id()?,
            name: table_name.to_string(),
            db_id: db.id(),
            db_name: db_name.to_string(),
            columns,
            regexes,
            epoch: TableEpoch::default(),
            status: TableStatus::Init,
            create_time: Utc::now().timestamp(),
            pk_dup_check,
            expand: Vec::new(),
        };
        let ranges = split_ranges(&meta, split_keys)?;

        let table = Arc::new(Table::new(meta));
        tables.add(table.clone());
        self.working_tables.add(table.clone());
        self.creating_tables
            .add(Arc::new(CreateTable::new(table.clone(), ranges)));
        info!(
            "table {}.{} registered, id {}, {} ranges",
            db_name,
            table_name,
            table.id(),
            split_keys.len() + 1
        );
        Ok(table)
    }

    /// Mark a table deleted
    ///
    /// `fast` flips it to `Deleting` with a deletion time already past the
    /// retention window; otherwise it becomes `Delete` stamped now. The
    /// status, the timestamp and the removal of the table's switches commit
    /// as one batch. The name is released at once; the table itself waits in
    /// the deleting set for the delete-table worker.
    pub fn delete_table(&self, db_name: &str, table_name: &str, fast: bool) -> Result<()> {
        self.ensure_open()?;
        let db = self.find_database(db_name)?;
        let mut tables = db.lock();
        let table = tables
            .find(table_name)
            .ok_or_else(|| MasterError::not_found("table", format!("{}.{}", db_name, table_name)))?;

        let mut meta = table.schema_lock();
        if meta.status.is_creating() {
            return Err(MasterError::IllegalState(format!(
                "table {} is still being created, cancel it instead",
                meta.full_name()
            )));
        }
        let mut next = meta.clone();
        let now = Utc::now();
        if fast {
            next.transition(TableStatus::Deleting)?;
            let retention = chrono::Duration::from_std(self.config.schedule.retention())
                .map_err(|e| MasterError::IllegalState(format!("retention out of range: {}", e)))?;
            next.set_delete_time(now - retention - chrono::Duration::seconds(1));
        } else {
            next.transition(TableStatus::Delete)?;
            next.set_delete_time(now);
        }

        let mut batch = self.store.new_batch();
        put_entity(&mut batch, keys::table_key(next.id), &next)?;
        batch.delete(keys::table_auto_transfer_key(next.id));
        batch.delete(keys::table_auto_failover_key(next.id));
        self.commit(batch)?;

        let id = next.id;
        let status = next.status;
        *meta = next;
        drop(meta);

        tables.remove_by_id(id);
        self.table_switches.write().remove(&id);
        self.working_tables.remove(id);
        self.deleting_tables.add(table.clone());
        info!("table {}.{} marked {}", db_name, table_name, status);
        Ok(())
    }

    /// Abort a table still being created
    ///
    /// Only `Init` and `Prepare` tables can be canceled. A `Prepare` table
    /// was persisted, so its record and any range already created are
    /// removed from the store.
    pub fn cancel_table(&self, db_name: &str, table_name: &str) -> Result<()> {
        self.ensure_open()?;
        let db = self.find_database(db_name)?;
        let mut tables = db.lock();
        let table = tables
            .find(table_name)
            .ok_or_else(|| MasterError::not_found("table", format!("{}.{}", db_name, table_name)))?;

        let meta = table.schema_lock();
        if !meta.status.is_creating() {
            return Err(MasterError::IllegalState(format!(
                "table {} is {}, only tables being created can be canceled",
                meta.full_name(),
                meta.status
            )));
        }

        let mut created = Vec::new();
        if meta.status == TableStatus::Prepare {
            created = self.ranges.table_ranges(meta.id);
            let mut batch = self.store.new_batch();
            batch.delete(keys::table_key(meta.id));
            let mut replicas = Vec::new();
            for range in &created {
                replicas.extend(range_delete_ops(&mut batch, &range.meta)?);
            }
            self.commit(batch)?;
            for replica in replicas {
                self.add_trash_replica(replica);
            }
        }

        tables.remove_by_id(meta.id);
        self.creating_tables.remove(meta.id);
        self.working_tables.remove(meta.id);
        for range in created {
            self.ranges.remove(range.id());
            self.deleted_ranges.add(range.meta);
        }
        info!("table {} canceled in status {}", meta.full_name(), meta.status);
        Ok(())
    }

    /// Append columns described by a JSON patch `{"columns": [...]}`
    pub fn edit_table(&self, db_name: &str, table_name: &str, properties: &str) -> Result<TableMeta> {
        self.ensure_open()?;
        let patch = schema::parse_schema_patch(properties)?;
        let table = self.find_table(db_name, table_name)?;

        let mut meta = table.schema_lock();
        if meta.status.is_deleted() {
            return Err(MasterError::IllegalState(format!(
                "table {} is {}",
                meta.full_name(),
                meta.status
            )));
        }
        schema::validate_added_columns(&meta.columns, &patch.columns)?;

        let mut next = meta.clone();
        let mut next_id = next.columns.iter().map(|c| c.id).max().unwrap_or(0);
        for col in patch.columns {
            next_id += 1;
            next.columns.push(Column { id: next_id, ..col });
        }
        next.epoch.conf_ver += 1;
        if next.status != TableStatus::Init {
            self.put_one(keys::table_key(next.id), &next)?;
        }
        *meta = next.clone();
        info!(
            "table {} edited, {} columns, epoch {}/{}",
            next.full_name(),
            next.columns.len(),
            next.epoch.conf_ver,
            next.epoch.version
        );
        Ok(next)
    }

    /// Persist the per-table switches as one batch; unchanged values write
    /// nothing
    pub fn update_table_auto_schedule_info(
        &self,
        db_name: &str,
        table_name: &str,
        failover_disabled: bool,
        transfer_disabled: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock();
        let table = self.find_table(db_name, table_name)?;
        let meta = table.meta();
        if meta.status.is_deleted() {
            return Err(MasterError::IllegalState(format!(
                "table {} is {}",
                meta.full_name(),
                meta.status
            )));
        }

        let next = ScheduleSwitches {
            failover_disabled,
            transfer_disabled,
        };
        if self.table_switches(meta.id) == next {
            return Ok(());
        }
        let mut batch = self.store.new_batch();
        batch.put(
            keys::table_auto_failover_key(meta.id),
            keys::flag_value(failover_disabled),
        );
        batch.put(
            keys::table_auto_transfer_key(meta.id),
            keys::flag_value(transfer_disabled),
        );
        self.commit(batch)?;
        self.table_switches.write().insert(meta.id, next);
        info!(
            "table {} auto schedule updated: failover disabled={}, transfer disabled={}",
            meta.full_name(),
            failover_disabled,
            transfer_disabled
        );
        Ok(())
    }

    /// Advance every table under creation; one failing table does not stop
    /// the others
    pub async fn progress_creating_tables(&self) -> Result<()> {
        let mut first_err = None;
        for job in self.creating_tables.all() {
            if let Err(e) = self.progress_create_table(&job).await {
                warn!("create table {:?}: {}", job.table(), e);
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// One creation step: persist as `Prepare`, create queued ranges until
    /// one fails, and mark the table `Running` once none remain
    pub async fn progress_create_table(&self, job: &CreateTable) -> Result<()> {
        let table = job.table().clone();
        if table.status() == TableStatus::Init {
            self.advance_creating_table(&table, TableStatus::Prepare)?;
        }

        while let Some(req) = job.pop_pending() {
            if !self.creating_tables.contains(table.id()) {
                return Ok(());
            }
            match self.create_range_by_scope(&table, &req).await {
                Ok(range_id) => {
                    let remaining = job.complete_one();
                    info!(
                        "table {:?}: range {} created, {} remaining",
                        table, range_id, remaining
                    );
                }
                Err(e) => {
                    job.requeue(req);
                    return Err(e);
                }
            }
        }

        if job.remaining() == 0 {
            self.advance_creating_table(&table, TableStatus::Running)?;
            self.creating_tables.remove(table.id());
            info!("table {:?} is running", table);
        }
        Ok(())
    }

    /// Persist a status change of a table still in the creating set
    fn advance_creating_table(&self, table: &Table, status: TableStatus) -> Result<()> {
        let mut meta = table.schema_lock();
        if !self.creating_tables.contains(meta.id) {
            return Err(MasterError::IllegalState(format!(
                "table {} was canceled",
                meta.full_name()
            )));
        }
        let mut next = meta.clone();
        next.transition(status)?;
        self.put_one(keys::table_key(next.id), &next)?;
        *meta = next;
        Ok(())
    }

    /// Physically remove deleted tables whose retention has expired
    ///
    /// Every remaining range is deleted (its replicas become trash for the
    /// GC worker), then the table record goes. Returns how many tables were
    /// removed.
    pub fn purge_deleted_tables(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.schedule.retention())
            .map_err(|e| MasterError::IllegalState(format!("retention out of range: {}", e)))?;
        let now = Utc::now();
        let mut purged = 0;

        for table in self.deleting_tables.all() {
            let snapshot = table.snapshot();
            let Some(deleted_at) = snapshot.delete_time() else {
                return Err(MasterError::InternalInconsistency(format!(
                    "deleted table {} has no deletion time",
                    snapshot.full_name()
                )));
            };
            if deleted_at + retention > now {
                continue;
            }

            if snapshot.status == TableStatus::Delete {
                let mut meta = table.schema_lock();
                let mut next = meta.clone();
                next.transition(TableStatus::Deleting)?;
                self.put_one(keys::table_key(next.id), &next)?;
                *meta = next;
            }

            for range in self.ranges.table_ranges(snapshot.id) {
                self.delete_range(range.id())?;
            }

            self.delete_one(keys::table_key(snapshot.id))?;
            self.deleting_tables.remove(snapshot.id);
            purged += 1;
            info!("table {} purged", snapshot.full_name());
        }
        Ok(purged)
    }
}

/// Partition a table's key space at the encoded split keys
fn split_ranges(meta: &TableMeta, split_keys: &[String]) -> Result<Vec<RangeToCreate>> {
    let (start, end) = keys::table_key_space(meta.id);
    if split_keys.is_empty() {
        return Ok(vec![RangeToCreate {
            start_key: start,
            end_key: end,
        }]);
    }

    let mut seen = HashSet::new();
    for key in split_keys {
        if !seen.insert(key.as_str()) {
            return Err(MasterError::DuplicateKey(key.clone()));
        }
    }

    let pk = meta
        .first_pk_column()
        .ok_or_else(|| MasterError::InvalidSchema("table has no primary key".to_string()))?;
    let mut encoded = Vec::with_capacity(split_keys.len());
    for key in split_keys {
        let mut buf = start.clone();
        schema::encode_primary_key(&mut buf, pk, key.as_bytes())?;
        encoded.push((buf, key));
    }
    encoded.sort();
    // Distinct inputs may still encode equal, e.g. "1" and "01" of an int
    if let Some(w) = encoded.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(MasterError::DuplicateKey(w[1].1.clone()));
    }

    let mut bounds = Vec::with_capacity(encoded.len() + 2);
    bounds.push(start);
    bounds.extend(encoded.into_iter().map(|(k, _)| k));
    bounds.push(end);
    Ok(bounds
        .windows(2)
        .map(|w| RangeToCreate {
            start_key: w[0].clone(),
            end_key: w[1].clone(),
        })
        .collect())
}
