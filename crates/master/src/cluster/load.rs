//! Cold start: rebuild every cache from the store

use std::sync::Arc;
use tracing::{info, warn};

use super::persist::put_entity;
use super::{Cluster, ScheduleSwitches};
use crate::error::{MasterError, Result};
use crate::keys::{self, prefix};
use crate::metadata::{
    CreateTable, Database, DatabaseMeta, Node, NodeMeta, Range, RangeMeta, RangeToCreate, Replica,
    Table, TableMeta, TableStatus,
};

/// Trash range records removed per commit
const TRASH_RANGE_BATCH: usize = 100;

impl Cluster {
    /// Load nodes, databases, tables, ranges, trash replicas, pre-GC ranges
    /// and deleted ranges, in that order
    ///
    /// Range records without peers or without a live or deleting table are
    /// purged. Tables still in `Prepare` resume creating their missing
    /// ranges. A record that contradicts another aborts the load with
    /// `InternalInconsistency`.
    pub fn load_cache(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock();

        *self.switches.write() = ScheduleSwitches {
            failover_disabled: self.load_flag(&keys::auto_failover_key(self.cluster_id))?,
            transfer_disabled: self.load_flag(&keys::auto_transfer_key(self.cluster_id))?,
        };

        self.load_nodes()?;
        self.load_databases()?;
        let preparing = self.load_tables()?;
        let trash = self.load_ranges()?;
        self.load_trash_replicas()?;
        self.load_pre_gc_ranges()?;
        self.load_deleted_ranges()?;
        self.purge_trash_ranges(trash)?;
        self.resume_creating_tables(preparing);

        info!(
            "cache loaded: {} nodes, {} databases, {} working tables, {} deleting tables, \
             {} ranges, {} pre-gc ranges, {} deleted ranges",
            self.nodes.len(),
            self.dbs.len(),
            self.working_tables.len(),
            self.deleting_tables.len(),
            self.ranges.len(),
            self.pre_gc_ranges.len(),
            self.deleted_ranges.len()
        );
        Ok(())
    }

    fn load_nodes(&self) -> Result<()> {
        for (_, meta) in self.scan_namespace::<NodeMeta>(prefix::NODE)? {
            self.nodes.add(Node::new(meta));
        }
        Ok(())
    }

    fn load_databases(&self) -> Result<()> {
        for (_, meta) in self.scan_namespace::<DatabaseMeta>(prefix::DB)? {
            self.dbs.add(Arc::new(Database::new(meta)));
        }
        Ok(())
    }

    /// Returns the tables still being created
    fn load_tables(&self) -> Result<Vec<Arc<Table>>> {
        let mut preparing = Vec::new();
        for (_, meta) in self.scan_namespace::<TableMeta>(prefix::TABLE)? {
            let db = self.dbs.find_by_id(meta.db_id).ok_or_else(|| {
                MasterError::InternalInconsistency(format!(
                    "table {} references missing database {}",
                    meta.full_name(),
                    meta.db_id
                ))
            })?;
            if meta.status.is_deleted() && meta.delete_time().is_none() {
                return Err(MasterError::InternalInconsistency(format!(
                    "table {} is {} without a deletion time",
                    meta.full_name(),
                    meta.status
                )));
            }

            let id = meta.id;
            let status = meta.status;
            let table = Arc::new(Table::new(meta));
            match status {
                TableStatus::Delete | TableStatus::Deleting => self.deleting_tables.add(table),
                TableStatus::Init | TableStatus::Prepare => {
                    db.lock().add(table.clone());
                    self.working_tables.add(table.clone());
                    preparing.push(table);
                }
                TableStatus::Running => {
                    db.lock().add(table.clone());
                    self.working_tables.add(table);
                }
            }

            if !status.is_deleted() {
                let switches = ScheduleSwitches {
                    failover_disabled: self.load_flag(&keys::table_auto_failover_key(id))?,
                    transfer_disabled: self.load_flag(&keys::table_auto_transfer_key(id))?,
                };
                if switches != ScheduleSwitches::default() {
                    self.table_switches.write().insert(id, switches);
                }
            }
        }
        Ok(preparing)
    }

    /// Returns the trash range records
    fn load_ranges(&self) -> Result<Vec<RangeMeta>> {
        let mut trash = Vec::new();
        for (_, meta) in self.scan_namespace::<RangeMeta>(prefix::RANGE)? {
            let owned = self.working_tables.contains(meta.table_id)
                || self.deleting_tables.contains(meta.table_id);
            if meta.peers.is_empty() || !owned {
                warn!(
                    "trash range {} of table {} with {} peers",
                    meta.id,
                    meta.table_id,
                    meta.peers.len()
                );
                trash.push(meta);
                continue;
            }
            let id = meta.id;
            self.ranges.add(Range::new(meta, None)).map_err(|e| {
                MasterError::InternalInconsistency(format!("range {}: {}", id, e))
            })?;
        }
        Ok(trash)
    }

    fn load_trash_replicas(&self) -> Result<()> {
        for (_, replica) in self.scan_namespace::<Replica>(prefix::REPLICA)? {
            self.add_trash_replica(replica);
        }
        Ok(())
    }

    fn load_pre_gc_ranges(&self) -> Result<()> {
        for (_, meta) in self.scan_namespace::<RangeMeta>(prefix::PRE_GC)? {
            self.pre_gc_ranges.add(meta);
        }
        Ok(())
    }

    fn load_deleted_ranges(&self) -> Result<()> {
        for (_, meta) in self.scan_namespace::<RangeMeta>(prefix::DELETED_RANGE)? {
            self.deleted_ranges.add(meta);
        }
        Ok(())
    }

    /// Delete trash range records in batches; their peers become trash
    /// replicas so the data is still collected
    fn purge_trash_ranges(&self, trash: Vec<RangeMeta>) -> Result<()> {
        if trash.is_empty() {
            return Ok(());
        }
        let total = trash.len();
        for chunk in trash.chunks(TRASH_RANGE_BATCH) {
            let mut batch = self.store.new_batch();
            let mut replicas = Vec::new();
            for meta in chunk {
                batch.delete(keys::range_key(meta.id));
                for peer in &meta.peers {
                    let replica = Replica::of(meta, *peer);
                    put_entity(&mut batch, keys::replica_key(peer.id), &replica)?;
                    replicas.push(replica);
                }
            }
            self.commit(batch)?;
            for replica in replicas {
                self.add_trash_replica(replica);
            }
        }
        info!("purged {} trash ranges", total);
        Ok(())
    }

    /// Queue the parts of each table's key space not covered by a loaded
    /// range
    fn resume_creating_tables(&self, preparing: Vec<Arc<Table>>) {
        for table in preparing {
            let (start, end) = keys::table_key_space(table.id());
            let mut gaps = Vec::new();
            let mut cursor = start;
            for range in self.ranges.table_ranges(table.id()) {
                if range.meta.start_key > cursor {
                    gaps.push(RangeToCreate {
                        start_key: cursor,
                        end_key: range.meta.start_key.clone(),
                    });
                }
                cursor = range.meta.end_key.clone();
            }
            if cursor < end {
                gaps.push(RangeToCreate {
                    start_key: cursor,
                    end_key: end,
                });
            }
            info!("resuming creation of table {:?}, {} ranges missing", table, gaps.len());
            self.creating_tables
                .add(Arc::new(CreateTable::new(table, gaps)));
        }
    }
}
