//! Store access helpers

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use metastore::WriteBatch;

use super::Cluster;
use crate::codec;
use crate::error::Result;
use crate::keys::{self, namespace_range};
use crate::metadata::{RangeMeta, Replica};

/// Put `value` encoded under `key`
pub(super) fn put_entity<T: Serialize>(batch: &mut WriteBatch, key: Vec<u8>, value: &T) -> Result<()> {
    batch.put(key, codec::encode(value)?);
    Ok(())
}

/// Operations removing a live range: a trash replica per peer, the range
/// record itself and its deleted-range snapshot
pub(super) fn range_delete_ops(batch: &mut WriteBatch, meta: &RangeMeta) -> Result<Vec<Replica>> {
    let mut replicas = Vec::with_capacity(meta.peers.len());
    for peer in &meta.peers {
        let replica = Replica::of(meta, *peer);
        put_entity(batch, keys::replica_key(peer.id), &replica)?;
        replicas.push(replica);
    }
    batch.delete(keys::range_key(meta.id));
    put_entity(batch, keys::deleted_range_key(meta.id), meta)?;
    Ok(replicas)
}

impl Cluster {
    /// Commit `batch`, logging failures at error level
    pub(super) fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let ops = batch.len();
        self.store.write_batch(batch).map_err(|e| {
            error!("commit batch of {} ops failed: {}", ops, e);
            e.into()
        })
    }

    pub(super) fn put_one<T: Serialize>(&self, key: Vec<u8>, value: &T) -> Result<()> {
        let mut batch = self.store.new_batch();
        put_entity(&mut batch, key, value)?;
        self.commit(batch)
    }

    pub(super) fn delete_one(&self, key: Vec<u8>) -> Result<()> {
        let mut batch = self.store.new_batch();
        batch.delete(key);
        self.commit(batch)
    }

    /// Decode every record of a namespace, in key order
    pub(super) fn scan_namespace<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(Vec<u8>, T)>> {
        let (start, end) = namespace_range(prefix);
        let mut out = Vec::new();
        for item in self.store.scan(&start, &end)? {
            let (key, value) = item?;
            let decoded = codec::decode(&value).map_err(|e| {
                error!("decode {} failed: {}", String::from_utf8_lossy(&key), e);
                e
            })?;
            out.push((key, decoded));
        }
        Ok(out)
    }

    /// Read a switch; a missing key means "not disabled"
    pub(super) fn load_flag(&self, key: &[u8]) -> Result<bool> {
        match self.store.get(key)? {
            None => Ok(false),
            Some(value) => keys::decode_flag(&value).ok_or_else(|| {
                crate::error::MasterError::InternalInconsistency(format!(
                    "switch {} holds {} bytes",
                    String::from_utf8_lossy(key),
                    value.len()
                ))
            }),
        }
    }
}
