//! Persistent key layout
//!
//! Every entity kind lives under its own namespace prefix followed by the
//! decimal entity id:
//! - Database: `schema db {id}`
//! - Table: `schema table {id}`
//! - Node: `schema node {id}`
//! - Range: `schema range {id}`
//! - Deleted range: `schema deleted_range {id}`
//! - Trash replica: `schema replica {peer_id}`
//! - Pre-GC range: `schema pre_gc {id}`
//!
//! Scheduling switches and the id allocator use `$`-prefixed keys, which sort
//! before every `schema` namespace. No prefix may start with `0xFF`.

use metastore::prefix_range;

/// Namespace prefixes
pub mod prefix {
    pub const DB: &str = "schema db ";
    pub const TABLE: &str = "schema table ";
    pub const NODE: &str = "schema node ";
    pub const RANGE: &str = "schema range ";
    pub const DELETED_RANGE: &str = "schema deleted_range ";
    pub const REPLICA: &str = "schema replica ";
    pub const PRE_GC: &str = "schema pre_gc ";
}

/// Id allocator high-water mark
pub const AUTO_INCREMENT_ID: &[u8] = b"$auto_increment_id";

/// Leading byte of every table's user key space
pub const STORE_PREFIX_KV: u8 = 0x01;

fn entity_key(prefix: &str, id: u64) -> Vec<u8> {
    format!("{}{}", prefix, id).into_bytes()
}

pub fn db_key(id: u64) -> Vec<u8> {
    entity_key(prefix::DB, id)
}

pub fn table_key(id: u64) -> Vec<u8> {
    entity_key(prefix::TABLE, id)
}

pub fn node_key(id: u64) -> Vec<u8> {
    entity_key(prefix::NODE, id)
}

pub fn range_key(id: u64) -> Vec<u8> {
    entity_key(prefix::RANGE, id)
}

pub fn deleted_range_key(id: u64) -> Vec<u8> {
    entity_key(prefix::DELETED_RANGE, id)
}

pub fn replica_key(peer_id: u64) -> Vec<u8> {
    entity_key(prefix::REPLICA, peer_id)
}

pub fn pre_gc_key(range_id: u64) -> Vec<u8> {
    entity_key(prefix::PRE_GC, range_id)
}

/// Cluster-wide "auto transfer disabled" switch
pub fn auto_transfer_key(cluster_id: u64) -> Vec<u8> {
    format!("$auto_transfer_{}", cluster_id).into_bytes()
}

/// Cluster-wide "auto failover disabled" switch
pub fn auto_failover_key(cluster_id: u64) -> Vec<u8> {
    format!("$auto_failover_{}", cluster_id).into_bytes()
}

/// Per-table "auto transfer disabled" switch
pub fn table_auto_transfer_key(table_id: u64) -> Vec<u8> {
    format!("$auto_transfer_table_{}", table_id).into_bytes()
}

/// Per-table "auto failover disabled" switch
pub fn table_auto_failover_key(table_id: u64) -> Vec<u8> {
    format!("$auto_failover_table_{}", table_id).into_bytes()
}

/// Scan bounds of a namespace
pub fn namespace_range(prefix: &str) -> (Vec<u8>, Vec<u8>) {
    prefix_range(prefix.as_bytes())
}

/// `[start, end)` owned by a table in the user key space
pub fn table_key_space(table_id: u64) -> (Vec<u8>, Vec<u8>) {
    let mut start = Vec::with_capacity(9);
    start.push(STORE_PREFIX_KV);
    start.extend_from_slice(&table_id.to_be_bytes());
    prefix_range(&start)
}

/// Encode a switch value
pub fn flag_value(enabled: bool) -> Vec<u8> {
    (enabled as u64).to_be_bytes().to_vec()
}

/// Decode a switch value; anything but 8 bytes is rejected
pub fn decode_flag(value: &[u8]) -> Option<bool> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(u64::from_be_bytes(bytes) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_keys() {
        assert_eq!(db_key(7), b"schema db 7".to_vec());
        assert_eq!(range_key(12), b"schema range 12".to_vec());
        assert_eq!(replica_key(3), b"schema replica 3".to_vec());
        assert_eq!(auto_failover_key(1), b"$auto_failover_1".to_vec());
        assert_eq!(table_auto_transfer_key(5), b"$auto_transfer_table_5".to_vec());
    }

    #[test]
    fn test_namespaces_do_not_overlap() {
        let (start, end) = namespace_range(prefix::RANGE);
        let range = range_key(99);
        let deleted = deleted_range_key(99);
        assert!(range >= start && range < end);
        assert!(!(deleted >= start && deleted < end));
    }

    #[test]
    fn test_table_key_space() {
        let (start, end) = table_key_space(1);
        assert_eq!(start, vec![0x01, 0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(end, vec![0x01, 0, 0, 0, 0, 0, 0, 0, 2]);

        let (start, end) = table_key_space(0xFF);
        assert_eq!(start.len(), 9);
        assert_eq!(end, vec![0x01, 0, 0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_flag_roundtrip() {
        assert_eq!(decode_flag(&flag_value(true)), Some(true));
        assert_eq!(decode_flag(&flag_value(false)), Some(false));
        assert_eq!(decode_flag(b"bad"), None);
    }
}
