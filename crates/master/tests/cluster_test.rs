//! Cluster orchestrator tests

mod common;

use chrono::Utc;

use common::{columns, split_keys, Call, TestCluster};
use master::event::EventKind;
use master::keys;
use master::metadata::{DownPeer, RangeEpoch, TableStatus};
use master::schema::{Column, DataType};
use master::{MasterError, NodeHeartbeat, RangeHeartbeat};
use metastore::Store;

async fn running_table(t: &TestCluster, name: &str, keys: &[&str]) -> u64 {
    let table = t
        .cluster
        .create_table("db", name, columns(), Vec::new(), false, &split_keys(keys))
        .unwrap();
    t.cluster.progress_creating_tables().await.unwrap();
    assert_eq!(table.status(), TableStatus::Running);
    table.id()
}

#[test]
fn test_create_and_find_database() {
    let t = TestCluster::new();
    let db = t.cluster.create_database("db", "{\"owner\":\"ops\"}").unwrap();
    let found = t.cluster.find_database("db").unwrap();
    assert_eq!(found.id(), db.id());
    assert_eq!(found.meta().properties, "{\"owner\":\"ops\"}");

    let err = t.cluster.create_database("db", "").unwrap_err();
    assert!(matches!(err, MasterError::DuplicateEntity { kind: "database", .. }));
    assert!(matches!(
        t.cluster.find_database("missing"),
        Err(MasterError::NoSuchEntity { .. })
    ));
}

#[test]
fn test_split_keys_partition_key_space() {
    let t = TestCluster::new();
    t.cluster.create_database("db", "").unwrap();
    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &split_keys(&["m", "c", "x"]))
        .unwrap();
    assert_eq!(table.status(), TableStatus::Init);

    let job = t.cluster.creating_tables().find(table.id()).unwrap();
    let ranges = job.pending_ranges();
    assert_eq!(ranges.len(), 4);
    assert_eq!(job.remaining(), 4);

    let (start, end) = keys::table_key_space(table.id());
    assert_eq!(ranges[0].start_key, start);
    assert_eq!(ranges[3].end_key, end);
    for w in ranges.windows(2) {
        assert_eq!(w[0].end_key, w[1].start_key);
        assert!(w[0].start_key < w[0].end_key);
    }
    assert!(t.cluster.working_tables().contains(table.id()));
}

#[test]
fn test_duplicate_split_keys_leave_no_table() {
    let t = TestCluster::new();
    let db = t.cluster.create_database("db", "").unwrap();
    let err = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &split_keys(&["a", "b", "a"]))
        .unwrap_err();
    assert!(matches!(err, MasterError::DuplicateKey(k) if k == "a"));
    assert!(db.find_table("t").is_none());
    assert!(t.cluster.working_tables().is_empty());
    assert!(t.cluster.creating_tables().is_empty());
}

#[test]
fn test_create_table_validation() {
    let t = TestCluster::new();
    let err = t
        .cluster
        .create_table("missing", "t", columns(), Vec::new(), false, &[])
        .unwrap_err();
    assert!(matches!(err, MasterError::NoSuchEntity { kind: "database", .. }));

    t.cluster.create_database("db", "").unwrap();
    let reserved = vec![Column::primary("select", DataType::Int)];
    let err = t
        .cluster
        .create_table("db", "t", reserved, Vec::new(), false, &[])
        .unwrap_err();
    assert!(matches!(err, MasterError::ReservedIdentifier(_)));

    t.cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap();
    let err = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap_err();
    assert!(matches!(err, MasterError::DuplicateEntity { kind: "table", .. }));
}

#[tokio::test]
async fn test_create_table_progression() {
    let t = TestCluster::new();
    let nodes = t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &["g", "p"]).await;

    let ranges = t.cluster.ranges().table_ranges(id);
    assert_eq!(ranges.len(), 3);
    for range in &ranges {
        let mut hosts = range.meta.node_ids();
        hosts.sort_unstable();
        assert_eq!(hosts, nodes);
        assert_eq!(range.meta.epoch, RangeEpoch::new(1, 1));
        assert!(t.store.get(&keys::range_key(range.id())).unwrap().is_some());
    }
    assert_eq!(t.client.create_calls(), 9);
    assert!(t.cluster.creating_tables().is_empty());
}

#[tokio::test]
async fn test_failed_range_creation_is_retried() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &split_keys(&["k"]))
        .unwrap();

    t.client.fail_create.store(true, std::sync::atomic::Ordering::SeqCst);
    let err = t.cluster.progress_creating_tables().await.unwrap_err();
    assert!(matches!(err, MasterError::Rpc(_)));
    assert_eq!(table.status(), TableStatus::Prepare);
    assert_eq!(t.cluster.creating_tables().find(table.id()).unwrap().remaining(), 2);

    t.client.fail_create.store(false, std::sync::atomic::Ordering::SeqCst);
    t.cluster.progress_creating_tables().await.unwrap();
    assert_eq!(table.status(), TableStatus::Running);
    assert_eq!(t.cluster.ranges().table_ranges(table.id()).len(), 2);
}

#[tokio::test]
async fn test_no_nodes_keeps_table_preparing() {
    let t = TestCluster::new();
    t.cluster.create_database("db", "").unwrap();
    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap();
    let err = t.cluster.progress_creating_tables().await.unwrap_err();
    assert!(matches!(err, MasterError::NoEligibleNode { .. }));
    assert_eq!(table.status(), TableStatus::Prepare);
}

#[tokio::test]
async fn test_cancel_table() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let db = t.cluster.create_database("db", "").unwrap();

    // Init: nothing persisted, nothing written
    let init = t
        .cluster
        .create_table("db", "init", columns(), Vec::new(), false, &[])
        .unwrap();
    let before = t.store.batches();
    t.cluster.cancel_table("db", "init").unwrap();
    assert_eq!(t.store.batches(), before);
    assert!(db.find_table("init").is_none());
    assert!(!t.cluster.working_tables().contains(init.id()));
    assert!(!t.cluster.creating_tables().contains(init.id()));

    // Prepare: persisted record removed
    let prepare = t
        .cluster
        .create_table("db", "prepare", columns(), Vec::new(), false, &[])
        .unwrap();
    t.client.fail_create.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = t.cluster.progress_creating_tables().await;
    assert_eq!(prepare.status(), TableStatus::Prepare);
    assert!(t.store.get(&keys::table_key(prepare.id())).unwrap().is_some());
    t.cluster.cancel_table("db", "prepare").unwrap();
    assert!(t.store.get(&keys::table_key(prepare.id())).unwrap().is_none());
    assert!(db.find_table("prepare").is_none());

    // Running: refused
    t.client.fail_create.store(false, std::sync::atomic::Ordering::SeqCst);
    running_table(&t, "running", &[]).await;
    let err = t.cluster.cancel_table("db", "running").unwrap_err();
    assert!(matches!(err, MasterError::IllegalState(_)));
}

#[tokio::test]
async fn test_delete_table_fast_and_slow() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let slow = running_table(&t, "slow", &[]).await;
    let fast = running_table(&t, "fast", &[]).await;
    for name in ["slow", "fast"] {
        t.cluster
            .update_table_auto_schedule_info("db", name, true, true)
            .unwrap();
    }
    assert!(t.store.get(&keys::table_auto_failover_key(slow)).unwrap().is_some());

    let retention = chrono::Duration::seconds(t.cluster.config().schedule.retention_secs as i64);

    let before = t.store.batches();
    t.cluster.delete_table("db", "slow", false).unwrap();
    assert_eq!(t.store.batches(), before + 1);
    let table = t.cluster.deleting_tables().find(slow).unwrap();
    assert_eq!(table.status(), TableStatus::Delete);
    let deleted_at = table.delete_time().unwrap();
    assert!((Utc::now() - deleted_at).num_seconds() <= 2);
    assert!(t.store.get(&keys::table_auto_failover_key(slow)).unwrap().is_none());
    assert!(t.store.get(&keys::table_auto_transfer_key(slow)).unwrap().is_none());
    assert!(!t.cluster.working_tables().contains(slow));

    let before = t.store.batches();
    t.cluster.delete_table("db", "fast", true).unwrap();
    assert_eq!(t.store.batches(), before + 1);
    let table = t.cluster.deleting_tables().find(fast).unwrap();
    assert_eq!(table.status(), TableStatus::Deleting);
    assert!(table.delete_time().unwrap() < Utc::now() - retention);
    assert!(t.store.get(&keys::table_auto_transfer_key(fast)).unwrap().is_none());

    // The name is released at once
    assert!(matches!(
        t.cluster.delete_table("db", "fast", true),
        Err(MasterError::NoSuchEntity { .. })
    ));
    assert!(matches!(
        t.cluster.delete_table("db", "nope", true),
        Err(MasterError::NoSuchEntity { .. })
    ));
}

#[tokio::test]
async fn test_deleted_table_name_can_be_reused() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let db = t.cluster.create_database("db", "").unwrap();
    let old = running_table(&t, "t", &[]).await;
    t.cluster.delete_table("db", "t", false).unwrap();
    assert!(db.find_table("t").is_none());
    assert!(t.cluster.deleting_tables().contains(old));

    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap();
    assert_ne!(table.id(), old);
    assert_eq!(t.cluster.find_table("db", "t").unwrap().id(), table.id());

    // A table still being created is canceled, not deleted
    let err = t.cluster.delete_table("db", "t", false).unwrap_err();
    assert!(matches!(err, MasterError::IllegalState(_)));
    assert_eq!(table.status(), TableStatus::Init);

    // Purging the old table leaves the new one alone
    t.cluster.progress_creating_tables().await.unwrap();
    let stale = t.cluster.deleting_tables().find(old).unwrap();
    stale
        .schema_lock()
        .set_delete_time(Utc::now() - chrono::Duration::days(30));
    assert_eq!(t.cluster.purge_deleted_tables().unwrap(), 1);
    assert_eq!(db.find_table("t").unwrap().id(), table.id());
    assert_eq!(table.status(), TableStatus::Running);
}

#[tokio::test]
async fn test_purge_deleted_tables() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let db = t.cluster.create_database("db", "").unwrap();
    let slow = running_table(&t, "slow", &[]).await;
    let fast = running_table(&t, "fast", &["k"]).await;
    t.cluster.delete_table("db", "slow", false).unwrap();
    t.cluster.delete_table("db", "fast", true).unwrap();

    assert_eq!(t.cluster.purge_deleted_tables().unwrap(), 1);
    assert!(t.cluster.deleting_tables().contains(slow));
    assert!(!t.cluster.deleting_tables().contains(fast));
    assert!(db.find_table("fast").is_none());
    assert!(t.store.get(&keys::table_key(fast)).unwrap().is_none());
    assert!(t.cluster.ranges().table_ranges(fast).is_empty());
    assert_eq!(t.cluster.deleted_ranges().len(), 2);

    // Every peer of the purged ranges waits for collection
    let trash: usize = t
        .cluster
        .nodes()
        .all()
        .iter()
        .map(|n| n.trash_replicas.len())
        .sum();
    assert_eq!(trash, 6);

    t.cluster.gc_trash_replicas().await.unwrap();
    let collected = t
        .client
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::DeleteRange { .. }))
        .count();
    assert_eq!(collected, 6);
    assert!(t.cluster.nodes().all().iter().all(|n| n.trash_replicas.is_empty()));
}

#[test]
fn test_update_auto_schedule_info_is_idempotent() {
    let t = TestCluster::new();
    assert!(t.cluster.is_auto_failover_enabled());

    let before = t.store.batches();
    t.cluster.update_auto_schedule_info(true, false).unwrap();
    t.cluster.update_auto_schedule_info(true, false).unwrap();
    assert_eq!(t.store.batches(), before + 1);
    assert!(!t.cluster.is_auto_failover_enabled());
    assert!(t.cluster.is_auto_transfer_enabled());
    assert_eq!(
        t.store.get(&keys::auto_failover_key(1)).unwrap(),
        Some(keys::flag_value(true))
    );
}

#[test]
fn test_failed_switch_commit_keeps_flags() {
    let t = TestCluster::new();
    t.store.fail_batches.store(true, std::sync::atomic::Ordering::SeqCst);
    let err = t.cluster.update_auto_schedule_info(true, true).unwrap_err();
    assert!(err.is_persistence());
    assert!(t.cluster.is_auto_failover_enabled());
    assert!(t.cluster.is_auto_transfer_enabled());
}

#[tokio::test]
async fn test_edit_table() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &[]).await;

    let meta = t
        .cluster
        .edit_table(
            "db",
            "t",
            r#"{"columns":[{"name":"extra","data_type":"int","nullable":true}]}"#,
        )
        .unwrap();
    assert_eq!(meta.columns.len(), 3);
    assert_eq!(meta.columns[2].id, 3);
    assert_eq!(meta.epoch.conf_ver, 2);

    let stored: master::metadata::TableMeta =
        master::codec::decode(&t.store.get(&keys::table_key(id)).unwrap().unwrap()).unwrap();
    assert_eq!(stored, meta);

    assert!(matches!(
        t.cluster.edit_table("db", "t", "not json"),
        Err(MasterError::InvalidSchema(_))
    ));
    assert!(matches!(
        t.cluster.edit_table("db", "t", r#"{"columns":[{"name":"value","data_type":"int","nullable":true}]}"#),
        Err(MasterError::InvalidSchema(_))
    ));
}

#[tokio::test]
async fn test_range_heartbeat_epochs() {
    let t = TestCluster::new();
    let nodes = t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &[]).await;
    let range = t.cluster.ranges().table_ranges(id).remove(0);

    // Newer epoch without the last peer
    let mut reported = range.meta.clone();
    reported.epoch = RangeEpoch::new(2, 1);
    let dropped = reported.peers.pop().unwrap();
    t.cluster
        .range_heartbeat(RangeHeartbeat {
            range: reported.clone(),
            leader: Some(reported.peers[0]),
            down_peers: Vec::new(),
            stats: Default::default(),
        })
        .unwrap();
    let cached = t.cluster.find_range(range.id()).unwrap();
    assert_eq!(cached.meta.peers.len(), 2);
    assert_eq!(cached.leader_node(), Some(reported.peers[0].node_id));
    let node = t.cluster.find_node(dropped.node_id).unwrap();
    assert!(node.trash_replicas.contains_key(&dropped.id));
    assert!(nodes.contains(&dropped.node_id));

    // Older epoch is rejected
    let err = t
        .cluster
        .range_heartbeat(RangeHeartbeat {
            range: range.meta.clone(),
            leader: None,
            down_peers: Vec::new(),
            stats: Default::default(),
        })
        .unwrap_err();
    assert!(matches!(err, MasterError::StaleEpoch { kind: "range", .. }));
}

#[tokio::test]
async fn test_range_heartbeat_rejects_overlapping_bounds() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &["m"]).await;
    let ranges = t.cluster.ranges().table_ranges(id);
    let (left, right) = (&ranges[0], &ranges[1]);
    let before = t.store.get(&keys::range_key(left.id())).unwrap();

    let mut widened = left.meta.clone();
    widened.epoch = RangeEpoch::new(1, 2);
    widened.end_key = right.meta.end_key.clone();
    let err = t
        .cluster
        .range_heartbeat(RangeHeartbeat {
            range: widened,
            leader: Some(left.meta.peers[0]),
            down_peers: Vec::new(),
            stats: Default::default(),
        })
        .unwrap_err();
    assert!(matches!(err, MasterError::IllegalState(_)));
    assert_eq!(t.store.get(&keys::range_key(left.id())).unwrap(), before);
    assert_eq!(t.cluster.find_range(left.id()).unwrap().meta, left.meta);

    let reloaded = TestCluster::reopen(t.store.clone()).unwrap();
    assert_eq!(reloaded.cluster.ranges().table_ranges(id).len(), 2);
}

#[tokio::test]
async fn test_partial_range_creation_leaves_trash() {
    let t = TestCluster::new();
    let nodes = t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap();
    *t.client.fail_create_on.lock() = Some("10.0.0.2:6060".to_string());

    for _ in 0..3 {
        assert!(t.cluster.progress_creating_tables().await.is_err());
    }
    assert!(t.cluster.ranges().is_empty());
    assert_eq!(t.client.create_calls(), 3);

    // Every replica accepted by the first node is tracked for collection
    let first = t.cluster.find_node(nodes[0]).unwrap();
    assert_eq!(first.trash_replicas.len(), 3);
    for replica in first.trash_replicas.values() {
        assert_eq!(replica.peer.node_id, nodes[0]);
        assert!(t.store.get(&keys::replica_key(replica.peer.id)).unwrap().is_some());
    }
    assert!(t.cluster.find_node(nodes[1]).unwrap().trash_replicas.is_empty());

    t.cluster.gc_trash_replicas().await.unwrap();
    let collected = t
        .client
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::DeleteRange { addr, .. } if addr == "10.0.0.1:6060"))
        .count();
    assert_eq!(collected, 3);

    *t.client.fail_create_on.lock() = None;
    t.cluster.progress_creating_tables().await.unwrap();
    assert_eq!(table.status(), TableStatus::Running);
}

#[tokio::test]
async fn test_cancel_during_range_creation_leaves_trash() {
    let t = TestCluster::new();
    let nodes = t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let table = t
        .cluster
        .create_table("db", "t", columns(), Vec::new(), false, &[])
        .unwrap();

    let cluster = std::sync::Arc::downgrade(&t.cluster);
    *t.client.on_create.lock() = Some(Box::new(move || {
        if let Some(cluster) = cluster.upgrade() {
            let _ = cluster.cancel_table("db", "t");
        }
    }));
    assert!(t.cluster.progress_creating_tables().await.is_err());
    *t.client.on_create.lock() = None;

    assert!(t.cluster.find_table("db", "t").is_err());
    assert!(t.cluster.ranges().table_ranges(table.id()).is_empty());
    let trash: usize = nodes
        .iter()
        .map(|id| t.cluster.find_node(*id).unwrap().trash_replicas.len())
        .sum();
    assert_eq!(trash, t.client.create_calls());
    assert!(trash >= 1);
}

#[tokio::test]
async fn test_failover_replaces_down_peer() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &[]).await;
    let spare = t.cluster.add_node("10.0.0.9:6060").unwrap().id();
    let range = t.cluster.ranges().table_ranges(id).remove(0);
    let down = range.meta.peers[2];

    t.cluster
        .range_heartbeat(RangeHeartbeat {
            range: range.meta.clone(),
            leader: Some(range.meta.peers[0]),
            down_peers: vec![DownPeer { peer: down, down_seconds: 120 }],
            stats: Default::default(),
        })
        .unwrap();

    assert_eq!(t.cluster.schedule_failover(), 1);
    let event = t.cluster.get_event(range.id()).unwrap();
    assert_eq!(
        event.kind,
        EventKind::ChangePeer {
            remove: Some(down),
            add_node: Some(spare)
        }
    );
    // One outstanding event per range
    assert_eq!(t.cluster.schedule_failover(), 0);

    t.cluster.dispatch_events().await;
    assert!(t.cluster.get_events().is_empty());
    let change = t
        .client
        .calls()
        .into_iter()
        .find(|c| matches!(c, Call::ChangePeer { .. }))
        .unwrap();
    match change {
        Call::ChangePeer { addr, range_id, remove, add } => {
            let leader = t.cluster.find_node(range.meta.peers[0].node_id).unwrap();
            assert_eq!(addr, leader.address());
            assert_eq!(range_id, range.id());
            assert_eq!(remove, Some(down));
            assert_eq!(add.map(|p| p.node_id), Some(spare));
        }
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn test_failover_disabled_per_table() {
    let t = TestCluster::new();
    t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(&t, "t", &[]).await;
    t.cluster.add_node("10.0.0.9:6060").unwrap();
    let range = t.cluster.ranges().table_ranges(id).remove(0);
    t.cluster
        .range_heartbeat(RangeHeartbeat {
            range: range.meta.clone(),
            leader: Some(range.meta.peers[0]),
            down_peers: vec![DownPeer { peer: range.meta.peers[1], down_seconds: 60 }],
            stats: Default::default(),
        })
        .unwrap();
    t.cluster
        .update_table_auto_schedule_info("db", "t", true, false)
        .unwrap();
    assert_eq!(t.cluster.schedule_failover(), 0);
}

fn report_load(t: &TestCluster, node_id: u64, leader_count: u64, range_count: u64, write_ops: u64) {
    t.cluster
        .node_heartbeat(NodeHeartbeat {
            node_id,
            range_count,
            leader_count,
            write_ops,
            used_size: 0,
            capacity: 1 << 30,
        })
        .unwrap();
}

/// One running table with a single range led by its first peer
async fn led_range(t: &TestCluster) -> master::metadata::Range {
    t.cluster.create_database("db", "").unwrap();
    let id = running_table(t, "t", &[]).await;
    let range = t.cluster.ranges().table_ranges(id).remove(0);
    t.cluster
        .range_heartbeat(RangeHeartbeat {
            range: range.meta.clone(),
            leader: Some(range.meta.peers[0]),
            down_peers: Vec::new(),
            stats: Default::default(),
        })
        .unwrap();
    t.cluster.find_range(range.id()).unwrap()
}

#[tokio::test]
async fn test_balance_leaders() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let range = led_range(&t).await;
    let peers = range.meta.peers.clone();

    report_load(&t, peers[0].node_id, 4, 1, 0);
    report_load(&t, peers[1].node_id, 0, 1, 0);
    report_load(&t, peers[2].node_id, 2, 1, 0);
    assert_eq!(t.cluster.balance_leaders(), 0);

    report_load(&t, peers[0].node_id, 10, 1, 0);
    assert_eq!(t.cluster.balance_leaders(), 1);
    assert_eq!(
        t.cluster.get_event(range.id()).unwrap().kind,
        EventKind::TransferLeader { to: peers[1] }
    );
}

#[tokio::test]
async fn test_balance_node_ops() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let range = led_range(&t).await;
    let peers = range.meta.peers.clone();

    report_load(&t, peers[0].node_id, 1, 1, 1000);
    report_load(&t, peers[1].node_id, 0, 1, 600);
    report_load(&t, peers[2].node_id, 0, 1, 700);
    assert_eq!(t.cluster.balance_node_ops(), 0);

    report_load(&t, peers[1].node_id, 0, 1, 10);
    assert_eq!(t.cluster.balance_node_ops(), 1);
    assert_eq!(
        t.cluster.get_event(range.id()).unwrap().kind,
        EventKind::TransferLeader { to: peers[1] }
    );
}

#[tokio::test]
async fn test_balance_ranges() {
    let t = TestCluster::new();
    t.add_nodes(3);
    let range = led_range(&t).await;
    let peers = range.meta.peers.clone();
    let cold = t.cluster.add_node("10.0.0.4:6060").unwrap().id();

    report_load(&t, peers[0].node_id, 1, 5, 0);
    report_load(&t, peers[1].node_id, 0, 20, 0);
    report_load(&t, peers[2].node_id, 0, 5, 0);
    report_load(&t, cold, 0, 0, 0);

    // Transfers disabled for the table
    t.cluster
        .update_table_auto_schedule_info("db", "t", false, true)
        .unwrap();
    assert_eq!(t.cluster.balance_ranges(), 0);

    t.cluster
        .update_table_auto_schedule_info("db", "t", false, false)
        .unwrap();
    assert_eq!(t.cluster.balance_ranges(), 1);
    assert_eq!(
        t.cluster.get_event(range.id()).unwrap().kind,
        EventKind::ChangePeer {
            remove: Some(peers[1]),
            add_node: Some(cold)
        }
    );
}

#[tokio::test]
async fn test_delete_node_requires_no_peers() {
    let t = TestCluster::new();
    let nodes = t.add_nodes(3);
    t.cluster.create_database("db", "").unwrap();
    running_table(&t, "t", &[]).await;
    assert!(matches!(
        t.cluster.delete_node(nodes[0]),
        Err(MasterError::IllegalState(_))
    ));

    let idle = t.cluster.add_node("10.0.1.1:6060").unwrap().id();
    t.cluster.delete_node(idle).unwrap();
    assert!(t.store.get(&keys::node_key(idle)).unwrap().is_none());
    assert!(matches!(
        t.cluster.find_node(idle),
        Err(MasterError::NoSuchEntity { .. })
    ));
}

#[test]
fn test_invalid_config_refused() {
    let mut config = common::test_config();
    config.schedule.range_heartbeat_timeout_secs = u64::MAX;
    let store = common::CountingStore::new();
    let err = master::Cluster::new(config, store, common::MockRangeServer::new()).unwrap_err();
    assert!(matches!(err, MasterError::Config(_)));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let t = TestCluster::new();
    t.cluster.start().unwrap();
    assert!(!t.cluster.get_all_worker().is_empty());
    t.cluster.close().await;
    t.cluster.close().await;
    assert!(t.cluster.is_closed());
    assert!(t.cluster.get_all_worker().is_empty());
    assert!(t.client.closed.load(std::sync::atomic::Ordering::SeqCst));
    assert!(matches!(
        t.cluster.create_database("db", ""),
        Err(MasterError::Closed)
    ));
}
