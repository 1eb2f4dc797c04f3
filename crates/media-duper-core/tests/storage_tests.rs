use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::tempdir;
use uuid::Uuid;

use media_duper_core::media::FieldValue;
use media_duper_core::storage::models::*;
use media_duper_core::storage::{Database, TransactionLog};

fn make_test_transaction(removed: usize, minutes_ago: i64) -> MergeTransaction {
    let id = Uuid::new_v4();
    let removed = (0..removed)
        .map(|i| RemovedFile {
            file_id: Uuid::new_v4(),
            original_path: PathBuf::from(format!("/photos/dup_{}.jpg", i)),
            trash_path: PathBuf::from(format!("/trash/{}/dup_{}.jpg", id, i)),
            file_size: 1000 * (i as u64 + 1),
        })
        .collect::<Vec<_>>();
    let mut exif_writes = BTreeMap::new();
    exif_writes.insert("gps".to_string(), FieldValue::Text("48.85,2.35".to_string()));
    MergeTransaction {
        id,
        group_id: Uuid::new_v4(),
        keeper_file_id: Uuid::new_v4(),
        keeper_path: PathBuf::from("/photos/keeper.jpg"),
        space_freed: removed.iter().map(|r| r.file_size).sum(),
        removed,
        created_at: Utc::now() - Duration::minutes(minutes_ago),
        exif_writes,
        metadata_snapshot: Some(MetadataSnapshot {
            target: PathBuf::from("/photos/keeper.jpg.metadata.json"),
            previous: None,
        }),
    }
}

#[test]
fn test_insert_and_get_transaction() {
    let db = Database::open_in_memory().unwrap();
    let txn = make_test_transaction(3, 0);
    let seq = db.insert_merge_transaction(&txn).unwrap();
    assert!(seq > 0);

    let loaded = db.get_merge_transaction(txn.id).unwrap().unwrap();
    assert_eq!(loaded.removed, txn.removed);
    assert_eq!(loaded.removed_file_ids(), txn.removed_file_ids());
    assert_eq!(loaded.space_freed, 6000);
    assert_eq!(loaded.exif_writes, txn.exif_writes);
    assert_eq!(loaded.metadata_snapshot, txn.metadata_snapshot);
    assert_eq!(loaded.created_at.timestamp(), txn.created_at.timestamp());
    assert!(db.get_merge_transaction(Uuid::new_v4()).unwrap().is_none());
}

#[test]
fn test_latest_follows_insertion_order() {
    let db = Database::open_in_memory().unwrap();
    // Insertion order decides recency, not the timestamp.
    let first = make_test_transaction(1, 0);
    let second = make_test_transaction(1, 60);
    db.insert_merge_transaction(&first).unwrap();
    db.insert_merge_transaction(&second).unwrap();

    assert_eq!(db.latest_merge_transaction().unwrap().unwrap().id, second.id);
    let recent = db.fetch_recent_transactions(10).unwrap();
    assert_eq!(recent.iter().map(|t| t.id).collect::<Vec<_>>(), vec![second.id, first.id]);
    assert_eq!(db.fetch_recent_transactions(1).unwrap().len(), 1);
}

#[test]
fn test_delete_cascades_removed_files() {
    let db = Database::open_in_memory().unwrap();
    let txn = make_test_transaction(2, 0);
    db.insert_merge_transaction(&txn).unwrap();
    assert!(db.is_file_in_trash(txn.removed[0].file_id).unwrap());

    assert!(db.delete_merge_transaction(txn.id).unwrap());
    assert!(!db.delete_merge_transaction(txn.id).unwrap());
    assert_eq!(db.merge_transaction_count().unwrap(), 0);

    let orphans: i64 = db
        .connection()
        .query_row("SELECT COUNT(*) FROM merge_removed_file", [], |row| row.get(0))
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn test_total_space_freed() {
    let db = Database::open_in_memory().unwrap();
    assert_eq!(db.total_space_freed().unwrap(), 0);
    db.insert_merge_transaction(&make_test_transaction(1, 0)).unwrap();
    db.insert_merge_transaction(&make_test_transaction(2, 0)).unwrap();
    assert_eq!(db.total_space_freed().unwrap(), 1000 + 3000);
}

#[test]
fn test_file_backed_log_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("history.db");
    let txn = make_test_transaction(2, 0);
    {
        let log = TransactionLog::open(&path).unwrap();
        log.record(&txn).unwrap();
    }

    let log = TransactionLog::open(&path).unwrap();
    let latest = log.latest().unwrap().unwrap();
    assert_eq!(latest.id, txn.id);
    assert_eq!(latest.removed.len(), 2);
    assert_eq!(log.fetch_recent_transactions(5).unwrap().len(), 1);
    assert_eq!(log.get(txn.id).unwrap().unwrap(), latest);
    assert!(log.is_file_in_trash(txn.removed[1].file_id).unwrap());
    assert_eq!(log.total_space_freed().unwrap(), 3000);
    assert!(log.delete(txn.id).unwrap());
    assert!(log.latest().unwrap().is_none());
}

#[test]
fn test_schema_version_is_set() {
    let db = Database::open_in_memory().unwrap();
    let version: i64 = db
        .connection()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 1);
}
