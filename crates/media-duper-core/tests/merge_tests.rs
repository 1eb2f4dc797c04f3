use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;
use uuid::Uuid;

use media_duper_core::cluster::{sort_groups, DuplicateGroupResult, GroupMember};
use media_duper_core::media::FieldValue;
use media_duper_core::merge::{MergeExecutor, MergePlanner, MetadataWriter, SidecarWriter, TrashBin};
use media_duper_core::storage::models::MetadataSnapshot;
use media_duper_core::storage::TransactionLog;
use media_duper_core::{Error, FileCatalog, MediaFile, MediaType, MergeService, Thresholds};

fn write_photo(dir: &Path, name: &str, bytes: usize) -> MediaFile {
    let path = dir.join(name);
    fs::write(&path, vec![0x5Au8; bytes]).unwrap();
    MediaFile::new(path, MediaType::Photo, bytes as u64)
}

fn member(file: &MediaFile, confidence: f64) -> GroupMember {
    GroupMember {
        file_id: file.id,
        confidence,
        signals: Vec::new(),
        penalties: Vec::new(),
        rationale: Vec::new(),
        file_size: file.file_size,
    }
}

fn group_of(keeper: &MediaFile, others: &[&MediaFile]) -> DuplicateGroupResult {
    let mut members = vec![member(keeper, 1.0)];
    members.extend(others.iter().map(|f| member(f, 0.95)));
    DuplicateGroupResult {
        group_id: Uuid::new_v4(),
        members,
        confidence: 0.97,
        rationale_lines: Vec::new(),
        keeper_suggestion: Some(keeper.id),
        keeper_criterion: None,
        incomplete: false,
        media_type: MediaType::Photo,
    }
}

fn service(root: &Path, files: Vec<MediaFile>) -> MergeService {
    service_with_writer(root, files, Box::new(SidecarWriter))
}

fn service_with_writer(root: &Path, files: Vec<MediaFile>, writer: Box<dyn MetadataWriter>) -> MergeService {
    let log = Arc::new(TransactionLog::open_in_memory().unwrap());
    let executor = MergeExecutor::new(log, TrashBin::new(root.join(".trash")), writer);
    MergeService::new(FileCatalog::new(files), executor, Thresholds::default())
}

/// Sidecar writer that can be told to fail writes or restores.
#[derive(Default)]
struct FlakyWriter {
    fail_write: AtomicBool,
    fail_restore: AtomicBool,
}

impl MetadataWriter for FlakyWriter {
    fn snapshot(&self, keeper: &Path) -> io::Result<MetadataSnapshot> {
        SidecarWriter.snapshot(keeper)
    }

    fn write(&self, keeper: &Path, writes: &BTreeMap<String, FieldValue>) -> io::Result<()> {
        if self.fail_write.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        SidecarWriter.write(keeper, writes)
    }

    fn restore(&self, snapshot: &MetadataSnapshot) -> io::Result<()> {
        if self.fail_restore.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
        }
        SidecarWriter.restore(snapshot)
    }
}

/// Sidecar writer whose writes rendezvous with the test thread and then stall.
struct SlowWriter {
    started: Arc<Barrier>,
}

impl MetadataWriter for SlowWriter {
    fn snapshot(&self, keeper: &Path) -> io::Result<MetadataSnapshot> {
        SidecarWriter.snapshot(keeper)
    }

    fn write(&self, keeper: &Path, writes: &BTreeMap<String, FieldValue>) -> io::Result<()> {
        self.started.wait();
        thread::sleep(Duration::from_millis(200));
        SidecarWriter.write(keeper, writes)
    }

    fn restore(&self, snapshot: &MetadataSnapshot) -> io::Result<()> {
        SidecarWriter.restore(snapshot)
    }
}

#[test]
fn test_missing_gps_is_filled_from_duplicate() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 2048);
    let mut dup = write_photo(dir.path(), "dup.jpg", 1024);
    dup.metadata.gps = Some("X".to_string());

    let group = group_of(&keeper, &[&dup]);
    let catalog = FileCatalog::new(vec![keeper.clone(), dup.clone()]);
    let plan = MergePlanner::new(&catalog).plan(&group, keeper.id).unwrap();

    let gps = plan.field_changes.iter().find(|f| f.id == "gps").unwrap();
    assert_eq!(gps.from, None);
    assert_eq!(gps.into.as_deref(), Some("X"));
    assert_eq!(plan.exif_writes.get("gps"), Some(&FieldValue::Text("X".to_string())));
    assert_eq!(plan.merged_metadata.gps.as_deref(), Some("X"));
    assert_eq!(plan.trash_list, vec![dup.id]);
}

#[test]
fn test_keeper_value_is_never_overwritten() {
    let dir = tempdir().unwrap();
    let mut keeper = write_photo(dir.path(), "keeper.jpg", 2048);
    keeper.metadata.gps = Some("keeper-gps".to_string());
    keeper.metadata.title = Some("Keeper title".to_string());
    let mut dup1 = write_photo(dir.path(), "dup1.jpg", 1024);
    dup1.metadata.gps = Some("other-gps".to_string());
    dup1.metadata.title = Some("Other title".to_string());
    let mut dup2 = write_photo(dir.path(), "dup2.jpg", 1024);
    dup2.metadata.gps = Some("third-gps".to_string());

    let group = group_of(&keeper, &[&dup1, &dup2]);
    let catalog = FileCatalog::new(vec![keeper.clone(), dup1, dup2]);
    let plan = MergePlanner::new(&catalog).plan(&group, keeper.id).unwrap();

    for change in &plan.field_changes {
        let field = media_duper_core::media::MetadataField::ALL
            .into_iter()
            .find(|f| f.id() == change.id)
            .unwrap();
        if field.is_list() {
            continue;
        }
        if let Some(kept) = keeper.metadata.get(field) {
            assert_eq!(change.into.as_deref(), Some(kept.to_string().as_str()));
        }
    }
    assert!(!plan.exif_writes.contains_key("gps"));
    assert!(!plan.exif_writes.contains_key("title"));
    assert_eq!(plan.merged_metadata.gps, keeper.metadata.gps);
}

#[test]
fn test_plan_is_repeatable() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 2048);
    let mut dup = write_photo(dir.path(), "dup.jpg", 1024);
    dup.metadata.keywords = vec!["tag".to_string()];
    let group = group_of(&keeper, &[&dup]);
    let catalog = FileCatalog::new(vec![keeper.clone(), dup]);
    let planner = MergePlanner::new(&catalog);
    assert_eq!(planner.plan(&group, keeper.id).unwrap(), planner.plan(&group, keeper.id).unwrap());
}

#[test]
fn test_merge_then_undo_round_trip() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 2048);
    let mut dup1 = write_photo(dir.path(), "dup1.jpg", 1024);
    dup1.metadata.gps = Some("48.85,2.35".to_string());
    let dup2 = write_photo(dir.path(), "dup2.jpg", 512);
    let group = group_of(&keeper, &[&dup1, &dup2]);
    let group_id = group.group_id;

    let svc = service(dir.path(), vec![keeper.clone(), dup1.clone(), dup2.clone()]);
    svc.replace_groups(vec![group]).unwrap();

    let txn = svc.merge_group(group_id, keeper.id).unwrap();
    assert_eq!(txn.space_freed, 1024 + 512);
    assert_eq!(txn.removed.len(), 2);
    assert!(!dup1.path.exists());
    assert!(!dup2.path.exists());
    assert!(keeper.path.exists());
    assert!(SidecarWriter::sidecar_path(&keeper.path).exists());
    assert!(svc.groups().unwrap().is_empty());
    assert_eq!(svc.history(10).unwrap().len(), 1);

    let undone = svc.undo_last_merge().unwrap();
    assert_eq!(undone.id, txn.id);
    assert!(dup1.path.exists());
    assert!(dup2.path.exists());
    assert_eq!(fs::read(&dup2.path).unwrap().len(), 512);
    assert!(!SidecarWriter::sidecar_path(&keeper.path).exists());
    assert!(svc.history(10).unwrap().is_empty());
    assert_eq!(svc.groups().unwrap().len(), 1);
    assert_eq!(svc.file(dup1.id).unwrap().unwrap().path, dup1.path);
}

#[test]
fn test_undo_only_reverses_latest_merge() {
    let dir = tempdir().unwrap();
    let k1 = write_photo(dir.path(), "k1.jpg", 100);
    let d1 = write_photo(dir.path(), "d1.jpg", 100);
    let k2 = write_photo(dir.path(), "k2.jpg", 200);
    let d2 = write_photo(dir.path(), "d2.jpg", 200);
    let g1 = group_of(&k1, &[&d1]);
    let g2 = group_of(&k2, &[&d2]);
    let (g1_id, g2_id) = (g1.group_id, g2.group_id);

    let svc = service(dir.path(), vec![k1.clone(), d1.clone(), k2.clone(), d2.clone()]);
    svc.replace_groups(vec![g1, g2]).unwrap();

    let first = svc.merge_group(g1_id, k1.id).unwrap();
    let second = svc.merge_group(g2_id, k2.id).unwrap();

    // The older merge cannot be undone while a newer one exists.
    assert!(matches!(
        svc.executor().undo_transaction(first.id),
        Err(Error::UndoUnavailable(_))
    ));

    let undone = svc.undo_last_merge().unwrap();
    assert_eq!(undone.id, second.id);
    assert!(d2.path.exists());
    assert!(!d1.path.exists());

    let history = svc.history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, first.id);
}

#[test]
fn test_undo_with_empty_history() {
    let dir = tempdir().unwrap();
    let svc = service(dir.path(), Vec::new());
    assert!(matches!(svc.undo_last_merge(), Err(Error::UndoUnavailable(_))));
}

#[test]
fn test_undo_refuses_when_original_path_reused() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 100);
    let dup = write_photo(dir.path(), "dup.jpg", 100);
    let group = group_of(&keeper, &[&dup]);
    let group_id = group.group_id;
    let svc = service(dir.path(), vec![keeper.clone(), dup.clone()]);
    svc.replace_groups(vec![group]).unwrap();

    svc.merge_group(group_id, keeper.id).unwrap();
    fs::write(&dup.path, b"new file").unwrap();

    assert!(matches!(svc.undo_last_merge(), Err(Error::UndoUnavailable(_))));
    assert_eq!(fs::read(&dup.path).unwrap(), b"new file");
    assert_eq!(svc.history(10).unwrap().len(), 1);
}

#[test]
fn test_failed_merge_rolls_back_moved_files() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 100);
    let present = write_photo(dir.path(), "present.jpg", 100);
    let vanished = write_photo(dir.path(), "vanished.jpg", 100);
    fs::remove_file(&vanished.path).unwrap();

    // `present` is trashed before `vanished` fails.
    let group = group_of(&keeper, &[&present, &vanished]);
    let group_id = group.group_id;
    let svc = service(dir.path(), vec![keeper.clone(), present.clone(), vanished.clone()]);
    svc.replace_groups(vec![group]).unwrap();

    let err = svc.merge_group(group_id, keeper.id).unwrap_err();
    match err {
        Error::MergeExecution { rolled_back, .. } => assert_eq!(rolled_back, 1),
        other => panic!("unexpected error: {}", other),
    }
    assert!(present.path.exists());
    assert!(svc.history(10).unwrap().is_empty());
    assert_eq!(svc.groups().unwrap().len(), 1);
}

#[test]
fn test_delete_history_entry_keeps_files_trashed() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 100);
    let dup = write_photo(dir.path(), "dup.jpg", 100);
    let group = group_of(&keeper, &[&dup]);
    let group_id = group.group_id;
    let svc = service(dir.path(), vec![keeper.clone(), dup.clone()]);
    svc.replace_groups(vec![group]).unwrap();

    let txn = svc.merge_group(group_id, keeper.id).unwrap();
    assert!(svc.delete_history_entry(txn.id).unwrap());
    assert!(!svc.delete_history_entry(txn.id).unwrap());
    assert!(!dup.path.exists());
    assert!(txn.removed[0].trash_path.exists());
    assert!(matches!(svc.undo_last_merge(), Err(Error::UndoUnavailable(_))));
}

#[test]
fn test_auto_merge_skips_incomplete_groups() {
    let dir = tempdir().unwrap();
    let a = write_photo(dir.path(), "a.jpg", 100);
    let b = write_photo(dir.path(), "b.jpg", 100);
    let c = write_photo(dir.path(), "c.jpg", 100);
    let d = write_photo(dir.path(), "d.jpg", 100);
    let complete = group_of(&a, &[&b]);
    let mut incomplete = group_of(&c, &[&d]);
    incomplete.incomplete = true;
    let complete_id = complete.group_id;

    let svc = service(dir.path(), vec![a, b, c, d]);
    svc.replace_groups(vec![complete, incomplete]).unwrap();
    let candidates = svc.auto_merge_candidates().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].group_id, complete_id);
}

#[test]
fn test_preview_rejects_unknown_group_and_keeper() {
    let dir = tempdir().unwrap();
    let a = write_photo(dir.path(), "a.jpg", 100);
    let b = write_photo(dir.path(), "b.jpg", 100);
    let group = group_of(&a, &[&b]);
    let group_id = group.group_id;
    let svc = service(dir.path(), vec![a.clone(), b]);
    svc.replace_groups(vec![group]).unwrap();

    assert!(matches!(svc.preview(Uuid::new_v4(), a.id), Err(Error::GroupNotFound(_))));
    assert!(matches!(
        svc.preview(group_id, Uuid::new_v4()),
        Err(Error::KeeperNotInGroup { .. })
    ));
    assert!(svc.preview(group_id, a.id).is_ok());
}

#[test]
fn test_failed_metadata_write_rolls_back_every_move() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 100);
    let mut dup1 = write_photo(dir.path(), "dup1.jpg", 100);
    dup1.metadata.gps = Some("X".to_string());
    let dup2 = write_photo(dir.path(), "dup2.jpg", 100);
    let group = group_of(&keeper, &[&dup1, &dup2]);
    let group_id = group.group_id;

    let writer = FlakyWriter::default();
    writer.fail_write.store(true, Ordering::SeqCst);
    let svc = service_with_writer(
        dir.path(),
        vec![keeper.clone(), dup1.clone(), dup2.clone()],
        Box::new(writer),
    );
    svc.replace_groups(vec![group]).unwrap();

    match svc.merge_group(group_id, keeper.id).unwrap_err() {
        Error::MergeExecution { rolled_back, .. } => assert_eq!(rolled_back, 2),
        other => panic!("unexpected error: {}", other),
    }
    assert!(dup1.path.exists());
    assert!(dup2.path.exists());
    assert!(!SidecarWriter::sidecar_path(&keeper.path).exists());
    assert!(svc.history(10).unwrap().is_empty());
    assert_eq!(svc.groups().unwrap().len(), 1);
}

#[test]
fn test_failed_metadata_restore_keeps_merge_undoable() {
    let dir = tempdir().unwrap();
    let keeper = write_photo(dir.path(), "keeper.jpg", 100);
    let mut dup = write_photo(dir.path(), "dup.jpg", 100);
    dup.metadata.gps = Some("X".to_string());
    let group = group_of(&keeper, &[&dup]);
    let group_id = group.group_id;

    let writer = FlakyWriter::default();
    writer.fail_restore.store(true, Ordering::SeqCst);
    let svc = service_with_writer(dir.path(), vec![keeper.clone(), dup.clone()], Box::new(writer));
    svc.replace_groups(vec![group]).unwrap();

    let txn = svc.merge_group(group_id, keeper.id).unwrap();
    assert!(matches!(svc.undo_last_merge(), Err(Error::Io(_))));
    assert!(!dup.path.exists());
    assert!(txn.removed[0].trash_path.exists());
    assert!(SidecarWriter::sidecar_path(&keeper.path).exists());
    assert_eq!(svc.history(10).unwrap().len(), 1);

    let undone = svc.undo_last_merge().unwrap();
    assert_eq!(undone.id, txn.id);
    assert!(dup.path.exists());
    assert!(!SidecarWriter::sidecar_path(&keeper.path).exists());
    assert!(svc.history(10).unwrap().is_empty());
}

#[test]
fn test_undo_during_merge_sharing_keeper_does_not_block() {
    let dir = tempdir().unwrap();
    let a = write_photo(dir.path(), "a.jpg", 100);
    let b = write_photo(dir.path(), "b.jpg", 100);
    let mut e = write_photo(dir.path(), "e.jpg", 100);
    e.metadata.gps = Some("X".to_string());
    let catalog = FileCatalog::new(vec![a.clone(), b.clone(), e.clone()]);
    let first_plan = MergePlanner::new(&catalog).plan(&group_of(&a, &[&b]), a.id).unwrap();
    let second_plan = MergePlanner::new(&catalog).plan(&group_of(&a, &[&e]), a.id).unwrap();
    assert!(first_plan.exif_writes.is_empty());
    assert!(!second_plan.exif_writes.is_empty());

    let started = Arc::new(Barrier::new(2));
    let log = Arc::new(TransactionLog::open_in_memory().unwrap());
    let executor = Arc::new(MergeExecutor::new(
        log,
        TrashBin::new(dir.path().join(".trash")),
        Box::new(SlowWriter {
            started: Arc::clone(&started),
        }),
    ));
    let first = executor.execute(&first_plan, &catalog).unwrap();

    let catalog = Arc::new(catalog);
    let (tx, rx) = mpsc::channel();
    let merging = {
        let executor = Arc::clone(&executor);
        let catalog = Arc::clone(&catalog);
        let tx = tx.clone();
        thread::spawn(move || {
            let result = executor.execute(&second_plan, &*catalog).map(|t| t.id);
            tx.send(("merge", result)).unwrap();
        })
    };
    started.wait();
    let undoing = {
        let executor = Arc::clone(&executor);
        thread::spawn(move || {
            let result = executor.undo_last_transaction().map(|t| t.id);
            tx.send(("undo", result)).unwrap();
        })
    };

    let mut merged = None;
    let mut undone = None;
    for _ in 0..2 {
        let (which, result) = rx.recv_timeout(Duration::from_secs(5)).expect("merge and undo must both return");
        match which {
            "merge" => merged = Some(result),
            _ => undone = Some(result),
        }
    }
    merging.join().unwrap();
    undoing.join().unwrap();

    let second = merged.unwrap().unwrap();
    let history = executor.fetch_recent_transactions(10).unwrap();
    match undone.unwrap() {
        // The newer merge landed while undo waited, so the older one is no longer undoable.
        Err(Error::UndoUnavailable(_)) => {
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].id, second);
            assert_eq!(history[1].id, first.id);
            assert!(!e.path.exists());
        }
        Ok(id) => {
            assert_eq!(id, second);
            assert_eq!(history.len(), 1);
            assert!(e.path.exists());
        }
        Err(other) => panic!("unexpected error: {}", other),
    }
    assert!(!b.path.exists());
}

#[test]
fn test_disjoint_groups_merge_concurrently() {
    let dir = tempdir().unwrap();
    let k1 = write_photo(dir.path(), "k1.jpg", 100);
    let d1 = write_photo(dir.path(), "d1.jpg", 300);
    let k2 = write_photo(dir.path(), "k2.jpg", 100);
    let d2 = write_photo(dir.path(), "d2.jpg", 500);
    let g1 = group_of(&k1, &[&d1]);
    let g2 = group_of(&k2, &[&d2]);
    let jobs = vec![(g1.group_id, k1.id), (g2.group_id, k2.id)];

    let svc = Arc::new(service(dir.path(), vec![k1, d1.clone(), k2, d2.clone()]));
    svc.replace_groups(vec![g1, g2]).unwrap();

    let handles: Vec<_> = jobs
        .into_iter()
        .map(|(group_id, keeper_id)| {
            let svc = Arc::clone(&svc);
            thread::spawn(move || svc.merge_group(group_id, keeper_id).unwrap())
        })
        .collect();
    let freed: u64 = handles.into_iter().map(|h| h.join().unwrap().space_freed).sum();

    assert_eq!(freed, 800);
    assert!(!d1.path.exists());
    assert!(!d2.path.exists());
    assert!(svc.groups().unwrap().is_empty());
    assert_eq!(svc.history(10).unwrap().len(), 2);
}

#[test]
fn test_undo_restores_group_order() {
    let dir = tempdir().unwrap();
    let files: Vec<MediaFile> = (0..6).map(|i| write_photo(dir.path(), &format!("p{}.jpg", i), 100)).collect();
    let mut groups = vec![
        group_of(&files[0], &[&files[1]]),
        group_of(&files[2], &[&files[3]]),
        group_of(&files[4], &[&files[5]]),
    ];
    sort_groups(&mut groups);
    let order: Vec<Uuid> = groups.iter().map(|g| g.group_id).collect();
    let first = &groups[0];
    let (first_id, first_keeper) = (first.group_id, first.keeper_suggestion.unwrap());

    let svc = service(dir.path(), files);
    svc.replace_groups(groups).unwrap();
    svc.merge_group(first_id, first_keeper).unwrap();
    svc.undo_last_merge().unwrap();

    let after: Vec<Uuid> = svc.groups().unwrap().iter().map(|g| g.group_id).collect();
    assert_eq!(after, order);
}
