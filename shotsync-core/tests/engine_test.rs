//! End-to-end flows over the on-disk backends

use chrono::Utc;
use serde_json::json;
use shotsync_core::{
    import_from_text, BackupPolicy, FjallStore, ImportOptions, KeyValueStore, Project, Record,
    RecordId, RecordStore, SharedStore, SnapshotBuilder, SqliteStore, VersionHistory,
    VersionSource, RETENTION_LIMIT,
};
use std::sync::Arc;
use tempfile::TempDir;

fn on_disk_stores(dir: &TempDir) -> Vec<SharedStore> {
    vec![
        Arc::new(SqliteStore::open(&dir.path().join("state.sqlite")).unwrap()),
        Arc::new(FjallStore::open(&dir.path().join("kv")).unwrap()),
    ]
}

fn shot(status: &str) -> Record {
    Record::new()
        .with("id", 42)
        .with("name", "SH_042")
        .with("status", status)
}

#[test]
fn test_version_restore_brings_back_previous_status() {
    let dir = TempDir::new().unwrap();
    for store in on_disk_stores(&dir) {
        let records = RecordStore::new(store.clone());
        let history = VersionHistory::new(store.clone());
        let id = RecordId::from(42u64);

        let mut project = Project::new(1, "Feature");
        project.push_shot(json!({"id": 42, "name": "SH_042"}));
        records.set_projects(&[project]).unwrap();
        records.put(&id, shot("Pending"));

        let version = history.create_version("before final", VersionSource::Manual).unwrap();
        assert_eq!(version.records_count, 1);
        assert_eq!(version.shots_count, 1);

        records.put(&id, shot("Done"));
        assert_eq!(records.projects().unwrap()[0].shots()[0]["status"], json!("Done"));

        history.restore_version(&version.id).unwrap();
        assert_eq!(records.get(&id).unwrap().get("status"), Some(&json!("Pending")));
        assert_eq!(records.projects().unwrap()[0].shots()[0]["status"], json!("Pending"));
        store.flush().unwrap();
    }
}

#[test]
fn test_export_import_round_trip_between_backends() {
    let dir = TempDir::new().unwrap();
    let stores = on_disk_stores(&dir);
    let (source, target) = (&stores[0], &stores[1]);

    let records = RecordStore::new(source.clone());
    records.set_projects(&[Project::new("p-1", "Commercial")]).unwrap();
    for n in 0..5u64 {
        records.put(&RecordId::from(n), Record::new().with("id", n).with("take", n + 1));
    }
    RecordStore::new(target.clone()).put(&RecordId::from("orphan"), Record::new());

    let before = SnapshotBuilder::new(source.clone()).build(Utc::now()).unwrap();
    let outcome = import_from_text(target, &before.to_payload().unwrap(), &ImportOptions::default()).unwrap();
    assert_eq!(outcome.summary.removed_records, 1);

    let after = SnapshotBuilder::new(target.clone()).build(Utc::now()).unwrap();
    assert_eq!(after.projects, before.projects);
    assert_eq!(after.shot_files, before.shot_files);
    assert_eq!(
        RecordStore::new(target.clone()).selected_project().as_deref(),
        Some("p-1")
    );
}

#[test]
fn test_history_survives_reopen_and_stays_bounded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.sqlite");
    {
        let store: SharedStore = Arc::new(SqliteStore::open(&path).unwrap());
        let policy = BackupPolicy::new(store.clone());
        for n in 0..(RETENTION_LIMIT + 3) {
            policy.maybe_auto_backup(&format!("edit {}", n)).unwrap();
        }
    }

    let store: SharedStore = Arc::new(SqliteStore::open(&path).unwrap());
    let listed = VersionHistory::new(store.clone()).list_versions();
    assert_eq!(listed.len(), RETENTION_LIMIT);
    assert!(listed.iter().all(|e| e.source == VersionSource::Autosave));
    assert_eq!(listed[0].note, format!("edit {}", RETENTION_LIMIT + 2));
    assert_eq!(
        store.keys_with_prefix("version_snapshot_").unwrap().len(),
        RETENTION_LIMIT
    );
}
