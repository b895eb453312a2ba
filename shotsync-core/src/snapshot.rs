//! Snapshot document: a total, self-describing copy of the tracked state
//!
//! Wire format (JSON, version 1):
//!
//! ```json
//! {
//!   "version": 1,
//!   "generatedAt": "2024-05-01T10:00:00.000Z",
//!   "projects": [ { "id": 1, "name": "Feature", "shots": [] } ],
//!   "shotFiles": [ { "key": "shot-file-42", "value": { "id": 42 } } ],
//!   "offlineSnapshot": null
//! }
//! ```

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::records::{OfflineMeta, Project, RecordId, RecordStore};
use crate::storage::SharedStore;

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default base name for exported snapshot files
pub const DEFAULT_EXPORT_BASE: &str = "vfx-supervision-snapshot";

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// One stored record inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotFile {
    pub key: String,
    pub value: Value,
}

/// Immutable aggregate of the project index and every stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
    pub projects: Vec<Project>,
    pub shot_files: Vec<ShotFile>,
    #[serde(default)]
    pub offline_snapshot: Option<OfflineMeta>,
}

impl Snapshot {
    /// Parse and validate a snapshot document.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| Error::InvalidSnapshot(format!("not valid JSON: {}", e)))?;

        let Some(obj) = doc.as_object() else {
            return Err(Error::InvalidSnapshot("document is not an object".to_string()));
        };
        for field in ["projects", "shotFiles"] {
            match obj.get(field) {
                Some(Value::Array(_)) => {}
                Some(_) => {
                    return Err(Error::InvalidSnapshot(format!("'{}' is not an array", field)));
                }
                None => {
                    return Err(Error::InvalidSnapshot(format!("missing '{}'", field)));
                }
            }
        }

        let snapshot: Snapshot = serde_json::from_value(doc)
            .map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        for file in &snapshot.shot_files {
            if RecordId::from_record_key(&file.key).is_none() {
                return Err(Error::InvalidSnapshot(format!(
                    "'{}' is not a shot file key",
                    file.key
                )));
            }
        }

        Ok(snapshot)
    }

    /// Serialize as pretty-printed UTF-8 JSON
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn projects_count(&self) -> usize {
        self.projects.len()
    }

    /// Shots embedded across all projects
    pub fn shots_count(&self) -> usize {
        self.projects.iter().map(|p| p.shots().len()).sum()
    }

    pub fn records_count(&self) -> usize {
        self.shot_files.len()
    }
}

/// Assembles snapshots from the current storage state
pub struct SnapshotBuilder {
    records: RecordStore,
}

impl SnapshotBuilder {
    pub fn new(store: SharedStore) -> Self {
        Self {
            records: RecordStore::new(store),
        }
    }

    /// Build a snapshot of everything currently stored.
    ///
    /// Records are emitted sorted by key; unreadable records are skipped.
    pub fn build(&self, now: DateTime<Utc>) -> Result<Snapshot> {
        let projects = self.records.projects()?;
        let offline_snapshot = self.records.offline_meta();

        let mut refs = self.records.list();
        refs.sort_by(|a, b| a.key.cmp(&b.key));

        let store = self.records.backend();
        let mut shot_files = Vec::with_capacity(refs.len());
        for r in refs {
            let raw = match store.get(&r.key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Skipping {} in snapshot: {}", r.key, e);
                    continue;
                }
            };
            match serde_json::from_str::<Value>(&raw) {
                Ok(value) => shot_files.push(ShotFile { key: r.key, value }),
                Err(e) => warn!("Skipping unparsable {} in snapshot: {}", r.key, e),
            }
        }

        Ok(Snapshot {
            version: SNAPSHOT_VERSION,
            generated_at: now,
            projects,
            shot_files,
            offline_snapshot,
        })
    }

    /// Build and serialize in one step
    pub fn build_payload(&self, now: DateTime<Utc>) -> Result<String> {
        self.build(now)?.to_payload()
    }
}

/// `<base>-<YYYYMMDD-HHMMSS>.json` for a download/export
pub fn snapshot_file_name<Tz: TimeZone>(base: &str, ts: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("{}-{}.json", base, ts.format("%Y%m%d-%H%M%S"))
}

/// Write the current snapshot to `dir`, named after the local time `now`.
pub fn export_snapshot<Tz: TimeZone>(
    store: SharedStore,
    dir: &Path,
    base: &str,
    now: &DateTime<Tz>,
) -> Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let payload = SnapshotBuilder::new(store).build_payload(now.with_timezone(&Utc))?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(snapshot_file_name(base, now));
    std::fs::write(&path, payload.as_bytes())?;
    info!("Exported snapshot to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Record;
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::FixedOffset;
    use serde_json::json;
    use std::sync::Arc;

    fn seeded() -> Arc<MemoryStore> {
        let mem = Arc::new(MemoryStore::new());
        let records = RecordStore::new(mem.clone());
        let mut project = Project::new(1, "Feature");
        project.push_shot(json!({"id": 2, "name": "SH_002"}));
        records.set_projects(&[project]).unwrap();
        records.put(&RecordId::from(2u64), Record::new().with("id", 2).with("name", "SH_002"));
        records.put(&RecordId::from(1u64), Record::new().with("id", 1).with("name", "SH_001"));
        mem
    }

    #[test]
    fn test_build_empty_store() {
        let builder = SnapshotBuilder::new(Arc::new(MemoryStore::new()));
        let snapshot = builder.build(Utc::now()).unwrap();
        assert_eq!(snapshot.version, SNAPSHOT_VERSION);
        assert!(snapshot.projects.is_empty());
        assert!(snapshot.shot_files.is_empty());
        assert!(snapshot.offline_snapshot.is_none());
    }

    #[test]
    fn test_build_collects_all_records_sorted() {
        let mem = seeded();
        let snapshot = SnapshotBuilder::new(mem).build(Utc::now()).unwrap();

        assert_eq!(snapshot.projects_count(), 1);
        assert_eq!(snapshot.shots_count(), 1);
        let keys: Vec<&str> = snapshot.shot_files.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["shot-file-1", "shot-file-2"]);
    }

    #[test]
    fn test_build_skips_unparsable_records() {
        let mem = seeded();
        mem.set("shot-file-broken", "{oops").unwrap();
        let snapshot = SnapshotBuilder::new(mem).build(Utc::now()).unwrap();
        assert_eq!(snapshot.records_count(), 2);
    }

    #[test]
    fn test_payload_uses_wire_names() {
        let mem = seeded();
        let payload = SnapshotBuilder::new(mem).build_payload(Utc::now()).unwrap();
        let doc: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(doc["version"], json!(1));
        assert!(doc["generatedAt"].is_string());
        assert!(doc["shotFiles"].is_array());
        assert_eq!(doc["offlineSnapshot"], Value::Null);
    }

    #[test]
    fn test_parse_rejects_malformed_documents() {
        let cases = [
            "not json",
            "[]",
            r#"{"shotFiles": []}"#,
            r#"{"projects": []}"#,
            r#"{"projects": {}, "shotFiles": []}"#,
            r#"{"version": 2, "projects": [], "shotFiles": []}"#,
            r#"{"projects": [], "shotFiles": [{"key": "version_history", "value": []}]}"#,
        ];
        for case in cases {
            let err = Snapshot::parse(case).unwrap_err();
            assert!(matches!(err, Error::InvalidSnapshot(_)), "accepted {}", case);
        }
    }

    #[test]
    fn test_parse_accepts_minimal_document() {
        let snapshot = Snapshot::parse(r#"{"projects": [], "shotFiles": []}"#).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.records_count(), 0);
    }

    #[test]
    fn test_snapshot_file_name() {
        let ts = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .unwrap();
        assert_eq!(
            snapshot_file_name("vfx-supervision-snapshot", &ts),
            "vfx-supervision-snapshot-20240309-070501.json"
        );
    }

    #[test]
    fn test_export_snapshot_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = export_snapshot(seeded(), dir.path(), "backup", &now).unwrap();

        assert_eq!(path.file_name().unwrap(), "backup-20240102-030405.json");
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(Snapshot::parse(&text).unwrap().records_count(), 2);
    }
}
