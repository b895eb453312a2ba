//! Version history: a bounded, newest-first log of stored snapshots
//!
//! Each entry's body lives under `version_snapshot_<id>`; the metadata list
//! lives under `version_history`. Bodies are always written before the list
//! that references them, so a failed write never leaves a dangling entry.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::restore::{apply_snapshot, RestoreSummary};
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::storage::SharedStore;

/// Key of the metadata list
pub const HISTORY_KEY: &str = "version_history";
/// Key prefix of stored bodies
pub const SNAPSHOT_PREFIX: &str = "version_snapshot_";
/// Maximum number of retained versions
pub const RETENTION_LIMIT: usize = 20;

/// What created a version
///
/// Other clients tag versions with free-form sources (screen names, or an
/// empty string); those are kept as `Other` and written back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Manual,
    Autosave,
    Daily,
    Import,
    Other(String),
}

impl VersionSource {
    pub fn as_str(&self) -> &str {
        match self {
            VersionSource::Manual => "manual",
            VersionSource::Autosave => "autosave",
            VersionSource::Daily => "daily",
            VersionSource::Import => "import",
            VersionSource::Other(s) => s,
        }
    }
}

impl From<String> for VersionSource {
    fn from(s: String) -> Self {
        match s.as_str() {
            "manual" => VersionSource::Manual,
            "autosave" => VersionSource::Autosave,
            "daily" => VersionSource::Daily,
            "import" => VersionSource::Import,
            _ => VersionSource::Other(s),
        }
    }
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only the built-in sources can be named on the command line.
impl FromStr for VersionSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match VersionSource::from(s.to_string()) {
            VersionSource::Other(other) => Err(Error::Configuration(format!(
                "unknown version source '{}'",
                other
            ))),
            known => Ok(known),
        }
    }
}

impl Serialize for VersionSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for VersionSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(VersionSource::from(raw.unwrap_or_default()))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Metadata about one stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub note: String,
    #[serde(default = "unknown_source")]
    pub source: VersionSource,
    #[serde(default, alias = "size", deserialize_with = "null_as_default")]
    pub size_bytes: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub projects_count: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub shots_count: usize,
    #[serde(default, alias = "shotFilesCount", deserialize_with = "null_as_default")]
    pub records_count: usize,
    /// SHA-256 of the stored body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

fn unknown_source() -> VersionSource {
    VersionSource::Other(String::new())
}

fn body_key(id: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, id)
}

fn checksum(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// Append-only, size-bounded snapshot log
#[derive(Clone)]
pub struct VersionHistory {
    store: SharedStore,
}

impl VersionHistory {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// All entries, newest first. A corrupt list reads as empty.
    pub fn list_versions(&self) -> Vec<VersionEntry> {
        match self.load_history() {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Version history is unreadable, ignoring it: {}", e);
                Vec::new()
            }
        }
    }

    /// Stored entries, newest first. Unlike [`list_versions`](Self::list_versions)
    /// this fails on a list that exists but cannot be parsed, so writers never
    /// replace history they could not read.
    fn load_history(&self) -> Result<Vec<VersionEntry>> {
        let Some(raw) = self.store.get(HISTORY_KEY)? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<VersionEntry> = serde_json::from_str(&raw).map_err(|e| {
            Error::Storage(format!("version history under '{}' is corrupt: {}", HISTORY_KEY, e))
        })?;
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    /// Look up one entry
    pub fn get(&self, id: &str) -> Option<VersionEntry> {
        self.list_versions().into_iter().find(|e| e.id == id)
    }

    /// Snapshot the current state and record it.
    pub fn create_version(&self, note: &str, source: VersionSource) -> Result<VersionEntry> {
        let now = Utc::now();
        let snapshot = SnapshotBuilder::new(self.store.clone()).build(now)?;
        let body = snapshot.to_payload()?;
        self.record(&body, &snapshot, note, source, now)
    }

    /// Record externally supplied snapshot text verbatim.
    pub fn register_raw(&self, text: &str, note: &str, source: VersionSource) -> Result<VersionEntry> {
        let snapshot = Snapshot::parse(text)?;
        self.record(text, &snapshot, note, source, Utc::now())
    }

    fn record(
        &self,
        body: &str,
        snapshot: &Snapshot,
        note: &str,
        source: VersionSource,
        now: DateTime<Utc>,
    ) -> Result<VersionEntry> {
        let history = self.load_history()?;
        let id = self.allocate_id(now, &history)?;

        // Body first: a failure here leaves the history untouched
        let key = body_key(&id);
        self.store.set(&key, body)?;

        let entry = VersionEntry {
            id: id.clone(),
            timestamp: now,
            note: note.to_string(),
            source,
            size_bytes: body.len(),
            projects_count: snapshot.projects_count(),
            shots_count: snapshot.shots_count(),
            records_count: snapshot.records_count(),
            checksum: Some(checksum(body)),
        };

        let mut next = Vec::with_capacity(history.len() + 1);
        next.push(entry.clone());
        next.extend(history);
        let evicted = if next.len() > RETENTION_LIMIT {
            next.split_off(RETENTION_LIMIT)
        } else {
            Vec::new()
        };

        if let Err(e) = self.write_history(&next) {
            // Keep bodies and entries 1:1
            if let Err(cleanup) = self.store.remove(&key) {
                warn!("Failed to drop orphaned body {}: {}", key, cleanup);
            }
            return Err(e);
        }

        for old in &evicted {
            if let Err(e) = self.store.remove(&body_key(&old.id)) {
                warn!("Failed to delete evicted version {}: {}", old.id, e);
            }
        }

        info!(
            "Created version {} ({}, {} bytes, {} records, {} evicted)",
            entry.id,
            entry.source,
            entry.size_bytes,
            entry.records_count,
            evicted.len()
        );
        Ok(entry)
    }

    /// Millisecond id, suffixed `-<n>` when already taken.
    ///
    /// Suffixes only grow within one millisecond, so an evicted id is never
    /// handed out again.
    fn allocate_id(&self, now: DateTime<Utc>, history: &[VersionEntry]) -> Result<String> {
        let base = now.timestamp_millis().to_string();
        let used = history
            .iter()
            .filter_map(|e| {
                if e.id == base {
                    Some(0)
                } else {
                    e.id.strip_prefix(&base)?
                        .strip_prefix('-')?
                        .parse::<u64>()
                        .ok()
                }
            })
            .max();

        let mut n = used.map(|n| n + 1).unwrap_or(0);
        loop {
            let candidate = if n == 0 {
                base.clone()
            } else {
                format!("{}-{}", base, n)
            };
            if !self.store.contains(&body_key(&candidate))? {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    fn write_history(&self, entries: &[VersionEntry]) -> Result<()> {
        let body = serde_json::to_string(entries)?;
        self.store.set(HISTORY_KEY, &body)
    }

    /// Stored body of a version
    pub fn load_body(&self, id: &str) -> Result<String> {
        self.store
            .get(&body_key(id))?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Replace the current state with a stored version.
    pub fn restore_version(&self, id: &str) -> Result<RestoreSummary> {
        let body = self.load_body(id)?;

        if let Some(expected) = self.get(id).and_then(|e| e.checksum) {
            let actual = checksum(&body);
            if actual != expected {
                return Err(Error::InvalidSnapshot(format!(
                    "checksum mismatch for version {} (expected {}, got {})",
                    id, expected, actual
                )));
            }
        }

        let snapshot = Snapshot::parse(&body)?;
        let summary = apply_snapshot(&self.store, &snapshot, Utc::now())?;
        info!(
            "Restored version {} at {}",
            id,
            summary.restored_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        Ok(summary)
    }

    /// Remove an entry and its body. Unknown ids are not an error.
    pub fn delete_version(&self, id: &str) -> Result<bool> {
        let history = self.load_history()?;
        let before = history.len();
        let next: Vec<VersionEntry> = history.into_iter().filter(|e| e.id != id).collect();
        let listed = next.len() != before;
        if listed {
            self.write_history(&next)?;
        }
        let stored = self.store.remove(&body_key(id))?;
        Ok(listed || stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Record, RecordId, RecordStore};
    use crate::storage::{KeyValueStore, MemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (SharedStore, VersionHistory, RecordStore) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (
            store.clone(),
            VersionHistory::new(store.clone()),
            RecordStore::new(store),
        )
    }

    #[test]
    fn test_create_version_counts() {
        let (_, history, records) = setup();
        records.put(&RecordId::from(1u64), Record::new().with("id", 1));

        let entry = history.create_version("checkpoint", VersionSource::Manual).unwrap();
        assert_eq!(entry.records_count, 1);
        assert_eq!(entry.projects_count, 0);
        assert_eq!(entry.source, VersionSource::Manual);
        assert_eq!(entry.size_bytes, history.load_body(&entry.id).unwrap().len());
        assert_eq!(history.list_versions(), vec![entry]);
    }

    #[test]
    fn test_create_version_on_empty_store() {
        let (_, history, _) = setup();
        let entry = history.create_version("", VersionSource::Manual).unwrap();
        assert_eq!(entry.records_count, 0);
    }

    #[test]
    fn test_ids_are_unique_within_one_millisecond() {
        let (store, history, _) = setup();
        let ids: Vec<String> = (0..5)
            .map(|_| history.create_version("", VersionSource::Manual).unwrap().id)
            .collect();
        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), ids.len());
        for id in &ids {
            assert!(store.contains(&body_key(id)).unwrap());
        }
    }

    #[test]
    fn test_retention_keeps_newest_twenty() {
        let (store, history, _) = setup();
        let mut created = Vec::new();
        for i in 0..25 {
            created.push(history.create_version(&format!("v{}", i), VersionSource::Manual).unwrap());
        }

        let listed = history.list_versions();
        assert_eq!(listed.len(), RETENTION_LIMIT);
        let listed_ids: Vec<&str> = listed.iter().map(|e| e.id.as_str()).collect();
        let newest: Vec<&str> = created.iter().rev().take(RETENTION_LIMIT).map(|e| e.id.as_str()).collect();
        assert_eq!(listed_ids, newest);

        for evicted in &created[..5] {
            assert!(matches!(history.load_body(&evicted.id), Err(Error::NotFound(_))));
        }
        assert_eq!(store.keys_with_prefix(SNAPSHOT_PREFIX).unwrap().len(), RETENTION_LIMIT);
    }

    #[test]
    fn test_failed_body_write_leaves_history_unchanged() {
        let mem = Arc::new(MemoryStore::with_quota(4096));
        let store: SharedStore = mem.clone();
        let history = VersionHistory::new(store.clone());
        let records = RecordStore::new(store);

        let first = history.create_version("small", VersionSource::Manual).unwrap();
        // Push the next snapshot body past the quota
        mem.set("shot-file-big", &json!({"id": "big", "blob": "x".repeat(2048)}).to_string())
            .unwrap();

        let err = history.create_version("too big", VersionSource::Manual).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(history.list_versions(), vec![first]);
        assert!(records.get(&RecordId::from("big")).is_some());
    }

    #[test]
    fn test_restore_missing_version() {
        let (_, history, _) = setup();
        assert!(matches!(history.restore_version("nope"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_restore_malformed_body() {
        let (store, history, _) = setup();
        store.set(&body_key("123"), "{garbage").unwrap();
        assert!(matches!(
            history.restore_version("123"),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_restore_detects_tampered_body() {
        let (store, history, _) = setup();
        let entry = history.create_version("", VersionSource::Manual).unwrap();
        store
            .set(&body_key(&entry.id), r#"{"projects": [], "shotFiles": []}"#)
            .unwrap();
        assert!(matches!(
            history.restore_version(&entry.id),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn test_restore_brings_back_old_state() {
        let (_, history, records) = setup();
        let id = RecordId::from(42u64);
        records.put(
            &id,
            Record::new().with("id", 42).with("name", "SH_001").with("status", "Pending"),
        );

        let entry = history.create_version("checkpoint", VersionSource::Manual).unwrap();
        assert_eq!(entry.records_count, 1);

        records.put(
            &id,
            Record::new().with("id", 42).with("name", "SH_001").with("status", "Done"),
        );
        records.put(&RecordId::from(43u64), Record::new().with("id", 43));

        let summary = history.restore_version(&entry.id).unwrap();
        assert_eq!(summary.records_count, 1);
        assert_eq!(summary.removed_records, 1);
        assert_eq!(records.get(&id).unwrap().get("status"), Some(&json!("Pending")));
        assert!(records.get(&RecordId::from(43u64)).is_none());
    }

    #[test]
    fn test_delete_version_is_idempotent() {
        let (store, history, _) = setup();
        let entry = history.create_version("", VersionSource::Manual).unwrap();

        assert!(history.delete_version(&entry.id).unwrap());
        assert!(history.list_versions().is_empty());
        assert!(!store.contains(&body_key(&entry.id)).unwrap());
        assert!(!history.delete_version(&entry.id).unwrap());
    }

    #[test]
    fn test_reads_legacy_entry_fields() {
        let (store, history, _) = setup();
        store
            .set(
                HISTORY_KEY,
                r#"[
                    {"id": "1", "timestamp": "2024-01-01T00:00:00.000Z", "note": "", "source": "manual",
                     "size": 10, "projectsCount": 0, "shotsCount": 0, "shotFilesCount": 2},
                    {"id": "2", "timestamp": "2024-02-01T00:00:00.000Z", "note": "", "source": "daily",
                     "size": 12, "projectsCount": 1, "shotsCount": 3, "shotFilesCount": 3}
                ]"#,
            )
            .unwrap();

        let listed = history.list_versions();
        assert_eq!(listed[0].id, "2");
        assert_eq!(listed[0].records_count, 3);
        assert_eq!(listed[1].size_bytes, 10);
        assert!(listed[1].checksum.is_none());
    }

    #[test]
    fn test_free_form_sources_survive_new_versions() {
        let (store, history, _) = setup();
        store
            .set(
                HISTORY_KEY,
                r#"[
                    {"id": "1", "timestamp": "2024-01-01T00:00:00.000Z", "note": "Shot edit", "source": "shot",
                     "size": 10, "projectsCount": 0, "shotsCount": 0, "shotFilesCount": 0},
                    {"id": "2", "timestamp": "2024-02-01T00:00:00.000Z", "note": null, "source": "settings",
                     "size": 12, "projectsCount": 1, "shotsCount": 3, "shotFilesCount": 3},
                    {"id": "3", "timestamp": "2024-03-01T00:00:00.000Z", "note": "", "source": "",
                     "size": 12, "projectsCount": 1, "shotsCount": 3, "shotFilesCount": 3}
                ]"#,
            )
            .unwrap();
        for id in ["1", "2", "3"] {
            store.set(&body_key(id), r#"{"projects": [], "shotFiles": []}"#).unwrap();
        }

        let before = history.list_versions();
        assert_eq!(before.len(), 3);
        assert_eq!(before[1].source, VersionSource::Other("settings".to_string()));
        assert_eq!(before[1].note, "");

        let entry = history.create_version("", VersionSource::Manual).unwrap();
        let ids: Vec<String> = history.list_versions().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![entry.id.clone(), "3".to_string(), "2".to_string(), "1".to_string()]);
        assert_eq!(store.keys_with_prefix(SNAPSHOT_PREFIX).unwrap().len(), 4);

        let raw: serde_json::Value =
            serde_json::from_str(&store.get(HISTORY_KEY).unwrap().unwrap()).unwrap();
        let sources: Vec<&str> = raw
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["source"].as_str().unwrap())
            .collect();
        assert_eq!(sources, vec!["manual", "", "settings", "shot"]);
    }

    #[test]
    fn test_writes_refuse_unreadable_history() {
        let (store, history, _) = setup();
        store.set(HISTORY_KEY, "[{\"id\": 1}]").unwrap();
        store.set(&body_key("1"), "{}").unwrap();

        let err = history.create_version("", VersionSource::Manual).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(matches!(history.delete_version("1"), Err(Error::Storage(_))));

        assert_eq!(store.get(HISTORY_KEY).unwrap().as_deref(), Some("[{\"id\": 1}]"));
        assert_eq!(store.keys_with_prefix(SNAPSHOT_PREFIX).unwrap(), vec!["version_snapshot_1"]);
    }

    #[test]
    fn test_source_names() {
        assert_eq!("daily".parse::<VersionSource>().unwrap(), VersionSource::Daily);
        assert!("dashboard".parse::<VersionSource>().is_err());
        assert_eq!(
            VersionSource::from("dashboard".to_string()).to_string(),
            "dashboard"
        );
    }

    #[test]
    fn test_corrupt_history_reads_empty() {
        let (store, history, _) = setup();
        store.set(HISTORY_KEY, "{").unwrap();
        assert!(history.list_versions().is_empty());
    }
}
