//! Record store: one shot per key, plus the project index
//!
//! Shots live under `shot-file-<id>`. Every write goes through a
//! write-through policy to three sinks that older readers still depend on:
//!
//! 1. the primary key `shot-file-<id>`
//! 2. the legacy key `shot_<id>`
//! 3. the compact copy embedded in the project index (`projects`)
//!
//! Record writes are best-effort. Failures are logged and swallowed; the
//! caller still holds the record in memory.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::SharedStore;

/// Key prefix of primary record entries
pub const RECORD_PREFIX: &str = "shot-file-";
/// Key prefix of the legacy mirror
pub const LEGACY_RECORD_PREFIX: &str = "shot_";
/// Key of the project index
pub const PROJECTS_KEY: &str = "projects";
/// Key of the currently selected project id
pub const SELECTED_PROJECT_KEY: &str = "selectedProjectId";
/// Key of the offline capture metadata
pub const OFFLINE_META_KEY: &str = "offline_snapshot";

/// Field stamped on every record write
pub const LAST_SAVED_FIELD: &str = "lastSaved";

/// Opaque record identifier (numeric and string ids share one canonical form)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Canonical id of a JSON `id` field (`42` and `"42"` are the same record)
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }

    /// Recover the id from a primary record key
    pub fn from_record_key(key: &str) -> Option<Self> {
        key.strip_prefix(RECORD_PREFIX)
            .filter(|id| !id.is_empty())
            .map(|id| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary storage key
    pub fn record_key(&self) -> String {
        format!("{}{}", RECORD_PREFIX, self.0)
    }

    /// Legacy mirror key
    pub fn legacy_key(&self) -> String {
        format!("{}{}", LEGACY_RECORD_PREFIX, self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A single shot: an open bag of fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON object; anything else is not a record
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<RecordId> {
        self.0.get("id").and_then(RecordId::from_value)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Timestamp of the last write through [`RecordStore::put`]
    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.0
            .get(LAST_SAVED_FIELD)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// A project in the index, with its embedded (compact) shots
///
/// Held as the raw JSON value so an index written by other clients comes
/// back byte-for-byte, whatever shape its fields have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Project(Value);

impl Project {
    pub fn new(id: impl Into<Value>, name: impl Into<String>) -> Self {
        Self(json!({ "id": id.into(), "name": name.into(), "shots": [] }))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Project id, if present and not null
    pub fn id(&self) -> Option<&Value> {
        self.0.get("id").filter(|v| !v.is_null())
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    /// Embedded shots; empty when `shots` is missing or not an array
    pub fn shots(&self) -> &[Value] {
        self.0
            .get("shots")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn shots_mut(&mut self) -> Option<&mut Vec<Value>> {
        self.0.get_mut("shots").and_then(Value::as_array_mut)
    }

    /// Append an embedded shot, creating the `shots` array if needed.
    pub fn push_shot(&mut self, shot: Value) {
        let Value::Object(map) = &mut self.0 else {
            return;
        };
        let shots = map
            .entry("shots")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !shots.is_array() {
            *shots = Value::Array(Vec::new());
        }
        if let Value::Array(list) = shots {
            list.push(shot);
        }
    }

    pub fn with_shot(mut self, shot: Value) -> Self {
        self.push_shot(shot);
        self
    }

    /// Whether an embedded shot carries `id`
    pub fn contains_shot(&self, id: &RecordId) -> bool {
        self.shots().iter().any(|s| shot_matches(s, id))
    }
}

fn shot_matches(shot: &Value, id: &RecordId) -> bool {
    shot.get("id")
        .and_then(RecordId::from_value)
        .is_some_and(|sid| &sid == id)
}

/// Metadata written by an offline capture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineMeta {
    pub projects_count: usize,
    pub shots_count: usize,
    pub shot_files_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Reference to a stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub id: RecordId,
    pub key: String,
}

/// Reduce a shot to the fields list views need.
///
/// Heavy fields (preview data-URIs, references, camera movement) stay in the
/// primary record only.
pub fn compact_shot(shot: &Value) -> Value {
    const KEPT: [&str; 8] = [
        "id",
        "name",
        "description",
        "status",
        "notes",
        "createdBy",
        "projectId",
        "lastSaved",
    ];
    const CAMERA_KEPT: [&str; 8] = [
        "manufacturer",
        "model",
        "lensManufacturer",
        "lens",
        "focalLength",
        "aperture",
        "iso",
        "isAnamorphic",
    ];

    let mut out = Map::new();
    for field in KEPT {
        if let Some(v) = shot.get(field).filter(|v| !v.is_null()) {
            out.insert(field.to_string(), v.clone());
        }
    }

    let mut camera = Map::new();
    if let Some(settings) = shot.get("cameraSettings") {
        for field in CAMERA_KEPT {
            if let Some(v) = settings.get(field).filter(|v| !v.is_null()) {
                camera.insert(field.to_string(), v.clone());
            }
        }
    }
    out.insert("cameraSettings".to_string(), Value::Object(camera));
    out.insert("additionalCameraSetups".to_string(), Value::Array(Vec::new()));

    Value::Object(out)
}

/// Key-addressed store of shots and the project index
#[derive(Clone)]
pub struct RecordStore {
    store: SharedStore,
}

impl RecordStore {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &SharedStore {
        &self.store
    }

    /// Write `record` under `id`, stamping `lastSaved`.
    ///
    /// Returns `true` when the primary write succeeded. The legacy mirror and
    /// the embedded project copy are updated on a best-effort basis.
    pub fn put(&self, id: &RecordId, record: Record) -> bool {
        self.put_at(id, record, Utc::now())
    }

    /// [`put`](Self::put) with an explicit write time
    pub fn put_at(&self, id: &RecordId, mut record: Record, now: DateTime<Utc>) -> bool {
        if record.id().is_none() {
            record.insert("id", id.as_str());
        }
        record.insert(
            LAST_SAVED_FIELD,
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        );

        let body = match serde_json::to_string(&record) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize shot {}: {}", id, e);
                return false;
            }
        };

        // Sink 1: primary key
        let saved = match self.store.set(&id.record_key(), &body) {
            Ok(()) => {
                debug!("Shot {} saved to {}", id, id.record_key());
                true
            }
            Err(e) => {
                warn!("Error saving shot {}: {}", id, e);
                false
            }
        };

        // Sink 2: legacy mirror
        if let Err(e) = self.store.set(&id.legacy_key(), &body) {
            warn!("Legacy mirror write failed for shot {}: {}", id, e);
        }

        // Sink 3: compact copy embedded in the project index
        if let Err(e) = self.update_embedded(id, &record) {
            warn!("Project index sync failed for shot {}: {}", id, e);
        }

        saved
    }

    fn update_embedded(&self, id: &RecordId, record: &Record) -> Result<()> {
        let mut projects = self.projects()?;
        let mut touched = false;

        for project in projects.iter_mut() {
            let Some(shots) = project.shots_mut() else {
                continue;
            };
            for shot in shots.iter_mut() {
                if !shot_matches(shot, id) {
                    continue;
                }
                let mut merged = match shot.take() {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                for (k, v) in record.fields() {
                    merged.insert(k.clone(), v.clone());
                }
                *shot = compact_shot(&Value::Object(merged));
                touched = true;
            }
        }

        if touched {
            self.set_projects(&projects)?;
        }
        Ok(())
    }

    /// Load a record; missing or unreadable entries yield `None`
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        let key = id.record_key();
        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error loading shot {}: {}", id, e);
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Record::from_value(value),
            Err(e) => {
                warn!("Shot {} under {} is not valid JSON: {}", id, key, e);
                None
            }
        }
    }

    /// Remove the primary entry. The legacy mirror and embedded copy are
    /// left alone. Returns whether the storage call succeeded.
    pub fn delete(&self, id: &RecordId) -> bool {
        match self.store.remove(&id.record_key()) {
            Ok(_) => {
                debug!("Shot file {} deleted", id);
                true
            }
            Err(e) => {
                warn!("Error deleting shot file {}: {}", id, e);
                false
            }
        }
    }

    /// Enumerate stored records (order unspecified)
    pub fn list(&self) -> Vec<RecordRef> {
        match self.store.keys_with_prefix(RECORD_PREFIX) {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|key| RecordId::from_record_key(&key).map(|id| RecordRef { id, key }))
                .collect(),
            Err(e) => {
                warn!("Error listing shot files: {}", e);
                Vec::new()
            }
        }
    }

    /// The project index (empty if never written)
    pub fn projects(&self) -> Result<Vec<Project>> {
        match self.store.get(PROJECTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    /// Replace the project index as one unit
    pub fn set_projects(&self, projects: &[Project]) -> Result<()> {
        let body = serde_json::to_string(projects)?;
        self.store.set(PROJECTS_KEY, &body)
    }

    pub fn selected_project(&self) -> Option<String> {
        match self.store.get(SELECTED_PROJECT_KEY) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!("Error reading selected project: {}", e);
                None
            }
        }
    }

    pub fn set_selected_project(&self, id: &str) -> Result<()> {
        self.store.set(SELECTED_PROJECT_KEY, id)
    }

    /// Metadata of the last offline capture, if any
    pub fn offline_meta(&self) -> Option<OfflineMeta> {
        let raw = match self.store.get(OFFLINE_META_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Error reading offline snapshot meta: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("Offline snapshot meta is corrupt: {}", e);
                None
            }
        }
    }

    pub fn set_offline_meta(&self, meta: &OfflineMeta) -> Result<()> {
        let body = serde_json::to_string(meta)?;
        self.store.set(OFFLINE_META_KEY, &body)
    }

    /// Write every embedded shot to its primary key and record counts.
    ///
    /// Embedded fields are laid over the existing primary record so heavy
    /// fields that only live in the primary entry survive.
    pub fn capture_offline(&self, now: DateTime<Utc>) -> Result<OfflineMeta> {
        let projects = self.projects()?;
        let stamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut shots_count = 0;

        for project in &projects {
            for shot in project.shots() {
                shots_count += 1;
                let Some(id) = shot.get("id").and_then(RecordId::from_value) else {
                    continue;
                };
                let mut record = self.get(&id).unwrap_or_default();
                if let Value::Object(fields) = shot {
                    for (k, v) in fields {
                        record.insert(k.clone(), v.clone());
                    }
                }
                record.insert(LAST_SAVED_FIELD, stamp.clone());

                let body = serde_json::to_string(&record)?;
                if let Err(e) = self.store.set(&id.record_key(), &body) {
                    warn!("Offline capture could not save shot {}: {}", id, e);
                }
            }
        }

        let meta = OfflineMeta {
            projects_count: projects.len(),
            shots_count,
            shot_files_count: self.list().len(),
            timestamp: now,
        };
        self.set_offline_meta(&meta)?;
        Ok(meta)
    }
}
