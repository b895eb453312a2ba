//! Restore/import pipeline
//!
//! Applying a snapshot is a full replace of the project index and of the
//! record keyspace, never a merge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::Result;
use crate::history::{VersionEntry, VersionHistory, VersionSource};
use crate::records::{Project, RecordId, RecordStore, RECORD_PREFIX};
use crate::snapshot::Snapshot;
use crate::storage::SharedStore;

/// Counts reported after a restore or import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    pub projects_count: usize,
    pub shots_count: usize,
    pub records_count: usize,
    pub removed_records: usize,
    pub restored_at: DateTime<Utc>,
}

/// Replace the stored state with `snapshot`.
///
/// Assumes no concurrent writer touches the record keyspace meanwhile.
pub fn apply_snapshot(
    store: &SharedStore,
    snapshot: &Snapshot,
    now: DateTime<Utc>,
) -> Result<RestoreSummary> {
    let records = RecordStore::new(store.clone());

    records.set_projects(&snapshot.projects)?;
    if let Some(meta) = &snapshot.offline_snapshot {
        records.set_offline_meta(meta)?;
    }

    let wanted: HashSet<&str> = snapshot.shot_files.iter().map(|f| f.key.as_str()).collect();
    let mut removed_records = 0;
    for key in store.keys_with_prefix(RECORD_PREFIX)? {
        if !wanted.contains(key.as_str()) {
            store.remove(&key)?;
            removed_records += 1;
            debug!("Removed {} not present in snapshot", key);
        }
    }

    for file in &snapshot.shot_files {
        let body = serde_json::to_string(&file.value)?;
        store.set(&file.key, &body)?;
    }

    if records.selected_project().is_none() {
        let first = snapshot
            .projects
            .first()
            .and_then(Project::id)
            .and_then(RecordId::from_value);
        if let Some(id) = first {
            records.set_selected_project(id.as_str())?;
        }
    }

    let summary = RestoreSummary {
        projects_count: snapshot.projects_count(),
        shots_count: snapshot.shots_count(),
        records_count: snapshot.records_count(),
        removed_records,
        restored_at: now,
    };
    info!(
        "Applied snapshot: {} projects, {} records ({} removed)",
        summary.projects_count, summary.records_count, summary.removed_records
    );
    Ok(summary)
}

/// Options for [`import_from_text`]
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Register the imported text as a new version
    pub save_version: bool,
    pub note: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            save_version: true,
            note: "Import".to_string(),
        }
    }
}

/// Result of an import
#[derive(Debug, Clone)]
pub struct ImportOutcome {
    pub summary: RestoreSummary,
    pub version: Option<VersionEntry>,
}

/// Validate `text`, apply it, and optionally keep it verbatim in history.
pub fn import_from_text(
    store: &SharedStore,
    text: &str,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    let snapshot = Snapshot::parse(text)?;
    let summary = apply_snapshot(store, &snapshot, Utc::now())?;

    let version = if options.save_version {
        let history = VersionHistory::new(store.clone());
        Some(history.register_raw(text, &options.note, VersionSource::Import)?)
    } else {
        None
    };

    Ok(ImportOutcome { summary, version })
}
