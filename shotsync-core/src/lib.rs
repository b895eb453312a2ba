//! Shotsync Core Library
//!
//! Local-first persistence for the VFX supervision tracker:
//! - Storage port with in-memory, SQLite (WAL mode) and Fjall backends
//! - Record store with write-through to legacy and embedded copies
//! - Snapshot builder and on-disk export
//! - Bounded version history with restore
//! - Backup policies (auto-backup, daily backup)
//! - Restore/import pipeline
//! - Sync configuration mirror

pub mod error;
pub mod storage;
pub mod records;
pub mod snapshot;
pub mod history;
pub mod backup;
pub mod restore;
pub mod config;

pub use error::{Error, Result};
pub use storage::{FjallStore, KeyValueStore, MemoryStore, SharedStore, SqliteStore};
pub use records::{OfflineMeta, Project, Record, RecordId, RecordRef, RecordStore};
pub use snapshot::{export_snapshot, snapshot_file_name, ShotFile, Snapshot, SnapshotBuilder};
pub use history::{VersionEntry, VersionHistory, VersionSource, RETENTION_LIMIT};
pub use backup::BackupPolicy;
pub use restore::{apply_snapshot, import_from_text, ImportOptions, ImportOutcome, RestoreSummary};
pub use config::{ProviderFamily, ProviderKind, SyncConfiguration, SyncSettings};
