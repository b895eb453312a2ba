//! Backup policies layered on top of the version history
//!
//! * auto-backup: an `autosave` version before destructive edits (default on)
//! * daily backup: at most one `daily` version per local calendar day
//!   (default off)

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::history::{VersionEntry, VersionHistory, VersionSource};
use crate::storage::SharedStore;

pub const AUTO_BACKUP_KEY: &str = "auto_backup_enabled";
pub const DAILY_BACKUP_KEY: &str = "daily_backup_enabled";
pub const LAST_DAILY_BACKUP_KEY: &str = "last_daily_backup_at";

/// Whether `last` and `now` fall on different calendar days in `tz`
pub fn is_different_day<Tz: TimeZone>(last: DateTime<Utc>, now: DateTime<Utc>, tz: &Tz) -> bool {
    last.with_timezone(tz).date_naive() != now.with_timezone(tz).date_naive()
}

/// Toggle-driven backups
#[derive(Clone)]
pub struct BackupPolicy {
    store: SharedStore,
    history: VersionHistory,
}

impl BackupPolicy {
    pub fn new(store: SharedStore) -> Self {
        Self {
            history: VersionHistory::new(store.clone()),
            store,
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.store.get(key) {
            Ok(Some(v)) => v.trim() == "true",
            Ok(None) => default,
            Err(e) => {
                warn!("Failed to read {}: {}", key, e);
                default
            }
        }
    }

    fn set_flag(&self, key: &str, enabled: bool) -> Result<()> {
        self.store.set(key, if enabled { "true" } else { "false" })
    }

    pub fn auto_backup_enabled(&self) -> bool {
        self.flag(AUTO_BACKUP_KEY, true)
    }

    pub fn set_auto_backup(&self, enabled: bool) -> Result<()> {
        self.set_flag(AUTO_BACKUP_KEY, enabled)
    }

    pub fn daily_backup_enabled(&self) -> bool {
        self.flag(DAILY_BACKUP_KEY, false)
    }

    pub fn set_daily_backup(&self, enabled: bool) -> Result<()> {
        self.set_flag(DAILY_BACKUP_KEY, enabled)
    }

    /// Take an `autosave` version if auto-backup is on.
    pub fn maybe_auto_backup(&self, note: &str) -> Result<Option<VersionEntry>> {
        if !self.auto_backup_enabled() {
            debug!("Auto-backup disabled, skipping '{}'", note);
            return Ok(None);
        }
        self.history
            .create_version(note, VersionSource::Autosave)
            .map(Some)
    }

    pub fn last_daily_backup_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(LAST_DAILY_BACKUP_KEY).ok()??;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    /// Daily backup against the local calendar.
    pub fn run_daily_if_due(&self, now: DateTime<Utc>) -> Result<Option<VersionEntry>> {
        self.run_daily_if_due_in(now, &Local)
    }

    /// Daily backup against the calendar of `tz`.
    pub fn run_daily_if_due_in<Tz: TimeZone>(
        &self,
        now: DateTime<Utc>,
        tz: &Tz,
    ) -> Result<Option<VersionEntry>> {
        if !self.daily_backup_enabled() {
            return Ok(None);
        }
        if let Some(last) = self.last_daily_backup_at() {
            if !is_different_day(last, now, tz) {
                debug!("Daily backup already taken at {}", last);
                return Ok(None);
            }
        }

        let note = format!("Daily backup {}", now.with_timezone(tz).date_naive());
        let entry = self.history.create_version(&note, VersionSource::Daily)?;
        self.store.set(
            LAST_DAILY_BACKUP_KEY,
            &now.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        info!("Daily backup stored as version {}", entry.id);
        Ok(Some(entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};
    use chrono::Duration;
    use std::sync::Arc;

    fn policy() -> (SharedStore, BackupPolicy) {
        let store: SharedStore = Arc::new(MemoryStore::new());
        (store.clone(), BackupPolicy::new(store))
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let (_, policy) = policy();
        assert!(policy.auto_backup_enabled());
        assert!(!policy.daily_backup_enabled());
        assert!(policy.last_daily_backup_at().is_none());
    }

    #[test]
    fn test_auto_backup_follows_toggle() {
        let (store, policy) = policy();
        let entry = policy.maybe_auto_backup("Before delete").unwrap().unwrap();
        assert_eq!(entry.source, VersionSource::Autosave);

        policy.set_auto_backup(false).unwrap();
        assert_eq!(store.get(AUTO_BACKUP_KEY).unwrap().as_deref(), Some("false"));
        assert!(policy.maybe_auto_backup("Before delete").unwrap().is_none());
        assert_eq!(VersionHistory::new(store).list_versions().len(), 1);
    }

    #[test]
    fn test_daily_backup_disabled_by_default() {
        let (_, policy) = policy();
        assert!(policy.run_daily_if_due_in(noon(), &Utc).unwrap().is_none());
    }

    #[test]
    fn test_daily_backup_once_per_day() {
        let (store, policy) = policy();
        policy.set_daily_backup(true).unwrap();

        let first = policy.run_daily_if_due_in(noon(), &Utc).unwrap().unwrap();
        assert_eq!(first.source, VersionSource::Daily);
        assert_eq!(policy.last_daily_backup_at(), Some(noon()));

        let later = noon() + Duration::hours(6);
        assert!(policy.run_daily_if_due_in(later, &Utc).unwrap().is_none());

        let tomorrow = noon() + Duration::days(1);
        assert!(policy.run_daily_if_due_in(tomorrow, &Utc).unwrap().is_some());
        assert_eq!(VersionHistory::new(store).list_versions().len(), 2);
    }

    #[test]
    fn test_is_different_day() {
        let t = noon();
        assert!(!is_different_day(t, t + Duration::minutes(1), &Utc));
        assert!(!is_different_day(t - Duration::minutes(1), t, &Utc));
        assert!(is_different_day(t, t + Duration::hours(12), &Utc));
    }
}
