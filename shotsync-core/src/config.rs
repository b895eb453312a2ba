//! Sync configuration and its local mirror
//!
//! The configuration is authored remotely and mirrored under
//! `cloud_sync_config`; the scheduler only ever reads the mirror.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::storage::SharedStore;

pub const SYNC_CONFIG_KEY: &str = "cloud_sync_config";
pub const LAST_SYNC_KEY: &str = "cloud_sync_last_at";
pub const LAST_ERROR_KEY: &str = "cloud_sync_last_error";

pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;
pub const MIN_INTERVAL_MINUTES: u32 = 5;

/// Remote store kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "dropbox")]
    Dropbox,
    #[serde(rename = "google-drive")]
    GoogleDrive,
    #[serde(rename = "onedrive")]
    OneDrive,
    #[serde(rename = "s3")]
    S3,
    #[serde(rename = "gcs")]
    Gcs,
    #[serde(rename = "azure-blob")]
    AzureBlob,
    #[serde(rename = "webdav")]
    WebDav,
    #[serde(rename = "nextcloud")]
    Nextcloud,
    #[serde(rename = "owncloud")]
    OwnCloud,
    #[serde(rename = "generic-http")]
    GenericHttp,
}

/// Adapter family sharing one transfer protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    TokenBearerHttp,
    PresignedUrl,
    BasicAuthWebdav,
    GenericHttp,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 10] = [
        ProviderKind::Dropbox,
        ProviderKind::GoogleDrive,
        ProviderKind::OneDrive,
        ProviderKind::S3,
        ProviderKind::Gcs,
        ProviderKind::AzureBlob,
        ProviderKind::WebDav,
        ProviderKind::Nextcloud,
        ProviderKind::OwnCloud,
        ProviderKind::GenericHttp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Dropbox => "dropbox",
            ProviderKind::GoogleDrive => "google-drive",
            ProviderKind::OneDrive => "onedrive",
            ProviderKind::S3 => "s3",
            ProviderKind::Gcs => "gcs",
            ProviderKind::AzureBlob => "azure-blob",
            ProviderKind::WebDav => "webdav",
            ProviderKind::Nextcloud => "nextcloud",
            ProviderKind::OwnCloud => "owncloud",
            ProviderKind::GenericHttp => "generic-http",
        }
    }

    pub fn family(&self) -> ProviderFamily {
        match self {
            ProviderKind::Dropbox | ProviderKind::GoogleDrive | ProviderKind::OneDrive => {
                ProviderFamily::TokenBearerHttp
            }
            ProviderKind::S3 | ProviderKind::Gcs | ProviderKind::AzureBlob => {
                ProviderFamily::PresignedUrl
            }
            ProviderKind::WebDav | ProviderKind::Nextcloud | ProviderKind::OwnCloud => {
                ProviderFamily::BasicAuthWebdav
            }
            ProviderKind::GenericHttp => ProviderFamily::GenericHttp,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Configuration(format!("unknown provider '{}'", s)))
    }
}

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_object() -> Value {
    Value::Object(Map::new())
}

// Remote copies sometimes carry `null` or a string here
fn lenient_interval<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    let minutes = match value {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.max(0.0).round() as u32),
        Some(Value::String(s)) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    Ok(minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES))
}

/// Persisted auto-sync settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_interval", deserialize_with = "lenient_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    /// Provider-specific settings (tokens, URLs, credentials)
    #[serde(default = "default_object", alias = "providerConfig")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
            provider: None,
            config: default_object(),
            updated_at: None,
        }
    }
}

impl SyncConfiguration {
    /// Effective interval (never below five minutes)
    pub fn interval(&self) -> Duration {
        let minutes = self.interval_minutes.max(MIN_INTERVAL_MINUTES);
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Clamp the interval to its floor in place
    pub fn normalize(&mut self) {
        self.interval_minutes = self.interval_minutes.max(MIN_INTERVAL_MINUTES);
        if !self.config.is_object() {
            self.config = default_object();
        }
    }

    /// String field of the provider settings, blank treated as absent
    pub fn setting(&self, field: &str) -> Option<&str> {
        self.config
            .get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Local mirror of the sync configuration plus the last-sync bookkeeping
#[derive(Clone)]
pub struct SyncSettings {
    store: SharedStore,
}

impl SyncSettings {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The mirrored configuration; missing or corrupt reads as default
    pub fn load(&self) -> SyncConfiguration {
        let raw = match self.store.get(SYNC_CONFIG_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SyncConfiguration::default(),
            Err(e) => {
                warn!("Failed to read sync configuration: {}", e);
                return SyncConfiguration::default();
            }
        };
        match serde_json::from_str::<SyncConfiguration>(&raw) {
            Ok(mut config) => {
                config.normalize();
                config
            }
            Err(e) => {
                warn!("Sync configuration is corrupt, using defaults: {}", e);
                SyncConfiguration::default()
            }
        }
    }

    pub fn save(&self, config: &SyncConfiguration) -> Result<()> {
        let mut config = config.clone();
        config.normalize();
        let body = serde_json::to_string(&config)?;
        self.store.set(SYNC_CONFIG_KEY, &body)
    }

    /// Last-Sync Marker
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.store.get(LAST_SYNC_KEY).ok()??;
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    pub fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.store
            .set(LAST_SYNC_KEY, &at.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn last_error(&self) -> Option<String> {
        self.store
            .get(LAST_ERROR_KEY)
            .ok()
            .flatten()
            .filter(|e| !e.is_empty())
    }

    /// Record the outcome of the last attempt; `None` clears it
    pub fn set_last_error(&self, error: Option<&str>) -> Result<()> {
        match error {
            Some(message) => self.store.set(LAST_ERROR_KEY, message),
            None => self.store.remove(LAST_ERROR_KEY).map(|_| ()),
        }
    }
}
