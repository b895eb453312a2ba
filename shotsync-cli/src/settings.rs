//! Host configuration: optional TOML file merged with command-line flags.
//!
//! ```toml
//! data_dir = "/var/lib/shotsync"
//! backend = "sqlite"          # or "fjall"
//! server_url = "https://tracker.example"
//! server_token = "..."
//! snapshot_base = "vfx-supervision-snapshot"
//! ```

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Deserialize;
use shotsync_core::snapshot::DEFAULT_EXPORT_BASE;
use shotsync_core::{FjallStore, SharedStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_DATA_DIR: &str = "./shotsync-data";
const SQLITE_FILE: &str = "shotsync.sqlite";
const FJALL_DIR: &str = "kv";

/// Storage backend for the local key-value namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Fjall,
}

/// Contents of the TOML file; every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    backend: Option<Backend>,
    server_url: Option<String>,
    server_token: Option<String>,
    snapshot_base: Option<String>,
}

/// Values given on the command line (take precedence over the file)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub data_dir: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub server_url: Option<String>,
    pub server_token: Option<String>,
}

/// Effective host configuration
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfig {
    pub data_dir: PathBuf,
    pub backend: Backend,
    pub server_url: Option<String>,
    pub server_token: Option<String>,
    pub snapshot_base: String,
}

impl HostConfig {
    /// Merge `file` (if any) with `overrides`.
    pub fn resolve(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let from_file = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str::<FileConfig>(&text)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => FileConfig::default(),
        };

        Ok(Self {
            data_dir: overrides
                .data_dir
                .or(from_file.data_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            backend: overrides.backend.or(from_file.backend).unwrap_or_default(),
            server_url: overrides.server_url.or(from_file.server_url),
            server_token: overrides.server_token.or(from_file.server_token),
            snapshot_base: from_file
                .snapshot_base
                .unwrap_or_else(|| DEFAULT_EXPORT_BASE.to_string()),
        })
    }

    /// Open the configured backend under `data_dir`.
    pub fn open_store(&self) -> Result<SharedStore> {
        let store: SharedStore = match self.backend {
            Backend::Sqlite => {
                let path = self.data_dir.join(SQLITE_FILE);
                debug!("Opening SQLite store at {}", path.display());
                Arc::new(SqliteStore::open(&path)?)
            }
            Backend::Fjall => {
                let path = self.data_dir.join(FJALL_DIR);
                debug!("Opening fjall store at {}", path.display());
                Arc::new(FjallStore::open(&path)?)
            }
        };
        Ok(store)
    }
}
