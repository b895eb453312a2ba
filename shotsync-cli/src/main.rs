//! shotsync: snapshot, version and sync tool for the VFX supervision tracker.
//!
//! Supports:
//! - Snapshot export and offline capture
//! - Local version history (create/list/restore/delete)
//! - Import of snapshot files (full replace)
//! - Push/pull to remote stores and the auto-sync loop
//! - Backup policies
//!
//! # Usage
//!
//! ```bash
//! # Store a version before a risky edit
//! shotsync versions create --note "before relink"
//!
//! # Restore it
//! shotsync versions restore 1714557600000
//!
//! # Pull the sync configuration from the tracker server and run auto-sync
//! shotsync --config shotsync.toml config fetch
//! shotsync --config shotsync.toml watch
//! ```

mod report;
mod settings;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use settings::{Backend, HostConfig, Overrides};
use shotsync_core::config::{ProviderKind, SyncSettings};
use shotsync_core::{
    export_snapshot, import_from_text, BackupPolicy, ImportOptions, KeyValueStore, RecordStore,
    SharedStore, SnapshotBuilder, VersionHistory, VersionSource,
};
use shotsync_remote::{AutoSync, CloudConfigClient, ReqwestTransport, SyncProvider, TickOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "shotsync")]
#[command(author = "Shotsync Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Snapshot, version and sync tool for VFX shot tracking data")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the local store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Storage backend
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// Tracker server URL (for `config fetch|publish`)
    #[arg(long, global = true)]
    server_url: Option<String>,

    /// Tracker server bearer token
    #[arg(long, global = true)]
    server_token: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current snapshot document
    Snapshot {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write the current snapshot to a timestamped file
    Export {
        /// Target directory
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// File name prefix (default from config)
        #[arg(long)]
        base: Option<String>,
    },

    /// Copy every embedded shot to its primary record and record counts
    Offline,

    /// Manage the local version history
    Versions {
        #[command(subcommand)]
        action: VersionsAction,
    },

    /// Replace the local state with a snapshot file
    Import {
        /// Snapshot file
        file: PathBuf,
        /// Do not keep the imported file as a version
        #[arg(long)]
        no_version: bool,
        /// Note for the stored version
        #[arg(long, default_value = "Import")]
        note: String,
    },

    /// Push the current snapshot with the configured provider
    Push,

    /// Download the remote snapshot
    Pull {
        /// Apply it to the local store (full replace)
        #[arg(long)]
        apply: bool,
        /// Write it to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or change the sync configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Backup policies
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Run the auto-sync loop until interrupted
    Watch {
        /// Seconds between scheduler ticks
        #[arg(long, default_value_t = 60)]
        period_secs: u64,
        /// Refresh the configuration from the server first
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Subcommand, Debug)]
enum VersionsAction {
    /// List stored versions, newest first
    List,
    /// Store the current state as a version
    Create {
        #[arg(short, long, default_value = "")]
        note: String,
        #[arg(long, default_value = "manual")]
        source: String,
    },
    /// Replace the current state with a version
    Restore {
        id: String,
        /// Skip the auto-backup taken before restoring
        #[arg(long)]
        no_backup: bool,
    },
    /// Delete a version
    Delete { id: String },
    /// Print the stored body of a version
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show the mirrored configuration and auto-sync status
    Show,
    /// Change the mirrored configuration
    Set {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        interval: Option<u32>,
        /// Provider setting as key=value (repeatable)
        #[arg(long = "set", value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },
    /// Replace the mirror with the server copy
    Fetch,
    /// Upload the mirror to the server
    Publish,
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    /// Toggle the auto-backup taken before restores and imports
    Auto { state: Toggle },
    /// Toggle the daily backup
    Daily { state: Toggle },
    /// Take the daily backup if it is due
    RunDaily,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive("shotsync=info".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let host = HostConfig::resolve(
        cli.config.as_deref(),
        Overrides {
            data_dir: cli.data_dir,
            backend: cli.backend,
            server_url: cli.server_url,
            server_token: cli.server_token,
        },
    )?;
    let store = host
        .open_store()
        .with_context(|| format!("Failed to open store in {}", host.data_dir.display()))?;

    let result = match cli.command {
        Commands::Snapshot { output } => cmd_snapshot(&store, output),
        Commands::Export { dir, base } => cmd_export(&store, &host, dir, base),
        Commands::Offline => cmd_offline(&store),
        Commands::Versions { action } => cmd_versions(&store, action),
        Commands::Import {
            file,
            no_version,
            note,
        } => cmd_import(&store, file, no_version, note),
        Commands::Push => cmd_push(&store).await,
        Commands::Pull { apply, output } => cmd_pull(&store, apply, output).await,
        Commands::Config { action } => cmd_config(&store, &host, action).await,
        Commands::Backup { action } => cmd_backup(&store, action),
        Commands::Watch {
            period_secs,
            refresh,
        } => cmd_watch(&store, &host, period_secs, refresh).await,
    };

    store.flush()?;
    result
}

fn transport() -> Result<Arc<ReqwestTransport>> {
    Ok(Arc::new(ReqwestTransport::new()?))
}

fn cmd_snapshot(store: &SharedStore, output: Option<PathBuf>) -> Result<()> {
    let payload = SnapshotBuilder::new(store.clone()).build_payload(Utc::now())?;
    match output {
        Some(path) => {
            std::fs::write(&path, payload.as_bytes())
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Snapshot written to {}", path.display());
        }
        None => println!("{}", payload),
    }
    Ok(())
}

fn cmd_export(store: &SharedStore, host: &HostConfig, dir: PathBuf, base: Option<String>) -> Result<()> {
    let base = base.unwrap_or_else(|| host.snapshot_base.clone());
    let path = export_snapshot(store.clone(), &dir, &base, &Local::now())?;
    println!("Exported {}", path.display());
    Ok(())
}

fn cmd_offline(store: &SharedStore) -> Result<()> {
    let meta = RecordStore::new(store.clone()).capture_offline(Utc::now())?;
    println!("Offline capture complete:");
    println!("  Projects:   {}", meta.projects_count);
    println!("  Shots:      {}", meta.shots_count);
    println!("  Shot files: {}", meta.shot_files_count);
    Ok(())
}

fn cmd_versions(store: &SharedStore, action: VersionsAction) -> Result<()> {
    let history = VersionHistory::new(store.clone());
    match action {
        VersionsAction::List => {
            report::print_versions(&history.list_versions(), &mut std::io::stdout())?;
        }
        VersionsAction::Create { note, source } => {
            let source: VersionSource = source.parse()?;
            let entry = history.create_version(&note, source)?;
            println!("Created version {}", report::format_entry(&entry));
        }
        VersionsAction::Restore { id, no_backup } => {
            if !no_backup {
                if let Some(backup) = BackupPolicy::new(store.clone())
                    .maybe_auto_backup(&format!("Before restoring {}", id))?
                {
                    println!("Auto-backup stored as version {}", backup.id);
                }
            }
            let summary = history.restore_version(&id)?;
            report::print_restore(&summary, &mut std::io::stdout())?;
        }
        VersionsAction::Delete { id } => {
            if history.delete_version(&id)? {
                println!("Deleted version {}", id);
            } else {
                println!("No version {}", id);
            }
        }
        VersionsAction::Show { id } => {
            println!("{}", history.load_body(&id)?);
        }
    }
    Ok(())
}

fn cmd_import(store: &SharedStore, file: PathBuf, no_version: bool, note: String) -> Result<()> {
    let text = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    if let Some(backup) = BackupPolicy::new(store.clone()).maybe_auto_backup("Before import")? {
        println!("Auto-backup stored as version {}", backup.id);
    }

    let outcome = import_from_text(
        store,
        &text,
        &ImportOptions {
            save_version: !no_version,
            note,
        },
    )?;
    report::print_restore(&outcome.summary, &mut std::io::stdout())?;
    if let Some(entry) = outcome.version {
        println!("Stored as version {}", entry.id);
    }
    Ok(())
}

async fn cmd_push(store: &SharedStore) -> Result<()> {
    let sync = AutoSync::new(store.clone(), transport()?);
    match sync.sync_now(Utc::now()).await {
        TickOutcome::Pushed(receipt) => {
            println!(
                "Pushed {} to {} ({}, status {})",
                report::format_size(receipt.bytes as u64),
                receipt.provider,
                receipt.url,
                receipt.status
            );
            Ok(())
        }
        TickOutcome::Failed(e) => Err(anyhow!("Push failed: {}", e)),
        other => Err(anyhow!("Push not performed: {:?}", other)),
    }
}

async fn cmd_pull(store: &SharedStore, apply: bool, output: Option<PathBuf>) -> Result<()> {
    let config = SyncSettings::new(store.clone()).load();
    let provider = SyncProvider::from_config(&config)?;
    let transport = transport()?;
    let text = provider.pull(transport.as_ref()).await?;

    if apply {
        if let Some(backup) = BackupPolicy::new(store.clone()).maybe_auto_backup("Before pull")? {
            println!("Auto-backup stored as version {}", backup.id);
        }
        let outcome = import_from_text(
            store,
            &text,
            &ImportOptions {
                save_version: true,
                note: format!("Pulled from {}", provider.kind()),
            },
        )?;
        report::print_restore(&outcome.summary, &mut std::io::stdout())?;
    } else if let Some(path) = output {
        std::fs::write(&path, text.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Remote snapshot written to {}", path.display());
    } else {
        println!("{}", text);
    }
    Ok(())
}

fn cloud_client(host: &HostConfig) -> Result<CloudConfigClient> {
    let url = host
        .server_url
        .as_deref()
        .ok_or_else(|| anyhow!("No server URL configured (--server-url or server_url)"))?;
    let token = host
        .server_token
        .as_deref()
        .ok_or_else(|| anyhow!("No server token configured (--server-token or server_token)"))?;
    Ok(CloudConfigClient::new(url, token, transport()?)?)
}

fn parse_setting(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty setting name in '{}'", raw);
    }
    // JSON objects (e.g. generic HTTP headers) are accepted verbatim
    let value = match serde_json::from_str::<Value>(value) {
        Ok(v @ Value::Object(_)) => v,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

async fn cmd_config(store: &SharedStore, host: &HostConfig, action: ConfigAction) -> Result<()> {
    let settings = SyncSettings::new(store.clone());
    match action {
        ConfigAction::Show => {
            let config = settings.load();
            println!("{}", serde_json::to_string_pretty(&config)?);
            let sync = AutoSync::new(store.clone(), transport()?);
            report::print_status(&sync.status(), &mut std::io::stdout())?;
        }
        ConfigAction::Set {
            provider,
            enabled,
            interval,
            settings: pairs,
        } => {
            let mut config = settings.load();
            if let Some(provider) = provider {
                let kind: ProviderKind = provider.parse()?;
                if config.provider != Some(kind) {
                    config.config = Value::Object(Default::default());
                }
                config.provider = Some(kind);
            }
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
            if let Some(interval) = interval {
                config.interval_minutes = interval;
            }
            for raw in &pairs {
                let (key, value) = parse_setting(raw)?;
                if let Value::Object(map) = &mut config.config {
                    map.insert(key, value);
                }
            }
            config.updated_at = Some(Utc::now());
            settings.save(&config)?;
            info!("Sync configuration updated");
            println!("{}", serde_json::to_string_pretty(&settings.load())?);
        }
        ConfigAction::Fetch => {
            let config = cloud_client(host)?.refresh_mirror(&settings).await?;
            println!(
                "Fetched configuration: enabled={}, provider={}",
                config.enabled,
                config
                    .provider
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "(none)".to_string())
            );
        }
        ConfigAction::Publish => {
            let updated = cloud_client(host)?.publish(&settings.load()).await?;
            match updated {
                Some(at) => println!("Published (server time {})", at),
                None => println!("Published"),
            }
        }
    }
    Ok(())
}

fn cmd_backup(store: &SharedStore, action: BackupAction) -> Result<()> {
    let policy = BackupPolicy::new(store.clone());
    match action {
        BackupAction::Auto { state } => {
            policy.set_auto_backup(state.enabled())?;
            println!("Auto-backup {}", if state.enabled() { "enabled" } else { "disabled" });
        }
        BackupAction::Daily { state } => {
            policy.set_daily_backup(state.enabled())?;
            println!("Daily backup {}", if state.enabled() { "enabled" } else { "disabled" });
        }
        BackupAction::RunDaily => match policy.run_daily_if_due(Utc::now())? {
            Some(entry) => println!("Daily backup stored as version {}", entry.id),
            None => println!("Daily backup not due (or disabled)"),
        },
    }
    Ok(())
}

async fn cmd_watch(store: &SharedStore, host: &HostConfig, period_secs: u64, refresh: bool) -> Result<()> {
    if period_secs == 0 {
        bail!("--period-secs must be positive");
    }
    if refresh {
        cloud_client(host)?
            .refresh_mirror(&SyncSettings::new(store.clone()))
            .await?;
    }

    let sync = Arc::new(AutoSync::new(store.clone(), transport()?));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let driver = tokio::spawn(shotsync_remote::run(
        sync.clone(),
        Duration::from_secs(period_secs),
        shutdown_rx,
    ));

    info!("Watching (Ctrl-C to stop)");
    let policy = BackupPolicy::new(store.clone());
    let mut daily = tokio::time::interval(Duration::from_secs(3600));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = daily.tick() => {
                if let Err(e) = policy.run_daily_if_due(Utc::now()) {
                    tracing::warn!("Daily backup failed: {}", e);
                }
                store.flush()?;
            }
        }
    }

    info!("Shutting down");
    let _ = shutdown_tx.send(true);
    driver.await?;
    report::print_status(&sync.status(), &mut std::io::stdout())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_setting() {
        assert_eq!(
            parse_setting("baseUrl=https://dav.example/a=b").unwrap(),
            ("baseUrl".to_string(), Value::String("https://dav.example/a=b".to_string()))
        );
        let (key, value) = parse_setting(r#"headers={"X-Key": "k"}"#).unwrap();
        assert_eq!(key, "headers");
        assert!(value.is_object());
        assert!(parse_setting("novalue").is_err());
        assert!(parse_setting("=x").is_err());
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "shotsync",
            "versions",
            "create",
            "--note",
            "checkpoint",
            "--backend",
            "fjall",
        ])
        .unwrap();
        assert_eq!(cli.backend, Some(Backend::Fjall));
        assert!(matches!(
            cli.command,
            Commands::Versions {
                action: VersionsAction::Create { .. }
            }
        ));
    }
}
