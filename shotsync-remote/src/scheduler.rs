//! Interval-gated auto-sync
//!
//! [`decide`] is the pure gate; [`AutoSync::tick`] applies it against the
//! mirrored configuration and pushes at most one snapshot at a time;
//! [`run`] drives ticks from a timer, resume signals and a shutdown channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shotsync_core::config::{ProviderKind, SyncConfiguration, SyncSettings};
use shotsync_core::snapshot::SnapshotBuilder;
use shotsync_core::{Result, SharedStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::providers::{PushReceipt, SyncProvider};
use crate::transport::HttpTransport;

/// Result of the interval gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDecision {
    Disabled,
    NotDue { remaining: Duration },
    Due,
}

/// Decide whether a push is due at `now`.
pub fn decide(
    config: &SyncConfiguration,
    last_sync: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TickDecision {
    if !config.enabled {
        return TickDecision::Disabled;
    }
    let Some(last) = last_sync else {
        return TickDecision::Due;
    };

    let interval = config.interval();
    // A marker in the future counts as "just synced"
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    if elapsed >= interval {
        TickDecision::Due
    } else {
        TickDecision::NotDue {
            remaining: interval - elapsed,
        }
    }
}

/// What a tick did
#[derive(Debug, Clone)]
pub enum TickOutcome {
    Disabled,
    NotDue { remaining: Duration },
    /// Another push was still running
    InFlight,
    Pushed(PushReceipt),
    Failed(String),
}

/// Snapshot of the scheduler state for display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub provider: Option<ProviderKind>,
    pub interval_minutes: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub in_flight: bool,
    pub next_due_at: Option<DateTime<Utc>>,
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Periodic pusher over the local sync configuration mirror
pub struct AutoSync {
    store: SharedStore,
    settings: SyncSettings,
    transport: Arc<dyn HttpTransport>,
    in_flight: AtomicBool,
    resume: Notify,
}

impl AutoSync {
    pub fn new(store: SharedStore, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            settings: SyncSettings::new(store.clone()),
            store,
            transport,
            in_flight: AtomicBool::new(false),
            resume: Notify::new(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run one gated tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let config = self.settings.load();
        match decide(&config, self.settings.last_sync_at(), now) {
            TickDecision::Disabled => return TickOutcome::Disabled,
            TickDecision::NotDue { remaining } => {
                debug!("Auto-sync not due for {}s", remaining.as_secs());
                return TickOutcome::NotDue { remaining };
            }
            TickDecision::Due => {}
        }
        self.attempt(&config, now).await
    }

    /// Push immediately, ignoring the interval but not the in-flight guard.
    pub async fn sync_now(&self, now: DateTime<Utc>) -> TickOutcome {
        let config = self.settings.load();
        self.attempt(&config, now).await
    }

    async fn attempt(&self, config: &SyncConfiguration, now: DateTime<Utc>) -> TickOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Auto-sync push already in flight, skipping tick");
            return TickOutcome::InFlight;
        }
        let _guard = InFlightGuard(&self.in_flight);

        let result = self.push(config, now).await;

        // The marker moves on failure too; retries wait for the next interval
        if let Err(e) = self.settings.set_last_sync_at(now) {
            warn!("Failed to persist last sync marker: {}", e);
        }
        let error = result.as_ref().err().map(|e| e.to_string());
        if let Err(e) = self.settings.set_last_error(error.as_deref()) {
            warn!("Failed to persist last sync error: {}", e);
        }

        match result {
            Ok(receipt) => TickOutcome::Pushed(receipt),
            Err(e) => {
                warn!("Auto-sync failed: {}", e);
                TickOutcome::Failed(e.to_string())
            }
        }
    }

    async fn push(&self, config: &SyncConfiguration, now: DateTime<Utc>) -> Result<PushReceipt> {
        let provider = SyncProvider::from_config(config)?;
        provider.validate()?;
        let payload = SnapshotBuilder::new(self.store.clone()).build_payload(now)?;
        let receipt = provider.push(self.transport.as_ref(), &payload).await?;
        info!("Auto-sync pushed {} bytes to {}", receipt.bytes, receipt.provider);
        Ok(receipt)
    }

    pub fn status(&self) -> SyncStatus {
        let config = self.settings.load();
        let last_attempt_at = self.settings.last_sync_at();
        let next_due_at = if config.enabled {
            last_attempt_at
                .and_then(|last| chrono::Duration::from_std(config.interval()).ok().map(|d| last + d))
        } else {
            None
        };
        SyncStatus {
            enabled: config.enabled,
            provider: config.provider,
            interval_minutes: config.interval_minutes,
            last_attempt_at,
            last_error: self.settings.last_error(),
            in_flight: self.in_flight.load(Ordering::Acquire),
            next_due_at,
        }
    }

    /// Ask the driver for an immediate tick (focus regained, network back)
    pub fn resume(&self) {
        self.resume.notify_one();
    }
}

/// Drive `scheduler`: tick now, every `period`, and on each resume signal,
/// until `shutdown` flips to `true` or its sender is dropped.
///
/// Ticks run as tasks owned by the driver; on shutdown it waits for the
/// outstanding ones so their marker and error are recorded.
pub async fn run(scheduler: Arc<AutoSync>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut timer = tokio::time::interval(period);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut ticks = JoinSet::new();
    info!("Auto-sync driver started (period {}s)", period.as_secs());

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = timer.tick() => spawn_tick(&mut ticks, scheduler.clone()),
            _ = scheduler.resume.notified() => {
                debug!("Auto-sync resumed");
                spawn_tick(&mut ticks, scheduler.clone());
            }
            Some(joined) = ticks.join_next(), if !ticks.is_empty() => log_join(joined),
        }
    }

    if !ticks.is_empty() {
        info!("Waiting for {} auto-sync tick(s) to finish", ticks.len());
    }
    while let Some(joined) = ticks.join_next().await {
        log_join(joined);
    }
    info!("Auto-sync driver stopped");
}

fn spawn_tick(ticks: &mut JoinSet<()>, scheduler: Arc<AutoSync>) {
    ticks.spawn(async move {
        match scheduler.tick(Utc::now()).await {
            TickOutcome::Pushed(receipt) => debug!("Tick pushed to {}", receipt.url),
            TickOutcome::Failed(e) => debug!("Tick failed: {}", e),
            other => debug!("Tick: {:?}", other),
        }
    });
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!("Auto-sync tick task failed: {}", e);
    }
}
