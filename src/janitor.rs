//! Retention janitor: periodically purges events older than the retention window.
//!
//! One janitor runs per storage backend. It wakes on a fixed interval, issues a
//! single bulk `purge_before` and goes back to sleep. A failed pass is logged
//! and retried on the next tick; the janitor only exits when shutdown is
//! signalled.

use crate::config::{RetentionConfig, MAX_RETENTION_INTERVAL_MINUTES};
use crate::notify::{RelayEvent, RelayEventsSender};
use crate::storage::Storage;
use chrono::{DateTime, Months, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MAX_PERIOD: Duration = Duration::from_secs(MAX_RETENTION_INTERVAL_MINUTES * 60);
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// When and how far back the janitor purges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Time between passes.
    pub interval: Duration,
    /// Events older than this many calendar months are purged.
    pub window_months: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            window_months: 3,
        }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            interval: config.interval(),
            window_months: config.window_months,
        }
    }
}

impl RetentionPolicy {
    /// Unix timestamp before which events are expired, as seen at `now`.
    #[must_use]
    pub fn cutoff(&self, now: DateTime<Utc>) -> u64 {
        now.checked_sub_months(Months::new(self.window_months))
            .map_or(0, |t| u64::try_from(t.timestamp()).unwrap_or(0))
    }
}

/// Background task deleting expired events from one storage backend.
pub struct Janitor {
    storage: Arc<dyn Storage>,
    policy: RetentionPolicy,
    events_tx: RelayEventsSender,
}

impl Janitor {
    /// Create a janitor for `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, policy: RetentionPolicy, events_tx: RelayEventsSender) -> Self {
        Self {
            storage,
            policy,
            events_tx,
        }
    }

    /// Retention policy in effect.
    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Run a single cleanup pass now.
    ///
    /// Returns the number of events removed, or `None` if the pass failed.
    pub async fn run_pass(&self) -> Option<u64> {
        let cutoff = self.policy.cutoff(Utc::now());
        debug!("Purging events created before {cutoff}");

        match self.storage.purge_before(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    info!("Retention pass removed {removed} events older than {cutoff}");
                } else {
                    debug!("Retention pass found nothing to remove");
                }
                let _ = self
                    .events_tx
                    .send(RelayEvent::CleanupComplete { removed, cutoff });
                Some(removed)
            }
            Err(e) => {
                warn!("Retention pass failed, retrying next interval: {e}");
                let _ = self.events_tx.send(RelayEvent::CleanupFailed {
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Start the periodic loop. The first pass runs one interval from now.
    ///
    /// The task ends once `shutdown` carries `true` or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.policy.interval.clamp(MIN_PERIOD, MAX_PERIOD);
            if period != self.policy.interval {
                warn!(
                    "Retention interval {:?} out of range, using {period:?}",
                    self.policy.interval
                );
            }
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "Retention janitor started (interval={period:?}, window={} months)",
                self.policy.window_months
            );

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        self.run_pass().await;
                    }
                }
            }

            info!("Retention janitor stopped");
        })
    }
}
