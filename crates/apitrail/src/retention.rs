//! Retention policy enforcement.
//!
//! Two independent pruning rules run on a timer: age-based (records older
//! than N days) and count-based (keep only the N most recent). A failure in
//! one rule is recorded and does not block the other.

use crate::settings::{AuditSettings, SettingsService};
use crate::store::AuditStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// The cleanup job fires twice a day.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(12 * 60 * 60);

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Outcome of a cleanup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupOutcome {
    /// Both rules disabled; only bookkeeping was updated.
    Skipped,
    /// Every active rule ran without error.
    Success,
    /// At least one rule failed; see the error list.
    Error,
}

/// Snapshot of the most recent cleanup cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupStatus {
    /// When the cycle ran, unix seconds.
    pub last_run: i64,
    /// Rows deleted across both rules this cycle.
    pub deleted: u64,
    /// Age rule active at run time (days, 0 = disabled).
    pub retention_days: u32,
    /// Count rule active at run time (0 = disabled).
    pub retention_max_records: u64,
    /// Non-fatal rule failures.
    pub errors: Vec<String>,
    /// Overall outcome.
    pub outcome: CleanupOutcome,
}

/// Apply the retention rules once.
///
/// With both rules disabled this is a no-op that still stamps the last-run
/// time, so operators can see the job is alive.
pub fn run_retention_cleanup(store: &dyn AuditStore, settings: &AuditSettings) -> CleanupStatus {
    let mut status = CleanupStatus {
        last_run: chrono::Utc::now().timestamp(),
        deleted: 0,
        retention_days: settings.retention_days,
        retention_max_records: settings.retention_max_records,
        errors: Vec::new(),
        outcome: CleanupOutcome::Skipped,
    };

    if settings.retention_days == 0 && settings.retention_max_records == 0 {
        return status;
    }

    if settings.retention_days > 0 {
        let cutoff = status.last_run - i64::from(settings.retention_days) * SECONDS_PER_DAY;
        match store.delete_older_than(cutoff) {
            Ok(removed) => status.deleted += removed,
            Err(err) => status.errors.push(format!("age-based cleanup failed: {}", err)),
        }
    }

    if settings.retention_max_records > 0 {
        match prune_to_cap(store, settings.retention_max_records) {
            Ok(removed) => status.deleted += removed,
            Err(message) => status.errors.push(message),
        }
    }

    status.outcome = if status.errors.is_empty() {
        CleanupOutcome::Success
    } else {
        CleanupOutcome::Error
    };

    status
}

/// Delete everything strictly older than the cap-th newest record.
fn prune_to_cap(store: &dyn AuditStore, cap: u64) -> Result<u64, String> {
    let total = store
        .total_count()
        .map_err(|err| format!("count-based cleanup failed: {}", err))?;

    if total <= cap {
        return Ok(0);
    }

    let cutoff = store
        .nth_newest_timestamp(cap)
        .map_err(|err| format!("count-based cleanup failed: {}", err))?;

    match cutoff {
        Some(cutoff) => store
            .delete_older_than(cutoff)
            .map_err(|err| format!("count-based cleanup failed: {}", err)),
        None => Ok(0),
    }
}

/// Timer-driven retention job.
///
/// Runs [`run_retention_cleanup`] on a fixed interval, independent of request
/// traffic, and publishes the latest [`CleanupStatus`] for the admin surface.
pub struct RetentionScheduler {
    status: Arc<RwLock<Option<CleanupStatus>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl RetentionScheduler {
    /// Spawn the cleanup job on the twice-daily interval.
    pub fn spawn(store: Arc<dyn AuditStore>, settings: Arc<SettingsService>) -> Self {
        Self::spawn_with_interval(store, settings, CLEANUP_INTERVAL)
    }

    /// Spawn the cleanup job with a custom period.
    pub fn spawn_with_interval(
        store: Arc<dyn AuditStore>,
        settings: Arc<SettingsService>,
        period: Duration,
    ) -> Self {
        let status: Arc<RwLock<Option<CleanupStatus>>> = Arc::new(RwLock::new(None));
        let slot = Arc::clone(&status);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            // The first tick fires immediately; consume it so the first
            // cleanup happens one full period after startup.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let snapshot = settings.get();
                let result = run_retention_cleanup(store.as_ref(), &snapshot);
                tracing::debug!(
                    deleted = result.deleted,
                    outcome = ?result.outcome,
                    "retention cleanup finished"
                );

                if let Ok(mut slot) = slot.write() {
                    *slot = Some(result);
                }
            }
        });

        Self { status, handle }
    }

    /// Status of the most recent cycle, if any has run.
    pub fn last_status(&self) -> Option<CleanupStatus> {
        self.status.read().ok().and_then(|slot| slot.clone())
    }

    /// Stop the job.
    pub fn shutdown(&self) {
        self.handle.abort();
    }
}

impl Drop for RetentionScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
