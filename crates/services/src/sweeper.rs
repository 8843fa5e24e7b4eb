use std::sync::Arc;

use bson::DateTime;
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use crate::error::NotificationResult;
use crate::metrics::NotificationMetrics;
use crate::quota::QuotaEnforcer;
use crate::store::{CleanupFilter, NotificationStore};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired: u64,
    pub quota_trimmed: u64,
}

/// Retention: expired records, over-quota users, and the manual age-based
/// cleanup.
pub struct RetentionSweeper {
    store: Arc<dyn NotificationStore>,
    quota: Arc<QuotaEnforcer>,
    metrics: Arc<NotificationMetrics>,
    max_per_user: u64,
}

impl RetentionSweeper {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        quota: Arc<QuotaEnforcer>,
        metrics: Arc<NotificationMetrics>,
        max_per_user: u64,
    ) -> Self {
        Self {
            store,
            quota,
            metrics,
            max_per_user,
        }
    }

    pub async fn sweep(&self) -> NotificationResult<SweepReport> {
        self.sweep_at(DateTime::now()).await
    }

    pub async fn sweep_at(&self, now: DateTime) -> NotificationResult<SweepReport> {
        let expired = self.store.delete_expired(now).await?;
        self.metrics.record_cleanup("expired", expired);

        let mut quota_trimmed = 0;
        for over in self.store.users_over(self.max_per_user).await? {
            match self.quota.trim(&over.user_id, self.max_per_user).await {
                Ok(trimmed) => quota_trimmed += trimmed,
                Err(e) => {
                    warn!(user_id = %over.user_id, count = over.count, error = %e, "Quota repair failed");
                    self.metrics.record_error("quota");
                }
            }
        }

        let report = SweepReport {
            expired,
            quota_trimmed,
        };
        info!(expired, quota_trimmed, "Retention sweep finished");
        Ok(report)
    }

    /// Removes records older than `older_than_days`, optionally sparing read
    /// ones. With `dry_run` only the count is returned.
    pub async fn cleanup(
        &self,
        older_than_days: u32,
        keep_read: bool,
        dry_run: bool,
    ) -> NotificationResult<u64> {
        let cutoff = DateTime::from_millis(
            DateTime::now().timestamp_millis() - i64::from(older_than_days) * DAY_MS,
        );
        let filter = CleanupFilter {
            created_before: cutoff,
            keep_read,
            user_id: None,
        };
        let affected = self.store.cleanup(&filter, dry_run).await?;
        if !dry_run {
            self.metrics.record_cleanup("manual", affected);
        }
        info!(older_than_days, keep_read, dry_run, affected, "Manual cleanup finished");
        Ok(affected)
    }

    /// Registers the periodic sweep (6-field cron) and starts the scheduler.
    pub async fn start(self: Arc<Self>, schedule: &str) -> Result<JobScheduler, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        let sweeper = Arc::clone(&self);
        let job = Job::new_async(schedule, move |_id, _scheduler| {
            let sweeper = Arc::clone(&sweeper);
            Box::pin(async move {
                if let Err(e) = sweeper.sweep().await {
                    error!(error = %e, "Scheduled retention sweep failed");
                    sweeper.metrics.record_error("store");
                }
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;
        info!(schedule, "Retention sweeper scheduled");
        Ok(scheduler)
    }
}
