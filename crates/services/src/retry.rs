//! Capped exponential retry of transient channel failures.
//!
//! Once the first attempt of a channel fails transiently, the retry task owns
//! that (notification, channel) pair until a terminal outcome. Ownership is a
//! claim in [`InFlightClaims`]; the claim is released when its guard drops.

use std::sync::Arc;
use std::time::Duration;

use bson::DateTime;
use courier_db::models::Channel;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::drivers::{DeliveryError, DeliveryReceipt, DriverRegistry, RenderedPayload};
use crate::metrics::{DeliveryOutcome, NotificationMetrics};
use crate::store::{ChannelPatch, NotificationStore, StatusSettlement};

/// Upper bound of the random extension added to each backoff delay.
const MAX_JITTER: f64 = 0.2;

/// Error recorded on a channel whose retries were cut short by expiry.
pub const EXPIRED_ERROR: &str = "expired";

type ClaimKey = (String, Channel);

#[derive(Default)]
pub struct InFlightClaims {
    claims: Arc<DashMap<ClaimKey, ()>>,
}

impl InFlightClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when another attempt for the same pair is in flight.
    pub fn try_claim(&self, notification_id: &str, channel: Channel) -> Option<ChannelClaim> {
        let key = (notification_id.to_string(), channel);
        match self.claims.entry(key.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                Some(ChannelClaim {
                    claims: Arc::clone(&self.claims),
                    key,
                })
            }
        }
    }

    pub fn is_claimed(&self, notification_id: &str, channel: Channel) -> bool {
        self.claims
            .contains_key(&(notification_id.to_string(), channel))
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Exclusive right to attempt one channel of one notification.
pub struct ChannelClaim {
    claims: Arc<DashMap<ClaimKey, ()>>,
    key: ClaimKey,
}

impl ChannelClaim {
    pub fn notification_id(&self) -> &str {
        &self.key.0
    }

    pub fn channel(&self) -> Channel {
        self.key.1
    }
}

impl Drop for ChannelClaim {
    fn drop(&mut self) {
        self.claims.remove(&self.key);
    }
}

/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)` extended
/// by `jitter` (a fraction in `0.0..=MAX_JITTER`) and capped.
pub fn backoff_delay(base: Duration, cap: Duration, retry: u32, jitter: f64) -> Duration {
    let exponent = retry.saturating_sub(1).min(31);
    let raw = base.saturating_mul(1u32 << exponent).min(cap);
    let jittered = raw.mul_f64(1.0 + jitter.clamp(0.0, MAX_JITTER));
    jittered.min(cap)
}

fn jittered_backoff(base: Duration, cap: Duration, retry: u32) -> Duration {
    let jitter = rand::rng().random_range(0.0..=MAX_JITTER);
    backoff_delay(base, cap, retry, jitter)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per channel, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// One channel handed over for retrying.
pub struct RetryJob {
    pub user_id: String,
    pub payload: Arc<RenderedPayload>,
    /// Delivery-only notifications have no record to update.
    pub persisted: bool,
    pub expires_at: Option<DateTime>,
    /// Attempts already made for this channel.
    pub attempts_made: u32,
    pub claim: ChannelClaim,
}

impl RetryJob {
    fn notification_id(&self) -> &str {
        self.claim.notification_id()
    }

    fn channel(&self) -> Channel {
        self.claim.channel()
    }
}

/// How a retry task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    Delivered(String),
    Exhausted,
    Permanent,
    Expired,
    Abandoned,
}

pub struct RetryController {
    store: Arc<dyn NotificationStore>,
    drivers: Arc<DriverRegistry>,
    metrics: Arc<NotificationMetrics>,
    policy: RetryPolicy,
    claims: InFlightClaims,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        drivers: Arc<DriverRegistry>,
        metrics: Arc<NotificationMetrics>,
        policy: RetryPolicy,
        tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            drivers,
            metrics,
            policy,
            claims: InFlightClaims::new(),
            tracker,
            cancel,
        }
    }

    pub fn claims(&self) -> &InFlightClaims {
        &self.claims
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Spawns the retry task. Returns `false` when the engine is shutting
    /// down and the job was dropped.
    pub fn schedule(self: &Arc<Self>, job: RetryJob) -> bool {
        if self.cancel.is_cancelled() {
            debug!(notification_id = %job.notification_id(), channel = %job.channel(), "Retry dropped during shutdown");
            return false;
        }
        let controller = Arc::clone(self);
        self.tracker.spawn(async move {
            controller.run(job).await;
        });
        true
    }

    /// Drives one channel to a terminal outcome.
    pub async fn run(&self, job: RetryJob) -> RetryOutcome {
        let notification_id = job.notification_id().to_string();
        let channel = job.channel();
        let Some(driver) = self.drivers.get(channel).cloned() else {
            warn!(%notification_id, %channel, "No driver registered for retry");
            return RetryOutcome::Abandoned;
        };

        let mut attempt = job.attempts_made;
        while attempt < self.policy.max_attempts {
            attempt += 1;

            if attempt > 1 {
                let delay = jittered_backoff(self.policy.base_delay, self.policy.max_delay, attempt - 1);
                debug!(%notification_id, %channel, attempt, delay_ms = delay.as_millis() as u64, "Retry scheduled");
                match self.wait(delay, job.expires_at).await {
                    Wait::Elapsed => {}
                    Wait::Expired => {
                        self.expire(&job, attempt - 1).await;
                        return RetryOutcome::Expired;
                    }
                    Wait::Cancelled => {
                        info!(%notification_id, %channel, attempt, "Retry abandoned on shutdown");
                        return RetryOutcome::Abandoned;
                    }
                }
            }

            let result = match tokio::time::timeout(driver.timeout(), driver.send(&job.user_id, &job.payload)).await {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Transient(format!(
                    "{channel} send timed out after {}ms",
                    driver.timeout().as_millis()
                ))),
            };

            if job.persisted {
                let error = result.as_ref().err().map(DeliveryError::message);
                match self.store.increment_attempt(&notification_id, error).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(%notification_id, %channel, "Record gone, stopping retries");
                        return RetryOutcome::Abandoned;
                    }
                    Err(e) => {
                        error!(%notification_id, %channel, error = %e, "Failed to record delivery attempt");
                        self.metrics.record_error("store");
                    }
                }
            }

            match result {
                Ok(receipt) => {
                    self.succeed(&job, &receipt, attempt).await;
                    return RetryOutcome::Delivered(receipt.external_message_id);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    warn!(%notification_id, %channel, attempt, error = %e, "Transient delivery failure, will retry");
                    self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Retry);
                    self.metrics.record_retry(channel.as_str());
                    self.patch(&job, ChannelPatch::failure(e.message(), attempt, false)).await;
                }
                Err(e) => {
                    let exhausted = e.is_retryable();
                    error!(%notification_id, %channel, attempt, error = %e, exhausted, "Channel delivery failed");
                    self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Failure);
                    self.metrics
                        .record_error(if exhausted { "retries_exhausted" } else { e.kind() });
                    self.patch(&job, ChannelPatch::failure(e.message(), attempt, true)).await;
                    return if exhausted {
                        RetryOutcome::Exhausted
                    } else {
                        RetryOutcome::Permanent
                    };
                }
            }
        }
        RetryOutcome::Exhausted
    }

    async fn wait(&self, delay: Duration, expires_at: Option<DateTime>) -> Wait {
        let until_expiry = expires_at.map(|at| {
            let remaining = at.timestamp_millis() - DateTime::now().timestamp_millis();
            Duration::from_millis(remaining.max(0) as u64)
        });
        match until_expiry {
            Some(remaining) if remaining <= delay => {
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => Wait::Expired,
                    _ = self.cancel.cancelled() => Wait::Cancelled,
                }
            }
            _ => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => Wait::Elapsed,
                    _ = self.cancel.cancelled() => Wait::Cancelled,
                }
            }
        }
    }

    async fn succeed(&self, job: &RetryJob, receipt: &DeliveryReceipt, attempt: u32) {
        let channel = job.channel();
        info!(
            notification_id = %job.notification_id(),
            %channel,
            attempt,
            message_id = %receipt.external_message_id,
            "Channel delivered on retry"
        );
        self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Success);
        let now = DateTime::now();
        self.patch(
            job,
            ChannelPatch::success(now, receipt.external_message_id.clone(), attempt),
        )
        .await;
        if job.persisted {
            if let Err(e) = self
                .store
                .settle_status(job.notification_id(), StatusSettlement::Sent { at: now })
                .await
            {
                error!(notification_id = %job.notification_id(), error = %e, "Failed to settle status after retry");
                self.metrics.record_error("store");
            }
        }
    }

    async fn expire(&self, job: &RetryJob, attempts: u32) {
        info!(notification_id = %job.notification_id(), channel = %job.channel(), "Notification expired, retries cancelled");
        self.metrics.record_error("expired");
        self.patch(job, ChannelPatch::failure(EXPIRED_ERROR, attempts, true))
            .await;
    }

    async fn patch(&self, job: &RetryJob, patch: ChannelPatch) {
        if !job.persisted {
            return;
        }
        if let Err(e) = self
            .store
            .update_channel(job.notification_id(), job.channel(), &patch)
            .await
        {
            error!(notification_id = %job.notification_id(), channel = %job.channel(), error = %e, "Failed to update channel state");
            self.metrics.record_error("store");
        }
    }
}

enum Wait {
    Elapsed,
    Expired,
    Cancelled,
}
