use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::DateTime;
use chrono::Utc;
use courier_config::NotificationSettings;
use courier_db::models::{
    Analytics, Channel, ChannelStates, Notification, NotificationStatus,
};
use futures::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::drivers::{
    DeliveryError, DeliveryReceipt, DriverRegistry, RenderedPayload, TemplateRenderer,
};
use crate::error::{NotificationError, NotificationResult};
use crate::intake::NotificationIntake;
use crate::metrics::{DeliveryOutcome, NotificationMetrics};
use crate::preferences::PreferenceResolver;
use crate::quota::QuotaEnforcer;
use crate::retry::{ChannelClaim, RetryController, RetryJob};
use crate::store::{ChannelPatch, NotificationStore, StatusSettlement};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOutcome {
    pub sent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Handed to the retry controller after a transient failure.
    pub retrying: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub notification_id: String,
    pub status: NotificationStatus,
    pub saved_to_database: bool,
    pub channels: BTreeMap<Channel, ChannelOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quiet_hours_suppressed: Vec<Channel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime>,
}

impl DispatchResult {
    pub fn channel(&self, channel: Channel) -> Option<&ChannelOutcome> {
        self.channels.get(&channel)
    }
}

pub struct Dispatcher {
    store: Arc<dyn NotificationStore>,
    resolver: Arc<PreferenceResolver>,
    quota: Arc<QuotaEnforcer>,
    drivers: Arc<DriverRegistry>,
    renderer: TemplateRenderer,
    retry: Arc<RetryController>,
    metrics: Arc<NotificationMetrics>,
    settings: Arc<NotificationSettings>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn NotificationStore>,
        resolver: Arc<PreferenceResolver>,
        quota: Arc<QuotaEnforcer>,
        drivers: Arc<DriverRegistry>,
        renderer: TemplateRenderer,
        retry: Arc<RetryController>,
        metrics: Arc<NotificationMetrics>,
        settings: Arc<NotificationSettings>,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            resolver,
            quota,
            drivers,
            renderer,
            retry,
            metrics,
            settings,
            tracker,
            shutdown,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub async fn dispatch(self: &Arc<Self>, intake: NotificationIntake) -> NotificationResult<DispatchResult> {
        if self.is_shutting_down() {
            return Err(NotificationError::ShuttingDown);
        }
        self.tracker.track_future(self.accept(intake)).await
    }

    async fn accept(self: &Arc<Self>, intake: NotificationIntake) -> NotificationResult<DispatchResult> {
        let started = Instant::now();
        if let Err(e) = intake.validate() {
            self.metrics.record_error("validation");
            return Err(e.into());
        }

        let now = DateTime::now();
        let notification_id = intake
            .notification_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let expires_at = match intake.expires_at {
            Some(at) => DateTime::from_chrono(at),
            None => DateTime::from_millis(
                now.timestamp_millis()
                    .saturating_add(self.settings.default_ttl_secs.saturating_mul(1000) as i64),
            ),
        };
        if expires_at <= now {
            self.metrics.record_error("expired");
            return Err(NotificationError::Expired);
        }

        let resolved = self.resolver.resolve_at(&intake, now.to_chrono()).await;
        let mut channels = resolved.enabled.clone();
        channels.retain(|channel| {
            let registered = self.drivers.contains(*channel);
            if !registered {
                warn!(%notification_id, %channel, "Channel enabled but no driver registered, dropping");
            }
            registered
        });

        let record = build_record(&intake, &notification_id, &channels, expires_at, now);
        let saved = channels.contains(&Channel::InApp);
        if saved {
            self.persist(&record).await?;
        } else {
            debug!(%notification_id, user_id = %record.user_id, "Delivery-only notification, no record written");
        }
        self.metrics.record_created(
            record.notification_type.as_str(),
            record.priority.as_str(),
        );

        let suppressed: Vec<Channel> = resolved.quiet_hours_suppressed.iter().copied().collect();

        if let Some(at) = intake.deferred_until(Utc::now()) {
            let scheduled_for = DateTime::from_chrono(at);
            self.defer(record, channels, saved, scheduled_for);
            return Ok(DispatchResult {
                notification_id,
                status: NotificationStatus::Pending,
                saved_to_database: saved,
                channels: BTreeMap::new(),
                quiet_hours_suppressed: suppressed,
                scheduled_for: Some(scheduled_for),
            });
        }

        let mut result = self.deliver(&record, &channels, saved, started).await;
        result.quiet_hours_suppressed = suppressed;
        Ok(result)
    }

    /// Quota first, then insert. A taken id is rejected before anything is
    /// evicted.
    async fn persist(&self, record: &Notification) -> NotificationResult<()> {
        let notification_id = &record.notification_id;
        if self.store.exists(notification_id).await? {
            self.metrics.record_error("already_exists");
            return Err(NotificationError::AlreadyExists(notification_id.clone()));
        }

        if let Err(e) = self
            .quota
            .enforce(&record.user_id, self.settings.max_per_user)
            .await
        {
            warn!(%notification_id, user_id = %record.user_id, error = %e, "Quota enforcement failed, continuing");
            self.metrics.record_error(e.kind());
        }

        match self.store.create(record).await {
            Ok(()) => {
                info!(
                    %notification_id,
                    user_id = %record.user_id,
                    notification_type = %record.notification_type,
                    "Notification created"
                );
                Ok(())
            }
            Err(e) => {
                let err = NotificationError::from(e);
                self.metrics.record_error(err.kind());
                if !matches!(err, NotificationError::AlreadyExists(_)) {
                    error!(%notification_id, error = %err, "Failed to create notification");
                }
                Err(err)
            }
        }
    }

    fn defer(
        self: &Arc<Self>,
        record: Notification,
        channels: BTreeSet<Channel>,
        saved: bool,
        scheduled_for: DateTime,
    ) {
        let dispatcher = Arc::clone(self);
        let wait = Duration::from_millis(
            (scheduled_for.timestamp_millis() - DateTime::now().timestamp_millis()).max(0) as u64,
        );
        info!(notification_id = %record.notification_id, delay_ms = wait.as_millis() as u64, "Notification scheduled");

        self.tracker.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = dispatcher.shutdown.cancelled() => {
                    info!(notification_id = %record.notification_id, "Scheduled notification abandoned on shutdown");
                    return;
                }
            }
            if saved {
                match dispatcher.store.exists(&record.notification_id).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(notification_id = %record.notification_id, "Scheduled notification removed before send");
                        return;
                    }
                    Err(e) => {
                        error!(notification_id = %record.notification_id, error = %e, "Failed to load scheduled notification");
                        dispatcher.metrics.record_error("store");
                        return;
                    }
                }
            }
            if record.is_expired_at(DateTime::now()) {
                info!(notification_id = %record.notification_id, "Scheduled notification expired before send");
                return;
            }
            dispatcher
                .deliver(&record, &channels, saved, Instant::now())
                .await;
        });
    }

    /// First attempt of every channel, concurrently, followed by the status
    /// settlement.
    async fn deliver(
        &self,
        record: &Notification,
        channels: &BTreeSet<Channel>,
        saved: bool,
        started: Instant,
    ) -> DispatchResult {
        let notification_id = record.notification_id.as_str();
        let payload = Arc::new(self.renderer.render(record, saved));
        let mut outcomes: BTreeMap<Channel, ChannelOutcome> = BTreeMap::new();

        let mut claimed: Vec<ChannelClaim> = Vec::with_capacity(channels.len());
        for channel in channels {
            match self.retry.claims().try_claim(notification_id, *channel) {
                Some(claim) => claimed.push(claim),
                None => {
                    outcomes.insert(
                        *channel,
                        ChannelOutcome {
                            error: Some("attempt already in flight".to_string()),
                            ..Default::default()
                        },
                    );
                }
            }
        }

        let sends = claimed.into_iter().map(|claim| {
            let payload = Arc::clone(&payload);
            async move {
                let result = self.send_once(claim.channel(), &record.user_id, &payload).await;
                (claim, result)
            }
        });
        let results = join_all(sends).await;

        if saved {
            let first_error = results
                .iter()
                .find_map(|(_, result)| result.as_ref().err().map(DeliveryError::message));
            if let Err(e) = self.store.increment_attempt(notification_id, first_error).await {
                error!(%notification_id, error = %e, "Failed to record delivery attempt");
                self.metrics.record_error("store");
            }
        }

        let now = DateTime::now();
        let mut any_sent = false;
        for (claim, result) in results {
            let channel = claim.channel();
            let outcome = match result {
                Ok(receipt) => {
                    any_sent = true;
                    self.on_success(record, channel, &receipt, now, saved).await;
                    drop(claim);
                    ChannelOutcome {
                        sent: true,
                        external_message_id: Some(receipt.external_message_id),
                        ..Default::default()
                    }
                }
                Err(e) => self.on_failure(record, claim, e, &payload, saved).await,
            };
            outcomes.insert(channel, outcome);
        }

        let status = if any_sent {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        if saved {
            let settlement = if any_sent {
                StatusSettlement::Sent { at: now }
            } else {
                StatusSettlement::Failed
            };
            if let Err(e) = self.store.settle_status(notification_id, settlement).await {
                error!(%notification_id, error = %e, "Failed to settle notification status");
                self.metrics.record_error("store");
            }
        }

        self.metrics.observe_creation(
            record.notification_type.as_str(),
            record.priority.as_str(),
            started.elapsed(),
        );
        info!(
            %notification_id,
            user_id = %record.user_id,
            status = status.as_str(),
            saved,
            channels = outcomes.len(),
            "Notification dispatched"
        );

        DispatchResult {
            notification_id: notification_id.to_string(),
            status,
            saved_to_database: saved,
            channels: outcomes,
            quiet_hours_suppressed: Vec::new(),
            scheduled_for: None,
        }
    }

    async fn send_once(
        &self,
        channel: Channel,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let Some(driver) = self.drivers.get(channel) else {
            return Err(DeliveryError::Permanent(format!("no driver for {channel}")));
        };
        let budget = driver.timeout();
        match tokio::time::timeout(budget, driver.send(user_id, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Transient(format!(
                "{channel} send timed out after {}ms",
                budget.as_millis()
            ))),
        }
    }

    async fn on_success(
        &self,
        record: &Notification,
        channel: Channel,
        receipt: &DeliveryReceipt,
        now: DateTime,
        saved: bool,
    ) {
        debug!(
            notification_id = %record.notification_id,
            %channel,
            message_id = %receipt.external_message_id,
            "Channel delivered"
        );
        self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Success);
        if saved {
            self.patch(
                record,
                channel,
                ChannelPatch::success(now, receipt.external_message_id.clone(), 1),
            )
            .await;
        }
    }

    async fn on_failure(
        &self,
        record: &Notification,
        claim: ChannelClaim,
        err: DeliveryError,
        payload: &Arc<RenderedPayload>,
        saved: bool,
    ) -> ChannelOutcome {
        let channel = claim.channel();
        let retryable = err.is_retryable() && self.retry.policy().max_attempts > 1;
        if saved {
            self.patch(
                record,
                channel,
                ChannelPatch::failure(err.message(), 1, !retryable),
            )
            .await;
        }

        if retryable {
            warn!(notification_id = %record.notification_id, %channel, error = %err, "Transient delivery failure, handing to retry");
            self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Retry);
            self.metrics.record_retry(channel.as_str());
            let scheduled = self.retry.schedule(RetryJob {
                user_id: record.user_id.clone(),
                payload: Arc::clone(payload),
                persisted: saved,
                expires_at: record.expires_at,
                attempts_made: 1,
                claim,
            });
            return ChannelOutcome {
                error: Some(err.message().to_string()),
                retrying: scheduled,
                ..Default::default()
            };
        }

        error!(notification_id = %record.notification_id, %channel, error = %err, "Channel delivery failed");
        self.metrics.record_delivery(channel.as_str(), DeliveryOutcome::Failure);
        self.metrics.record_error(if err.is_retryable() {
            "retries_exhausted"
        } else {
            err.kind()
        });
        ChannelOutcome {
            error: Some(err.message().to_string()),
            ..Default::default()
        }
    }

    async fn patch(&self, record: &Notification, channel: Channel, patch: ChannelPatch) {
        if let Err(e) = self
            .store
            .update_channel(&record.notification_id, channel, &patch)
            .await
        {
            error!(notification_id = %record.notification_id, %channel, error = %e, "Failed to update channel state");
            self.metrics.record_error("store");
        }
    }

    /// Re-enqueues every enabled channel that has not been sent and is not in
    /// flight, with a fresh attempt budget.
    pub async fn force_resend(&self, notification_id: &str) -> NotificationResult<Vec<Channel>> {
        if self.is_shutting_down() {
            return Err(NotificationError::ShuttingDown);
        }
        let record = self.store.find_by_id(notification_id).await?;
        if record.is_expired_at(DateTime::now()) {
            return Err(NotificationError::Expired);
        }
        let payload = Arc::new(self.renderer.render(&record, true));

        let mut enqueued = Vec::new();
        for channel in Channel::ALL {
            let state = record.channels.get(channel);
            if !state.enabled || state.sent || !self.drivers.contains(channel) {
                continue;
            }
            let Some(claim) = self.retry.claims().try_claim(notification_id, channel) else {
                debug!(notification_id, %channel, "Channel already in flight, not resending");
                continue;
            };
            self.patch(&record, channel, ChannelPatch::rearm()).await;
            let scheduled = self.retry.schedule(RetryJob {
                user_id: record.user_id.clone(),
                payload: Arc::clone(&payload),
                persisted: true,
                expires_at: record.expires_at,
                attempts_made: 0,
                claim,
            });
            if scheduled {
                enqueued.push(channel);
            }
        }
        info!(notification_id, channels = ?enqueued, "Forced resend enqueued");
        Ok(enqueued)
    }
}

fn build_record(
    intake: &NotificationIntake,
    notification_id: &str,
    channels: &BTreeSet<Channel>,
    expires_at: DateTime,
    now: DateTime,
) -> Notification {
    let mut states = ChannelStates::default();
    for channel in channels {
        states.get_mut(*channel).enabled = true;
    }
    Notification {
        notification_id: notification_id.to_string(),
        user_id: intake.user_id.clone(),
        title: intake.title.clone(),
        message: intake.message.clone(),
        notification_type: intake.notification_type,
        priority: intake.priority,
        status: NotificationStatus::Pending,
        read_status: false,
        read_at: None,
        delivered_at: None,
        metadata: intake.metadata.clone(),
        channels: states,
        analytics: Analytics::default(),
        grouping: intake.grouping.clone(),
        expires_at: Some(expires_at),
        created_at: now,
        updated_at: now,
    }
}
