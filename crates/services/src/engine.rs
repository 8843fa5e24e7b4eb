//! Composition root: builds every component once and wires them together.

use std::sync::Arc;
use std::time::Duration;

use courier_config::{NotificationSettings, Settings};
use courier_db::models::Channel;
use mongodb::Database;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::ack::ReadService;
use crate::bulk::{BulkOrchestrator, BulkResult};
use crate::dao::{ContactDao, NotificationDao, PreferenceDao};
use crate::dispatcher::{DispatchResult, Dispatcher};
use crate::drivers::{DriverRegistry, TemplateRenderer};
use crate::error::{EngineError, NotificationResult};
use crate::intake::NotificationIntake;
use crate::metrics::NotificationMetrics;
use crate::preferences::PreferenceResolver;
use crate::quota::QuotaEnforcer;
use crate::retry::{RetryController, RetryPolicy};
use crate::store::{NotificationStore, PreferenceSource};
use crate::sweeper::RetentionSweeper;

pub struct NotificationEngine {
    settings: Arc<NotificationSettings>,
    store: Arc<dyn NotificationStore>,
    metrics: Arc<NotificationMetrics>,
    resolver: Arc<PreferenceResolver>,
    retry: Arc<RetryController>,
    dispatcher: Arc<Dispatcher>,
    bulk: BulkOrchestrator,
    reads: ReadService,
    sweeper: Arc<RetentionSweeper>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl NotificationEngine {
    pub fn new(
        settings: NotificationSettings,
        store: Arc<dyn NotificationStore>,
        preferences: Arc<dyn PreferenceSource>,
        drivers: DriverRegistry,
        renderer: TemplateRenderer,
        registry: &Registry,
    ) -> Result<Self, EngineError> {
        let settings = Arc::new(settings.normalized());
        let metrics = Arc::new(NotificationMetrics::new(registry)?);
        let drivers = Arc::new(drivers);
        let tracker = TaskTracker::new();
        let shutdown = CancellationToken::new();

        let resolver = Arc::new(PreferenceResolver::new(
            preferences,
            Arc::clone(&settings),
            Arc::clone(&metrics),
        ));
        let quota = Arc::new(QuotaEnforcer::new(Arc::clone(&store), Arc::clone(&metrics)));
        let retry = Arc::new(RetryController::new(
            Arc::clone(&store),
            Arc::clone(&drivers),
            Arc::clone(&metrics),
            RetryPolicy {
                max_attempts: settings.max_retry_attempts,
                base_delay: Duration::from_millis(settings.retry_delay_ms),
                max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            },
            tracker.clone(),
            shutdown.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&resolver),
            Arc::clone(&quota),
            drivers,
            renderer,
            Arc::clone(&retry),
            Arc::clone(&metrics),
            Arc::clone(&settings),
            tracker.clone(),
            shutdown.clone(),
        ));
        let bulk = BulkOrchestrator::new(Arc::clone(&dispatcher), settings.batch_size);
        let reads = ReadService::new(Arc::clone(&store), Arc::clone(&metrics));
        let sweeper = Arc::new(RetentionSweeper::new(
            Arc::clone(&store),
            quota,
            Arc::clone(&metrics),
            settings.max_per_user,
        ));

        Ok(Self {
            settings,
            store,
            metrics,
            resolver,
            retry,
            dispatcher,
            bulk,
            reads,
            sweeper,
            tracker,
            shutdown,
        })
    }

    /// Production wiring over MongoDB and the HTTP drivers.
    pub fn from_mongo(settings: &Settings, db: &Database, registry: &Registry) -> Result<Self, EngineError> {
        let store: Arc<dyn NotificationStore> = Arc::new(NotificationDao::new(db));
        let preferences = Arc::new(PreferenceDao::new(db));
        let contacts = Arc::new(ContactDao::new(db));
        let drivers = DriverRegistry::from_settings(settings, contacts)?;
        let renderer = TemplateRenderer::new(&settings.app.name, &settings.app.url);
        Self::new(
            settings.notifications.clone(),
            store,
            preferences,
            drivers,
            renderer,
            registry,
        )
    }

    pub async fn dispatch(&self, intake: NotificationIntake) -> NotificationResult<DispatchResult> {
        self.dispatcher.dispatch(intake).await
    }

    pub async fn dispatch_bulk(&self, intakes: Vec<NotificationIntake>) -> BulkResult {
        self.bulk.dispatch_bulk(intakes).await
    }

    pub async fn force_resend(&self, notification_id: &str) -> NotificationResult<Vec<Channel>> {
        self.dispatcher.force_resend(notification_id).await
    }

    pub async fn invalidate_preferences(&self, user_id: &str) {
        self.resolver.invalidate(user_id).await;
    }

    pub fn reads(&self) -> &ReadService {
        &self.reads
    }

    pub fn sweeper(&self) -> Arc<RetentionSweeper> {
        Arc::clone(&self.sweeper)
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<NotificationMetrics> {
        &self.metrics
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    /// Number of (notification, channel) pairs with an attempt in flight.
    pub fn in_flight(&self) -> usize {
        self.retry.claims().len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Waits up to `timeout` for retries and scheduled sends to finish on
    /// their own, without refusing new work.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        self.tracker.reopen();
        drained
    }

    /// Refuses new intakes, abandons pending retries and scheduled sends, and
    /// waits up to `grace` for running work. Returns `false` when the grace
    /// period ran out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        info!(grace_secs = grace.as_secs(), "Notification engine shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if drained {
            info!("Notification engine stopped");
        } else {
            warn!(pending = self.tracker.len(), "Shutdown grace period elapsed with work still running");
        }
        drained
    }
}
