//! Prometheus metrics for the dispatch engine.
//!
//! Metrics are registered on a caller-provided [`Registry`] so that several
//! engines (and tests) can coexist in one process.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metric name prefix for all engine metrics
const PREFIX: &str = "notifications";

pub struct NotificationMetrics {
    registry: Registry,
    pub created_total: IntCounterVec,
    pub creation_duration_seconds: HistogramVec,
    pub delivered_total: IntCounterVec,
    pub errors_total: IntCounterVec,
    pub retries_total: IntCounterVec,
    pub cleanup_total: IntCounterVec,
    pub read_total: IntCounter,
    pub interactions_total: IntCounterVec,
}

/// Outcome label of `notifications_delivered_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success,
    Retry,
    Failure,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::Retry => "retry",
            DeliveryOutcome::Failure => "failure",
        }
    }
}

impl NotificationMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let created_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_created_total"), "Notifications accepted at intake"),
            &["type", "priority"],
        )?;
        let creation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                format!("{PREFIX}_creation_duration_seconds"),
                "Time from intake to first-attempt settlement",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["type", "priority"],
        )?;
        let delivered_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_delivered_total"), "Per-channel delivery outcomes"),
            &["channel", "status"],
        )?;
        let errors_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_errors_total"), "Errors by kind"),
            &["kind"],
        )?;
        let retries_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_retries_total"), "Scheduled channel retries"),
            &["channel"],
        )?;
        let cleanup_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_cleanup_total"), "Records removed by retention"),
            &["reason"],
        )?;
        let read_total = IntCounter::new(
            format!("{PREFIX}_read_total"),
            "Notifications transitioned to read",
        )?;
        let interactions_total = IntCounterVec::new(
            Opts::new(format!("{PREFIX}_interactions_total"), "Recorded interactions"),
            &["kind"],
        )?;

        registry.register(Box::new(created_total.clone()))?;
        registry.register(Box::new(creation_duration_seconds.clone()))?;
        registry.register(Box::new(delivered_total.clone()))?;
        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(retries_total.clone()))?;
        registry.register(Box::new(cleanup_total.clone()))?;
        registry.register(Box::new(read_total.clone()))?;
        registry.register(Box::new(interactions_total.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            created_total,
            creation_duration_seconds,
            delivered_total,
            errors_total,
            retries_total,
            cleanup_total,
            read_total,
            interactions_total,
        })
    }

    pub fn record_created(&self, notification_type: &str, priority: &str) {
        self.created_total
            .with_label_values(&[notification_type, priority])
            .inc();
    }

    pub fn observe_creation(&self, notification_type: &str, priority: &str, elapsed: Duration) {
        self.creation_duration_seconds
            .with_label_values(&[notification_type, priority])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_delivery(&self, channel: &str, outcome: DeliveryOutcome) {
        self.delivered_total
            .with_label_values(&[channel, outcome.as_str()])
            .inc();
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total.with_label_values(&[kind]).inc();
    }

    pub fn record_retry(&self, channel: &str) {
        self.retries_total.with_label_values(&[channel]).inc();
    }

    pub fn record_cleanup(&self, reason: &str, count: u64) {
        self.cleanup_total.with_label_values(&[reason]).inc_by(count);
    }

    pub fn record_interaction(&self, kind: &str) {
        self.interactions_total.with_label_values(&[kind]).inc();
    }

    pub fn delivered(&self, channel: &str, outcome: DeliveryOutcome) -> u64 {
        self.delivered_total
            .with_label_values(&[channel, outcome.as_str()])
            .get()
    }

    pub fn created(&self, notification_type: &str, priority: &str) -> u64 {
        self.created_total
            .with_label_values(&[notification_type, priority])
            .get()
    }

    pub fn errors(&self, kind: &str) -> u64 {
        self.errors_total.with_label_values(&[kind]).get()
    }

    pub fn cleaned(&self, reason: &str) -> u64 {
        self.cleanup_total.with_label_values(&[reason]).get()
    }

    /// Text exposition of every metric in the registry.
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
