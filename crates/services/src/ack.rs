//! Reader-facing operations: read state, interactions and queries.

use std::sync::Arc;

use bson::DateTime;
use courier_db::models::{Interaction, InteractionKind, Notification, NotificationType};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::dao::base::{Page, PageParams};
use crate::error::NotificationResult;
use crate::metrics::NotificationMetrics;
use crate::store::{
    AnalyticsBucket, Bucket, NotificationFilter, NotificationStore, TimeWindow, TypeGroup,
};

pub struct ReadService {
    store: Arc<dyn NotificationStore>,
    metrics: Arc<NotificationMetrics>,
}

impl ReadService {
    pub fn new(store: Arc<dyn NotificationStore>, metrics: Arc<NotificationMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Idempotent: only the first `read = true` records an interaction.
    pub async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> NotificationResult<Notification> {
        let (record, changed) = self.store.mark_read(user_id, notification_id, read).await?;
        if changed {
            if read {
                self.metrics.read_total.inc();
                self.metrics.record_interaction(InteractionKind::Read.as_str());
            }
            debug!(user_id, notification_id, read, "Read state changed");
        }
        Ok(record)
    }

    pub async fn mark_all_read(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> NotificationResult<u64> {
        let modified = self.store.mark_all_read(user_id, notification_type).await?;
        if modified > 0 {
            self.metrics.read_total.inc_by(modified);
            info!(user_id, modified, "Marked notifications read");
        }
        Ok(modified)
    }

    pub async fn record_impression(
        &self,
        user_id: &str,
        notification_id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> NotificationResult<Notification> {
        self.interact(user_id, notification_id, InteractionKind::Impression, metadata)
            .await
    }

    pub async fn record_click(
        &self,
        user_id: &str,
        notification_id: &str,
        metadata: Option<Map<String, Value>>,
    ) -> NotificationResult<Notification> {
        self.interact(user_id, notification_id, InteractionKind::Click, metadata)
            .await
    }

    async fn interact(
        &self,
        user_id: &str,
        notification_id: &str,
        kind: InteractionKind,
        metadata: Option<Map<String, Value>>,
    ) -> NotificationResult<Notification> {
        let interaction = Interaction {
            kind,
            at: DateTime::now(),
            metadata,
        };
        let record = self
            .store
            .record_interaction(user_id, notification_id, &interaction)
            .await?;
        self.metrics.record_interaction(kind.as_str());
        Ok(record)
    }

    /// Client receipt: `delivered` from pending, sent or failed, once some
    /// channel has actually been sent. Otherwise the record comes back as is.
    pub async fn acknowledge_delivery(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> NotificationResult<Notification> {
        Ok(self
            .store
            .acknowledge_delivery(user_id, notification_id)
            .await?)
    }

    pub async fn get(&self, user_id: &str, notification_id: &str) -> NotificationResult<Notification> {
        Ok(self.store.get(user_id, notification_id).await?)
    }

    pub async fn list(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
        page: PageParams,
    ) -> NotificationResult<Page<Notification>> {
        Ok(self.store.list(user_id, filter, &page.clamped()).await?)
    }

    pub async fn count_unread(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> NotificationResult<u64> {
        Ok(self.store.count_unread(user_id, notification_type).await?)
    }

    pub async fn group_by_type(
        &self,
        user_id: &str,
        include_read: bool,
        limit: usize,
    ) -> NotificationResult<Vec<TypeGroup>> {
        Ok(self
            .store
            .group_by_type(user_id, include_read, limit)
            .await?)
    }

    pub async fn aggregate(
        &self,
        user_id: &str,
        window: TimeWindow,
        bucket: Bucket,
    ) -> NotificationResult<Vec<AnalyticsBucket>> {
        Ok(self.store.aggregate(user_id, window, bucket).await?)
    }

    /// `true` when a record was removed.
    pub async fn delete(&self, user_id: &str, notification_id: &str) -> NotificationResult<bool> {
        let deleted = self.store.delete(user_id, notification_id).await?;
        if deleted {
            info!(user_id, notification_id, "Notification deleted");
        }
        Ok(deleted)
    }
}
