use std::sync::Arc;

use tracing::{info, warn};

use crate::dao::base::DaoResult;
use crate::error::{NotificationError, NotificationResult};
use crate::metrics::NotificationMetrics;
use crate::store::NotificationStore;

/// Per-user record cap. Eviction is strictly oldest-first and best-effort:
/// concurrent intakes for the same user may briefly overshoot the cap until
/// the next enforcement or sweep.
pub struct QuotaEnforcer {
    store: Arc<dyn NotificationStore>,
    metrics: Arc<NotificationMetrics>,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<dyn NotificationStore>, metrics: Arc<NotificationMetrics>) -> Self {
        Self { store, metrics }
    }

    /// Makes room for one more record. Returns the number evicted.
    pub async fn enforce(&self, user_id: &str, max_per_user: u64) -> NotificationResult<u64> {
        let count = self
            .store
            .count_for_user(user_id)
            .await
            .map_err(|e| NotificationError::QuotaExceeded(e.to_string()))?;
        if count < max_per_user {
            return Ok(0);
        }
        self.evict(user_id, count - max_per_user + 1, "intake")
            .await
            .map_err(|e| NotificationError::QuotaExceeded(e.to_string()))
    }

    /// Trims a user down to exactly the cap.
    pub async fn trim(&self, user_id: &str, max_per_user: u64) -> DaoResult<u64> {
        let count = self.store.count_for_user(user_id).await?;
        if count <= max_per_user {
            return Ok(0);
        }
        self.evict(user_id, count - max_per_user, "sweep").await
    }

    async fn evict(&self, user_id: &str, excess: u64, trigger: &str) -> DaoResult<u64> {
        let ids = self.store.oldest_ids(user_id, excess).await?;
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self.store.delete_ids(user_id, &ids).await?;
        if deleted < ids.len() as u64 {
            warn!(user_id, requested = ids.len(), deleted, "Quota eviction raced with another delete");
        }
        self.metrics.record_cleanup("quota", deleted);
        info!(user_id, deleted, trigger, evicted = ?ids, "Evicted oldest notifications over quota");
        Ok(deleted)
    }
}
