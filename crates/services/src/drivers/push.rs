use std::time::Duration;

use async_trait::async_trait;
use courier_db::models::Channel;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelDriver, DeliveryError, DeliveryReceipt, RenderedPayload};

/// Placeholder push driver: no provider is wired up yet, so every send is
/// accepted with a synthetic message id.
pub struct PushDriver {
    timeout: Duration,
}

impl PushDriver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ChannelDriver for PushDriver {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(
        &self,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        debug!(user_id, notification_id = %payload.notification_id, title = %payload.title, "Push accepted");
        Ok(DeliveryReceipt::new(format!("push-{}", Uuid::new_v4())))
    }
}
