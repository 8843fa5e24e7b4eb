use std::time::Duration;

use async_trait::async_trait;
use courier_db::models::Channel;

use super::{ChannelDriver, DeliveryError, DeliveryReceipt, RenderedPayload};

/// The in-app channel is the durable record itself; it has been delivered as
/// soon as the record exists.
pub struct InAppDriver;

#[async_trait]
impl ChannelDriver for InAppDriver {
    fn channel(&self) -> Channel {
        Channel::InApp
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn send(
        &self,
        _user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if payload.saved {
            Ok(DeliveryReceipt::new(payload.notification_id.clone()))
        } else {
            Err(DeliveryError::Permanent("notification record was not saved".to_string()))
        }
    }
}
