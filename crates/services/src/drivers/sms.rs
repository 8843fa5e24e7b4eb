use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_config::SmsSettings;
use courier_db::models::Channel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelDriver, DeliveryError, DeliveryReceipt, RenderedPayload, http};
use crate::store::ContactBook;

#[derive(Debug, Serialize)]
struct SmsRequest<'a> {
    to: &'a str,
    body: &'a str,
    reference: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmsResponse {
    message_id: Option<String>,
}

pub struct SmsDriver {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
    contacts: Arc<dyn ContactBook>,
}

impl SmsDriver {
    pub fn new(
        gateway_url: &str,
        settings: &SmsSettings,
        contacts: Arc<dyn ContactBook>,
    ) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: gateway_url.to_string(),
            api_key: settings.api_key.clone(),
            timeout,
            contacts,
        })
    }

    async fn phone(&self, user_id: &str, payload: &RenderedPayload) -> Result<String, DeliveryError> {
        if let Some(phone) = payload.metadata.get("phone").and_then(Value::as_str) {
            return Ok(phone.to_string());
        }
        self.contacts
            .lookup(user_id)
            .await
            .map_err(|e| DeliveryError::Transient(format!("contact lookup failed: {e}")))?
            .and_then(|c| c.phone)
            .filter(|phone| !phone.is_empty())
            .ok_or_else(|| DeliveryError::Permanent("unknown recipient".to_string()))
    }
}

#[async_trait]
impl ChannelDriver for SmsDriver {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(
        &self,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let to = self.phone(user_id, payload).await?;
        let mut request = self.client.post(&self.url).json(&SmsRequest {
            to: &to,
            body: &payload.sms_body,
            reference: &payload.notification_id,
        });
        if !self.api_key.is_empty() {
            request = request.header("x-api-key", &self.api_key);
        }
        let response = http::send(request).await?;
        // Gateways that answer with an empty body still accepted the message.
        let body: SmsResponse = response.json().await.unwrap_or_default();
        let message_id = body
            .message_id
            .unwrap_or_else(|| format!("sms-{}", Uuid::new_v4()));
        debug!(user_id, notification_id = %payload.notification_id, %message_id, "SMS accepted");
        Ok(DeliveryReceipt::new(message_id))
    }
}
