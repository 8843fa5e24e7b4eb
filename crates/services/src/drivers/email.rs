use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_config::EmailSettings;
use courier_db::models::{Channel, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{ChannelDriver, DeliveryError, DeliveryReceipt, RenderedPayload, http};
use crate::store::ContactBook;

/// Gateway limit for one `/send-bulk-email` call.
pub const MAX_BULK_EMAILS: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub html: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub priority: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayResponse {
    success: bool,
    #[serde(default)]
    data: Option<SendData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendData {
    message_id: Option<String>,
    provider: Option<String>,
}

#[derive(Debug, Serialize)]
struct BulkRequest<'a> {
    emails: &'a [EmailMessage],
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub successful: u64,
    #[serde(default)]
    pub failed: u64,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    success: bool,
    #[serde(default)]
    data: Option<BulkSummary>,
    #[serde(default)]
    error: Option<String>,
}

/// `urgent|high → high`, `normal → normal`, `low → low`.
pub fn email_priority(priority: Priority) -> &'static str {
    match priority {
        Priority::Urgent | Priority::High => "high",
        Priority::Normal => "normal",
        Priority::Low => "low",
    }
}

fn address_list(metadata: &Map<String, Value>, key: &str) -> Vec<String> {
    match metadata.get(key) {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

pub struct EmailDriver {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    contacts: Arc<dyn ContactBook>,
}

impl EmailDriver {
    pub fn new(
        base_url: &str,
        settings: &EmailSettings,
        contacts: Arc<dyn ContactBook>,
    ) -> Result<Self, reqwest::Error> {
        let timeout = Duration::from_millis(settings.timeout_ms);
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout,
            retries: settings.retries,
            retry_delay: Duration::from_millis(settings.retry_delay_ms.max(1)),
            contacts,
        })
    }

    /// `metadata.email` wins over the contact record.
    async fn recipient(&self, user_id: &str, payload: &RenderedPayload) -> Result<String, DeliveryError> {
        if let Some(email) = payload.metadata.get("email").and_then(Value::as_str) {
            return Ok(email.to_string());
        }
        let contact = self
            .contacts
            .lookup(user_id)
            .await
            .map_err(|e| DeliveryError::Transient(format!("contact lookup failed: {e}")))?;
        contact
            .and_then(|c| c.email)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| DeliveryError::Permanent("unknown recipient".to_string()))
    }

    pub fn message(&self, to: String, payload: &RenderedPayload) -> EmailMessage {
        EmailMessage {
            to,
            subject: payload.subject.clone(),
            html: payload.html.clone(),
            text: Some(payload.text.clone()),
            priority: email_priority(payload.priority),
            cc: address_list(&payload.metadata, "cc"),
            bcc: address_list(&payload.metadata, "bcc"),
            metadata: payload.metadata.clone(),
        }
    }

    /// Builds the gateway message for one user, resolving the recipient.
    pub async fn prepare(&self, user_id: &str, payload: &RenderedPayload) -> Result<EmailMessage, DeliveryError> {
        let to = self.recipient(user_id, payload).await?;
        Ok(self.message(to, payload))
    }

    async fn post_single(&self, message: &EmailMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let request = self
            .client
            .post(format!("{}/send-email", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(message);
        let response: GatewayResponse = http::decode(http::send(request).await?).await?;
        if !response.success {
            return Err(DeliveryError::Permanent(
                response.error.unwrap_or_else(|| "email gateway rejected message".to_string()),
            ));
        }
        let data = response.data.unwrap_or(SendData {
            message_id: None,
            provider: None,
        });
        let message_id = data
            .message_id
            .ok_or_else(|| DeliveryError::Permanent("email gateway returned no messageId".to_string()))?;
        Ok(DeliveryReceipt {
            external_message_id: message_id,
            provider: data.provider,
        })
    }

    /// One gateway call for up to [`MAX_BULK_EMAILS`] messages.
    pub async fn send_bulk(&self, messages: &[EmailMessage]) -> Result<BulkSummary, DeliveryError> {
        if messages.is_empty() {
            return Ok(BulkSummary::default());
        }
        if messages.len() > MAX_BULK_EMAILS {
            return Err(DeliveryError::Permanent(format!(
                "bulk email limited to {MAX_BULK_EMAILS} messages, got {}",
                messages.len()
            )));
        }
        let request = self
            .client
            .post(format!("{}/send-bulk-email", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&BulkRequest { emails: messages });
        let response: BulkResponse = http::decode(http::send(request).await?).await?;
        if !response.success {
            return Err(DeliveryError::Permanent(
                response.error.unwrap_or_else(|| "bulk email rejected".to_string()),
            ));
        }
        let summary = response.data.unwrap_or(BulkSummary {
            total: messages.len() as u64,
            successful: messages.len() as u64,
            failed: 0,
        });
        info!(total = summary.total, successful = summary.successful, failed = summary.failed, "Bulk email sent");
        Ok(summary)
    }
}

#[async_trait]
impl ChannelDriver for EmailDriver {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn send(
        &self,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let message = self.prepare(user_id, payload).await?;
        let receipt = http::with_retries("email", self.retries, self.retry_delay, || {
            self.post_single(&message)
        })
        .await?;
        debug!(
            user_id,
            notification_id = %payload.notification_id,
            message_id = %receipt.external_message_id,
            "Email accepted by gateway"
        );
        Ok(receipt)
    }
}
