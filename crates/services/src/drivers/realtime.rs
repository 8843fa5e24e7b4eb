use std::time::Duration;

use async_trait::async_trait;
use courier_config::WebsocketSettings;
use courier_db::models::Channel;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{ChannelDriver, DeliveryError, DeliveryReceipt, RenderedPayload, http};

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeEnvelope<'a> {
    user_id: &'a str,
    notification: &'a RenderedPayload,
    event: &'static str,
    channel: String,
}

/// Pushes notifications to connected clients through the socket server's
/// notify endpoint.
pub struct RealtimeDriver {
    client: reqwest::Client,
    url: String,
    secret: String,
    request_timeout: Duration,
    retries: u32,
    retry_delay: Duration,
}

impl RealtimeDriver {
    pub fn new(settings: &WebsocketSettings) -> Result<Self, reqwest::Error> {
        let request_timeout = Duration::from_millis(settings.timeout_ms);
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            client,
            url: format!(
                "{}{}",
                settings.host.trim_end_matches('/'),
                settings.notify_endpoint
            ),
            secret: settings.secret.clone(),
            request_timeout,
            retries: settings.retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn post(&self, envelope: &RealtimeEnvelope<'_>) -> Result<(), DeliveryError> {
        let mut request = self.client.post(&self.url).json(envelope);
        if !self.secret.is_empty() {
            request = request.bearer_auth(&self.secret);
        }
        http::send(request).await.map(|_| ())
    }
}

#[async_trait]
impl ChannelDriver for RealtimeDriver {
    fn channel(&self) -> Channel {
        Channel::Realtime
    }

    /// The channel budget is one request timeout; in-driver retries only run
    /// while it lasts.
    fn timeout(&self) -> Duration {
        self.request_timeout
    }

    async fn send(
        &self,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let envelope = RealtimeEnvelope {
            user_id,
            notification: payload,
            event: "notification",
            channel: format!("user:{user_id}"),
        };
        http::with_retries("realtime", self.retries, self.retry_delay, || {
            self.post(&envelope)
        })
        .await?;

        debug!(user_id, notification_id = %payload.notification_id, "Realtime notification accepted");
        Ok(DeliveryReceipt::new(format!("realtime-{}", Uuid::new_v4())))
    }
}
