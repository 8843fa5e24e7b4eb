//! Channel drivers behind one send contract.

pub mod email;
pub(crate) mod http;
pub mod in_app;
pub mod push;
pub mod realtime;
pub mod sms;
pub mod template;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use courier_config::Settings;
use courier_db::models::Channel;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::ContactBook;

pub use email::EmailDriver;
pub use in_app::InAppDriver;
pub use push::PushDriver;
pub use realtime::RealtimeDriver;
pub use sms::SmsDriver;
pub use template::{RenderedPayload, TemplateRenderer};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            DeliveryError::Transient(msg) | DeliveryError::Permanent(msg) => msg,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Transient(_) => "transient",
            DeliveryError::Permanent(_) => "permanent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub external_message_id: String,
    pub provider: Option<String>,
}

impl DeliveryReceipt {
    pub fn new(external_message_id: impl Into<String>) -> Self {
        Self {
            external_message_id: external_message_id.into(),
            provider: None,
        }
    }
}

#[async_trait]
pub trait ChannelDriver: Send + Sync {
    fn channel(&self) -> Channel;

    /// Budget for one `send`, enforced by the caller.
    fn timeout(&self) -> Duration;

    async fn send(
        &self,
        user_id: &str,
        payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

#[derive(Default, Clone)]
pub struct DriverRegistry {
    drivers: BTreeMap<Channel, Arc<dyn ChannelDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any driver already registered for the same channel.
    pub fn register(&mut self, driver: Arc<dyn ChannelDriver>) {
        self.drivers.insert(driver.channel(), driver);
    }

    pub fn with(mut self, driver: Arc<dyn ChannelDriver>) -> Self {
        self.register(driver);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<&Arc<dyn ChannelDriver>> {
        self.drivers.get(&channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.drivers.contains_key(&channel)
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.drivers.keys().copied()
    }

    /// The production driver set. Email needs a gateway URL and SMS needs to
    /// be enabled with a gateway; missing ones are simply not registered.
    pub fn from_settings(
        settings: &Settings,
        contacts: Arc<dyn ContactBook>,
    ) -> Result<Self, reqwest::Error> {
        let mut registry = Self::new()
            .with(Arc::new(InAppDriver))
            .with(Arc::new(PushDriver::new(Duration::from_millis(
                settings.push.timeout_ms,
            ))))
            .with(Arc::new(RealtimeDriver::new(&settings.websocket)?));

        match settings.email.service_url.as_deref() {
            Some(url) if !url.is_empty() => {
                registry.register(Arc::new(EmailDriver::new(url, &settings.email, contacts.clone())?));
            }
            _ => warn!("email.service_url not set, email channel disabled"),
        }

        if settings.sms.enabled {
            match settings.sms.gateway_url.as_deref() {
                Some(url) if !url.is_empty() => {
                    registry.register(Arc::new(SmsDriver::new(url, &settings.sms, contacts)?));
                }
                _ => warn!("sms.enabled is set without sms.gateway_url, sms channel disabled"),
            }
        }

        info!(channels = ?registry.channels().collect::<Vec<_>>(), "Channel drivers registered");
        Ok(registry)
    }
}
