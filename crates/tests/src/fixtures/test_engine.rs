use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_config::NotificationSettings;
use courier_db::models::{Channel, NotificationType, UserContact};
use courier_services::drivers::{
    ChannelDriver, DeliveryError, DeliveryReceipt, DriverRegistry, InAppDriver, RenderedPayload,
    TemplateRenderer,
};
use courier_services::{
    MemoryContacts, MemoryPreferences, MemoryStore, NotificationEngine, NotificationIntake,
    NotificationStore,
};
use prometheus::Registry;

/// Driver that answers from a queue of results, then succeeds.
pub struct ScriptedDriver {
    channel: Channel,
    script: Mutex<VecDeque<Result<DeliveryReceipt, DeliveryError>>>,
    calls: AtomicUsize,
    recipients: Mutex<Vec<String>>,
}

impl ScriptedDriver {
    pub fn ok(channel: Channel) -> Arc<Self> {
        Self::scripted(channel, Vec::new())
    }

    pub fn scripted(
        channel: Channel,
        results: Vec<Result<DeliveryReceipt, DeliveryError>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            channel,
            script: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
            recipients: Mutex::new(Vec::new()),
        })
    }

    /// Fails transiently on every call.
    pub fn flaky(channel: Channel) -> Arc<Self> {
        let failures = (0..32)
            .map(|_| Err(DeliveryError::Transient("gateway unavailable".to_string())))
            .collect();
        Self::scripted(channel, failures)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recipients(&self) -> Vec<String> {
        self.recipients.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelDriver for ScriptedDriver {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(2)
    }

    async fn send(
        &self,
        user_id: &str,
        _payload: &RenderedPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.recipients.lock().unwrap().push(user_id.to_string());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(DeliveryReceipt::new(format!("{}-{n}", self.channel))))
    }
}

pub fn transient(msg: &str) -> Result<DeliveryReceipt, DeliveryError> {
    Err(DeliveryError::Transient(msg.to_string()))
}

pub fn permanent(msg: &str) -> Result<DeliveryReceipt, DeliveryError> {
    Err(DeliveryError::Permanent(msg.to_string()))
}

pub fn receipt(id: &str) -> Result<DeliveryReceipt, DeliveryError> {
    Ok(DeliveryReceipt::new(id))
}

/// Millisecond retry delays so retry paths finish quickly.
pub fn test_settings() -> NotificationSettings {
    NotificationSettings {
        retry_delay_ms: 1,
        retry_max_delay_ms: 5,
        batch_size: 10,
        ..Default::default()
    }
}

/// Registry holding only the in-app driver; chain `.with(..)` for more.
pub fn in_app_registry() -> DriverRegistry {
    DriverRegistry::new().with(Arc::new(InAppDriver))
}

/// An engine over the in-memory stores, with its own metric registry.
pub struct TestEngine {
    pub engine: NotificationEngine,
    pub store: Arc<MemoryStore>,
    pub preferences: Arc<MemoryPreferences>,
    pub registry: Registry,
}

impl TestEngine {
    pub fn spawn(drivers: DriverRegistry) -> Self {
        Self::spawn_with_settings(drivers, |_| {})
    }

    /// The `mutator` receives the test defaults before the engine is built.
    pub fn spawn_with_settings(
        drivers: DriverRegistry,
        mutator: impl FnOnce(&mut NotificationSettings),
    ) -> Self {
        Self::spawn_with_store(Arc::new(MemoryStore::new()), drivers, mutator)
    }

    pub fn spawn_with_store(
        store: Arc<MemoryStore>,
        drivers: DriverRegistry,
        mutator: impl FnOnce(&mut NotificationSettings),
    ) -> Self {
        let mut settings = test_settings();
        mutator(&mut settings);

        let preferences = Arc::new(MemoryPreferences::new());
        let registry = Registry::new();
        let dyn_store: Arc<dyn NotificationStore> = store.clone();

        let engine = NotificationEngine::new(
            settings,
            dyn_store,
            preferences.clone(),
            drivers,
            TemplateRenderer::new("Courier", "https://app.test"),
            &registry,
        )
        .expect("Failed to build engine");

        Self {
            engine,
            store,
            preferences,
            registry,
        }
    }

    /// Waits for every retry and scheduled send started so far.
    pub async fn settle(&self) {
        assert!(
            self.engine.drain(Duration::from_secs(10)).await,
            "background work did not finish"
        );
    }
}

/// Contact book with one entry.
pub fn contacts_with(user_id: &str, email: Option<&str>, phone: Option<&str>) -> Arc<MemoryContacts> {
    let contacts = Arc::new(MemoryContacts::new());
    contacts.insert(UserContact {
        user_id: user_id.to_string(),
        email: email.map(str::to_string),
        phone: phone.map(str::to_string),
        ..Default::default()
    });
    contacts
}

/// Intake with only the in-app channel switched on.
pub fn in_app_only(user_id: &str, notification_type: NotificationType) -> NotificationIntake {
    let mut intake = NotificationIntake::new(user_id, notification_type, "Hello", "World");
    for channel in Channel::ALL {
        intake.channels.set(channel, channel == Channel::InApp);
    }
    intake
}

/// Intake with exactly `channels` switched on.
pub fn with_channels(
    user_id: &str,
    notification_type: NotificationType,
    channels: &[Channel],
) -> NotificationIntake {
    let mut intake = NotificationIntake::new(user_id, notification_type, "Hello", "World");
    for channel in Channel::ALL {
        intake.channels.set(channel, channels.contains(&channel));
    }
    intake
}
