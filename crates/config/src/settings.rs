use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub notifications: NotificationSettings,
    pub websocket: WebsocketSettings,
    pub email: EmailSettings,
    pub push: PushSettings,
    pub sms: SmsSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSettings {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub name: String,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    pub default_ttl_secs: u64,
    pub max_per_user: u64,
    pub batch_size: usize,
    pub enable_push: bool,
    pub enable_email: bool,
    pub enable_sms: bool,
    pub enable_websocket: bool,
    pub enable_in_app: bool,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub preference_cache_ttl_secs: u64,
    pub global_quiet_hours: QuietHoursSettings,
    pub cleanup_schedule: String,
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuietHoursSettings {
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebsocketSettings {
    pub host: String,
    pub notify_endpoint: String,
    pub secret: String,
    pub timeout_ms: u64,
    pub retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailSettings {
    pub service_url: Option<String>,
    pub api_key: String,
    pub timeout_ms: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PushSettings {
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmsSettings {
    pub enabled: bool,
    pub gateway_url: Option<String>,
    pub api_key: String,
    pub timeout_ms: u64,
}

impl Settings {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::default()
                    .separator("__")
                    .prefix("COURIER"),
            )
            .set_default("app.name", "Courier")?
            .set_default("app.url", "http://localhost:3000")?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.name", "courier")?
            .set_default("notifications.default_ttl_secs", 2_592_000)?
            .set_default("notifications.max_per_user", 1000)?
            .set_default("notifications.batch_size", 100)?
            .set_default("notifications.enable_push", true)?
            .set_default("notifications.enable_email", true)?
            .set_default("notifications.enable_sms", false)?
            .set_default("notifications.enable_websocket", true)?
            .set_default("notifications.enable_in_app", true)?
            .set_default("notifications.max_retry_attempts", 3)?
            .set_default("notifications.retry_delay_ms", 1000)?
            .set_default("notifications.retry_max_delay_ms", 300_000)?
            .set_default("notifications.preference_cache_ttl_secs", 3600)?
            .set_default("notifications.global_quiet_hours.enabled", false)?
            .set_default("notifications.global_quiet_hours.start_time", "22:00")?
            .set_default("notifications.global_quiet_hours.end_time", "08:00")?
            .set_default("notifications.global_quiet_hours.timezone", "UTC")?
            .set_default("notifications.cleanup_schedule", "0 0 3 * * *")?
            .set_default("notifications.shutdown_grace_secs", 30)?
            .set_default("websocket.host", "http://localhost:3001")?
            .set_default("websocket.notify_endpoint", "/api/notify")?
            .set_default("websocket.secret", "")?
            .set_default("websocket.timeout_ms", 5000)?
            .set_default("websocket.retries", 3)?
            .set_default("email.service_url", None::<String>)?
            .set_default("email.api_key", "")?
            .set_default("email.timeout_ms", 10_000)?
            .set_default("email.retries", 0)?
            .set_default("email.retry_delay_ms", 1000)?
            .set_default("push.timeout_ms", 10_000)?
            .set_default("sms.enabled", false)?
            .set_default("sms.gateway_url", None::<String>)?
            .set_default("sms.api_key", "")?
            .set_default("sms.timeout_ms", 3000)?
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.notifications = settings.notifications.normalized();
        Ok(settings)
    }
}

impl NotificationSettings {
    pub const MIN_BATCH_SIZE: usize = 10;
    pub const MAX_BATCH_SIZE: usize = 1000;
    pub const MIN_RETRY_ATTEMPTS: u32 = 1;
    pub const MAX_RETRY_ATTEMPTS: u32 = 10;

    /// Clamps the bounded knobs into their accepted ranges.
    pub fn normalized(mut self) -> Self {
        self.batch_size = self
            .batch_size
            .clamp(Self::MIN_BATCH_SIZE, Self::MAX_BATCH_SIZE);
        self.max_retry_attempts = self
            .max_retry_attempts
            .clamp(Self::MIN_RETRY_ATTEMPTS, Self::MAX_RETRY_ATTEMPTS);
        self.retry_delay_ms = self.retry_delay_ms.max(1);
        self.retry_max_delay_ms = self.retry_max_delay_ms.max(self.retry_delay_ms);
        self.max_per_user = self.max_per_user.max(1);
        self
    }
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 2_592_000,
            max_per_user: 1000,
            batch_size: 100,
            enable_push: true,
            enable_email: true,
            enable_sms: false,
            enable_websocket: true,
            enable_in_app: true,
            max_retry_attempts: 3,
            retry_delay_ms: 1000,
            retry_max_delay_ms: 300_000,
            preference_cache_ttl_secs: 3600,
            global_quiet_hours: QuietHoursSettings::default(),
            cleanup_schedule: "0 0 3 * * *".to_string(),
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for QuietHoursSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: "22:00".to_string(),
            end_time: "08:00".to_string(),
            timezone: "UTC".to_string(),
        }
    }
}
