//! Effective channel resolution for one intake.
//!
//! Precedence, highest first: the intake's explicit toggle, the user's
//! per-channel preference (enabled and type allowed), the global default.
//! Quiet hours then suppress implicitly enabled push and SMS unless the
//! notification is urgent.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use courier_config::NotificationSettings;
use courier_db::models::{Channel, Priority, UserPreferences};
use moka::future::Cache;
use serde::Serialize;
use tracing::{debug, warn};

use crate::dao::base::DaoResult;
use crate::intake::NotificationIntake;
use crate::metrics::NotificationMetrics;
use crate::store::PreferenceSource;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedChannels {
    pub enabled: BTreeSet<Channel>,
    pub quiet_hours_suppressed: BTreeSet<Channel>,
}

impl ResolvedChannels {
    pub fn contains(&self, channel: Channel) -> bool {
        self.enabled.contains(&channel)
    }
}

/// Quiet-hours window in a named timezone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuietWindow {
    pub start_time: String,
    pub end_time: String,
    pub timezone: String,
}

impl QuietWindow {
    /// Inclusive on both ends; a window whose end precedes its start wraps
    /// past midnight. Unparseable windows never match.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let (Ok(start), Ok(end)) = (
            NaiveTime::parse_from_str(&self.start_time, "%H:%M"),
            NaiveTime::parse_from_str(&self.end_time, "%H:%M"),
        ) else {
            warn!(start = %self.start_time, end = %self.end_time, "Invalid quiet hours window");
            return false;
        };
        let tz: Tz = self.timezone.parse().unwrap_or_else(|_| {
            warn!(timezone = %self.timezone, "Unknown quiet hours timezone, using UTC");
            Tz::UTC
        });
        let local = now.with_timezone(&tz).time();

        if start <= end {
            local >= start && local <= end
        } else {
            local >= start || local <= end
        }
    }
}

fn global_default(settings: &NotificationSettings, channel: Channel) -> bool {
    match channel {
        Channel::Push => settings.enable_push,
        Channel::Email => settings.enable_email,
        Channel::Sms => settings.enable_sms,
        Channel::Realtime => settings.enable_websocket,
        Channel::InApp => settings.enable_in_app,
    }
}

fn quiet_window(
    preferences: Option<&UserPreferences>,
    settings: &NotificationSettings,
) -> Option<QuietWindow> {
    if let Some(quiet) = preferences.and_then(|p| p.quiet_hours.as_ref()) {
        return quiet.enabled.then(|| QuietWindow {
            start_time: quiet.start_time.clone(),
            end_time: quiet.end_time.clone(),
            timezone: quiet.timezone.clone(),
        });
    }
    let global = &settings.global_quiet_hours;
    global.enabled.then(|| QuietWindow {
        start_time: global.start_time.clone(),
        end_time: global.end_time.clone(),
        timezone: global.timezone.clone(),
    })
}

/// Pure resolution; `preferences` is `None` when the user has none stored or
/// they could not be fetched.
pub fn resolve_channels(
    intake: &NotificationIntake,
    preferences: Option<&UserPreferences>,
    settings: &NotificationSettings,
    now: DateTime<Utc>,
) -> ResolvedChannels {
    let opted_in = preferences.is_none_or(|p| p.global.notifications);
    let quiet = quiet_window(preferences, settings)
        .filter(|_| intake.priority != Priority::Urgent)
        .is_some_and(|window| window.contains(now));

    let mut resolved = ResolvedChannels::default();
    for channel in Channel::ALL {
        if let Some(explicit) = intake.channels.explicit(channel) {
            if explicit {
                resolved.enabled.insert(channel);
            }
            continue;
        }

        let external = channel != Channel::InApp;
        let implicit = match preferences.and_then(|p| p.channels.get(channel)) {
            Some(pref) => pref.allows(intake.notification_type),
            None => global_default(settings, channel),
        };
        if !implicit || (external && !opted_in) {
            continue;
        }

        if quiet && matches!(channel, Channel::Push | Channel::Sms) {
            resolved.quiet_hours_suppressed.insert(channel);
            continue;
        }
        resolved.enabled.insert(channel);
    }
    resolved
}

pub struct PreferenceResolver {
    source: Arc<dyn PreferenceSource>,
    cache: Cache<String, Option<Arc<UserPreferences>>>,
    settings: Arc<NotificationSettings>,
    metrics: Arc<NotificationMetrics>,
}

impl PreferenceResolver {
    pub fn new(
        source: Arc<dyn PreferenceSource>,
        settings: Arc<NotificationSettings>,
        metrics: Arc<NotificationMetrics>,
    ) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(settings.preference_cache_ttl_secs))
            .max_capacity(100_000)
            .build();
        Self {
            source,
            cache,
            settings,
            metrics,
        }
    }

    /// Cached read-through of the user's preferences.
    pub async fn preferences(&self, user_id: &str) -> DaoResult<Option<Arc<UserPreferences>>> {
        if let Some(cached) = self.cache.get(user_id).await {
            return Ok(cached);
        }
        let fetched = self.source.fetch(user_id).await?.map(Arc::new);
        self.cache.insert(user_id.to_string(), fetched.clone()).await;
        Ok(fetched)
    }

    /// Drops the cached entry after the settings store updated it.
    pub async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
        debug!(user_id, "Preference cache invalidated");
    }

    pub async fn resolve(&self, intake: &NotificationIntake) -> ResolvedChannels {
        self.resolve_at(intake, Utc::now()).await
    }

    /// Never fails: a preference fetch error falls back to global defaults.
    pub async fn resolve_at(&self, intake: &NotificationIntake, now: DateTime<Utc>) -> ResolvedChannels {
        let preferences = match self.preferences(&intake.user_id).await {
            Ok(preferences) => preferences,
            Err(e) => {
                warn!(user_id = %intake.user_id, error = %e, "Preference fetch failed, using defaults");
                self.metrics.record_error("preferences");
                None
            }
        };
        resolve_channels(intake, preferences.as_deref(), &self.settings, now)
    }
}
