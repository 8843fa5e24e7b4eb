use bson::DateTime;
use serde::{Deserialize, Serialize};

use super::notification::{Channel, NotificationType};

/// Per-user delivery preferences, owned by the settings store. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserPreferences {
    #[serde(rename = "_id")]
    pub user_id: String,
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub channels: ChannelPreferences,
    pub quiet_hours: Option<QuietHours>,
    #[serde(default)]
    pub global: GlobalOptIns,
    pub updated_at: Option<DateTime>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelPreferences {
    pub push: Option<ChannelPreference>,
    pub email: Option<ChannelPreference>,
    pub sms: Option<ChannelPreference>,
    pub realtime: Option<ChannelPreference>,
    pub in_app: Option<ChannelPreference>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelPreference {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Allow-list of types; empty allows every type.
    #[serde(default)]
    pub types: Vec<NotificationType>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuietHours {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalOptIns {
    /// Master switch for every external channel.
    #[serde(default = "bool_true")]
    pub notifications: bool,
}

impl Default for GlobalOptIns {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

impl UserPreferences {
    pub const COLLECTION: &'static str = "user_preferences";
}

impl ChannelPreferences {
    pub fn get(&self, channel: Channel) -> Option<&ChannelPreference> {
        match channel {
            Channel::Push => self.push.as_ref(),
            Channel::Email => self.email.as_ref(),
            Channel::Sms => self.sms.as_ref(),
            Channel::Realtime => self.realtime.as_ref(),
            Channel::InApp => self.in_app.as_ref(),
        }
    }
}

impl ChannelPreference {
    pub fn allows(&self, notification_type: NotificationType) -> bool {
        self.enabled && (self.types.is_empty() || self.types.contains(&notification_type))
    }
}

fn bool_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}
