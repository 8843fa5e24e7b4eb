use std::fmt;

use bson::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One durable notification. `_id` is the stable notification id assigned at
/// intake, so a duplicate insert is rejected by the primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    #[serde(rename = "_id")]
    pub notification_id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: NotificationStatus,
    #[serde(default)]
    pub read_status: bool,
    pub read_at: Option<DateTime>,
    pub delivered_at: Option<DateTime>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub channels: ChannelStates,
    #[serde(default)]
    pub analytics: Analytics,
    pub grouping: Option<Grouping>,
    pub expires_at: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Match,
    Like,
    Message,
    System,
    Payment,
    Security,
    DateRequest,
    DateAccepted,
    DateDeclined,
    DateCanceled,
    DateReminder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[default]
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Delivery surface. Ordered so per-channel maps iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
    Sms,
    Realtime,
    #[serde(rename = "inApp", alias = "in_app")]
    InApp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelStates {
    #[serde(default)]
    pub push: ChannelState,
    #[serde(default)]
    pub email: ChannelState,
    #[serde(default)]
    pub sms: ChannelState,
    #[serde(default)]
    pub realtime: ChannelState,
    #[serde(default)]
    pub in_app: ChannelState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChannelState {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sent: bool,
    pub sent_at: Option<DateTime>,
    pub external_message_id: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub attempts: u32,
    /// Set once the channel can no longer succeed without an admin resend.
    #[serde(default)]
    pub terminal: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Analytics {
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub delivery_attempts: u32,
    pub last_delivery_attempt: Option<DateTime>,
    pub last_error: Option<String>,
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    #[serde(rename = "type")]
    pub kind: InteractionKind,
    pub at: DateTime,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    Read,
    Impression,
    Click,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Grouping {
    #[serde(alias = "groupId")]
    pub group_id: Option<String>,
    #[serde(alias = "batchId")]
    pub batch_id: Option<String>,
    #[serde(alias = "campaignId")]
    pub campaign_id: Option<String>,
}

impl Notification {
    pub const COLLECTION: &'static str = "notifications";

    pub fn is_expired_at(&self, now: DateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

impl NotificationType {
    pub const ALL: [NotificationType; 11] = [
        NotificationType::Match,
        NotificationType::Like,
        NotificationType::Message,
        NotificationType::System,
        NotificationType::Payment,
        NotificationType::Security,
        NotificationType::DateRequest,
        NotificationType::DateAccepted,
        NotificationType::DateDeclined,
        NotificationType::DateCanceled,
        NotificationType::DateReminder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Match => "match",
            NotificationType::Like => "like",
            NotificationType::Message => "message",
            NotificationType::System => "system",
            NotificationType::Payment => "payment",
            NotificationType::Security => "security",
            NotificationType::DateRequest => "date_request",
            NotificationType::DateAccepted => "date_accepted",
            NotificationType::DateDeclined => "date_declined",
            NotificationType::DateCanceled => "date_canceled",
            NotificationType::DateReminder => "date_reminder",
        }
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Delivered => "delivered",
            NotificationStatus::Read => "read",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Read => "read",
            InteractionKind::Impression => "impression",
            InteractionKind::Click => "click",
        }
    }
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Push,
        Channel::Email,
        Channel::Sms,
        Channel::Realtime,
        Channel::InApp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Push => "push",
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Realtime => "realtime",
            Channel::InApp => "in_app",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ChannelStates {
    pub fn get(&self, channel: Channel) -> &ChannelState {
        match channel {
            Channel::Push => &self.push,
            Channel::Email => &self.email,
            Channel::Sms => &self.sms,
            Channel::Realtime => &self.realtime,
            Channel::InApp => &self.in_app,
        }
    }

    pub fn get_mut(&mut self, channel: Channel) -> &mut ChannelState {
        match channel {
            Channel::Push => &mut self.push,
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
            Channel::Realtime => &mut self.realtime,
            Channel::InApp => &mut self.in_app,
        }
    }

    pub fn any_sent(&self) -> bool {
        Channel::ALL.iter().any(|c| self.get(*c).sent)
    }
}
