use chrono::{DateTime, Utc};
use courier_db::models::{Channel, Grouping, NotificationType, Priority};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

/// One logical notification as submitted by a front-end.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NotificationIntake {
    #[validate(length(min = 1, max = 128))]
    pub notification_id: Option<String>,
    #[validate(length(min = 1, max = 128))]
    pub user_id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 1000))]
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub channels: IntakeChannels,
    pub scheduling: Option<Scheduling>,
    pub grouping: Option<Grouping>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A channel toggle in either of the accepted shapes: `true` or
/// `{ "enabled": true }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelRequest {
    Flag(bool),
    Settings { enabled: bool },
}

impl ChannelRequest {
    pub fn enabled(&self) -> bool {
        match self {
            ChannelRequest::Flag(enabled) | ChannelRequest::Settings { enabled } => *enabled,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeChannels {
    pub push: Option<ChannelRequest>,
    pub email: Option<ChannelRequest>,
    pub sms: Option<ChannelRequest>,
    pub realtime: Option<ChannelRequest>,
    #[serde(alias = "in_app")]
    pub in_app: Option<ChannelRequest>,
}

impl IntakeChannels {
    /// The caller's explicit choice for `channel`, if any.
    pub fn explicit(&self, channel: Channel) -> Option<bool> {
        let request = match channel {
            Channel::Push => self.push,
            Channel::Email => self.email,
            Channel::Sms => self.sms,
            Channel::Realtime => self.realtime,
            Channel::InApp => self.in_app,
        };
        request.map(|r| r.enabled())
    }

    pub fn set(&mut self, channel: Channel, enabled: bool) {
        let slot = match channel {
            Channel::Push => &mut self.push,
            Channel::Email => &mut self.email,
            Channel::Sms => &mut self.sms,
            Channel::Realtime => &mut self.realtime,
            Channel::InApp => &mut self.in_app,
        };
        *slot = Some(ChannelRequest::Flag(enabled));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scheduling {
    #[serde(default = "bool_true")]
    pub immediate: bool,
    pub scheduled_for: Option<DateTime<Utc>>,
}

impl NotificationIntake {
    pub fn new(
        user_id: impl Into<String>,
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            notification_id: None,
            user_id: user_id.into(),
            title: title.into(),
            message: message.into(),
            notification_type,
            priority: Priority::default(),
            metadata: Map::new(),
            channels: IntakeChannels::default(),
            scheduling: None,
            grouping: None,
            expires_at: None,
        }
    }

    /// The deferred send instant, when the intake asks for one in the future.
    pub fn deferred_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let scheduling = self.scheduling.as_ref()?;
        if scheduling.immediate {
            return None;
        }
        scheduling.scheduled_for.filter(|at| *at > now)
    }
}

fn bool_true() -> bool {
    true
}
