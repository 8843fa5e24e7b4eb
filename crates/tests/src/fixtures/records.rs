use bson::DateTime;
use courier_db::models::{Notification, NotificationType};

/// A stored notification with fixed timestamps, for seeding stores directly.
pub fn record(id: &str, user_id: &str, created_ms: i64) -> Notification {
    let at = DateTime::from_millis(created_ms);
    Notification {
        notification_id: id.to_string(),
        user_id: user_id.to_string(),
        title: format!("Title {id}"),
        message: format!("Message {id}"),
        notification_type: NotificationType::Message,
        priority: Default::default(),
        status: Default::default(),
        read_status: false,
        read_at: None,
        delivered_at: None,
        metadata: Default::default(),
        channels: Default::default(),
        analytics: Default::default(),
        grouping: None,
        expires_at: None,
        created_at: at,
        updated_at: at,
    }
}

pub fn minutes_from_now(minutes: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() + minutes * 60_000)
}

pub fn days_ago(days: i64) -> DateTime {
    DateTime::from_millis(DateTime::now().timestamp_millis() - days * 86_400_000)
}
