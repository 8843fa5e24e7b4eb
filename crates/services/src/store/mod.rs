//! Storage seams of the dispatch engine.
//!
//! [`NotificationStore`] owns every notification record; all other components
//! go through it. Each mutating method is a single atomic operation against
//! one record (or a single bulk statement), never a read-modify-write at the
//! caller. [`PreferenceSource`] and [`ContactBook`] are read-only views of
//! collections owned elsewhere.

pub mod memory;

use async_trait::async_trait;
use bson::DateTime;
use courier_db::models::{
    Channel, Interaction, Notification, NotificationStatus, NotificationType, Priority,
    UserContact, UserPreferences,
};
use serde::{Deserialize, Serialize};

use crate::dao::base::{DaoResult, Page, PageParams};

pub use memory::{MemoryContacts, MemoryPreferences, MemoryStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub notification_type: Option<NotificationType>,
    pub read_status: Option<bool>,
    pub status: Option<NotificationStatus>,
    pub priority: Option<Priority>,
    pub created_after: Option<DateTime>,
    pub created_before: Option<DateTime>,
}

impl NotificationFilter {
    pub fn matches(&self, record: &Notification) -> bool {
        self.notification_type
            .is_none_or(|t| record.notification_type == t)
            && self.read_status.is_none_or(|r| record.read_status == r)
            && self.status.is_none_or(|s| record.status == s)
            && self.priority.is_none_or(|p| record.priority == p)
            && self.created_after.is_none_or(|t| record.created_at >= t)
            && self.created_before.is_none_or(|t| record.created_at < t)
    }
}

/// Fields written into one `channels.<name>` sub-record. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelPatch {
    pub sent: Option<bool>,
    pub sent_at: Option<DateTime>,
    pub external_message_id: Option<String>,
    pub error: Option<Option<String>>,
    pub attempts: Option<u32>,
    pub terminal: Option<bool>,
}

impl ChannelPatch {
    pub fn success(sent_at: DateTime, external_message_id: String, attempts: u32) -> Self {
        Self {
            sent: Some(true),
            sent_at: Some(sent_at),
            external_message_id: Some(external_message_id),
            error: Some(None),
            attempts: Some(attempts),
            terminal: Some(false),
        }
    }

    pub fn failure(error: impl Into<String>, attempts: u32, terminal: bool) -> Self {
        Self {
            error: Some(Some(error.into())),
            attempts: Some(attempts),
            terminal: Some(terminal),
            ..Default::default()
        }
    }

    /// Clears terminal state before an admin resend.
    pub fn rearm() -> Self {
        Self {
            error: Some(None),
            attempts: Some(0),
            terminal: Some(false),
            ..Default::default()
        }
    }

    pub fn marks_sent(&self) -> bool {
        self.sent == Some(true)
    }
}

/// Status written once a delivery round is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSettlement {
    /// At least one channel succeeded; promotes `pending|failed` to `sent`.
    Sent { at: DateTime },
    /// Every channel failed its first attempt; only `pending` moves.
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct TypeGroup {
    pub notification_type: NotificationType,
    pub count: u64,
    pub unread_count: u64,
    pub latest: Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Hour,
    Day,
    Week,
    Month,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Hour => "hour",
            Bucket::Day => "day",
            Bucket::Week => "week",
            Bucket::Month => "month",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: DateTime,
    pub to: DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsBucket {
    pub bucket_start: DateTime,
    pub count: u64,
    pub read: u64,
    pub unread: u64,
    pub impressions: u64,
    pub clicks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCount {
    pub user_id: String,
    pub count: u64,
}

/// Selection for the filter-based cleanup.
#[derive(Debug, Clone)]
pub struct CleanupFilter {
    pub created_before: DateTime,
    pub keep_read: bool,
    pub user_id: Option<String>,
}

impl CleanupFilter {
    pub fn matches(&self, record: &Notification) -> bool {
        record.created_at < self.created_before
            && !(self.keep_read && record.read_status)
            && self
                .user_id
                .as_deref()
                .is_none_or(|user_id| record.user_id == user_id)
    }
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Fails with `DuplicateKey` when the notification id is taken.
    async fn create(&self, record: &Notification) -> DaoResult<()>;

    async fn exists(&self, notification_id: &str) -> DaoResult<bool>;

    async fn get(&self, user_id: &str, notification_id: &str) -> DaoResult<Notification>;

    async fn find_by_id(&self, notification_id: &str) -> DaoResult<Notification>;

    /// Newest first.
    async fn list(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
        page: &PageParams,
    ) -> DaoResult<Page<Notification>>;

    async fn count_for_user(&self, user_id: &str) -> DaoResult<u64>;

    async fn count_unread(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64>;

    /// Ids of the user's oldest records by `created_at`, oldest first.
    async fn oldest_ids(&self, user_id: &str, limit: u64) -> DaoResult<Vec<String>>;

    async fn delete_ids(&self, user_id: &str, notification_ids: &[String]) -> DaoResult<u64>;

    /// Users holding more than `max` records.
    async fn users_over(&self, max: u64) -> DaoResult<Vec<UserCount>>;

    /// Marking read is a no-op when already read. Returns the stored state
    /// and whether this call changed it.
    async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> DaoResult<(Notification, bool)>;

    async fn mark_all_read(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64>;

    async fn acknowledge_delivery(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> DaoResult<Notification>;

    /// Returns `false` when the record no longer exists.
    async fn update_channel(
        &self,
        notification_id: &str,
        channel: Channel,
        patch: &ChannelPatch,
    ) -> DaoResult<bool>;

    async fn increment_attempt(
        &self,
        notification_id: &str,
        error: Option<&str>,
    ) -> DaoResult<bool>;

    async fn settle_status(
        &self,
        notification_id: &str,
        settlement: StatusSettlement,
    ) -> DaoResult<bool>;

    async fn record_interaction(
        &self,
        user_id: &str,
        notification_id: &str,
        interaction: &Interaction,
    ) -> DaoResult<Notification>;

    async fn delete(&self, user_id: &str, notification_id: &str) -> DaoResult<bool>;

    async fn delete_expired(&self, now: DateTime) -> DaoResult<u64>;

    /// Counts instead of deleting when `dry_run` is set.
    async fn cleanup(&self, filter: &CleanupFilter, dry_run: bool) -> DaoResult<u64>;

    /// Sorted by the latest record's `created_at`, newest first.
    async fn group_by_type(
        &self,
        user_id: &str,
        include_read: bool,
        limit: usize,
    ) -> DaoResult<Vec<TypeGroup>>;

    /// Buckets ascending by start.
    async fn aggregate(
        &self,
        user_id: &str,
        window: TimeWindow,
        bucket: Bucket,
    ) -> DaoResult<Vec<AnalyticsBucket>>;
}

#[async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn fetch(&self, user_id: &str) -> DaoResult<Option<UserPreferences>>;
}

#[async_trait]
pub trait ContactBook: Send + Sync {
    async fn lookup(&self, user_id: &str) -> DaoResult<Option<UserContact>>;
}
