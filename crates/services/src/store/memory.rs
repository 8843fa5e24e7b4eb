//! In-process implementations of the storage seams.
//!
//! Records live in a [`DashMap`]; every mutation runs under the record's
//! entry lock, which gives the same per-record atomicity the MongoDB store
//! gets from single-document updates.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::DateTime;
use chrono::{Datelike, Duration as ChronoDuration, Timelike};
use courier_db::models::{
    Channel, Interaction, InteractionKind, Notification, NotificationStatus, NotificationType,
    UserContact, UserPreferences,
};
use dashmap::{DashMap, mapref::entry::Entry};

use super::{
    AnalyticsBucket, Bucket, ChannelPatch, CleanupFilter, ContactBook, NotificationFilter,
    NotificationStore, PreferenceSource, StatusSettlement, TimeWindow, TypeGroup, UserCount,
};
use crate::dao::base::{DaoError, DaoResult, Page, PageParams};

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, Notification>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn snapshot<F>(&self, predicate: F) -> Vec<Notification>
    where
        F: Fn(&Notification) -> bool,
    {
        self.records
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.value().clone())
            .collect()
    }

    fn with_owned<R>(
        &self,
        user_id: &str,
        notification_id: &str,
        f: impl FnOnce(&mut Notification) -> R,
    ) -> DaoResult<R> {
        match self.records.get_mut(notification_id) {
            Some(mut record) if record.user_id == user_id => Ok(f(record.value_mut())),
            _ => Err(DaoError::NotFound),
        }
    }
}

fn newest_first(records: &mut [Notification]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.notification_id.cmp(&a.notification_id))
    });
}

fn apply_read(record: &mut Notification, now: DateTime) -> bool {
    if record.read_status {
        return false;
    }
    record.read_status = true;
    record.read_at = Some(now);
    record.status = NotificationStatus::Read;
    record.analytics.impressions += 1;
    record.analytics.interactions.push(Interaction {
        kind: InteractionKind::Read,
        at: now,
        metadata: None,
    });
    record.updated_at = now;
    true
}

fn apply_patch(record: &mut Notification, channel: Channel, patch: &ChannelPatch, now: DateTime) {
    let state = record.channels.get_mut(channel);
    if let Some(sent) = patch.sent {
        state.sent = sent;
    }
    if let Some(sent_at) = patch.sent_at {
        state.sent_at = Some(sent_at);
    }
    if let Some(external_id) = &patch.external_message_id {
        state.external_message_id = Some(external_id.clone());
    }
    if let Some(error) = &patch.error {
        state.error = error.clone();
    }
    if let Some(attempts) = patch.attempts {
        state.attempts = attempts;
    }
    if let Some(terminal) = patch.terminal {
        state.terminal = terminal;
    }
    if patch.marks_sent() && record.delivered_at.is_none() {
        record.delivered_at = Some(patch.sent_at.unwrap_or(now));
    }
    record.updated_at = now;
}

/// Start of the bucket containing `at`, in UTC. Weeks start on Monday.
pub fn bucket_start(at: DateTime, bucket: Bucket) -> DateTime {
    let t = at.to_chrono();
    let date = t.date_naive();
    let start = match bucket {
        Bucket::Hour => date.and_hms_opt(t.hour(), 0, 0),
        Bucket::Day => date.and_hms_opt(0, 0, 0),
        Bucket::Week => (date
            - ChronoDuration::days(i64::from(t.weekday().num_days_from_monday())))
        .and_hms_opt(0, 0, 0),
        Bucket::Month => date.with_day(1).and_then(|d| d.and_hms_opt(0, 0, 0)),
    };
    start
        .map(|naive| DateTime::from_chrono(naive.and_utc()))
        .unwrap_or(at)
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(&self, record: &Notification) -> DaoResult<()> {
        match self.records.entry(record.notification_id.clone()) {
            Entry::Occupied(_) => Err(DaoError::DuplicateKey(format!(
                "notification {} already exists",
                record.notification_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn exists(&self, notification_id: &str) -> DaoResult<bool> {
        Ok(self.records.contains_key(notification_id))
    }

    async fn get(&self, user_id: &str, notification_id: &str) -> DaoResult<Notification> {
        match self.records.get(notification_id) {
            Some(record) if record.user_id == user_id => Ok(record.clone()),
            _ => Err(DaoError::NotFound),
        }
    }

    async fn find_by_id(&self, notification_id: &str) -> DaoResult<Notification> {
        self.records
            .get(notification_id)
            .map(|r| r.clone())
            .ok_or(DaoError::NotFound)
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
        page: &PageParams,
    ) -> DaoResult<Page<Notification>> {
        let page = page.clone().clamped();
        let mut matching = self.snapshot(|r| r.user_id == user_id && filter.matches(r));
        newest_first(&mut matching);
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect();
        Ok(Page {
            items,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn count_for_user(&self, user_id: &str) -> DaoResult<u64> {
        Ok(self.records.iter().filter(|r| r.user_id == user_id).count() as u64)
    }

    async fn count_unread(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                r.user_id == user_id
                    && !r.read_status
                    && notification_type.is_none_or(|t| r.notification_type == t)
            })
            .count() as u64)
    }

    async fn oldest_ids(&self, user_id: &str, limit: u64) -> DaoResult<Vec<String>> {
        let mut owned: Vec<(DateTime, String)> = self
            .records
            .iter()
            .filter(|r| r.user_id == user_id)
            .map(|r| (r.created_at, r.notification_id.clone()))
            .collect();
        owned.sort();
        Ok(owned
            .into_iter()
            .take(limit as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn delete_ids(&self, user_id: &str, notification_ids: &[String]) -> DaoResult<u64> {
        let removed = notification_ids
            .iter()
            .filter(|id| {
                self.records
                    .remove_if(id.as_str(), |_, r| r.user_id == user_id)
                    .is_some()
            })
            .count();
        Ok(removed as u64)
    }

    async fn users_over(&self, max: u64) -> DaoResult<Vec<UserCount>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.user_id.clone()).or_default() += 1;
        }
        let mut over: Vec<UserCount> = counts
            .into_iter()
            .filter(|(_, count)| *count > max)
            .map(|(user_id, count)| UserCount { user_id, count })
            .collect();
        over.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(over)
    }

    async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> DaoResult<(Notification, bool)> {
        let now = DateTime::now();
        self.with_owned(user_id, notification_id, |record| {
            let changed = if read {
                apply_read(record, now)
            } else if record.read_status {
                record.read_status = false;
                record.read_at = None;
                record.updated_at = now;
                true
            } else {
                false
            };
            (record.clone(), changed)
        })
    }

    async fn mark_all_read(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64> {
        let now = DateTime::now();
        let mut modified = 0;
        for mut record in self.records.iter_mut() {
            if record.user_id == user_id
                && notification_type.is_none_or(|t| record.notification_type == t)
                && apply_read(record.value_mut(), now)
            {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn acknowledge_delivery(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> DaoResult<Notification> {
        let now = DateTime::now();
        self.with_owned(user_id, notification_id, |record| {
            if record.channels.any_sent()
                && matches!(
                    record.status,
                    NotificationStatus::Pending
                        | NotificationStatus::Sent
                        | NotificationStatus::Failed
                )
            {
                record.status = NotificationStatus::Delivered;
                record.delivered_at.get_or_insert(now);
                record.updated_at = now;
            }
            record.clone()
        })
    }

    async fn update_channel(
        &self,
        notification_id: &str,
        channel: Channel,
        patch: &ChannelPatch,
    ) -> DaoResult<bool> {
        let now = DateTime::now();
        Ok(match self.records.get_mut(notification_id) {
            Some(mut record) => {
                apply_patch(record.value_mut(), channel, patch, now);
                true
            }
            None => false,
        })
    }

    async fn increment_attempt(
        &self,
        notification_id: &str,
        error: Option<&str>,
    ) -> DaoResult<bool> {
        let now = DateTime::now();
        Ok(match self.records.get_mut(notification_id) {
            Some(mut record) => {
                record.analytics.delivery_attempts += 1;
                record.analytics.last_delivery_attempt = Some(now);
                if let Some(error) = error {
                    record.analytics.last_error = Some(error.to_string());
                }
                record.updated_at = now;
                true
            }
            None => false,
        })
    }

    async fn settle_status(
        &self,
        notification_id: &str,
        settlement: StatusSettlement,
    ) -> DaoResult<bool> {
        let now = DateTime::now();
        let Some(mut record) = self.records.get_mut(notification_id) else {
            return Ok(false);
        };
        let changed = match settlement {
            StatusSettlement::Sent { at } => {
                if matches!(
                    record.status,
                    NotificationStatus::Pending | NotificationStatus::Failed
                ) {
                    record.status = NotificationStatus::Sent;
                    record.delivered_at.get_or_insert(at);
                    true
                } else {
                    false
                }
            }
            StatusSettlement::Failed => {
                if record.status == NotificationStatus::Pending {
                    record.status = NotificationStatus::Failed;
                    true
                } else {
                    false
                }
            }
        };
        if changed {
            record.updated_at = now;
        }
        Ok(changed)
    }

    async fn record_interaction(
        &self,
        user_id: &str,
        notification_id: &str,
        interaction: &Interaction,
    ) -> DaoResult<Notification> {
        self.with_owned(user_id, notification_id, |record| {
            match interaction.kind {
                InteractionKind::Click => record.analytics.clicks += 1,
                InteractionKind::Impression | InteractionKind::Read => {
                    record.analytics.impressions += 1
                }
            }
            record.analytics.interactions.push(interaction.clone());
            record.updated_at = DateTime::now();
            record.clone()
        })
    }

    async fn delete(&self, user_id: &str, notification_id: &str) -> DaoResult<bool> {
        Ok(self
            .records
            .remove_if(notification_id, |_, r| r.user_id == user_id)
            .is_some())
    }

    async fn delete_expired(&self, now: DateTime) -> DaoResult<u64> {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.expires_at.is_none_or(|expires_at| expires_at >= now));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn cleanup(&self, filter: &CleanupFilter, dry_run: bool) -> DaoResult<u64> {
        if dry_run {
            return Ok(self.records.iter().filter(|r| filter.matches(r)).count() as u64);
        }
        let before = self.records.len();
        self.records.retain(|_, r| !filter.matches(r));
        Ok(before.saturating_sub(self.records.len()) as u64)
    }

    async fn group_by_type(
        &self,
        user_id: &str,
        include_read: bool,
        limit: usize,
    ) -> DaoResult<Vec<TypeGroup>> {
        let mut records = self.snapshot(|r| r.user_id == user_id && (include_read || !r.read_status));
        newest_first(&mut records);

        let mut groups: Vec<TypeGroup> = Vec::new();
        for record in records {
            match groups
                .iter_mut()
                .find(|g| g.notification_type == record.notification_type)
            {
                Some(group) => {
                    group.count += 1;
                    if !record.read_status {
                        group.unread_count += 1;
                    }
                }
                None => groups.push(TypeGroup {
                    notification_type: record.notification_type,
                    count: 1,
                    unread_count: u64::from(!record.read_status),
                    latest: record,
                }),
            }
        }
        groups.truncate(limit.max(1));
        Ok(groups)
    }

    async fn aggregate(
        &self,
        user_id: &str,
        window: TimeWindow,
        bucket: Bucket,
    ) -> DaoResult<Vec<AnalyticsBucket>> {
        let mut buckets: Vec<AnalyticsBucket> = Vec::new();
        let records = self.snapshot(|r| {
            r.user_id == user_id && r.created_at >= window.from && r.created_at < window.to
        });
        for record in records {
            let start = bucket_start(record.created_at, bucket);
            let idx = match buckets.iter().position(|b| b.bucket_start == start) {
                Some(idx) => idx,
                None => {
                    buckets.push(AnalyticsBucket {
                        bucket_start: start,
                        count: 0,
                        read: 0,
                        unread: 0,
                        impressions: 0,
                        clicks: 0,
                    });
                    buckets.len() - 1
                }
            };
            let entry = &mut buckets[idx];
            entry.count += 1;
            if record.read_status {
                entry.read += 1;
            } else {
                entry.unread += 1;
            }
            entry.impressions += record.analytics.impressions;
            entry.clicks += record.analytics.clicks;
        }
        buckets.sort_by_key(|b| b.bucket_start);
        Ok(buckets)
    }
}

#[derive(Default)]
pub struct MemoryPreferences {
    entries: DashMap<String, UserPreferences>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, preferences: UserPreferences) {
        self.entries
            .insert(preferences.user_id.clone(), preferences);
    }

    pub fn remove(&self, user_id: &str) {
        self.entries.remove(user_id);
    }
}

#[async_trait]
impl PreferenceSource for MemoryPreferences {
    async fn fetch(&self, user_id: &str) -> DaoResult<Option<UserPreferences>> {
        Ok(self.entries.get(user_id).map(|p| p.clone()))
    }
}

#[derive(Default)]
pub struct MemoryContacts {
    entries: DashMap<String, UserContact>,
}

impl MemoryContacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, contact: UserContact) {
        self.entries.insert(contact.user_id.clone(), contact);
    }
}

#[async_trait]
impl ContactBook for MemoryContacts {
    async fn lookup(&self, user_id: &str) -> DaoResult<Option<UserContact>> {
        Ok(self.entries.get(user_id).map(|c| c.clone()))
    }
}
