use async_trait::async_trait;
use bson::{Bson, DateTime, Document, doc};
use courier_db::models::{
    Channel, Interaction, InteractionKind, Notification, NotificationStatus, NotificationType,
};
use futures::TryStreamExt;
use mongodb::{Database, options::ReturnDocument};

use super::base::{BaseDao, DaoError, DaoResult, Page, PageParams};
use crate::store::{
    AnalyticsBucket, Bucket, ChannelPatch, CleanupFilter, NotificationFilter, NotificationStore,
    StatusSettlement, TimeWindow, TypeGroup, UserCount,
};

/// MongoDB-backed delivery record store.
pub struct NotificationDao {
    pub base: BaseDao<Notification>,
}

impl NotificationDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Notification::COLLECTION),
        }
    }

    async fn find_owned(&self, user_id: &str, notification_id: &str) -> DaoResult<Notification> {
        self.base
            .find_one(doc! { "_id": notification_id, "user_id": user_id })
            .await?
            .ok_or(DaoError::NotFound)
    }
}

pub(crate) fn filter_document(user_id: &str, filter: &NotificationFilter) -> Document {
    let mut query = doc! { "user_id": user_id };
    if let Some(notification_type) = filter.notification_type {
        query.insert("notification_type", notification_type.as_str());
    }
    if let Some(read_status) = filter.read_status {
        query.insert("read_status", read_status);
    }
    if let Some(status) = filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(priority) = filter.priority {
        query.insert("priority", priority.as_str());
    }
    let mut created_at = Document::new();
    if let Some(after) = filter.created_after {
        created_at.insert("$gte", after);
    }
    if let Some(before) = filter.created_before {
        created_at.insert("$lt", before);
    }
    if !created_at.is_empty() {
        query.insert("created_at", created_at);
    }
    query
}

/// `$set` stage for a channel patch. Strings are wrapped in `$literal` so a
/// gateway error that starts with `$` is never read as a field path.
pub(crate) fn channel_set_stage(channel: Channel, patch: &ChannelPatch, now: DateTime) -> Document {
    let prefix = format!("channels.{}", channel.as_str());
    let mut set = doc! { "updated_at": now };
    if let Some(sent) = patch.sent {
        set.insert(format!("{prefix}.sent"), sent);
    }
    if let Some(sent_at) = patch.sent_at {
        set.insert(format!("{prefix}.sent_at"), sent_at);
    }
    if let Some(external_id) = &patch.external_message_id {
        set.insert(
            format!("{prefix}.external_message_id"),
            doc! { "$literal": external_id },
        );
    }
    if let Some(error) = &patch.error {
        let value = match error {
            Some(message) => Bson::Document(doc! { "$literal": message }),
            None => Bson::Null,
        };
        set.insert(format!("{prefix}.error"), value);
    }
    if let Some(attempts) = patch.attempts {
        set.insert(format!("{prefix}.attempts"), attempts as i64);
    }
    if let Some(terminal) = patch.terminal {
        set.insert(format!("{prefix}.terminal"), terminal);
    }
    if patch.marks_sent() {
        let at = patch.sent_at.unwrap_or(now);
        set.insert("delivered_at", doc! { "$ifNull": ["$delivered_at", at] });
    }
    doc! { "$set": set }
}

/// Matches records with at least one channel marked sent.
pub(crate) fn any_sent_filter() -> Vec<Document> {
    Channel::ALL
        .iter()
        .map(|channel| {
            let mut clause = Document::new();
            clause.insert(format!("channels.{}.sent", channel.as_str()), true);
            clause
        })
        .collect()
}

fn interaction_document(interaction: &Interaction) -> DaoResult<Bson> {
    Ok(bson::to_bson(interaction)?)
}

fn bson_u64(value: Option<&Bson>) -> u64 {
    match value {
        Some(Bson::Int32(v)) => (*v).max(0) as u64,
        Some(Bson::Int64(v)) => (*v).max(0) as u64,
        Some(Bson::Double(v)) => v.max(0.0) as u64,
        _ => 0,
    }
}

#[async_trait]
impl NotificationStore for NotificationDao {
    async fn create(&self, record: &Notification) -> DaoResult<()> {
        self.base.insert_one(record).await
    }

    async fn exists(&self, notification_id: &str) -> DaoResult<bool> {
        Ok(self.base.count(doc! { "_id": notification_id }).await? > 0)
    }

    async fn get(&self, user_id: &str, notification_id: &str) -> DaoResult<Notification> {
        self.find_owned(user_id, notification_id).await
    }

    async fn find_by_id(&self, notification_id: &str) -> DaoResult<Notification> {
        self.base.find_by_id(notification_id).await
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &NotificationFilter,
        page: &PageParams,
    ) -> DaoResult<Page<Notification>> {
        self.base
            .find_page(
                filter_document(user_id, filter),
                Some(doc! { "created_at": -1 }),
                page,
            )
            .await
    }

    async fn count_for_user(&self, user_id: &str) -> DaoResult<u64> {
        self.base.count(doc! { "user_id": user_id }).await
    }

    async fn count_unread(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64> {
        let filter = NotificationFilter {
            notification_type,
            read_status: Some(false),
            ..Default::default()
        };
        self.base.count(filter_document(user_id, &filter)).await
    }

    async fn oldest_ids(&self, user_id: &str, limit: u64) -> DaoResult<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let docs: Vec<Document> = self
            .base
            .documents()
            .find(doc! { "user_id": user_id })
            .projection(doc! { "_id": 1 })
            .sort(doc! { "created_at": 1 })
            .limit(limit as i64)
            .await?
            .try_collect()
            .await?;

        Ok(docs
            .iter()
            .filter_map(|d| d.get_str("_id").ok().map(str::to_string))
            .collect())
    }

    async fn delete_ids(&self, user_id: &str, notification_ids: &[String]) -> DaoResult<u64> {
        if notification_ids.is_empty() {
            return Ok(0);
        }
        self.base
            .hard_delete(doc! { "user_id": user_id, "_id": { "$in": notification_ids } })
            .await
    }

    async fn users_over(&self, max: u64) -> DaoResult<Vec<UserCount>> {
        let pipeline = vec![
            doc! { "$group": { "_id": "$user_id", "count": { "$sum": 1 } } },
            doc! { "$match": { "count": { "$gt": max as i64 } } },
        ];
        let docs = self.base.aggregate(pipeline).await?;
        Ok(docs
            .iter()
            .filter_map(|d| {
                let user_id = d.get_str("_id").ok()?.to_string();
                Some(UserCount {
                    user_id,
                    count: bson_u64(d.get("count")),
                })
            })
            .collect())
    }

    async fn mark_read(
        &self,
        user_id: &str,
        notification_id: &str,
        read: bool,
    ) -> DaoResult<(Notification, bool)> {
        let now = DateTime::now();
        let updated = if read {
            let interaction = interaction_document(&Interaction {
                kind: InteractionKind::Read,
                at: now,
                metadata: None,
            })?;
            self.base
                .collection()
                .find_one_and_update(
                    doc! { "_id": notification_id, "user_id": user_id, "read_status": false },
                    doc! {
                        "$set": {
                            "read_status": true,
                            "read_at": now,
                            "status": NotificationStatus::Read.as_str(),
                            "updated_at": now,
                        },
                        "$inc": { "analytics.impressions": 1 },
                        "$push": { "analytics.interactions": interaction },
                    },
                )
                .return_document(ReturnDocument::After)
                .await?
        } else {
            self.base
                .collection()
                .find_one_and_update(
                    doc! { "_id": notification_id, "user_id": user_id, "read_status": true },
                    doc! {
                        "$set": {
                            "read_status": false,
                            "read_at": Bson::Null,
                            "updated_at": now,
                        }
                    },
                )
                .return_document(ReturnDocument::After)
                .await?
        };

        match updated {
            Some(record) => Ok((record, true)),
            None => Ok((self.find_owned(user_id, notification_id).await?, false)),
        }
    }

    async fn mark_all_read(
        &self,
        user_id: &str,
        notification_type: Option<NotificationType>,
    ) -> DaoResult<u64> {
        let now = DateTime::now();
        let filter = NotificationFilter {
            notification_type,
            read_status: Some(false),
            ..Default::default()
        };
        let interaction = interaction_document(&Interaction {
            kind: InteractionKind::Read,
            at: now,
            metadata: None,
        })?;
        self.base
            .update_many(
                filter_document(user_id, &filter),
                doc! {
                    "$set": {
                        "read_status": true,
                        "read_at": now,
                        "status": NotificationStatus::Read.as_str(),
                    },
                    "$inc": { "analytics.impressions": 1 },
                    "$push": { "analytics.interactions": interaction },
                },
            )
            .await
    }

    async fn acknowledge_delivery(
        &self,
        user_id: &str,
        notification_id: &str,
    ) -> DaoResult<Notification> {
        let now = DateTime::now();
        let pipeline = vec![doc! {
            "$set": {
                "status": NotificationStatus::Delivered.as_str(),
                "delivered_at": { "$ifNull": ["$delivered_at", now] },
                "updated_at": now,
            }
        }];
        let updated = self
            .base
            .collection()
            .find_one_and_update(
                doc! {
                    "_id": notification_id,
                    "user_id": user_id,
                    "status": { "$in": ["pending", "sent", "failed"] },
                    "$or": any_sent_filter(),
                },
                pipeline,
            )
            .return_document(ReturnDocument::After)
            .await?;

        match updated {
            Some(record) => Ok(record),
            None => self.find_owned(user_id, notification_id).await,
        }
    }

    async fn update_channel(
        &self,
        notification_id: &str,
        channel: Channel,
        patch: &ChannelPatch,
    ) -> DaoResult<bool> {
        let stage = channel_set_stage(channel, patch, DateTime::now());
        let result = self
            .base
            .collection()
            .update_one(doc! { "_id": notification_id }, vec![stage])
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn increment_attempt(
        &self,
        notification_id: &str,
        error: Option<&str>,
    ) -> DaoResult<bool> {
        let mut set = doc! { "analytics.last_delivery_attempt": DateTime::now() };
        if let Some(error) = error {
            set.insert("analytics.last_error", error);
        }
        let result = self
            .base
            .collection()
            .update_one(
                doc! { "_id": notification_id },
                doc! {
                    "$inc": { "analytics.delivery_attempts": 1 },
                    "$set": set,
                },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn settle_status(
        &self,
        notification_id: &str,
        settlement: StatusSettlement,
    ) -> DaoResult<bool> {
        let now = DateTime::now();
        let result = match settlement {
            StatusSettlement::Sent { at } => {
                let pipeline = vec![doc! {
                    "$set": {
                        "status": NotificationStatus::Sent.as_str(),
                        "delivered_at": { "$ifNull": ["$delivered_at", at] },
                        "updated_at": now,
                    }
                }];
                self.base
                    .collection()
                    .update_one(
                        doc! {
                            "_id": notification_id,
                            "status": { "$in": ["pending", "failed"] },
                        },
                        pipeline,
                    )
                    .await?
            }
            StatusSettlement::Failed => {
                self.base
                    .collection()
                    .update_one(
                        doc! { "_id": notification_id, "status": "pending" },
                        doc! { "$set": { "status": "failed", "updated_at": now } },
                    )
                    .await?
            }
        };
        Ok(result.modified_count > 0)
    }

    async fn record_interaction(
        &self,
        user_id: &str,
        notification_id: &str,
        interaction: &Interaction,
    ) -> DaoResult<Notification> {
        let counter = match interaction.kind {
            InteractionKind::Click => "analytics.clicks",
            InteractionKind::Impression | InteractionKind::Read => "analytics.impressions",
        };
        let entry = interaction_document(interaction)?;
        self.base
            .collection()
            .find_one_and_update(
                doc! { "_id": notification_id, "user_id": user_id },
                doc! {
                    "$inc": { counter: 1 },
                    "$push": { "analytics.interactions": entry },
                    "$set": { "updated_at": DateTime::now() },
                },
            )
            .return_document(ReturnDocument::After)
            .await?
            .ok_or(DaoError::NotFound)
    }

    async fn delete(&self, user_id: &str, notification_id: &str) -> DaoResult<bool> {
        let deleted = self
            .base
            .hard_delete(doc! { "_id": notification_id, "user_id": user_id })
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_expired(&self, now: DateTime) -> DaoResult<u64> {
        self.base
            .hard_delete(doc! { "expires_at": { "$lt": now } })
            .await
    }

    async fn cleanup(&self, filter: &CleanupFilter, dry_run: bool) -> DaoResult<u64> {
        let mut query = doc! { "created_at": { "$lt": filter.created_before } };
        if filter.keep_read {
            query.insert("read_status", false);
        }
        if let Some(user_id) = &filter.user_id {
            query.insert("user_id", user_id.as_str());
        }
        if dry_run {
            self.base.count(query).await
        } else {
            self.base.hard_delete(query).await
        }
    }

    async fn group_by_type(
        &self,
        user_id: &str,
        include_read: bool,
        limit: usize,
    ) -> DaoResult<Vec<TypeGroup>> {
        let mut matcher = doc! { "user_id": user_id };
        if !include_read {
            matcher.insert("read_status", false);
        }
        let pipeline = vec![
            doc! { "$match": matcher },
            doc! { "$sort": { "created_at": -1 } },
            doc! {
                "$group": {
                    "_id": "$notification_type",
                    "count": { "$sum": 1 },
                    "unread_count": { "$sum": { "$cond": ["$read_status", 0, 1] } },
                    "latest": { "$first": "$$ROOT" },
                }
            },
            doc! { "$sort": { "latest.created_at": -1 } },
            doc! { "$limit": limit.max(1) as i64 },
        ];

        let docs = self.base.aggregate(pipeline).await?;
        let mut groups = Vec::with_capacity(docs.len());
        for d in docs {
            let notification_type: NotificationType =
                bson::from_bson(d.get("_id").cloned().unwrap_or(Bson::Null))?;
            let latest: Notification = bson::from_document(
                d.get_document("latest")
                    .map_err(|e| DaoError::Validation(e.to_string()))?
                    .clone(),
            )?;
            groups.push(TypeGroup {
                notification_type,
                count: bson_u64(d.get("count")),
                unread_count: bson_u64(d.get("unread_count")),
                latest,
            });
        }
        Ok(groups)
    }

    async fn aggregate(
        &self,
        user_id: &str,
        window: TimeWindow,
        bucket: Bucket,
    ) -> DaoResult<Vec<AnalyticsBucket>> {
        let mut trunc = doc! { "date": "$created_at", "unit": bucket.as_str() };
        if bucket == Bucket::Week {
            trunc.insert("startOfWeek", "monday");
        }
        let pipeline = vec![
            doc! {
                "$match": {
                    "user_id": user_id,
                    "created_at": { "$gte": window.from, "$lt": window.to },
                }
            },
            doc! {
                "$group": {
                    "_id": { "$dateTrunc": trunc },
                    "count": { "$sum": 1 },
                    "read": { "$sum": { "$cond": ["$read_status", 1, 0] } },
                    "unread": { "$sum": { "$cond": ["$read_status", 0, 1] } },
                    "impressions": { "$sum": "$analytics.impressions" },
                    "clicks": { "$sum": "$analytics.clicks" },
                }
            },
            doc! { "$sort": { "_id": 1 } },
        ];

        let docs = self.base.aggregate(pipeline).await?;
        Ok(docs
            .iter()
            .filter_map(|d| {
                let bucket_start = *d.get_datetime("_id").ok()?;
                Some(AnalyticsBucket {
                    bucket_start,
                    count: bson_u64(d.get("count")),
                    read: bson_u64(d.get("read")),
                    unread: bson_u64(d.get("unread")),
                    impressions: bson_u64(d.get("impressions")),
                    clicks: bson_u64(d.get("clicks")),
                })
            })
            .collect())
    }
}
