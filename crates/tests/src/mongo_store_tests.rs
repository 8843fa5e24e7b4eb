//! Store contract against a live MongoDB.
//!
//! Requires a running MongoDB (default `mongodb://localhost:27017`; override
//! with `COURIER__DATABASE__URL`). Run with `cargo test -- --ignored`.

use bson::DateTime;
use courier_db::indexes::ensure_indexes;
use courier_db::models::{Channel, InteractionKind, NotificationStatus, NotificationType};
use courier_services::dao::base::{DaoError, PageParams};
use courier_services::store::{
    Bucket, ChannelPatch, CleanupFilter, NotificationFilter, StatusSettlement, TimeWindow,
};
use courier_services::{NotificationDao, NotificationStore};
use mongodb::{Client, Database, options::ClientOptions};

use crate::fixtures::records::{days_ago, minutes_from_now, record};

/// Each test gets a unique database, dropped at the end.
async fn test_db() -> Database {
    let url = std::env::var("COURIER__DATABASE__URL")
        .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
    let options = ClientOptions::parse(&url)
        .await
        .expect("Failed to parse MongoDB URL");
    let client = Client::with_options(options).expect("Failed to create MongoDB client");
    let db = client.database(&format!("courier_test_{}", uuid::Uuid::new_v4().simple()));
    ensure_indexes(&db).await.expect("Failed to create indexes");
    db
}

#[tokio::test]
#[ignore]
async fn duplicate_id_is_rejected() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);

    dao.create(&record("n1", "u1", 1_000)).await.unwrap();
    let err = dao.create(&record("n1", "u1", 2_000)).await.unwrap_err();
    assert!(matches!(err, DaoError::DuplicateKey(_)));
    assert!(dao.exists("n1").await.unwrap());

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn mark_read_transitions_once() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);
    dao.create(&record("n1", "u1", 1_000)).await.unwrap();

    let (first, changed) = dao.mark_read("u1", "n1", true).await.unwrap();
    assert!(changed);
    assert!(first.read_status);
    assert_eq!(first.status, NotificationStatus::Read);

    let (second, changed) = dao.mark_read("u1", "n1", true).await.unwrap();
    assert!(!changed);
    assert_eq!(second.read_at, first.read_at);
    let reads = second
        .analytics
        .interactions
        .iter()
        .filter(|i| i.kind == InteractionKind::Read)
        .count();
    assert_eq!(reads, 1);

    assert!(matches!(
        dao.mark_read("u2", "n1", true).await.unwrap_err(),
        DaoError::NotFound
    ));

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn mark_unread_keeps_read_status() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);
    dao.create(&record("n1", "u1", 1_000)).await.unwrap();

    dao.mark_read("u1", "n1", true).await.unwrap();
    let (unread, changed) = dao.mark_read("u1", "n1", false).await.unwrap();
    assert!(changed);
    assert!(!unread.read_status);
    assert_eq!(unread.read_at, None);
    assert_eq!(unread.status, NotificationStatus::Read);

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn acknowledge_delivery_requires_a_sent_channel() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);
    dao.create(&record("n1", "u1", 1_000)).await.unwrap();

    let untouched = dao.acknowledge_delivery("u1", "n1").await.unwrap();
    assert_eq!(untouched.status, NotificationStatus::Pending);
    assert_eq!(untouched.delivered_at, None);

    let sent_at = DateTime::now();
    dao.update_channel("n1", Channel::Push, &ChannelPatch::success(sent_at, "push-1".to_string(), 1))
        .await
        .unwrap();
    dao.settle_status("n1", StatusSettlement::Sent { at: sent_at }).await.unwrap();

    let acknowledged = dao.acknowledge_delivery("u1", "n1").await.unwrap();
    assert_eq!(acknowledged.status, NotificationStatus::Delivered);
    assert_eq!(acknowledged.delivered_at, Some(sent_at));

    assert!(matches!(
        dao.acknowledge_delivery("u2", "n1").await.unwrap_err(),
        DaoError::NotFound
    ));

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn channel_patches_and_status_settlement() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);
    dao.create(&record("n1", "u1", 1_000)).await.unwrap();

    assert!(dao
        .update_channel("n1", Channel::Email, &ChannelPatch::failure("503", 1, false))
        .await
        .unwrap());
    assert!(dao.increment_attempt("n1", Some("503")).await.unwrap());
    assert!(dao.settle_status("n1", StatusSettlement::Failed).await.unwrap());

    let now = DateTime::now();
    dao.update_channel("n1", Channel::Email, &ChannelPatch::success(now, "em-1".to_string(), 2))
        .await
        .unwrap();
    dao.increment_attempt("n1", None).await.unwrap();
    assert!(dao.settle_status("n1", StatusSettlement::Sent { at: now }).await.unwrap());
    assert!(!dao.settle_status("n1", StatusSettlement::Failed).await.unwrap());

    let stored = dao.find_by_id("n1").await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert!(stored.channels.email.sent);
    assert_eq!(stored.channels.email.external_message_id.as_deref(), Some("em-1"));
    assert_eq!(stored.channels.email.error, None);
    assert_eq!(stored.channels.email.attempts, 2);
    assert_eq!(stored.analytics.delivery_attempts, 2);
    assert_eq!(stored.analytics.last_error.as_deref(), Some("503"));
    assert!(stored.delivered_at.is_some());

    assert!(!dao
        .update_channel("missing", Channel::Email, &ChannelPatch::rearm())
        .await
        .unwrap());

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn retention_queries() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);

    let mut expired = record("expired", "u1", 1_000);
    expired.expires_at = Some(minutes_from_now(-5));
    dao.create(&expired).await.unwrap();
    let mut live = record("live", "u1", 2_000);
    live.expires_at = Some(minutes_from_now(60));
    dao.create(&live).await.unwrap();
    for i in 0..3 {
        dao.create(&record(&format!("old-{i}"), "u2", days_ago(40).timestamp_millis() + i))
            .await
            .unwrap();
    }

    assert_eq!(dao.delete_expired(DateTime::now()).await.unwrap(), 1);
    assert!(!dao.exists("expired").await.unwrap());

    let over = dao.users_over(2).await.unwrap();
    assert_eq!(over.len(), 1);
    assert_eq!(over[0].user_id, "u2");
    assert_eq!(over[0].count, 3);
    assert_eq!(dao.oldest_ids("u2", 2).await.unwrap(), vec!["old-0", "old-1"]);

    let filter = CleanupFilter {
        created_before: days_ago(30),
        keep_read: false,
        user_id: None,
    };
    assert_eq!(dao.cleanup(&filter, true).await.unwrap(), 3);
    assert_eq!(dao.cleanup(&filter, false).await.unwrap(), 3);
    assert_eq!(dao.count_for_user("u2").await.unwrap(), 0);

    db.drop().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn listing_grouping_and_aggregation() {
    let db = test_db().await;
    let dao = NotificationDao::new(&db);
    let base = days_ago(1).timestamp_millis();
    for (i, notification_type) in [
        NotificationType::Match,
        NotificationType::Match,
        NotificationType::Like,
    ]
    .into_iter()
    .enumerate()
    {
        let mut r = record(&format!("n{i}"), "u1", base + i as i64 * 1_000);
        r.notification_type = notification_type;
        dao.create(&r).await.unwrap();
    }
    dao.mark_read("u1", "n0", true).await.unwrap();

    let page = dao
        .list("u1", &NotificationFilter::default(), &PageParams::new(2, 0))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items[0].notification_id, "n2");
    assert_eq!(dao.count_unread("u1", Some(NotificationType::Match)).await.unwrap(), 1);

    let groups = dao.group_by_type("u1", true, 10).await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].notification_type, NotificationType::Like);
    assert_eq!(groups[1].count, 2);
    assert_eq!(groups[1].unread_count, 1);

    let window = TimeWindow {
        from: days_ago(2),
        to: DateTime::now(),
    };
    let buckets = dao.aggregate("u1", window, Bucket::Month).await.unwrap();
    let total: u64 = buckets.iter().map(|b| b.count).sum();
    let read: u64 = buckets.iter().map(|b| b.read).sum();
    assert_eq!(total, 3);
    assert_eq!(read, 1);

    db.drop().await.unwrap();
}
