use std::time::Duration;

use chrono::Utc;
use courier_db::models::{Channel, InteractionKind, NotificationStatus, NotificationType};
use courier_services::dao::base::PageParams;
use courier_services::intake::Scheduling;
use courier_services::store::NotificationFilter;
use courier_services::{NotificationError, NotificationStore};
use serde_json::{Map, json};

use crate::fixtures::test_engine::{
    ScriptedDriver, TestEngine, in_app_only, in_app_registry, with_channels,
};

async fn dispatched(app: &TestEngine, user_id: &str, notification_type: NotificationType) -> String {
    app.engine
        .dispatch(in_app_only(user_id, notification_type))
        .await
        .unwrap()
        .notification_id
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::Match).await;
    let reads = app.engine.reads();

    let first = reads.mark_read("u1", &id, true).await.unwrap();
    assert!(first.read_status);
    assert_eq!(first.status, NotificationStatus::Read);
    let read_at = first.read_at.expect("read_at set");

    let second = reads.mark_read("u1", &id, true).await.unwrap();
    assert!(second.read_status);
    assert_eq!(second.read_at, Some(read_at));
    assert_eq!(second.status, NotificationStatus::Read);

    let read_entries = second
        .analytics
        .interactions
        .iter()
        .filter(|i| i.kind == InteractionKind::Read)
        .count();
    assert_eq!(read_entries, 1);
    assert_eq!(app.engine.metrics().read_total.get(), 1);
}

#[tokio::test]
async fn mark_unread_clears_read_flag_but_keeps_status() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::Like).await;
    let reads = app.engine.reads();

    reads.mark_read("u1", &id, true).await.unwrap();
    let unread = reads.mark_read("u1", &id, false).await.unwrap();
    assert!(!unread.read_status);
    assert_eq!(unread.read_at, None);
    assert_eq!(unread.status, NotificationStatus::Read);
    assert_eq!(reads.count_unread("u1", None).await.unwrap(), 1);

    let stored = app.store.find_by_id(&id).await.unwrap();
    assert_eq!(stored.status, NotificationStatus::Read);
}

#[tokio::test]
async fn other_users_cannot_touch_a_notification() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::Message).await;

    let err = app.engine.reads().mark_read("u2", &id, true).await.unwrap_err();
    assert!(matches!(err, NotificationError::NotFound));
    let err = app.engine.reads().get("u2", &id).await.unwrap_err();
    assert!(matches!(err, NotificationError::NotFound));
}

#[tokio::test]
async fn unread_counts_and_mark_all_read() {
    let app = TestEngine::spawn(in_app_registry());
    dispatched(&app, "u1", NotificationType::Match).await;
    dispatched(&app, "u1", NotificationType::Match).await;
    dispatched(&app, "u1", NotificationType::Like).await;
    dispatched(&app, "u2", NotificationType::Match).await;
    let reads = app.engine.reads();

    assert_eq!(reads.count_unread("u1", None).await.unwrap(), 3);
    assert_eq!(reads.count_unread("u1", Some(NotificationType::Match)).await.unwrap(), 2);

    assert_eq!(reads.mark_all_read("u1", Some(NotificationType::Match)).await.unwrap(), 2);
    assert_eq!(reads.count_unread("u1", None).await.unwrap(), 1);
    assert_eq!(reads.mark_all_read("u1", None).await.unwrap(), 1);
    assert_eq!(reads.mark_all_read("u1", None).await.unwrap(), 0);
    assert_eq!(reads.count_unread("u2", None).await.unwrap(), 1);
    assert_eq!(app.engine.metrics().read_total.get(), 3);
}

#[tokio::test]
async fn acknowledge_delivery_marks_delivered() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::Payment).await;

    let record = app.engine.reads().acknowledge_delivery("u1", &id).await.unwrap();
    assert_eq!(record.status, NotificationStatus::Delivered);
    assert!(record.delivered_at.is_some());
}

#[tokio::test]
async fn acknowledge_leaves_unsent_scheduled_record_pending() {
    let push = ScriptedDriver::ok(Channel::Push);
    let app = TestEngine::spawn(in_app_registry().with(push.clone()));
    let mut intake = with_channels("u1", NotificationType::DateReminder, &[Channel::Push, Channel::InApp]);
    intake.scheduling = Some(Scheduling {
        immediate: false,
        scheduled_for: Some(Utc::now() + chrono::Duration::seconds(30)),
    });
    let id = app.engine.dispatch(intake).await.unwrap().notification_id;

    let record = app.engine.reads().acknowledge_delivery("u1", &id).await.unwrap();
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.delivered_at, None);
    assert!(!record.channels.any_sent());
    assert_eq!(push.calls(), 0);

    let err = app.engine.reads().acknowledge_delivery("u2", &id).await.unwrap_err();
    assert!(matches!(err, NotificationError::NotFound));
    assert!(app.engine.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn impressions_and_clicks_are_counted() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::Match).await;
    let reads = app.engine.reads();

    let mut source = Map::new();
    source.insert("source".to_string(), json!("feed"));
    reads.record_impression("u1", &id, Some(source)).await.unwrap();
    reads.record_click("u1", &id, None).await.unwrap();
    let record = reads.record_click("u1", &id, None).await.unwrap();

    assert_eq!(record.analytics.impressions, 1);
    assert_eq!(record.analytics.clicks, 2);
    assert_eq!(record.analytics.interactions.len(), 3);
    assert_eq!(record.analytics.interactions[0].kind, InteractionKind::Impression);
    assert_eq!(
        record.analytics.interactions[0].metadata.as_ref().unwrap()["source"],
        "feed"
    );
}

#[tokio::test]
async fn list_pages_newest_first() {
    let app = TestEngine::spawn(in_app_registry());
    let mut ids = Vec::new();
    for notification_type in [NotificationType::Match, NotificationType::Like, NotificationType::Message] {
        ids.push(dispatched(&app, "u1", notification_type).await);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    let reads = app.engine.reads();

    let page = reads
        .list("u1", &NotificationFilter::default(), PageParams::new(2, 0))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].notification_id, ids[2]);
    assert_eq!(page.items[1].notification_id, ids[1]);

    let filter = NotificationFilter {
        notification_type: Some(NotificationType::Like),
        ..Default::default()
    };
    let liked = reads.list("u1", &filter, PageParams::new(20, 0)).await.unwrap();
    assert_eq!(liked.total, 1);
    assert_eq!(liked.items[0].notification_id, ids[1]);
}

#[tokio::test]
async fn group_by_type_reports_unread() {
    let app = TestEngine::spawn(in_app_registry());
    let first = dispatched(&app, "u1", NotificationType::Match).await;
    dispatched(&app, "u1", NotificationType::Match).await;
    dispatched(&app, "u1", NotificationType::Like).await;
    let reads = app.engine.reads();
    reads.mark_read("u1", &first, true).await.unwrap();

    let groups = reads.group_by_type("u1", true, 10).await.unwrap();
    assert_eq!(groups.len(), 2);
    let matches = groups
        .iter()
        .find(|g| g.notification_type == NotificationType::Match)
        .unwrap();
    assert_eq!(matches.count, 2);
    assert_eq!(matches.unread_count, 1);
}

#[tokio::test]
async fn delete_removes_only_own_records() {
    let app = TestEngine::spawn(in_app_registry());
    let id = dispatched(&app, "u1", NotificationType::System).await;
    let reads = app.engine.reads();

    assert!(!reads.delete("u2", &id).await.unwrap());
    assert!(reads.delete("u1", &id).await.unwrap());
    assert!(!reads.delete("u1", &id).await.unwrap());
}
