use std::time::Duration;

use courier_db::models::{Channel, NotificationType};
use courier_services::NotificationStore;

use crate::fixtures::test_engine::{
    ScriptedDriver, TestEngine, in_app_only, in_app_registry, with_channels,
};

#[tokio::test]
async fn bulk_dispatch_reports_every_item() {
    let push = ScriptedDriver::ok(Channel::Push);
    let app = TestEngine::spawn(in_app_registry().with(push.clone()));

    let mut intakes: Vec<_> = (0..25)
        .map(|i| {
            with_channels(
                &format!("user-{i}"),
                NotificationType::System,
                &[Channel::Push, Channel::InApp],
            )
        })
        .collect();
    intakes[7].title = String::new();

    let result = app.engine.dispatch_bulk(intakes).await;

    assert_eq!(result.total, 25);
    assert_eq!(result.successful, 24);
    assert_eq!(result.failed, 1);
    assert_eq!(result.items.len(), 25);
    assert_eq!(push.calls(), 24);

    let failed = result.items.iter().find(|item| item.index == 7).unwrap();
    assert!(failed.result.is_none());
    assert!(failed.error.as_deref().unwrap().starts_with("Validation"));

    for item in result.items.iter().filter(|item| item.succeeded()) {
        let id = &item.result.as_ref().unwrap().notification_id;
        let stored = app.store.find_by_id(id).await.unwrap();
        let batch_id = stored.grouping.and_then(|g| g.batch_id);
        assert_eq!(batch_id.as_deref(), Some(result.batch_id.as_str()));
    }
}

#[tokio::test]
async fn bulk_keeps_caller_grouping() {
    let app = TestEngine::spawn(in_app_registry());
    let mut intake = in_app_only("u1", NotificationType::Match);
    intake.grouping = Some(courier_db::models::Grouping {
        group_id: Some("matches-today".to_string()),
        ..Default::default()
    });

    let result = app.engine.dispatch_bulk(vec![intake]).await;
    let id = &result.items[0].result.as_ref().unwrap().notification_id;
    let grouping = app.store.find_by_id(id).await.unwrap().grouping.unwrap();
    assert_eq!(grouping.group_id.as_deref(), Some("matches-today"));
    assert_eq!(grouping.batch_id.as_deref(), Some(result.batch_id.as_str()));
}

#[tokio::test]
async fn bulk_after_shutdown_rejects_all() {
    let app = TestEngine::spawn(in_app_registry());
    app.engine.shutdown(Duration::from_secs(1)).await;

    let intakes = (0..12)
        .map(|_| in_app_only("u1", NotificationType::Like))
        .collect();
    let result = app.engine.dispatch_bulk(intakes).await;

    assert_eq!(result.total, 12);
    assert_eq!(result.successful, 0);
    assert_eq!(result.failed, 12);
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn empty_bulk_is_a_noop() {
    let app = TestEngine::spawn(in_app_registry());
    let result = app.engine.dispatch_bulk(Vec::new()).await;
    assert_eq!(result.total, 0);
    assert!(result.items.is_empty());
}
