use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::Utc;
use courier_db::models::{Channel, NotificationStatus, NotificationType};
use courier_services::drivers::EmailDriver;
use courier_services::metrics::DeliveryOutcome;
use courier_services::retry::EXPIRED_ERROR;
use courier_services::{NotificationError, NotificationStore};
use serde_json::json;

use crate::fixtures::gateway::{FakeGateway, email_settings};
use crate::fixtures::test_engine::{
    ScriptedDriver, TestEngine, contacts_with, in_app_registry, permanent, receipt, transient,
    with_channels,
};

#[tokio::test]
async fn transient_email_failure_recovers_on_third_attempt() {
    let gateway = FakeGateway::email_ok("em-1").await;
    gateway
        .then(StatusCode::SERVICE_UNAVAILABLE, json!({ "success": false }))
        .then(StatusCode::SERVICE_UNAVAILABLE, json!({ "success": false }));
    let contacts = contacts_with("u1", Some("alex@example.com"), None);
    let email = EmailDriver::new(&gateway.base_url, &email_settings(&gateway), contacts).unwrap();
    let app = TestEngine::spawn(in_app_registry().with(Arc::new(email)));

    let intake = with_channels("u1", NotificationType::Match, &[Channel::Email, Channel::InApp]);
    let result = app.engine.dispatch(intake).await.unwrap();

    let first = result.channel(Channel::Email).unwrap();
    assert!(!first.sent);
    assert!(first.retrying);
    assert_eq!(result.status, NotificationStatus::Sent);

    app.settle().await;

    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert_eq!(stored.analytics.delivery_attempts, 3);
    assert!(stored.channels.email.sent);
    assert_eq!(stored.channels.email.external_message_id.as_deref(), Some("em-1"));
    assert_eq!(stored.channels.email.attempts, 3);
    assert_eq!(stored.channels.email.error, None);
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert_eq!(gateway.requests_to("/send-email").len(), 3);

    let metrics = app.engine.metrics();
    assert_eq!(metrics.delivered("email", DeliveryOutcome::Retry), 2);
    assert_eq!(metrics.delivered("email", DeliveryOutcome::Success), 1);
    assert_eq!(app.engine.in_flight(), 0);
}

#[tokio::test]
async fn retries_stop_at_attempt_cap() {
    let email = ScriptedDriver::flaky(Channel::Email);
    let app = TestEngine::spawn(in_app_registry().with(email.clone()));

    let intake = with_channels("u1", NotificationType::Message, &[Channel::Email, Channel::InApp]);
    let result = app.engine.dispatch(intake).await.unwrap();
    app.settle().await;

    assert_eq!(email.calls(), 3);
    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert!(!stored.channels.email.sent);
    assert!(stored.channels.email.terminal);
    assert_eq!(stored.channels.email.attempts, 3);
    assert_eq!(stored.channels.email.error.as_deref(), Some("gateway unavailable"));
    assert_eq!(stored.analytics.delivery_attempts, 3);
    assert_eq!(app.engine.metrics().errors("retries_exhausted"), 1);
    assert_eq!(
        app.engine.metrics().delivered("email", DeliveryOutcome::Failure),
        1
    );
}

#[tokio::test]
async fn single_attempt_policy_never_retries() {
    let email = ScriptedDriver::flaky(Channel::Email);
    let app = TestEngine::spawn_with_settings(in_app_registry().with(email.clone()), |s| {
        s.max_retry_attempts = 1;
    });

    let intake = with_channels("u1", NotificationType::Message, &[Channel::Email, Channel::InApp]);
    let result = app.engine.dispatch(intake).await.unwrap();
    app.settle().await;

    assert!(!result.channel(Channel::Email).unwrap().retrying);
    assert_eq!(email.calls(), 1);
    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert!(stored.channels.email.terminal);
}

#[tokio::test]
async fn delivery_only_channels_are_retried_without_a_record() {
    let email = ScriptedDriver::scripted(Channel::Email, vec![transient("timeout"), receipt("em-7")]);
    let app = TestEngine::spawn(in_app_registry().with(email.clone()));

    let intake = with_channels("u2", NotificationType::System, &[Channel::Email]);
    let result = app.engine.dispatch(intake).await.unwrap();
    assert!(!result.saved_to_database);
    assert!(result.channel(Channel::Email).unwrap().retrying);

    app.settle().await;
    assert_eq!(email.calls(), 2);
    assert!(app.store.is_empty());
    assert_eq!(
        app.engine.metrics().delivered("email", DeliveryOutcome::Success),
        1
    );
}

#[tokio::test]
async fn expiry_cuts_retries_short() {
    let email = ScriptedDriver::flaky(Channel::Email);
    let app = TestEngine::spawn_with_settings(in_app_registry().with(email.clone()), |s| {
        s.retry_delay_ms = 5_000;
        s.retry_max_delay_ms = 5_000;
    });

    let mut intake = with_channels("u1", NotificationType::Message, &[Channel::Email, Channel::InApp]);
    intake.expires_at = Some(Utc::now() + chrono::Duration::milliseconds(300));
    let result = app.engine.dispatch(intake).await.unwrap();
    app.settle().await;

    assert_eq!(email.calls(), 1);
    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert!(stored.channels.email.terminal);
    assert_eq!(stored.channels.email.error.as_deref(), Some(EXPIRED_ERROR));
    assert_eq!(app.engine.metrics().errors("expired"), 1);
}

#[tokio::test]
async fn shutdown_abandons_pending_retries() {
    let email = ScriptedDriver::flaky(Channel::Email);
    let app = TestEngine::spawn_with_settings(in_app_registry().with(email.clone()), |s| {
        s.retry_delay_ms = 60_000;
        s.retry_max_delay_ms = 60_000;
    });

    let intake = with_channels("u1", NotificationType::Message, &[Channel::Email, Channel::InApp]);
    app.engine.dispatch(intake).await.unwrap();
    assert_eq!(app.engine.in_flight(), 1);

    assert!(app.engine.shutdown(Duration::from_secs(2)).await);
    assert_eq!(app.engine.in_flight(), 0);
    assert_eq!(email.calls(), 1);
}

#[tokio::test]
async fn force_resend_rearms_failed_channel() {
    let email = ScriptedDriver::scripted(Channel::Email, vec![permanent("bounced")]);
    let app = TestEngine::spawn(in_app_registry().with(email.clone()));

    let intake = with_channels("u1", NotificationType::Payment, &[Channel::Email, Channel::InApp]);
    let result = app.engine.dispatch(intake).await.unwrap();
    app.settle().await;
    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert!(stored.channels.email.terminal);

    let enqueued = app.engine.force_resend(&result.notification_id).await.unwrap();
    assert_eq!(enqueued, vec![Channel::Email]);
    app.settle().await;

    assert_eq!(email.calls(), 2);
    let stored = app.store.find_by_id(&result.notification_id).await.unwrap();
    assert!(stored.channels.email.sent);
    assert!(!stored.channels.email.terminal);
    assert_eq!(stored.channels.email.error, None);
    assert_eq!(stored.status, NotificationStatus::Sent);
}

#[tokio::test]
async fn force_resend_skips_channels_in_flight() {
    let email = ScriptedDriver::flaky(Channel::Email);
    let app = TestEngine::spawn_with_settings(in_app_registry().with(email.clone()), |s| {
        s.retry_delay_ms = 60_000;
        s.retry_max_delay_ms = 60_000;
    });

    let intake = with_channels("u1", NotificationType::Payment, &[Channel::Email, Channel::InApp]);
    let result = app.engine.dispatch(intake).await.unwrap();

    let enqueued = app.engine.force_resend(&result.notification_id).await.unwrap();
    assert!(enqueued.is_empty());
    assert_eq!(email.calls(), 1);

    app.engine.shutdown(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn force_resend_of_unknown_id_is_not_found() {
    let app = TestEngine::spawn(in_app_registry());
    let err = app.engine.force_resend("missing").await.unwrap_err();
    assert!(matches!(err, NotificationError::NotFound));
}

#[tokio::test]
async fn late_retry_success_does_not_regress_read_status() {
    let email = ScriptedDriver::scripted(Channel::Email, vec![transient("503"), receipt("em-late")]);
    let app = TestEngine::spawn_with_settings(in_app_registry().with(email.clone()), |s| {
        s.retry_delay_ms = 300;
        s.retry_max_delay_ms = 300;
    });

    let intake = with_channels("u1", NotificationType::Message, &[Channel::Email, Channel::InApp]);
    let id = app.engine.dispatch(intake).await.unwrap().notification_id;
    let read = app.engine.reads().mark_read("u1", &id, true).await.unwrap();
    assert_eq!(read.status, NotificationStatus::Read);
    assert!(!read.channels.email.sent);

    app.settle().await;

    let stored = app.store.find_by_id(&id).await.unwrap();
    assert_eq!(email.calls(), 2);
    assert!(stored.channels.email.sent);
    assert_eq!(stored.channels.email.external_message_id.as_deref(), Some("em-late"));
    assert_eq!(stored.status, NotificationStatus::Read);
    assert!(stored.read_status);
}
