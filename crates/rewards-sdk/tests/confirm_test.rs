//! Confirmation waiter lifecycle on paused time

use rewards_gateway_client::{ChangeType, Credentials};
use rewards_sdk::config::ConfirmationSettings;
use rewards_sdk::testing::{Call, MockAuth, MockGateway};
use rewards_sdk::{
    ConfirmationMode, ConfirmationStatus, ConfirmationWaiter, SdkError, SessionStore,
    SignUpOutcome, TableConfirmationSource, WaitHandle,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const EMAIL: &str = "ada@example.com";
const TABLE: &str = "email_confirmations";

struct Fixture {
    gateway: Arc<MockGateway>,
    auth: Arc<MockAuth>,
    session: Arc<SessionStore>,
    waiter: ConfirmationWaiter,
}

fn fixture(mode: ConfirmationMode) -> Fixture {
    fixture_with(MockGateway::new(), mode)
}

fn fixture_with(gateway: MockGateway, mode: ConfirmationMode) -> Fixture {
    fixture_with_auth(gateway, MockAuth::new(), mode)
}

fn fixture_with_auth(gateway: MockGateway, auth: MockAuth, mode: ConfirmationMode) -> Fixture {
    let gateway = Arc::new(gateway);
    let auth = Arc::new(auth.with_confirmation_required(true));
    let session = Arc::new(SessionStore::new(auth.clone()));
    let source = Arc::new(TableConfirmationSource::new(gateway.clone(), TABLE));
    let settings = ConfirmationSettings {
        mode,
        ..ConfirmationSettings::default()
    };
    let waiter = ConfirmationWaiter::new(session.clone(), source, settings);
    Fixture {
        gateway,
        auth,
        session,
        waiter,
    }
}

fn credentials() -> Credentials {
    Credentials::new(EMAIL, "correct-horse")
}

async fn start_waiting(f: &Fixture) -> WaitHandle {
    match f.waiter.sign_up(credentials()).await.unwrap() {
        SignUpOutcome::AwaitingConfirmation(handle) => handle,
        other => panic!("expected to wait, got {:?}", other),
    }
}

fn polls(gateway: &MockGateway) -> usize {
    gateway.call_count(&Call::Select(TABLE.into()))
}

/// Confirm the account and publish the confirmation row
fn confirm_out_of_band(f: &Fixture) {
    f.auth.confirm(EMAIL);
    f.gateway
        .push_row(TABLE, json!({ "email": EMAIL, "confirmed": true }));
}

#[tokio::test(start_paused = true)]
async fn test_times_out_after_thirty_polls() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    assert_eq!(handle.status(), ConfirmationStatus::Waiting);
    assert!(handle.is_subscribed());

    sleep(Duration::from_secs(125)).await;

    assert_eq!(handle.status(), ConfirmationStatus::TimedOut);
    assert_eq!(handle.snapshot().attempts, 30);
    assert_eq!(polls(&f.gateway), 30);
    assert!(!handle.is_polling());
    assert!(!handle.is_subscribed());
    assert_eq!(f.gateway.active_subscriptions(), 0);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(polls(&f.gateway), 30);
    assert_eq!(f.auth.sign_in_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_releases_feed_and_poll() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    sleep(Duration::from_secs(9)).await;
    assert_eq!(polls(&f.gateway), 2);

    handle.back();

    assert_eq!(handle.status(), ConfirmationStatus::Cancelled);
    assert!(!handle.is_polling());
    assert!(!handle.is_subscribed());
    assert_eq!(f.gateway.active_subscriptions(), 0);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(polls(&f.gateway), 2);
    assert_eq!(handle.snapshot().attempts, 2);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_handle_stops_waiting() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    assert_eq!(f.gateway.active_subscriptions(), 1);

    drop(handle);

    assert_eq!(f.gateway.active_subscriptions(), 0);
    sleep(Duration::from_secs(60)).await;
    assert_eq!(polls(&f.gateway), 0);
}

#[tokio::test(start_paused = true)]
async fn test_feed_confirmation_signs_in() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    let mut changes = handle.status_changes();

    f.auth.confirm(EMAIL);
    f.gateway.emit(
        TABLE,
        ChangeType::Update,
        json!({ "email": EMAIL, "confirmed_at": "2025-03-14T10:00:00Z" }),
    );
    changes
        .wait_for(|status| *status == ConfirmationStatus::Confirmed)
        .await
        .unwrap();

    assert!(f.session.is_signed_in());
    assert_eq!(f.auth.sign_in_count(), 1);
    // Confirmed before the first poll was due
    assert_eq!(polls(&f.gateway), 0);
    assert!(!handle.is_polling());
    assert_eq!(f.gateway.active_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_feed_ignores_other_emails() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    f.gateway.emit(
        TABLE,
        ChangeType::Update,
        json!({ "email": "someone@example.com", "confirmed": true }),
    );
    f.gateway.emit(
        TABLE,
        ChangeType::Update,
        json!({ "email": EMAIL, "confirmed": false }),
    );
    sleep(Duration::from_secs(1)).await;

    assert_eq!(handle.status(), ConfirmationStatus::Waiting);
    assert_eq!(f.auth.sign_in_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_poll_confirmation_signs_in() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    sleep(Duration::from_secs(9)).await;
    confirm_out_of_band(&f);
    sleep(Duration::from_secs(4)).await;

    assert_eq!(handle.status(), ConfirmationStatus::Confirmed);
    assert_eq!(handle.snapshot().attempts, 3);
    assert!(f.session.is_signed_in());
    assert!(!handle.is_subscribed());
}

#[tokio::test(start_paused = true)]
async fn test_failed_sign_in_keeps_waiting() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    confirm_out_of_band(&f);
    f.auth
        .fail_sign_in(Some(SdkError::Network("connection reset".into())));
    sleep(Duration::from_secs(5)).await;

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.status, ConfirmationStatus::Waiting);
    assert!(snapshot.last_error.is_some());
    assert!(!f.session.is_signed_in());

    f.auth.fail_sign_in(None);
    sleep(Duration::from_secs(4)).await;

    assert_eq!(handle.status(), ConfirmationStatus::Confirmed);
    assert!(f.session.is_signed_in());
}

#[tokio::test(start_paused = true)]
async fn test_recheck_and_feed_sign_in_once() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    confirm_out_of_band(&f);
    let (status, _) = tokio::join!(handle.recheck(), async {
        f.gateway.emit(
            TABLE,
            ChangeType::Update,
            json!({ "email": EMAIL, "confirmed": true }),
        );
    });
    sleep(Duration::from_secs(1)).await;

    assert_eq!(status.unwrap(), ConfirmationStatus::Confirmed);
    assert_eq!(handle.status(), ConfirmationStatus::Confirmed);
    assert_eq!(f.auth.sign_in_count(), 1);
    assert!(!handle.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_recheck_before_confirmation_keeps_waiting() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;

    assert_eq!(handle.recheck().await.unwrap(), ConfirmationStatus::Waiting);
    assert_eq!(f.auth.sign_in_count(), 0);
    assert!(handle.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_recheck_after_timeout() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    sleep(Duration::from_secs(125)).await;
    assert_eq!(handle.status(), ConfirmationStatus::TimedOut);

    confirm_out_of_band(&f);
    assert_eq!(handle.recheck().await.unwrap(), ConfirmationStatus::Confirmed);
    assert!(f.session.is_signed_in());
}

#[tokio::test(start_paused = true)]
async fn test_back_during_recheck_sign_in_discards_session() {
    let f = fixture_with_auth(
        MockGateway::new(),
        MockAuth::new().with_sign_in_latency(Duration::from_secs(1)),
        ConfirmationMode::AwaitConfirmation,
    );
    let handle = start_waiting(&f).await;

    confirm_out_of_band(&f);
    let (status, _) = tokio::join!(handle.recheck(), async {
        sleep(Duration::from_millis(100)).await;
        handle.back();
    });
    sleep(Duration::from_secs(1)).await;

    assert_eq!(status.unwrap(), ConfirmationStatus::Cancelled);
    assert_eq!(handle.status(), ConfirmationStatus::Cancelled);
    assert_eq!(f.auth.sign_in_count(), 1);
    assert!(!f.session.is_signed_in());
    assert!(!handle.is_polling());
}

#[tokio::test(start_paused = true)]
async fn test_recheck_after_cancel_is_inert() {
    let f = fixture(ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    handle.cancel();

    confirm_out_of_band(&f);
    assert_eq!(handle.recheck().await.unwrap(), ConfirmationStatus::Cancelled);
    assert_eq!(f.auth.sign_in_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_polls_without_feed() {
    let gateway = MockGateway::new();
    gateway.fail_subscribe(TABLE, SdkError::Network("socket closed".into()));
    let f = fixture_with(gateway, ConfirmationMode::AwaitConfirmation);
    let handle = start_waiting(&f).await;
    assert!(!handle.is_subscribed());

    confirm_out_of_band(&f);
    sleep(Duration::from_secs(5)).await;

    assert_eq!(handle.status(), ConfirmationStatus::Confirmed);
}

#[tokio::test]
async fn test_auto_sign_in_failure_is_reported() {
    let f = fixture(ConfirmationMode::AutoSignIn);

    let err = f.waiter.sign_up(credentials()).await.unwrap_err();

    assert_eq!(
        err.user_message(),
        "Sign-up succeeded but automatic sign-in failed. Please try signing in or check auth settings."
    );
    assert_eq!(f.auth.sign_in_count(), 1);
    assert!(!f.session.is_signed_in());
    assert_eq!(f.gateway.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_session_from_sign_up_skips_waiting() {
    let gateway = Arc::new(MockGateway::new());
    let auth = Arc::new(MockAuth::new());
    let session = Arc::new(SessionStore::new(auth.clone()));
    let source = Arc::new(TableConfirmationSource::new(gateway.clone(), TABLE));
    let waiter = ConfirmationWaiter::new(session.clone(), source, ConfirmationSettings::default());

    let outcome = waiter.sign_up(credentials()).await.unwrap();

    match outcome {
        SignUpOutcome::SignedIn(identity) => assert_eq!(identity.email.as_deref(), Some(EMAIL)),
        other => panic!("expected a session, got {:?}", other),
    }
    assert!(session.is_signed_in());
    assert_eq!(gateway.active_subscriptions(), 0);
}
