//! Referral snapshot fetch and the change-feed watcher

use rewards_gateway_client::ChangeType;
use rewards_sdk::config::TableNames;
use rewards_sdk::referral::fetch_referral;
use rewards_sdk::testing::{Call, MockGateway};
use rewards_sdk::{NotificationKind, Notifications, ReferralWatcher, SdkError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_user_row_figures() {
    let gateway = MockGateway::new().with_row(
        "users",
        json!({ "id": "u-1", "referral_link": "https://x.example/r/ada", "referrals": 3, "referral_points": 75 }),
    );

    let snapshot = fetch_referral(&gateway, &TableNames::default(), "u-1")
        .await
        .unwrap();

    assert_eq!(snapshot.link, "https://x.example/r/ada");
    assert_eq!(snapshot.referral_count, 3);
    assert_eq!(snapshot.points_earned, 75);
    assert_eq!(gateway.call_count(&Call::Select("referrals".into())), 0);
}

#[tokio::test]
async fn test_aggregates_referral_rows() {
    let gateway = MockGateway::new()
        .with_row(
            "referrals",
            json!({ "user_id": "u-1", "points": 25, "link": "https://x.example/r/ada", "note": "first" }),
        )
        .with_row("referrals", json!({ "user_id": "u-1", "points_earned": 10 }))
        .with_row("referrals", json!({ "user_id": "u-2", "points": 99 }));

    let snapshot = fetch_referral(&gateway, &TableNames::default(), "u-1")
        .await
        .unwrap();

    assert_eq!(snapshot.referral_count, 2);
    assert_eq!(snapshot.points_earned, 35);
    assert_eq!(snapshot.link, "https://x.example/r/ada");
    assert_eq!(snapshot.note.as_deref(), Some("first"));
}

#[tokio::test]
async fn test_missing_tables_report_nothing() {
    let gateway = MockGateway::new();
    gateway.fail_select("users", SdkError::SchemaMismatch("column users.referrals does not exist".into()));
    gateway.fail_select("referrals", SdkError::SchemaMismatch("relation \"referrals\" does not exist".into()));

    let snapshot = fetch_referral(&gateway, &TableNames::default(), "u-1")
        .await
        .unwrap();

    assert_eq!(snapshot, Default::default());
}

#[tokio::test]
async fn test_network_failure_propagates() {
    let gateway = MockGateway::new();
    gateway.fail_select("referrals", SdkError::Network("timeout".into()));

    let result = fetch_referral(&gateway, &TableNames::default(), "u-1").await;

    assert!(matches!(result, Err(SdkError::Network(_))));
}

#[tokio::test]
async fn test_network_failure_on_users_is_not_masked() {
    let gateway = MockGateway::new().with_row(
        "referrals",
        json!({ "user_id": "u-1", "points": 25 }),
    );
    gateway.fail_select("users", SdkError::Network("connection reset".into()));

    let result = fetch_referral(&gateway, &TableNames::default(), "u-1").await;

    assert!(matches!(result, Err(SdkError::Network(_))));
    assert_eq!(gateway.call_count(&Call::Select("referrals".into())), 0);
}

#[tokio::test]
async fn test_watcher_follows_user_row_changes() {
    let gateway = Arc::new(MockGateway::new().with_row(
        "users",
        json!({ "id": "u-1", "referral_link": "", "referrals": 1, "referral_points": 25 }),
    ));
    let notifications = Arc::new(Notifications::new(Duration::from_secs(60)));

    let watcher = ReferralWatcher::start(
        gateway.clone(),
        TableNames::default(),
        "u-1",
        notifications.clone(),
    )
    .await;
    assert_eq!(watcher.snapshot().referral_count, 1);
    assert_eq!(gateway.active_subscriptions(), 2);

    let mut changes = watcher.changes();
    gateway.patch_rows("users", "id", "u-1", json!({ "referrals": 2, "referral_points": 50 }));
    gateway.emit(
        "users",
        ChangeType::Update,
        json!({ "id": "u-1", "referrals": 2, "referral_points": 50 }),
    );
    tokio::time::timeout(Duration::from_secs(5), changes.changed())
        .await
        .unwrap()
        .unwrap();

    let snapshot = watcher.snapshot();
    assert_eq!(snapshot.referral_count, 2);
    assert_eq!(snapshot.points_earned, 50);

    let messages: Vec<_> = notifications
        .active()
        .into_iter()
        .map(|n| (n.kind, n.message))
        .collect();
    assert!(messages.contains(&(NotificationKind::Info, "Referral count updated (+1)".into())));
    assert!(messages.contains(&(NotificationKind::Success, "Referral points updated (+25)".into())));

    drop(watcher);
    assert_eq!(gateway.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_watcher_without_feed_still_refreshes() {
    let gateway = Arc::new(MockGateway::new().with_row(
        "users",
        json!({ "id": "u-1", "referrals": 0, "referral_points": 0 }),
    ));
    gateway.fail_subscribe("users", SdkError::Network("socket closed".into()));
    gateway.fail_subscribe("referrals", SdkError::Network("socket closed".into()));
    let notifications = Arc::new(Notifications::new(Duration::from_secs(60)));

    let watcher = ReferralWatcher::start(
        gateway.clone(),
        TableNames::default(),
        "u-1",
        notifications.clone(),
    )
    .await;
    gateway.patch_rows("users", "id", "u-1", json!({ "referrals": 4 }));

    let snapshot = watcher.refresh().await.unwrap();

    assert_eq!(snapshot.referral_count, 4);
    assert_eq!(
        notifications.latest().map(|n| n.message),
        Some("Referral count updated (+4)".into())
    );
}
