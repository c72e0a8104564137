//! Referral feed
//!
//! Referral figures live on the user row on newer deployments and as one row
//! per referral on older ones. The snapshot is only ever replaced whole,
//! either by an explicit fetch or after a change notification.

use crate::config::TableNames;
use crate::error::{Result, SdkError};
use crate::notify::Notifications;
use crate::session::Identity;
use crate::traits::{RemoteGateway, SubscriptionGuard};
use rewards_gateway_client::{ChangeEvent, ChangeFilter, Query};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SHARE_TEXT: &str = "Join Flowva and earn points while you build!";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferralSnapshot {
    /// Stored referral link; may be empty
    pub link: String,
    pub referral_count: u64,
    pub points_earned: u64,
    pub note: Option<String>,
}

fn as_count(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().map(|f| f.max(0.0) as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Read the referral figures for a user
pub async fn fetch_referral(
    gateway: &dyn RemoteGateway,
    tables: &TableNames,
    user_id: &str,
) -> Result<ReferralSnapshot> {
    let query = Query::new()
        .select("referral_link,referrals,referral_points")
        .eq("id", user_id);
    match gateway.select_one(&tables.users, &query).await {
        Ok(Some(row)) => {
            return Ok(ReferralSnapshot {
                link: as_text(row.get("referral_link")).unwrap_or_default(),
                referral_count: as_count(row.get("referrals")),
                points_earned: as_count(row.get("referral_points")),
                note: None,
            })
        }
        Ok(None) => {}
        Err(err @ (SdkError::SchemaMismatch(_) | SdkError::Rejected(_))) => {
            warn!(user_id, error = %err, "Referral columns unavailable on users, trying referrals")
        }
        Err(err) => return Err(err),
    }

    let query = Query::new().eq("user_id", user_id);
    let rows = match gateway.select(&tables.referrals, &query).await {
        Ok(rows) => rows,
        Err(err @ (SdkError::SchemaMismatch(_) | SdkError::Rejected(_))) => {
            warn!(user_id, error = %err, "Referrals table mismatch, reporting no referrals");
            return Ok(ReferralSnapshot::default());
        }
        Err(err) => return Err(err),
    };

    let points_earned: u64 = rows
        .iter()
        .map(|row| {
            let points = as_count(row.get("points"));
            if points > 0 {
                points
            } else {
                as_count(row.get("points_earned"))
            }
        })
        .sum();
    let first = rows.first();

    Ok(ReferralSnapshot {
        link: as_text(first.and_then(|r| r.get("link"))).unwrap_or_default(),
        referral_count: rows.len() as u64,
        points_earned,
        note: as_text(first.and_then(|r| r.get("note"))),
    })
}

/// Link to hand out: stored link, then the profile's referral code, then the
/// email local part, then the user id
pub fn referral_link(stored: &str, identity: &Identity, base_url: &str) -> String {
    if !stored.trim().is_empty() {
        return stored.to_string();
    }

    let code = ["referral_code", "referralLink", "referral_link"]
        .iter()
        .find_map(|field| as_text(identity.metadata.get(*field)));
    if let Some(code) = code {
        return format!("{}{}", base_url, code);
    }

    if let Some(local) = identity
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
    {
        return format!("{}{}", base_url, urlencoding::encode(local));
    }

    format!("{}{}", base_url, identity.id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SharePlatform {
    Facebook,
    X,
    LinkedIn,
    WhatsApp,
}

/// Share intent URL for a referral link
pub fn share_url(platform: SharePlatform, link: &str) -> String {
    let url = urlencoding::encode(link);
    let text = urlencoding::encode(SHARE_TEXT);
    match platform {
        SharePlatform::Facebook => format!("https://www.facebook.com/sharer/sharer.php?u={}", url),
        SharePlatform::X => format!("https://twitter.com/intent/tweet?text={}%20{}", text, url),
        SharePlatform::LinkedIn => {
            format!("https://www.linkedin.com/sharing/share-offsite/?url={}", url)
        }
        SharePlatform::WhatsApp => format!("https://api.whatsapp.com/send?text={}%20{}", text, url),
    }
}

fn signed(diff: i128) -> String {
    if diff > 0 {
        format!("+{}", diff)
    } else {
        diff.to_string()
    }
}

struct WatcherShared {
    gateway: Arc<dyn RemoteGateway>,
    tables: TableNames,
    user_id: String,
    notifications: Arc<Notifications>,
    snapshot: watch::Sender<ReferralSnapshot>,
    /// One re-fetch at a time so deltas are computed against the last publish
    fetch_lock: Mutex<()>,
}

impl WatcherShared {
    async fn refetch(&self) -> Result<ReferralSnapshot> {
        let _serial = self.fetch_lock.lock().await;
        let next = fetch_referral(self.gateway.as_ref(), &self.tables, &self.user_id).await?;
        let previous = self.snapshot.borrow().clone();

        if next.referral_count != previous.referral_count {
            let diff = next.referral_count as i128 - previous.referral_count as i128;
            self.notifications
                .info(format!("Referral count updated ({})", signed(diff)));
        }
        if next.points_earned != previous.points_earned {
            let diff = next.points_earned as i128 - previous.points_earned as i128;
            self.notifications
                .success(format!("Referral points updated ({})", signed(diff)));
        }

        self.snapshot.send_replace(next.clone());
        Ok(next)
    }
}

/// Keeps a referral snapshot current from the `referrals` and `users` change
/// feeds. Dropping the watcher unsubscribes both.
pub struct ReferralWatcher {
    shared: Arc<WatcherShared>,
    task: JoinHandle<()>,
    _guards: Vec<SubscriptionGuard>,
}

impl ReferralWatcher {
    /// Fetch once, then follow change notifications.
    ///
    /// A feed that cannot be opened is skipped; the snapshot then only moves
    /// on [`ReferralWatcher::refresh`].
    pub async fn start(
        gateway: Arc<dyn RemoteGateway>,
        tables: TableNames,
        user_id: impl Into<String>,
        notifications: Arc<Notifications>,
    ) -> Self {
        let user_id = user_id.into();

        let initial = match fetch_referral(gateway.as_ref(), &tables, &user_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(user_id = %user_id, error = %err, "Initial referral fetch failed");
                ReferralSnapshot::default()
            }
        };
        let (snapshot, _) = watch::channel(initial);

        let filters = [
            ChangeFilter::table(&tables.referrals).with_eq("user_id", &user_id),
            ChangeFilter::table(&tables.users).with_eq("id", &user_id),
        ];
        let (merged_tx, merged_rx) = mpsc::unbounded_channel();
        let mut guards = Vec::new();
        for filter in filters {
            match gateway.subscribe(filter.clone()).await {
                Ok(subscription) => {
                    let (events, guard) = subscription.into_parts();
                    guards.push(guard);
                    tokio::spawn(forward(events, merged_tx.clone()));
                }
                Err(err) => warn!(topic = %filter.topic(), error = %err, "Referral feed unavailable"),
            }
        }
        drop(merged_tx);

        let shared = Arc::new(WatcherShared {
            gateway,
            tables,
            user_id,
            notifications,
            snapshot,
            fetch_lock: Mutex::new(()),
        });
        let task = tokio::spawn(follow(shared.clone(), merged_rx));

        Self {
            shared,
            task,
            _guards: guards,
        }
    }

    pub fn snapshot(&self) -> ReferralSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn changes(&self) -> watch::Receiver<ReferralSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Re-fetch now
    pub async fn refresh(&self) -> Result<ReferralSnapshot> {
        self.shared.refetch().await
    }
}

impl Drop for ReferralWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn forward(
    mut events: mpsc::UnboundedReceiver<ChangeEvent>,
    merged: mpsc::UnboundedSender<ChangeEvent>,
) {
    while let Some(event) = events.recv().await {
        if merged.send(event).is_err() {
            break;
        }
    }
}

async fn follow(shared: Arc<WatcherShared>, mut events: mpsc::UnboundedReceiver<ChangeEvent>) {
    while let Some(event) = events.recv().await {
        debug!(table = %event.table, change = ?event.change_type, "Referral change, re-fetching");
        if let Err(err) = shared.refetch().await {
            warn!(user_id = %shared.user_id, error = %err, "Referral re-fetch failed");
        }
    }
}
