//! Rewards hub facade
//!
//! Wires the session, gateway, balance, streak, reconciler and notifications
//! together for a UI shell. Every claim outcome becomes a notification; no
//! claim failure escapes as an `Err`.

use crate::balance::{BalanceProjection, BalanceSnapshot, GoalProgress};
use crate::catalog::{self, Catalog, Redemption, RewardRow};
use crate::claim::{
    ClaimAttempt, ClaimReconciler, ClaimResult, ClaimTier, Claimable, NotClaimedReason,
    StreakSnapshot, StreakTracker,
};
use crate::client::HostedBackend;
use crate::clock::{Clock, SystemClock};
use crate::config::SdkConfig;
use crate::confirm::{
    ConfirmationStatus, ConfirmationWaiter, SignUpOutcome, TableConfirmationSource,
};
use crate::error::{Result, SdkError};
use crate::notify::Notifications;
use crate::referral::{self, ReferralWatcher, SharePlatform};
use crate::session::{Identity, ListenerHandle, SessionStore};
use crate::traits::{AuthProvider, RemoteGateway};
use rewards_gateway_client::Credentials;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

const LOAD_FAILED: &str = "Signed in, but your points could not be loaded";

/// The offer featured on the hub
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeaturedOffer {
    pub id: String,
    pub title: String,
    pub description: String,
    pub points: u64,
    pub cta_text: String,
    pub url: Option<String>,
}

impl FeaturedOffer {
    pub fn claimable(&self) -> Claimable {
        Claimable::Offer {
            id: self.id.clone(),
            points: self.points,
        }
    }
}

/// Everything the hub dashboard shows
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HubSnapshot {
    pub identity: Option<Identity>,
    pub balance: BalanceSnapshot,
    pub goal: GoalProgress,
    pub streak: StreakSnapshot,
    /// Monday-first claimed flags for this week
    pub week: [bool; 7],
    pub points_per_day: u64,
}

/// Re-fetches the signed-in user's balance and streak
#[derive(Clone)]
struct StateLoader {
    gateway: Arc<dyn RemoteGateway>,
    users_table: String,
    session: Arc<SessionStore>,
    balance: Arc<BalanceProjection>,
    streak: Arc<StreakTracker>,
}

impl StateLoader {
    async fn load(&self) -> Result<()> {
        let identity = self.session.require_identity()?;

        self.balance
            .refresh(self.gateway.as_ref(), &self.users_table, &identity.id)
            .await?;
        if let Err(err) = self.streak.refresh(&identity.id).await {
            warn!(user_id = %identity.id, error = %err, "Streak unavailable");
        }
        Ok(())
    }
}

/// Rejections are shown verbatim, anything else with the action's own text
fn notify_failure(notifications: &Notifications, cause: &SdkError, fallback: &str) {
    match cause {
        SdkError::Rejected(_) => notifications.error(cause.user_message()),
        _ => notifications.error(fallback),
    };
}

pub struct RewardsHub {
    config: SdkConfig,
    gateway: Arc<dyn RemoteGateway>,
    session: Arc<SessionStore>,
    balance: Arc<BalanceProjection>,
    streak: Arc<StreakTracker>,
    reconciler: Arc<ClaimReconciler>,
    notifications: Arc<Notifications>,
    waiter: ConfirmationWaiter,
    loader: StateLoader,
    clock: Arc<dyn Clock>,
    _identity_listener: ListenerHandle,
}

impl RewardsHub {
    /// Hub over the hosted backend. Must be called within a tokio runtime.
    pub fn hosted(config: SdkConfig) -> Result<Self> {
        let backend = Arc::new(HostedBackend::new(config.gateway_config())?);
        Ok(Self::new(config, backend.clone(), backend, Arc::new(SystemClock)))
    }

    /// Must be called within a tokio runtime.
    pub fn new(
        config: SdkConfig,
        gateway: Arc<dyn RemoteGateway>,
        auth: Arc<dyn AuthProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let session = Arc::new(SessionStore::new(auth));
        let balance = Arc::new(BalanceProjection::new());
        let streak = Arc::new(StreakTracker::new(
            gateway.clone(),
            config.tables.clone(),
            clock.clone(),
        ));
        let reconciler = Arc::new(ClaimReconciler::new(
            gateway.clone(),
            balance.clone(),
            streak.clone(),
            config.tables.clone(),
            clock.clone(),
        ));
        let notifications = Arc::new(Notifications::new(Duration::from_millis(
            config.notifications.ttl_ms,
        )));
        let source = Arc::new(TableConfirmationSource::new(
            gateway.clone(),
            config.confirmation.table.clone(),
        ));
        let waiter = ConfirmationWaiter::new(session.clone(), source, config.confirmation.clone());

        // State belongs to one identity; drop it whenever the identity changes
        let identity_listener = {
            let balance = balance.clone();
            let streak = streak.clone();
            let reconciler = reconciler.clone();
            session.on_identity_changed(move |identity| {
                debug!(user_id = ?identity.map(|i| &i.id), "Resetting hub state");
                balance.reset();
                streak.reset();
                reconciler.reset();
            })
        };

        let loader = StateLoader {
            gateway: gateway.clone(),
            users_table: config.tables.users.clone(),
            session: session.clone(),
            balance: balance.clone(),
            streak: streak.clone(),
        };

        Self {
            config,
            gateway,
            session,
            balance,
            streak,
            reconciler,
            notifications,
            waiter,
            loader,
            clock,
            _identity_listener: identity_listener,
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn balance(&self) -> &BalanceProjection {
        &self.balance
    }

    pub fn notifications(&self) -> &Notifications {
        &self.notifications
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn featured_offer(&self) -> FeaturedOffer {
        FeaturedOffer {
            id: "offer-1".into(),
            title: "Reclaim: automate and optimize your schedule".into(),
            description: "Reclaim.ai is an AI-powered calendar assistant that schedules your tasks, meetings and breaks.".into(),
            points: 50,
            cta_text: "Claim 50 pts".into(),
            url: Some("https://reclaim.ai".into()),
        }
    }

    /// Sign in and load the user's state.
    ///
    /// Once the session exists the sign-in has succeeded; a failed load is
    /// reported as a notification, not as an error.
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity> {
        let identity = self.session.sign_in(credentials).await?;
        self.load_after_sign_in().await;
        Ok(identity)
    }

    /// Register; waits for confirmation or signs in per the configured mode.
    ///
    /// When waiting, the user's state is loaded as soon as the wait reaches
    /// `Confirmed`, whichever channel got there.
    pub async fn sign_up(&self, credentials: Credentials) -> Result<SignUpOutcome> {
        let outcome = self.waiter.sign_up(credentials).await?;
        match &outcome {
            SignUpOutcome::SignedIn(_) => self.load_after_sign_in().await,
            SignUpOutcome::AwaitingConfirmation(handle) => {
                self.load_when_confirmed(handle.status_changes())
            }
        }
        Ok(outcome)
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.session.sign_out().await
    }

    /// Re-fetch balance and streak for the signed-in user
    pub async fn load(&self) -> Result<HubSnapshot> {
        self.loader.load().await?;
        Ok(self.snapshot())
    }

    async fn load_after_sign_in(&self) {
        if let Err(err) = self.loader.load().await {
            warn!(error = %err, "Signed in but state load failed");
            notify_failure(&self.notifications, &err, LOAD_FAILED);
        }
    }

    /// Load once the wait is confirmed; gives up when it is cancelled or dropped
    fn load_when_confirmed(&self, mut status: watch::Receiver<ConfirmationStatus>) {
        let loader = self.loader.clone();
        let notifications = self.notifications.clone();

        tokio::spawn(async move {
            let confirmed = match status
                .wait_for(|s| {
                    matches!(s, ConfirmationStatus::Confirmed | ConfirmationStatus::Cancelled)
                })
                .await
            {
                Ok(status) => *status == ConfirmationStatus::Confirmed,
                Err(_) => false,
            };
            if !confirmed {
                return;
            }

            if let Err(err) = loader.load().await {
                warn!(error = %err, "Confirmed but state load failed");
                notify_failure(&notifications, &err, LOAD_FAILED);
            }
        });
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let streak = self.streak.snapshot();
        HubSnapshot {
            identity: self.session.identity(),
            balance: self.balance.snapshot(),
            goal: self.balance.goal_progress(self.config.rewards.goal),
            week: streak.week(self.clock.today()),
            streak,
            points_per_day: self.config.rewards.points_per_day,
        }
    }

    /// Claim today's streak points; `None` when signed out
    pub async fn claim_daily(&self) -> Option<ClaimAttempt> {
        let Some(identity) = self.session.identity() else {
            self.notifications.info("Sign in to claim your daily points");
            return None;
        };
        let points = self.config.rewards.points_per_day;
        let claimable = Claimable::DailyStreak {
            points_per_day: points,
        };

        let attempt = self.reconciler.attempt_claim(&identity, &claimable).await;
        match &attempt.result {
            ClaimResult::Claimed { tier, .. } => {
                let suffix = match tier {
                    ClaimTier::Procedure => "",
                    ClaimTier::FallbackInsert => " (fallback)",
                    ClaimTier::FallbackLegacyColumn => " (local fallback)",
                };
                self.notifications
                    .success(format!("{} points added{}", points, suffix));
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            } => {
                self.notifications.info("Daily points already claimed");
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::InFlight,
            } => {}
            ClaimResult::Failed { cause } => {
                notify_failure(
                    &self.notifications,
                    cause,
                    "Failed to claim points. Try again later.",
                );
            }
        }
        Some(attempt)
    }

    /// Claim an offer; `None` when signed out
    pub async fn claim_offer(&self, offer: &FeaturedOffer) -> Option<ClaimAttempt> {
        let Some(identity) = self.session.identity() else {
            self.notifications.info("Sign in to claim this offer");
            return None;
        };

        let attempt = self
            .reconciler
            .attempt_claim(&identity, &offer.claimable())
            .await;
        match &attempt.result {
            ClaimResult::Claimed { .. } => {
                self.notifications
                    .success(format!("Claimed {} pts", offer.points));
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            } => {
                self.notifications.info("Offer already claimed");
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::InFlight,
            } => {}
            ClaimResult::Failed { cause } => {
                notify_failure(&self.notifications, cause, "Failed to claim offer");
            }
        }
        Some(attempt)
    }

    /// Redeem a catalog reward; `None` when signed out or not redeemable
    pub async fn redeem(&self, reward: &RewardRow) -> Option<ClaimAttempt> {
        let Some(identity) = self.session.identity() else {
            self.notifications.info("Sign in to redeem rewards");
            return None;
        };
        let Some(claimable) = reward.to_claimable() else {
            self.notifications.info("This reward is coming soon");
            return None;
        };

        let attempt = self.reconciler.attempt_claim(&identity, &claimable).await;
        match &attempt.result {
            ClaimResult::Claimed { .. } => {
                self.notifications
                    .success(format!("Redeemed {}!", reward.title));
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            }
            | ClaimResult::Failed {
                cause: SdkError::InsufficientBalance { .. },
            } => {
                self.notifications
                    .info("Unable to redeem: insufficient points or not available.");
            }
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::InFlight,
            } => {}
            ClaimResult::Failed { cause } => {
                notify_failure(&self.notifications, cause, "Redeem failed. Try again later.");
            }
        }
        Some(attempt)
    }

    pub async fn catalog(&self) -> Result<Catalog> {
        catalog::fetch_catalog(self.gateway.as_ref(), &self.config.tables).await
    }

    pub async fn redemptions(&self) -> Result<Vec<Redemption>> {
        let identity = self.session.require_identity()?;
        catalog::fetch_redemptions(self.gateway.as_ref(), &self.config.tables, &identity.id).await
    }

    /// Follow the signed-in user's referral figures
    pub async fn watch_referrals(&self) -> Result<ReferralWatcher> {
        let identity = self.session.require_identity()?;
        Ok(ReferralWatcher::start(
            self.gateway.clone(),
            self.config.tables.clone(),
            identity.id,
            self.notifications.clone(),
        )
        .await)
    }

    /// Link to share, given the stored one (possibly empty)
    pub fn referral_link(&self, stored: &str) -> Option<String> {
        let identity = self.session.identity()?;
        Some(referral::referral_link(
            stored,
            &identity,
            &self.config.rewards.referral_base_url,
        ))
    }

    pub fn share_url(&self, platform: SharePlatform, stored: &str) -> Option<String> {
        self.referral_link(stored)
            .map(|link| referral::share_url(platform, &link))
    }
}
