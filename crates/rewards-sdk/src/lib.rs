//! Rewards SDK - points and rewards client core
//!
//! Client-side state for a hosted points/rewards backend: sessions, the
//! balance projection, claim reconciliation, streaks, email confirmation,
//! referrals and the reward catalog.
//!
//! # Architecture
//!
//! All persisted state lives behind two seams:
//! - [`RemoteGateway`]: table reads/writes, named procedures, change feeds
//! - [`AuthProvider`]: session issuance and auth events
//!
//! [`HostedBackend`] implements both over `rewards-gateway-client`; the
//! `testing` module provides in-memory doubles.
//!
//! Claims go procedure first. Only a missing procedure falls back to a direct
//! claim-record insert, and only a missing table falls back further to the
//! legacy `last_daily_claim` column. Every claim ends with a re-fetch of the
//! authoritative balance and claim history.
//!
//! # Example
//!
//! ```rust,ignore
//! use rewards_sdk::{RewardsHub, SdkConfig};
//! use rewards_gateway_client::Credentials;
//!
//! let hub = RewardsHub::hosted(SdkConfig::load("rewards.toml")?)?;
//! hub.sign_in(&Credentials::new("ada@example.com", "correct-horse")).await?;
//!
//! if let Some(attempt) = hub.claim_daily().await {
//!     println!("{:?}", attempt.result);
//! }
//! for note in hub.notifications().active() {
//!     println!("{}", note.message);
//! }
//! ```

// Core traits for backend collaborators
pub mod traits;

// Hosted backend adapter
pub mod client;

// Identity and credential lifecycle
pub mod session;
pub mod credentials;

// Balance, claims and streaks
pub mod balance;
pub mod claim;
pub mod clock;

// Email confirmation after sign-up
pub mod confirm;

// Presentation projections
pub mod catalog;
pub mod referral;
pub mod notify;

// Facade
pub mod hub;

pub mod config;
pub mod error;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export core traits
pub use traits::{AuthEvent, AuthProvider, RemoteGateway, Subscription, SubscriptionGuard};

pub use client::HostedBackend;
pub use session::{Identity, ListenerHandle, SessionStore};

pub use balance::{BalanceProjection, BalanceSnapshot, BalanceSource, GoalProgress};
pub use claim::{
    ClaimAttempt, ClaimKey, ClaimKind, ClaimReconciler, ClaimResult, ClaimTier, Claimable,
    NotClaimedReason, StreakSnapshot, StreakTracker,
};
pub use clock::{Clock, FixedClock, SystemClock};

pub use confirm::{
    ConfirmationMode, ConfirmationSource, ConfirmationStatus, ConfirmationWaiter, SignUpOutcome,
    TableConfirmationSource, WaitHandle, WaitSnapshot,
};

pub use catalog::{Catalog, Redemption, RewardRow, RewardState, Tab, TabCounts};
pub use notify::{Notification, NotificationKind, Notifications};
pub use referral::{ReferralSnapshot, ReferralWatcher, SharePlatform};

pub use hub::{FeaturedOffer, HubSnapshot, RewardsHub};

pub use config::SdkConfig;
pub use error::{Result, SdkError};
