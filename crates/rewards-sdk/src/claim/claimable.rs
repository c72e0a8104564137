//! Claimable actions and reconciliation outcomes

use crate::error::SdkError;
use serde::Serialize;
use serde_json::json;
use std::fmt;

/// An action that credits or debits the balance exactly once
/// (per day for the daily streak, ever for offers and rewards)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claimable {
    DailyStreak { points_per_day: u64 },
    Offer { id: String, points: u64 },
    Reward { id: String, title: String, cost: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimKind {
    DailyStreak,
    Offer,
    Reward,
}

impl fmt::Display for ClaimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClaimKind::DailyStreak => "daily_streak",
            ClaimKind::Offer => "offer",
            ClaimKind::Reward => "reward",
        };
        f.write_str(name)
    }
}

/// Identity of one claim: `(user, kind, id)`; the daily streak uses the UTC
/// date as its id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ClaimKey {
    pub user_id: String,
    pub kind: ClaimKind,
    pub id: String,
}

impl fmt::Display for ClaimKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.user_id, self.id)
    }
}

impl Claimable {
    pub fn kind(&self) -> ClaimKind {
        match self {
            Claimable::DailyStreak { .. } => ClaimKind::DailyStreak,
            Claimable::Offer { .. } => ClaimKind::Offer,
            Claimable::Reward { .. } => ClaimKind::Reward,
        }
    }

    pub fn key(&self, user_id: &str, day: &str) -> ClaimKey {
        let id = match self {
            Claimable::DailyStreak { .. } => day.to_string(),
            Claimable::Offer { id, .. } | Claimable::Reward { id, .. } => id.clone(),
        };
        ClaimKey {
            user_id: user_id.to_string(),
            kind: self.kind(),
            id,
        }
    }

    /// Signed balance change; negative for redemptions
    pub fn points_delta(&self) -> i64 {
        match self {
            Claimable::DailyStreak { points_per_day } => *points_per_day as i64,
            Claimable::Offer { points, .. } => *points as i64,
            Claimable::Reward { cost, .. } => -(*cost as i64),
        }
    }

    /// Remote procedure that performs this claim atomically
    pub fn procedure(&self) -> &'static str {
        match self {
            Claimable::DailyStreak { .. } => "claim_daily_points",
            Claimable::Offer { .. } => "claim_offer",
            Claimable::Reward { .. } => "redeem_reward",
        }
    }

    /// Arguments for [`Claimable::procedure`]
    pub fn procedure_args(&self, user_id: &str) -> serde_json::Value {
        match self {
            Claimable::DailyStreak { points_per_day } => {
                json!({ "p_user_id": user_id, "p_points": points_per_day })
            }
            Claimable::Offer { id, .. } => json!({ "user_id": user_id, "offer_id": id }),
            Claimable::Reward { id, .. } => json!({ "p_reward_id": id }),
        }
    }

    /// Whether a direct claim-record insert may stand in for the procedure
    pub fn supports_fallback(&self) -> bool {
        !matches!(self, Claimable::Reward { .. })
    }

    /// Whether the `last_daily_claim` column may stand in for the claim table
    pub fn supports_legacy_column(&self) -> bool {
        matches!(self, Claimable::DailyStreak { .. })
    }
}

/// Path a claim took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimTier {
    Procedure,
    FallbackInsert,
    FallbackLegacyColumn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotClaimedReason {
    /// Already recorded (locally, or the server said so)
    AlreadyClaimed,
    /// Another attempt for the same key is outstanding
    InFlight,
}

/// Authoritative outcome of one reconciliation run
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult {
    Claimed { new_balance: u64, tier: ClaimTier },
    NotClaimed { reason: NotClaimedReason },
    Failed { cause: SdkError },
}

impl ClaimResult {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimResult::Claimed { .. })
    }

    pub fn already_claimed(&self) -> bool {
        matches!(
            self,
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed
            }
        )
    }
}

/// Trace of one reconciliation run; never persisted
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimAttempt {
    pub key: ClaimKey,
    /// Tiers contacted, in order
    pub tiers: Vec<ClaimTier>,
    pub result: ClaimResult,
}

impl ClaimAttempt {
    pub(crate) fn new(key: ClaimKey) -> Self {
        Self {
            key,
            tiers: Vec::new(),
            result: ClaimResult::NotClaimed {
                reason: NotClaimedReason::InFlight,
            },
        }
    }

    pub(crate) fn finish(mut self, result: ClaimResult) -> Self {
        self.result = result;
        self
    }

    pub fn last_tier(&self) -> Option<ClaimTier> {
        self.tiers.last().copied()
    }
}
