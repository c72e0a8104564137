//! Claim reconciliation and streak tracking

mod claimable;
mod reconciler;
pub mod streak;

pub use claimable::{
    ClaimAttempt, ClaimKey, ClaimKind, ClaimResult, ClaimTier, Claimable, NotClaimedReason,
};
pub use reconciler::ClaimReconciler;
pub use streak::{StreakSnapshot, StreakTracker};
