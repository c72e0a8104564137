//! Claim reconciler
//!
//! Drives one claim through a bounded sequence of tiers:
//!
//! 1. the remote procedure for the claimable kind
//! 2. a direct existence check plus claim-record insert (offers, daily streak)
//! 3. the `users.last_daily_claim` column (daily streak only)
//!
//! Only a missing procedure moves from tier 1 to tier 2, and only a missing
//! table or column moves from tier 2 to tier 3. Every other failure is
//! terminal and leaves the balance untouched.

use super::claimable::{
    ClaimAttempt, ClaimKey, ClaimResult, ClaimTier, Claimable, NotClaimedReason,
};
use super::streak::StreakTracker;
use crate::balance::{BalanceProjection, BalanceSnapshot};
use crate::clock::{day_key, Clock};
use crate::config::TableNames;
use crate::error::{Result, SdkError};
use crate::session::Identity;
use crate::traits::RemoteGateway;
use dashmap::DashSet;
use rewards_gateway_client::Query;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Removes the in-flight mark when the attempt ends, however it ends
struct InFlight<'a> {
    set: &'a DashSet<ClaimKey>,
    key: ClaimKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.key);
    }
}

/// What the server said about a successful procedure call
struct ProcedureOutcome {
    claimed: bool,
    new_coins: Option<i64>,
}

impl ProcedureOutcome {
    /// Unwrap single-row arrays and read `claimed` (or `redeemed`) and `new_coins`.
    ///
    /// A procedure that succeeds without a flag is taken as a claim.
    fn parse(value: &Value) -> Self {
        let row = match value {
            Value::Array(rows) => rows.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };

        let claimed = row
            .get("claimed")
            .or_else(|| row.get("redeemed"))
            .and_then(Value::as_bool)
            .unwrap_or(true);
        let new_coins = row.get("new_coins").and_then(Value::as_i64);

        Self { claimed, new_coins }
    }
}

pub struct ClaimReconciler {
    gateway: Arc<dyn RemoteGateway>,
    balance: Arc<BalanceProjection>,
    streak: Arc<StreakTracker>,
    tables: TableNames,
    clock: Arc<dyn Clock>,
    in_flight: DashSet<ClaimKey>,
    claimed: DashSet<ClaimKey>,
}

impl ClaimReconciler {
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        balance: Arc<BalanceProjection>,
        streak: Arc<StreakTracker>,
        tables: TableNames,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            balance,
            streak,
            tables,
            clock,
            in_flight: DashSet::new(),
            claimed: DashSet::new(),
        }
    }

    fn key_for(&self, identity: &Identity, claimable: &Claimable) -> ClaimKey {
        claimable.key(&identity.id, &day_key(self.clock.today()))
    }

    /// Whether local state already records this claim
    pub fn is_claimed(&self, identity: &Identity, claimable: &Claimable) -> bool {
        if matches!(claimable, Claimable::DailyStreak { .. }) && self.streak.today_claimed() {
            return true;
        }
        self.claimed.contains(&self.key_for(identity, claimable))
    }

    /// Whether an attempt for this claim is outstanding
    pub fn is_in_flight(&self, identity: &Identity, claimable: &Claimable) -> bool {
        self.in_flight.contains(&self.key_for(identity, claimable))
    }

    /// Forget every claim mark (identity switch)
    pub fn reset(&self) {
        self.claimed.clear();
    }

    /// Claim once from the user's point of view.
    ///
    /// A second call for the same key while the first is outstanding resolves
    /// immediately as `InFlight`; it is never queued.
    pub async fn attempt_claim(&self, identity: &Identity, claimable: &Claimable) -> ClaimAttempt {
        let key = self.key_for(identity, claimable);
        let attempt = ClaimAttempt::new(key.clone());

        if self.is_claimed(identity, claimable) {
            debug!(claim = %key, "Already claimed locally");
            return attempt.finish(ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            });
        }

        if !self.in_flight.insert(key.clone()) {
            debug!(claim = %key, "Claim already in flight");
            return attempt.finish(ClaimResult::NotClaimed {
                reason: NotClaimedReason::InFlight,
            });
        }
        let _in_flight = InFlight {
            set: &self.in_flight,
            key: key.clone(),
        };

        let attempt = self.run_tiers(identity, claimable, attempt).await;

        match &attempt.result {
            ClaimResult::Claimed { new_balance, tier } => {
                info!(claim = %key, tier = ?tier, new_balance, "Claim succeeded");
                self.resync(identity, claimable).await;
            }
            ClaimResult::NotClaimed { .. } => {
                self.resync(identity, claimable).await;
            }
            ClaimResult::Failed { cause } => {
                warn!(claim = %key, tiers = ?attempt.tiers, error = %cause, "Claim failed");
            }
        }

        attempt
    }

    async fn run_tiers(
        &self,
        identity: &Identity,
        claimable: &Claimable,
        mut attempt: ClaimAttempt,
    ) -> ClaimAttempt {
        if let Claimable::Reward { cost, .. } = claimable {
            if let Err(cause) = self.balance.ensure_affordable(*cost) {
                return attempt.finish(ClaimResult::Failed { cause });
            }
        }

        // Local credits are only applied against this exact snapshot
        let base = self.balance.snapshot();

        attempt.tiers.push(ClaimTier::Procedure);
        let procedure = claimable.procedure();
        let cause = match self
            .gateway
            .call_procedure(procedure, claimable.procedure_args(&identity.id))
            .await
        {
            Ok(value) => {
                let result = self.accept_procedure(claimable, &attempt.key, &base, &value);
                return attempt.finish(result);
            }
            Err(cause @ SdkError::ProcedureUnavailable(_)) if claimable.supports_fallback() => {
                warn!(claim = %attempt.key, procedure, error = %cause, "Procedure unavailable, falling back to claim insert");
                cause
            }
            Err(cause) => return attempt.finish(ClaimResult::Failed { cause }),
        };
        debug!(claim = %attempt.key, previous = %cause, "Trying fallback insert");

        attempt.tiers.push(ClaimTier::FallbackInsert);
        let inserted = match self.fallback_insert(identity, claimable).await {
            Ok(inserted) => inserted,
            Err(cause @ SdkError::SchemaMismatch(_)) if claimable.supports_legacy_column() => {
                warn!(claim = %attempt.key, error = %cause, "Claim table unavailable, falling back to last_daily_claim");
                attempt.tiers.push(ClaimTier::FallbackLegacyColumn);
                match self.fallback_legacy_column(identity).await {
                    Ok(written) => written,
                    Err(cause) => return attempt.finish(ClaimResult::Failed { cause }),
                }
            }
            Err(cause) => return attempt.finish(ClaimResult::Failed { cause }),
        };

        let result = if inserted {
            let tier = attempt.last_tier().unwrap_or(ClaimTier::FallbackInsert);
            self.credit_locally(identity, claimable, &attempt.key, &base, tier)
                .await
        } else {
            self.claimed.insert(attempt.key.clone());
            ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            }
        };
        attempt.finish(result)
    }

    fn accept_procedure(
        &self,
        claimable: &Claimable,
        key: &ClaimKey,
        base: &BalanceSnapshot,
        value: &Value,
    ) -> ClaimResult {
        let outcome = ProcedureOutcome::parse(value);
        self.claimed.insert(key.clone());

        if !outcome.claimed {
            debug!(claim = %key, "Server reports claim already recorded");
            return ClaimResult::NotClaimed {
                reason: NotClaimedReason::AlreadyClaimed,
            };
        }

        match outcome.new_coins {
            Some(coins) => self.balance.set(coins.max(0) as u64),
            None => {
                let credited = apply_delta(base.points, claimable.points_delta());
                self.balance.apply_local(credited, base.version);
            }
        }
        if matches!(claimable, Claimable::DailyStreak { .. }) {
            self.streak.mark_today();
        }

        ClaimResult::Claimed {
            new_balance: self.balance.current(),
            tier: ClaimTier::Procedure,
        }
    }

    /// Returns false when the claim record already exists
    async fn fallback_insert(&self, identity: &Identity, claimable: &Claimable) -> Result<bool> {
        let (table, existing, row) = match claimable {
            Claimable::DailyStreak { points_per_day } => {
                let today = day_key(self.clock.today());
                (
                    &self.tables.daily_claims,
                    Query::new()
                        .select("claimed_date")
                        .eq("user_id", &identity.id)
                        .eq("claimed_date", &today),
                    json!({ "user_id": identity.id, "claimed_date": today, "points": points_per_day }),
                )
            }
            Claimable::Offer { id, points } => (
                &self.tables.offer_claims,
                Query::new()
                    .eq("user_id", &identity.id)
                    .eq("offer_id", id),
                json!({ "user_id": identity.id, "offer_id": id, "points": points }),
            ),
            Claimable::Reward { .. } => {
                return Err(SdkError::ProcedureUnavailable(claimable.procedure().into()))
            }
        };

        if self.gateway.select_one(table, &existing).await?.is_some() {
            return Ok(false);
        }
        self.gateway.insert(table, row).await?;
        Ok(true)
    }

    /// Returns false when the column already holds today's date
    async fn fallback_legacy_column(&self, identity: &Identity) -> Result<bool> {
        let today = day_key(self.clock.today());
        let by_id = Query::new().eq("id", &identity.id);

        let row = self
            .gateway
            .select_one(&self.tables.users, &by_id.clone().select("last_daily_claim"))
            .await?;
        let last = row
            .as_ref()
            .and_then(|r| r.get("last_daily_claim"))
            .and_then(Value::as_str)
            .and_then(crate::clock::parse_day)
            .map(day_key);
        if last.as_deref() == Some(today.as_str()) {
            return Ok(false);
        }

        self.gateway
            .update(&self.tables.users, &by_id, json!({ "last_daily_claim": today }))
            .await?;
        Ok(true)
    }

    /// Credit after a fallback tier.
    ///
    /// The persisted `users.coins` is derived from a fresh server read, never
    /// from the local snapshot, which may be unloaded or stale. The local
    /// credit lands only if no re-fetch happened since `base`.
    async fn credit_locally(
        &self,
        identity: &Identity,
        claimable: &Claimable,
        key: &ClaimKey,
        base: &BalanceSnapshot,
        tier: ClaimTier,
    ) -> ClaimResult {
        match self.persist_credit(identity, claimable.points_delta()).await {
            Ok(credited) => {
                if !self.balance.apply_local(credited, base.version) {
                    debug!(claim = %key, "Balance re-fetched during claim, keeping server value");
                }
            }
            Err(err) => {
                warn!(claim = %key, error = %err, "Failed to persist fallback credit, leaving balance to re-fetch");
            }
        }
        self.claimed.insert(key.clone());
        if matches!(claimable, Claimable::DailyStreak { .. }) {
            self.streak.mark_today();
        }

        ClaimResult::Claimed {
            new_balance: self.balance.current(),
            tier,
        }
    }

    /// Read `coins` from the server and write it back with `delta` applied
    async fn persist_credit(&self, identity: &Identity, delta: i64) -> Result<u64> {
        let by_id = Query::new().eq("id", &identity.id);
        let row = self
            .gateway
            .select_one(&self.tables.users, &by_id.clone().select("coins"))
            .await?
            .ok_or_else(|| SdkError::Rejected(format!("no user row for {}", identity.id)))?;
        let server = row
            .get("coins")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u64;

        let credited = apply_delta(server, delta);
        self.gateway
            .update(&self.tables.users, &by_id, json!({ "coins": credited }))
            .await?;
        debug!(user_id = %identity.id, server, credited, "Fallback credit persisted");
        Ok(credited)
    }

    /// Re-read claim history and balance; failures only leave the projection stale
    async fn resync(&self, identity: &Identity, claimable: &Claimable) {
        if matches!(claimable, Claimable::DailyStreak { .. }) {
            if let Err(err) = self.streak.refresh(&identity.id).await {
                warn!(user_id = %identity.id, error = %err, "Streak re-fetch failed");
            }
        }
        if let Err(err) = self
            .balance
            .refresh(self.gateway.as_ref(), &self.tables.users, &identity.id)
            .await
        {
            warn!(user_id = %identity.id, error = %err, "Balance re-fetch failed");
        }
    }
}

fn apply_delta(points: u64, delta: i64) -> u64 {
    if delta >= 0 {
        points.saturating_add(delta as u64)
    } else {
        points.saturating_sub(delta.unsigned_abs())
    }
}
