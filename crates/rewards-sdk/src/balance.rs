//! Balance projection
//!
//! Client-held mirror of the signed-in user's point balance. Writes are
//! versioned: a server-confirmed value or a re-fetch always lands, while a
//! locally computed fallback credit lands only if nothing authoritative was
//! written since the value it was derived from.

use crate::error::{Result, SdkError};
use crate::traits::RemoteGateway;
use rewards_gateway_client::Query;
use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Where the current value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceSource {
    /// Nothing loaded yet
    Unknown,
    /// Confirmed by the server (procedure result or re-fetch)
    Authoritative,
    /// Computed locally after a fallback tier; awaiting re-fetch
    Local,
}

/// Point-in-time view of the balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub points: u64,
    /// Bumped on every authoritative write
    pub version: u64,
    pub source: BalanceSource,
}

/// Progress toward a points goal
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GoalProgress {
    pub points: u64,
    pub goal: u64,
    /// 0.0 ..= 100.0
    pub percent: f64,
}

pub struct BalanceProjection {
    state: Mutex<BalanceSnapshot>,
    changes: watch::Sender<BalanceSnapshot>,
}

impl Default for BalanceProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl BalanceProjection {
    pub fn new() -> Self {
        let initial = BalanceSnapshot {
            points: 0,
            version: 0,
            source: BalanceSource::Unknown,
        };
        let (changes, _) = watch::channel(initial);
        Self {
            state: Mutex::new(initial),
            changes,
        }
    }

    pub fn current(&self) -> u64 {
        self.snapshot().points
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Authoritative write; always applies
    pub fn set(&self, points: u64) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.points = points;
            state.version += 1;
            state.source = BalanceSource::Authoritative;
            *state
        };
        debug!(points, version = snapshot.version, "Balance set");
        self.changes.send_replace(snapshot);
    }

    /// Local write derived from the snapshot at `based_on`.
    ///
    /// Returns false (and leaves the balance alone) when an authoritative
    /// write landed in between.
    pub fn apply_local(&self, points: u64, based_on: u64) -> bool {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.version != based_on {
                debug!(
                    points,
                    based_on,
                    current_version = state.version,
                    "Discarding stale local balance"
                );
                return false;
            }
            state.points = points;
            state.source = BalanceSource::Local;
            *state
        };
        self.changes.send_replace(snapshot);
        true
    }

    /// Reject a debit larger than the balance
    pub fn ensure_affordable(&self, cost: u64) -> Result<()> {
        let balance = self.current();
        if cost > balance {
            return Err(SdkError::InsufficientBalance { cost, balance });
        }
        Ok(())
    }

    /// Receive every change
    pub fn watch(&self) -> watch::Receiver<BalanceSnapshot> {
        self.changes.subscribe()
    }

    /// Forget the balance (sign-out or identity switch)
    pub fn reset(&self) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.points = 0;
            state.version += 1;
            state.source = BalanceSource::Unknown;
            *state
        };
        self.changes.send_replace(snapshot);
    }

    pub fn goal_progress(&self, goal: u64) -> GoalProgress {
        let points = self.current();
        let percent = if goal == 0 {
            100.0
        } else {
            (points as f64 / goal as f64 * 100.0).min(100.0)
        };
        GoalProgress {
            points,
            goal,
            percent,
        }
    }

    /// Re-fetch `coins` for the user and write it authoritatively
    pub async fn refresh(
        &self,
        gateway: &dyn RemoteGateway,
        users_table: &str,
        user_id: &str,
    ) -> Result<u64> {
        let query = Query::new().select("coins").eq("id", user_id);
        let row = gateway.select_one(users_table, &query).await?;

        let coins = row
            .as_ref()
            .and_then(|r| r.get("coins"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0);
        if coins < 0 {
            warn!(user_id, coins, "Server reported a negative balance, clamping to zero");
        }

        let points = coins.max(0) as u64;
        self.set(points);
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_authoritative() {
        let balance = BalanceProjection::new();
        balance.set(100);

        let snapshot = balance.snapshot();
        assert_eq!(snapshot.points, 100);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.source, BalanceSource::Authoritative);
    }

    #[test]
    fn test_refetch_wins_over_local_credit() {
        let balance = BalanceProjection::new();
        balance.set(100);
        let based_on = balance.snapshot().version;

        // A re-fetch lands while the fallback credit is being computed
        balance.set(120);

        assert!(!balance.apply_local(150, based_on));
        assert_eq!(balance.current(), 120);
    }

    #[test]
    fn test_local_credit_applies_when_unchanged() {
        let balance = BalanceProjection::new();
        balance.set(100);
        let based_on = balance.snapshot().version;

        assert!(balance.apply_local(105, based_on));
        assert_eq!(balance.current(), 105);
        assert_eq!(balance.snapshot().source, BalanceSource::Local);
    }

    #[test]
    fn test_ensure_affordable() {
        let balance = BalanceProjection::new();
        balance.set(40);

        assert!(balance.ensure_affordable(40).is_ok());
        assert_eq!(
            balance.ensure_affordable(41),
            Err(SdkError::InsufficientBalance {
                cost: 41,
                balance: 40
            })
        );
    }

    #[test]
    fn test_goal_progress_caps_at_full() {
        let balance = BalanceProjection::new();
        balance.set(2500);
        assert_eq!(balance.goal_progress(5000).percent, 50.0);

        balance.set(9000);
        assert_eq!(balance.goal_progress(5000).percent, 100.0);
    }

    #[test]
    fn test_watch_sees_changes() {
        let balance = BalanceProjection::new();
        let rx = balance.watch();
        balance.set(7);
        assert_eq!(rx.borrow().points, 7);
    }
}
