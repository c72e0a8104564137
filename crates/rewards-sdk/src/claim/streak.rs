//! Daily streak tracking
//!
//! Claim history lives in the claim-record table (`claimed_date` per row).
//! Older deployments only carry `users.last_daily_claim`; the tracker falls
//! back to that column when the table is missing.

use crate::clock::{day_key, parse_day, Clock};
use crate::config::TableNames;
use crate::error::{Result, SdkError};
use crate::traits::RemoteGateway;
use chrono::{Datelike, Days, NaiveDate};
use rewards_gateway_client::Query;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Most claim rows read back
pub const HISTORY_LIMIT: u32 = 365;

/// Consecutive claimed days ending today; zero if today is unclaimed
pub fn consecutive_days(dates: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = today;
    while dates.contains(&day) {
        count += 1;
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    count
}

/// Claimed flags for the current week, Monday first.
///
/// Without history the strip shows the first `days` slots filled.
pub fn week_strip(dates: &BTreeSet<NaiveDate>, today: NaiveDate, days: u32) -> [bool; 7] {
    let mut strip = [false; 7];
    let offset = today.weekday().num_days_from_monday() as u64;
    let Some(monday) = today.checked_sub_days(Days::new(offset)) else {
        return strip;
    };

    for (i, slot) in strip.iter_mut().enumerate() {
        *slot = if dates.is_empty() {
            (i as u32) < days
        } else {
            monday
                .checked_add_days(Days::new(i as u64))
                .is_some_and(|d| dates.contains(&d))
        };
    }
    strip
}

/// Streak as last fetched from the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreakSnapshot {
    pub claimed_dates: BTreeSet<NaiveDate>,
    pub today_claimed: bool,
    pub days: u32,
}

impl StreakSnapshot {
    pub fn from_dates(claimed_dates: BTreeSet<NaiveDate>, today: NaiveDate) -> Self {
        Self {
            today_claimed: claimed_dates.contains(&today),
            days: consecutive_days(&claimed_dates, today),
            claimed_dates,
        }
    }

    pub fn week(&self, today: NaiveDate) -> [bool; 7] {
        week_strip(&self.claimed_dates, today, self.days)
    }
}

pub struct StreakTracker {
    gateway: Arc<dyn RemoteGateway>,
    tables: TableNames,
    clock: Arc<dyn Clock>,
    snapshot: Mutex<StreakSnapshot>,
}

impl StreakTracker {
    pub fn new(gateway: Arc<dyn RemoteGateway>, tables: TableNames, clock: Arc<dyn Clock>) -> Self {
        Self {
            gateway,
            tables,
            clock,
            snapshot: Mutex::new(StreakSnapshot::default()),
        }
    }

    pub fn snapshot(&self) -> StreakSnapshot {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn today_claimed(&self) -> bool {
        self.snapshot().today_claimed
    }

    /// Record a claim for today ahead of the next refresh
    pub fn mark_today(&self) {
        let today = self.clock.today();
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        if snapshot.claimed_dates.is_empty() && snapshot.days > 0 {
            // Legacy-column snapshot: only the count is known
            if !snapshot.today_claimed {
                snapshot.days += 1;
            }
            snapshot.today_claimed = true;
            return;
        }
        let mut dates = std::mem::take(&mut snapshot.claimed_dates);
        dates.insert(today);
        *snapshot = StreakSnapshot::from_dates(dates, today);
    }

    pub fn reset(&self) {
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = StreakSnapshot::default();
    }

    /// Re-read claim history for the user
    pub async fn refresh(&self, user_id: &str) -> Result<StreakSnapshot> {
        let today = self.clock.today();

        let snapshot = match self.fetch_history(user_id, today).await {
            Ok(snapshot) => snapshot,
            Err(err @ SdkError::SchemaMismatch(_)) => {
                warn!(user_id, error = %err, "Claim history unavailable, reading last_daily_claim");
                self.fetch_legacy(user_id, today).await?
            }
            Err(err) => return Err(err),
        };

        debug!(user_id, days = snapshot.days, today_claimed = snapshot.today_claimed, "Streak refreshed");
        *self.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = snapshot.clone();
        Ok(snapshot)
    }

    async fn fetch_history(&self, user_id: &str, today: NaiveDate) -> Result<StreakSnapshot> {
        let query = Query::new()
            .select("claimed_date")
            .eq("user_id", user_id)
            .order("claimed_date", false)
            .limit(HISTORY_LIMIT);
        let rows = self.gateway.select(&self.tables.daily_claims, &query).await?;

        let dates = rows
            .iter()
            .filter_map(|row| row.get("claimed_date").and_then(|v| v.as_str()))
            .filter_map(parse_day)
            .collect();
        Ok(StreakSnapshot::from_dates(dates, today))
    }

    async fn fetch_legacy(&self, user_id: &str, today: NaiveDate) -> Result<StreakSnapshot> {
        let query = Query::new().select("last_daily_claim").eq("id", user_id);
        let row = self.gateway.select_one(&self.tables.users, &query).await?;

        let last = row
            .as_ref()
            .and_then(|r| r.get("last_daily_claim"))
            .and_then(|v| v.as_str())
            .and_then(parse_day);
        let today_claimed = last == Some(today);
        debug!(user_id, last = ?last.map(day_key), "Read last_daily_claim");

        let previous = self.snapshot().days;
        Ok(StreakSnapshot {
            claimed_dates: BTreeSet::new(),
            today_claimed,
            days: if today_claimed { previous.max(1) } else { previous },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_unbroken_run_counts_every_day() {
        let today = day("2025-03-14");
        let dates = ["2025-03-11", "2025-03-12", "2025-03-13", "2025-03-14"]
            .into_iter()
            .map(day)
            .collect();
        assert_eq!(consecutive_days(&dates, today), 4);
    }

    #[test]
    fn test_gap_resets_the_run() {
        let today = day("2025-03-14");
        let dates = ["2025-03-11", "2025-03-14"].into_iter().map(day).collect();
        assert_eq!(consecutive_days(&dates, today), 1);
    }

    #[test]
    fn test_unclaimed_today_is_zero() {
        let today = day("2025-03-14");
        let dates = ["2025-03-12", "2025-03-13"].into_iter().map(day).collect();
        assert_eq!(consecutive_days(&dates, today), 0);
    }

    #[test]
    fn test_week_strip_starts_monday() {
        // 2025-03-14 is a Friday
        let today = day("2025-03-14");
        let dates = ["2025-03-10", "2025-03-13", "2025-03-14", "2025-03-07"]
            .into_iter()
            .map(day)
            .collect();
        assert_eq!(
            week_strip(&dates, today, 2),
            [true, false, false, true, true, false, false]
        );
    }

    #[test]
    fn test_week_strip_without_history_uses_count() {
        let today = day("2025-03-14");
        assert_eq!(
            week_strip(&BTreeSet::new(), today, 3),
            [true, true, true, false, false, false, false]
        );
    }
}
