//! Reward catalog and redemption history
//!
//! Catalog rows are filtered before display: only rows with a UUID id, a
//! non-blank title and either a numeric cost or the `coming_soon` flag are
//! kept, and titles are de-duplicated case-insensitively (first row wins).

use crate::claim::Claimable;
use crate::config::TableNames;
use crate::error::Result;
use crate::traits::RemoteGateway;
use rewards_gateway_client::Query;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RewardRow {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Cost in points; absent for coming-soon rewards
    pub points: Option<u64>,
    pub coming_soon: bool,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardState {
    Unlocked,
    Locked,
    ComingSoon,
}

fn text(row: &Value, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn points(row: &Value) -> Option<u64> {
    let value = row.get("points")?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

impl RewardRow {
    /// Parse a catalog row; `None` for rows that should not be shown
    pub fn from_row(row: &Value) -> Option<Self> {
        let id = row.get("id").and_then(Value::as_str)?;
        // Hyphenated form only
        if id.len() != 36 {
            return None;
        }
        let id = Uuid::try_parse(id).ok()?;
        let title = text(row, "title")?;
        let points = points(row);
        let coming_soon = row
            .get("coming_soon")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if points.is_none() && !coming_soon {
            return None;
        }

        Some(Self {
            id,
            title,
            description: text(row, "description"),
            points,
            coming_soon,
            image: text(row, "image").or_else(|| text(row, "image_url")),
        })
    }

    pub fn state(&self, balance: u64) -> RewardState {
        match self.points {
            _ if self.coming_soon => RewardState::ComingSoon,
            Some(cost) if balance >= cost => RewardState::Unlocked,
            _ => RewardState::Locked,
        }
    }

    /// Redemption claimable; `None` while coming soon
    pub fn to_claimable(&self) -> Option<Claimable> {
        if self.coming_soon {
            return None;
        }
        Some(Claimable::Reward {
            id: self.id.to_string(),
            title: self.title.clone(),
            cost: self.points?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    All,
    Unlocked,
    Locked,
    ComingSoon,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TabCounts {
    pub all: usize,
    pub unlocked: usize,
    pub locked: usize,
    pub coming_soon: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Catalog {
    pub rewards: Vec<RewardRow>,
}

impl Catalog {
    pub fn from_rows(rows: &[Value]) -> Self {
        let mut seen = HashSet::new();
        let rewards = rows
            .iter()
            .filter_map(RewardRow::from_row)
            .filter(|reward| seen.insert(reward.title.to_lowercase()))
            .collect();
        Self { rewards }
    }

    pub fn counts(&self, balance: u64) -> TabCounts {
        let mut counts = TabCounts {
            all: self.rewards.len(),
            ..Default::default()
        };
        for reward in &self.rewards {
            match reward.state(balance) {
                RewardState::Unlocked => counts.unlocked += 1,
                RewardState::Locked => counts.locked += 1,
                RewardState::ComingSoon => counts.coming_soon += 1,
            }
        }
        counts
    }

    /// Rewards listed under a tab, in catalog order
    pub fn shown(&self, tab: Tab, balance: u64) -> Vec<&RewardRow> {
        self.rewards
            .iter()
            .filter(|reward| match tab {
                Tab::All => true,
                Tab::Unlocked => reward.state(balance) == RewardState::Unlocked,
                Tab::Locked => reward.state(balance) == RewardState::Locked,
                Tab::ComingSoon => reward.state(balance) == RewardState::ComingSoon,
            })
            .collect()
    }

    pub fn get(&self, id: &Uuid) -> Option<&RewardRow> {
        self.rewards.iter().find(|reward| &reward.id == id)
    }
}

pub async fn fetch_catalog(gateway: &dyn RemoteGateway, tables: &TableNames) -> Result<Catalog> {
    let rows = gateway.select(&tables.rewards, &Query::new()).await?;
    Ok(Catalog::from_rows(&rows))
}

/// One past redemption with its joined reward
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redemption {
    pub id: String,
    pub reward_id: Option<String>,
    /// Redemption date as stored
    pub date: Option<String>,
    pub reward_title: Option<String>,
    pub cost: Option<u64>,
}

fn id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Redemption {
    fn from_row(row: &Value) -> Option<Self> {
        let reward = row.get("reward").filter(|r| r.is_object());
        Some(Self {
            id: id_text(row.get("id"))?,
            reward_id: id_text(row.get("reward_id")),
            date: text(row, "date").or_else(|| text(row, "created_at")),
            reward_title: reward.and_then(|r| text(r, "title").or_else(|| text(r, "name"))),
            cost: reward.and_then(|r| points(r).or_else(|| r.get("cost").and_then(Value::as_u64))),
        })
    }
}

pub async fn fetch_redemptions(
    gateway: &dyn RemoteGateway,
    tables: &TableNames,
    user_id: &str,
) -> Result<Vec<Redemption>> {
    let query = Query::new()
        .select(&format!("*,reward:{}(*)", tables.rewards))
        .eq("user_id", user_id);
    let rows = gateway.select(&tables.redemptions, &query).await?;
    Ok(rows.iter().filter_map(Redemption::from_row).collect())
}
