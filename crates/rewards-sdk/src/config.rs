//! SDK configuration
//!
//! Loaded from TOML; every field has a default so a partial file (or none)
//! works. A few deployment values can be overridden from the environment.

use crate::confirm::ConfirmationMode;
use crate::error::{Result, SdkError};
use rewards_gateway_client::GatewayConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_GATEWAY_URL: &str = "REWARDS_GATEWAY_URL";
pub const ENV_ANON_KEY: &str = "REWARDS_ANON_KEY";
pub const ENV_CONFIRMATION_MODE: &str = "REWARDS_CONFIRMATION_MODE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SdkConfig {
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub tables: TableNames,
    #[serde(default)]
    pub rewards: RewardSettings,
    #[serde(default)]
    pub confirmation: ConfirmationSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Hosted backend base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Public anonymous key
    #[serde(default)]
    pub anon_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            anon_key: String::new(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Backend table names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableNames {
    #[serde(default = "default_users")]
    pub users: String,
    #[serde(default = "default_daily_claims")]
    pub daily_claims: String,
    #[serde(default = "default_offer_claims")]
    pub offer_claims: String,
    #[serde(default = "default_rewards")]
    pub rewards: String,
    #[serde(default = "default_redemptions")]
    pub redemptions: String,
    #[serde(default = "default_referrals")]
    pub referrals: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: default_users(),
            daily_claims: default_daily_claims(),
            offer_claims: default_offer_claims(),
            rewards: default_rewards(),
            redemptions: default_redemptions(),
            referrals: default_referrals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardSettings {
    /// Points credited by the daily streak claim
    #[serde(default = "default_points_per_day")]
    pub points_per_day: u64,

    /// Points goal shown as progress
    #[serde(default = "default_goal")]
    pub goal: u64,

    /// Prefix for generated referral links
    #[serde(default = "default_referral_base_url")]
    pub referral_base_url: String,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            points_per_day: default_points_per_day(),
            goal: default_goal(),
            referral_base_url: default_referral_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationSettings {
    #[serde(default)]
    pub mode: ConfirmationMode,

    /// Seconds between confirmation polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Polls before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Table carrying confirmation events, keyed by `email`
    #[serde(default = "default_confirmation_table")]
    pub table: String,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            mode: ConfirmationMode::default(),
            poll_interval_secs: default_poll_interval(),
            max_attempts: default_max_attempts(),
            table: default_confirmation_table(),
        }
    }
}

impl ConfirmationSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// How long a notification stays visible
    #[serde(default = "default_notification_ttl")]
    pub ttl_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            ttl_ms: default_notification_ttl(),
        }
    }
}

// Defaults
fn default_base_url() -> String { "http://localhost:54321".to_string() }
fn default_timeout() -> u64 { 30 }
fn default_users() -> String { "users".to_string() }
fn default_daily_claims() -> String { "daily_claims".to_string() }
fn default_offer_claims() -> String { "offer_claims".to_string() }
fn default_rewards() -> String { "rewards".to_string() }
fn default_redemptions() -> String { "redemptions".to_string() }
fn default_referrals() -> String { "referrals".to_string() }
fn default_points_per_day() -> u64 { 5 }
fn default_goal() -> u64 { 5000 }
fn default_referral_base_url() -> String { "https://app.flowvahub.com/signup/?ref=".to_string() }
fn default_poll_interval() -> u64 { 4 }
fn default_max_attempts() -> u32 { 30 }
fn default_confirmation_table() -> String { "email_confirmations".to_string() }
fn default_notification_ttl() -> u64 { 4000 }

impl SdkConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| SdkError::Config(e.to_string()))
    }

    /// Read a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| SdkError::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `REWARDS_*` environment overrides
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var(ENV_GATEWAY_URL) {
            self.gateway.base_url = url;
        }
        if let Some(key) = var(ENV_ANON_KEY) {
            self.gateway.anon_key = key;
        }
        if let Some(mode) = var(ENV_CONFIRMATION_MODE) {
            self.confirmation.mode = mode.parse()?;
        }
        Ok(())
    }

    /// Transport configuration for the hosted backend
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.gateway.base_url.clone(),
            anon_key: self.gateway.anon_key.clone(),
            timeout_secs: self.gateway.timeout_secs,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = SdkConfig::from_toml_str("").unwrap();
        assert_eq!(config.rewards.points_per_day, 5);
        assert_eq!(config.rewards.goal, 5000);
        assert_eq!(config.confirmation.max_attempts, 30);
        assert_eq!(config.confirmation.poll_interval(), Duration::from_secs(4));
        assert_eq!(config.confirmation.mode, ConfirmationMode::AwaitConfirmation);
        assert_eq!(config.tables.daily_claims, "daily_claims");
        assert_eq!(config.notifications.ttl_ms, 4000);
    }

    #[test]
    fn test_partial_file() {
        let config = SdkConfig::from_toml_str(
            r#"
            [gateway]
            base_url = "https://project.example.co"
            anon_key = "anon"

            [rewards]
            points_per_day = 10

            [confirmation]
            mode = "auto_sign_in"
            "#,
        )
        .unwrap();

        assert_eq!(config.rewards.points_per_day, 10);
        assert_eq!(config.rewards.goal, 5000);
        assert_eq!(config.confirmation.mode, ConfirmationMode::AutoSignIn);
        assert_eq!(config.gateway_config().base_url, "https://project.example.co");
        assert_eq!(config.gateway_config().timeout_secs, 30);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_GATEWAY_URL, "https://override.example.co"),
            (ENV_CONFIRMATION_MODE, "auto_sign_in"),
        ]
        .into_iter()
        .collect();

        let mut config = SdkConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.gateway.base_url, "https://override.example.co");
        assert_eq!(config.gateway.anon_key, "");
        assert_eq!(config.confirmation.mode, ConfirmationMode::AutoSignIn);
    }

    #[test]
    fn test_bad_mode_is_config_error() {
        let mut config = SdkConfig::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_CONFIRMATION_MODE).then(|| "sometimes".to_string())
        });
        assert!(matches!(result, Err(SdkError::Config(_))));
    }
}
