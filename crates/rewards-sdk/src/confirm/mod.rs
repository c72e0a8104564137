//! Email confirmation after sign-up
//!
//! When the identity provider withholds a session until the user follows a
//! confirmation link, the waiter watches for the confirmation on two channels
//! (a change feed and a fixed-interval poll) and signs in with the sign-up
//! credentials as soon as either reports it.

mod waiter;

pub use waiter::{ConfirmationWaiter, SignUpOutcome, WaitHandle, WaitSnapshot};

use crate::error::{Result, SdkError};
use crate::traits::{RemoteGateway, Subscription};
use async_trait::async_trait;
use rewards_gateway_client::{ChangeEvent, ChangeFilter, Query};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

/// `Idle -> Waiting -> {Confirmed, TimedOut, Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Idle,
    Waiting,
    Confirmed,
    /// Polls exhausted; a manual re-check is still possible
    TimedOut,
    Cancelled,
}

impl ConfirmationStatus {
    /// Whether a manual re-check may move this wait forward
    pub fn can_recheck(self) -> bool {
        matches!(self, ConfirmationStatus::Waiting | ConfirmationStatus::TimedOut)
    }
}

/// What happens after a sign-up that issued no session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    /// Enter `Waiting` until the confirmation is detected
    #[default]
    AwaitConfirmation,
    /// Skip waiting and try to sign in straight away
    AutoSignIn,
}

impl FromStr for ConfirmationMode {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "await_confirmation" | "await" => Ok(ConfirmationMode::AwaitConfirmation),
            "auto_sign_in" | "auto" => Ok(ConfirmationMode::AutoSignIn),
            other => Err(SdkError::Config(format!("unknown confirmation mode: {}", other))),
        }
    }
}

/// Where confirmation state can be observed
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Read the confirmation status once
    async fn is_confirmed(&self, email: &str) -> Result<bool>;

    /// Change feed for the pending email
    async fn watch(&self, email: &str) -> Result<Subscription>;

    /// Whether a change event reports the email as confirmed
    fn confirms(&self, event: &ChangeEvent, email: &str) -> bool;
}

/// Confirmation rows keyed by `email`, flagged by `confirmed` or `confirmed_at`
pub struct TableConfirmationSource {
    gateway: Arc<dyn RemoteGateway>,
    table: String,
}

impl TableConfirmationSource {
    pub fn new(gateway: Arc<dyn RemoteGateway>, table: impl Into<String>) -> Self {
        Self {
            gateway,
            table: table.into(),
        }
    }
}

fn row_confirmed(row: &serde_json::Value) -> bool {
    row.get("confirmed").and_then(|v| v.as_bool()).unwrap_or(false)
        || row.get("confirmed_at").is_some_and(|v| v.is_string())
}

#[async_trait]
impl ConfirmationSource for TableConfirmationSource {
    async fn is_confirmed(&self, email: &str) -> Result<bool> {
        let query = Query::new().eq("email", email);
        let row = self.gateway.select_one(&self.table, &query).await?;
        Ok(row.as_ref().is_some_and(row_confirmed))
    }

    async fn watch(&self, email: &str) -> Result<Subscription> {
        self.gateway
            .subscribe(ChangeFilter::table(&self.table).with_eq("email", email))
            .await
    }

    fn confirms(&self, event: &ChangeEvent, email: &str) -> bool {
        event.table == self.table
            && event.record.get("email").and_then(|v| v.as_str()) == Some(email)
            && row_confirmed(&event.record)
    }
}
