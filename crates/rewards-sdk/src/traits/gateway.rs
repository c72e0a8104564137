//! Remote data gateway trait and change-feed subscriptions

use crate::error::Result;
use async_trait::async_trait;
use rewards_gateway_client::{ChangeEvent, ChangeFilter, Query};
use tokio::sync::mpsc;

/// The only channel to persisted state.
///
/// Errors returned here are already classified; callers branch on the
/// `SdkError` variant and never inspect messages.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Invoke a named remote procedure
    async fn call_procedure(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value>;

    /// Read rows from a table
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<serde_json::Value>>;

    /// Insert one row
    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<()>;

    /// Patch the rows matching the query filters
    async fn update(&self, table: &str, filter: &Query, patch: serde_json::Value) -> Result<()>;

    /// Subscribe to row changes matching a filter
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription>;

    /// Read at most one row
    async fn select_one(&self, table: &str, query: &Query) -> Result<Option<serde_json::Value>> {
        let query = query.clone().limit(1);
        Ok(self.select(table, &query).await?.into_iter().next())
    }
}

/// Releases a change-feed registration when dropped
pub struct SubscriptionGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Release now rather than at drop
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// A live change feed: an event receiver plus the guard keeping it registered
pub struct Subscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<ChangeEvent>, guard: SubscriptionGuard) -> Self {
        Self { events, guard }
    }

    /// Wait for the next change; `None` once the feed has closed
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Split so the receiver can move into a task while the owner keeps the guard
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<ChangeEvent>, SubscriptionGuard) {
        (self.events, self.guard)
    }

    /// Stop delivery now
    pub fn unsubscribe(self) {
        self.guard.release();
    }
}
