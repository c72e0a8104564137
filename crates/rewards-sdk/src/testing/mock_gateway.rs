//! In-memory remote gateway for tests.

use crate::error::{Result, SdkError};
use crate::traits::{RemoteGateway, Subscription, SubscriptionGuard};
use async_trait::async_trait;
use rewards_gateway_client::{ChangeEvent, ChangeFilter, ChangeType, Query};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// Rows per table
pub type Tables = HashMap<String, Vec<Value>>;

/// Scripted procedure body; may read and write the tables
pub type ProcedureFn = Arc<dyn Fn(&Value, &mut Tables) -> Result<Value> + Send + Sync>;

/// One recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Procedure(String),
    Select(String),
    Insert(String),
    Update(String),
    Subscribe(String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        matches!(self, Call::Procedure(_) | Call::Insert(_) | Call::Update(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Procedure,
    Select,
    Insert,
    Update,
    Subscribe,
}

type Subscribers = HashMap<u64, (ChangeFilter, mpsc::UnboundedSender<ChangeEvent>)>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn matches_filters(row: &Value, filters: &[(String, String)]) -> bool {
    filters
        .iter()
        .all(|(column, expected)| row.get(column).and_then(cell_text).as_deref() == Some(expected.as_str()))
}

/// Mock gateway for testing.
///
/// Tables are plain JSON rows; procedures are closures; any operation can be
/// scripted to fail for a given table or procedure name. Unregistered
/// procedures report `ProcedureUnavailable`.
pub struct MockGateway {
    tables: Mutex<Tables>,
    procedures: Mutex<HashMap<String, ProcedureFn>>,
    failures: Mutex<HashMap<(Op, String), SdkError>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Option<Duration>>,
    subscribers: Arc<Mutex<Subscribers>>,
    next_subscriber: AtomicU64,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            procedures: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            latency: Mutex::new(None),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Seed a row.
    pub fn with_row(self, table: &str, row: Value) -> Self {
        self.push_row(table, row);
        self
    }

    /// Register a procedure.
    pub fn with_procedure(
        self,
        name: &str,
        body: impl Fn(&Value, &mut Tables) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        lock(&self.procedures).insert(name.to_string(), Arc::new(body));
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        *lock(&self.latency) = Some(latency);
        self
    }

    pub fn push_row(&self, table: &str, row: Value) {
        lock(&self.tables).entry(table.to_string()).or_default().push(row);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        lock(&self.tables).get(table).cloned().unwrap_or_default()
    }

    /// Patch the matching rows in place, without recording a call.
    pub fn patch_rows(&self, table: &str, column: &str, value: &str, patch: Value) {
        let filters = [(column.to_string(), value.to_string())];
        if let Some(rows) = lock(&self.tables).get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_filters(row, &filters)) {
                merge(row, &patch);
            }
        }
    }

    pub fn fail_procedure(&self, name: &str, error: SdkError) {
        lock(&self.failures).insert((Op::Procedure, name.to_string()), error);
    }

    pub fn fail_select(&self, table: &str, error: SdkError) {
        lock(&self.failures).insert((Op::Select, table.to_string()), error);
    }

    pub fn fail_insert(&self, table: &str, error: SdkError) {
        lock(&self.failures).insert((Op::Insert, table.to_string()), error);
    }

    pub fn fail_update(&self, table: &str, error: SdkError) {
        lock(&self.failures).insert((Op::Update, table.to_string()), error);
    }

    pub fn fail_subscribe(&self, table: &str, error: SdkError) {
        lock(&self.failures).insert((Op::Subscribe, table.to_string()), error);
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, call: &Call) -> usize {
        lock(&self.calls).iter().filter(|c| *c == call).count()
    }

    pub fn mutation_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_mutation()).count()
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Live change-feed registrations.
    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// Deliver a change to every matching subscriber.
    pub fn emit(&self, table: &str, change_type: ChangeType, record: Value) {
        let targets: Vec<_> = lock(&self.subscribers)
            .values()
            .filter(|(filter, _)| {
                filter.table == table
                    && filter.column.as_ref().map_or(true, |(column, value)| {
                        record.get(column).and_then(cell_text).as_deref() == Some(value.as_str())
                    })
            })
            .map(|(_, sender)| sender.clone())
            .collect();

        for sender in targets {
            let _ = sender.send(ChangeEvent {
                table: table.to_string(),
                change_type,
                record: record.clone(),
            });
        }
    }

    async fn enter(&self, op: Op, target: &str, call: Call) -> Result<()> {
        lock(&self.calls).push(call);

        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        match lock(&self.failures).get(&(op, target.to_string())) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

fn merge(row: &mut Value, patch: &Value) {
    if let (Some(row), Some(patch)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            row.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl RemoteGateway for MockGateway {
    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value> {
        self.enter(Op::Procedure, name, Call::Procedure(name.to_string()))
            .await?;

        let body = lock(&self.procedures).get(name).cloned();
        match body {
            Some(body) => body(&args, &mut lock(&self.tables)),
            None => Err(SdkError::ProcedureUnavailable(name.to_string())),
        }
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.enter(Op::Select, table, Call::Select(table.to_string()))
            .await?;

        let mut rows: Vec<Value> = lock(&self.tables)
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| matches_filters(row, &query.filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some((column, ascending)) = &query.order {
            rows.sort_by(|a, b| {
                let a = a.get(column).and_then(cell_text);
                let b = b.get(column).and_then(cell_text);
                let ordering = a.cmp(&b);
                if *ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<()> {
        self.enter(Op::Insert, table, Call::Insert(table.to_string()))
            .await?;
        self.push_row(table, row);
        Ok(())
    }

    async fn update(&self, table: &str, filter: &Query, patch: Value) -> Result<()> {
        self.enter(Op::Update, table, Call::Update(table.to_string()))
            .await?;

        if let Some(rows) = lock(&self.tables).get_mut(table) {
            for row in rows.iter_mut().filter(|row| matches_filters(row, &filter.filters)) {
                merge(row, &patch);
            }
        }
        Ok(())
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        self.enter(Op::Subscribe, &filter.table, Call::Subscribe(filter.topic()))
            .await?;

        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        let (sender, events) = mpsc::unbounded_channel();
        lock(&self.subscribers).insert(id, (filter, sender));

        let subscribers = self.subscribers.clone();
        let guard = SubscriptionGuard::new(move || {
            lock(&subscribers).remove(&id);
        });
        Ok(Subscription::new(events, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_select_filters_orders_and_limits() {
        let gateway = MockGateway::new()
            .with_row("daily_claims", json!({ "user_id": "u-1", "claimed_date": "2025-03-12" }))
            .with_row("daily_claims", json!({ "user_id": "u-1", "claimed_date": "2025-03-14" }))
            .with_row("daily_claims", json!({ "user_id": "u-2", "claimed_date": "2025-03-13" }));

        let query = Query::new()
            .eq("user_id", "u-1")
            .order("claimed_date", false)
            .limit(1);
        let rows = gateway.select("daily_claims", &query).await.unwrap();

        assert_eq!(rows, vec![json!({ "user_id": "u-1", "claimed_date": "2025-03-14" })]);
        assert_eq!(gateway.call_count(&Call::Select("daily_claims".into())), 1);
    }

    #[tokio::test]
    async fn test_unregistered_procedure_is_unavailable() {
        let gateway = MockGateway::new();
        let result = gateway.call_procedure("claim_offer", json!({})).await;
        assert!(matches!(result, Err(SdkError::ProcedureUnavailable(_))));
    }

    #[tokio::test]
    async fn test_dropping_subscription_releases_it() {
        let gateway = MockGateway::new();
        let mut subscription = gateway
            .subscribe(ChangeFilter::table("referrals").with_eq("user_id", "u-1"))
            .await
            .unwrap();
        assert_eq!(gateway.active_subscriptions(), 1);

        gateway.emit("referrals", ChangeType::Insert, json!({ "user_id": "u-2" }));
        gateway.emit("referrals", ChangeType::Insert, json!({ "user_id": "u-1" }));
        let event = subscription.next().await.unwrap();
        assert_eq!(event.record, json!({ "user_id": "u-1" }));

        drop(subscription);
        assert_eq!(gateway.active_subscriptions(), 0);
    }
}
