//! Types for the gateway client API

use serde::{Deserialize, Serialize};

/// Client configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the hosted backend (REST under `/rest/v1`, auth under `/auth/v1`)
    pub base_url: String,
    /// Public anonymous API key sent with every request
    pub anon_key: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
    /// Database schema addressed by the change feed
    pub schema: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            timeout_secs: 30,
            schema: "public".to_string(),
        }
    }
}

impl GatewayConfig {
    pub(crate) fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.base_url.trim_end_matches('/'))
    }

    pub(crate) fn realtime_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        };
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base,
            urlencoding::encode(&self.anon_key)
        )
    }
}

/// Row query for table reads, updates and existence checks.
///
/// Renders to PostgREST query parameters:
/// `select=a,b&col=eq.value&order=col.desc&limit=10`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Columns to return (`*` when empty)
    pub columns: Vec<String>,
    /// Equality filters, all must match
    pub filters: Vec<(String, String)>,
    /// Ordering column and direction
    pub order: Option<(String, bool)>,
    /// Maximum rows
    pub limit: Option<u32>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict the returned columns
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    /// Add an equality filter
    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((column.into(), value.to_string()));
        self
    }

    /// Order by a column
    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render as a URL query string (without the leading `?`)
    pub fn to_query_string(&self) -> String {
        let mut params = Vec::new();

        if self.columns.is_empty() {
            params.push("select=*".to_string());
        } else {
            params.push(format!("select={}", self.columns.join(",")));
        }
        for (column, value) in &self.filters {
            params.push(format!(
                "{}=eq.{}",
                urlencoding::encode(column),
                urlencoding::encode(value)
            ));
        }
        if let Some((column, ascending)) = &self.order {
            let direction = if *ascending { "asc" } else { "desc" };
            params.push(format!("order={}.{}", urlencoding::encode(column), direction));
        }
        if let Some(limit) = self.limit {
            params.push(format!("limit={}", limit));
        }

        params.join("&")
    }

    /// Render only the filters (for PATCH requests)
    pub fn to_filter_string(&self) -> String {
        self.filters
            .iter()
            .map(|(column, value)| {
                format!(
                    "{}=eq.{}",
                    urlencoding::encode(column),
                    urlencoding::encode(value)
                )
            })
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Email/password credentials
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// User record returned by the auth endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Set once the user followed the confirmation link
    #[serde(default)]
    pub email_confirmed_at: Option<String>,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

/// An issued session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
}

/// Outcome of a sign-up request.
///
/// When the provider requires email confirmation no session is issued.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpResponse {
    pub user: Option<AuthUser>,
    pub session: Option<AuthSession>,
}

impl SignUpResponse {
    pub fn requires_confirmation(&self) -> bool {
        self.session.is_none()
    }
}

/// Selects the rows whose changes a subscriber wants to hear about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub table: String,
    /// Optional `column=eq.value` predicate
    pub column: Option<(String, String)>,
}

impl ChangeFilter {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: None,
        }
    }

    pub fn with_eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.column = Some((column.into(), value.to_string()));
        self
    }

    /// Predicate in change-feed syntax (`user_id=eq.abc`)
    pub fn predicate(&self) -> Option<String> {
        self.column
            .as_ref()
            .map(|(column, value)| format!("{}=eq.{}", column, value))
    }

    /// Channel topic for this filter
    pub fn topic(&self) -> String {
        match &self.column {
            Some((column, value)) => format!("realtime:{}:{}:{}", self.table, column, value),
            None => format!("realtime:{}", self.table),
        }
    }
}

/// Change type reported by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A row change notification.
///
/// Carries the new record for convenience, but consumers treat it as a
/// signal to re-fetch rather than as authoritative data.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: String,
    pub change_type: ChangeType,
    pub record: serde_json::Value,
}
