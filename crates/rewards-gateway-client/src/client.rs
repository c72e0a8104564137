//! HTTP client for the hosted rewards backend

use crate::error::{GatewayError, Result};
use crate::types::*;
use reqwest::{header, Client, RequestBuilder, StatusCode};
use std::sync::RwLock;
use std::time::Duration;

/// HTTP client for table, procedure and auth endpoints
///
/// # Example
///
/// ```rust,no_run
/// use rewards_gateway_client::{GatewayClient, GatewayConfig, Query};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = GatewayClient::new(GatewayConfig {
///     base_url: "https://project.example.co".into(),
///     anon_key: "public-anon-key".into(),
///     ..Default::default()
/// })?;
///
/// // Read the caller's balance
/// let rows = client
///     .select("users", &Query::new().select("coins").eq("id", "user-1"))
///     .await?;
///
/// // Invoke a procedure
/// let result = client
///     .call_procedure("claim_offer", &serde_json::json!({"user_id": "user-1", "offer_id": "offer-1"}))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct GatewayClient {
    config: GatewayConfig,
    client: Client,
    /// Bearer token of the signed-in user; the anon key is used when unset
    access_token: RwLock<Option<String>>,
}

impl GatewayClient {
    /// Create a new gateway client
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let api_key = header::HeaderValue::from_str(&config.anon_key)
            .map_err(|e| GatewayError::InvalidResponse(format!("Invalid anon key: {}", e)))?;
        headers.insert("apikey", api_key);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            access_token: RwLock::new(None),
        })
    }

    /// Get the client configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Set or clear the bearer token used for table and procedure calls
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    /// Current bearer token, if a user is signed in
    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|guard| guard.clone())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token()
            .unwrap_or_else(|| self.config.anon_key.clone());
        request.header(header::AUTHORIZATION, format!("Bearer {}", token))
    }

    // ==================== Procedures ====================

    /// Invoke a remote procedure by name
    ///
    /// Returns the raw JSON result, which may be a row, an array of rows,
    /// or a scalar depending on the procedure.
    pub async fn call_procedure(
        &self,
        name: &str,
        args: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/rpc/{}", self.config.rest_url(), urlencoding::encode(name));

        let response = self
            .authorized(self.client.post(&url))
            .header(header::CONTENT_TYPE, "application/json")
            .json(args)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            let err = GatewayError::from_body(404, &body);
            return Err(match err {
                GatewayError::Server { code: None, .. } => {
                    GatewayError::ProcedureNotFound(name.to_string())
                }
                GatewayError::Server { code: Some(ref code), .. } if code == "PGRST202" => {
                    GatewayError::ProcedureNotFound(name.to_string())
                }
                other => other,
            });
        }

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(serde_json::Value::Null);
        }

        self.handle_response(response).await
    }

    // ==================== Tables ====================

    /// Read rows from a table
    pub async fn select(&self, table: &str, query: &Query) -> Result<Vec<serde_json::Value>> {
        let url = format!(
            "{}/{}?{}",
            self.config.rest_url(),
            urlencoding::encode(table),
            query.to_query_string()
        );

        let response = self.authorized(self.client.get(&url)).send().await?;
        self.handle_response(response).await
    }

    /// Insert a single row
    pub async fn insert(&self, table: &str, row: &serde_json::Value) -> Result<()> {
        let url = format!("{}/{}", self.config.rest_url(), urlencoding::encode(table));

        let response = self
            .authorized(self.client.post(&url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;

        self.handle_empty(response).await
    }

    /// Patch every row matching the query filters
    pub async fn update(
        &self,
        table: &str,
        filter: &Query,
        patch: &serde_json::Value,
    ) -> Result<()> {
        let url = format!(
            "{}/{}?{}",
            self.config.rest_url(),
            urlencoding::encode(table),
            filter.to_filter_string()
        );

        let response = self
            .authorized(self.client.patch(&url))
            .header(header::CONTENT_TYPE, "application/json")
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;

        self.handle_empty(response).await
    }

    // ==================== Auth ====================

    /// Register a new account
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse> {
        let url = format!("{}/signup", self.config.auth_url());

        let response = self.client.post(&url).json(credentials).send().await?;
        let body: serde_json::Value = self.handle_auth_response(response).await?;

        if body.get("access_token").is_some() {
            let session: AuthSession = serde_json::from_value(body)?;
            return Ok(SignUpResponse {
                user: Some(session.user.clone()),
                session: Some(session),
            });
        }

        // Confirmation pending: the body is the user itself, or wraps it
        let user_value = body.get("user").cloned().unwrap_or(body);
        let user = if user_value.get("id").is_some() {
            Some(serde_json::from_value(user_value)?)
        } else {
            None
        };

        Ok(SignUpResponse { user, session: None })
    }

    /// Exchange email and password for a session
    pub async fn sign_in_with_password(&self, credentials: &Credentials) -> Result<AuthSession> {
        let url = format!("{}/token?grant_type=password", self.config.auth_url());

        let response = self.client.post(&url).json(credentials).send().await?;
        self.handle_auth_response(response).await
    }

    /// Revoke the given session
    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let url = format!("{}/logout", self.config.auth_url());

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(auth_error(status, &body))
    }

    // ==================== Helper Methods ====================

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_body(status, &body));
        }

        let body = response.json().await?;
        Ok(body)
    }

    async fn handle_empty(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_body(status, &body));
        }
        Ok(())
    }

    async fn handle_auth_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(status, &body));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

/// Auth rejections become [`GatewayError::Auth`]; server faults stay server errors.
fn auth_error(status: u16, body: &str) -> GatewayError {
    match GatewayError::from_body(status, body) {
        GatewayError::Server { status, message, .. } if (400..500).contains(&status) => {
            GatewayError::Auth(message)
        }
        other => other,
    }
}
