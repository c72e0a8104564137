//! Hosted backend: gateway and auth over `rewards-gateway-client`

use crate::error::Result;
use crate::traits::{AuthEvent, AuthProvider, RemoteGateway, Subscription, SubscriptionGuard};
use async_trait::async_trait;
use rewards_gateway_client::{
    AuthSession, ChangeFilter, Credentials, GatewayClient, GatewayConfig, Query, RealtimeClient,
    SignUpResponse,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the auth event broadcast
const AUTH_EVENT_CAPACITY: usize = 16;

/// Remote gateway and identity provider backed by the hosted service
///
/// # Example
///
/// ```rust,ignore
/// use rewards_sdk::{HostedBackend, SessionStore};
/// use rewards_gateway_client::GatewayConfig;
///
/// let backend = Arc::new(HostedBackend::new(GatewayConfig {
///     base_url: "https://project.example.co".into(),
///     anon_key: "public-anon-key".into(),
///     ..Default::default()
/// })?);
///
/// let session = SessionStore::new(backend.clone());
/// ```
pub struct HostedBackend {
    client: Arc<GatewayClient>,
    realtime: RealtimeClient,
    events: broadcast::Sender<AuthEvent>,
}

impl HostedBackend {
    /// Create a backend for the given gateway configuration
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = GatewayClient::new(config.clone())?;
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);

        Ok(Self {
            client: Arc::new(client),
            realtime: RealtimeClient::new(config),
            events,
        })
    }

    /// Underlying HTTP client
    pub fn client(&self) -> &GatewayClient {
        &self.client
    }
}

#[async_trait]
impl RemoteGateway for HostedBackend {
    async fn call_procedure(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        debug!(procedure = name, "Calling remote procedure");
        Ok(self.client.call_procedure(name, &args).await?)
    }

    async fn select(&self, table: &str, query: &Query) -> Result<Vec<serde_json::Value>> {
        Ok(self.client.select(table, query).await?)
    }

    async fn insert(&self, table: &str, row: serde_json::Value) -> Result<()> {
        Ok(self.client.insert(table, &row).await?)
    }

    async fn update(&self, table: &str, filter: &Query, patch: serde_json::Value) -> Result<()> {
        Ok(self.client.update(table, filter, &patch).await?)
    }

    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        let (events, channel) = self
            .realtime
            .subscribe(&filter, self.client.access_token())
            .await?;

        Ok(Subscription::new(events, SubscriptionGuard::new(move || channel.close())))
    }
}

#[async_trait]
impl AuthProvider for HostedBackend {
    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse> {
        let response = self.client.sign_up(credentials).await?;

        if let Some(session) = &response.session {
            self.client.set_access_token(Some(session.access_token.clone()));
            let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        }
        info!(
            email = %credentials.email,
            confirmation_required = response.requires_confirmation(),
            "Account registered"
        );

        Ok(response)
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession> {
        let session = self.client.sign_in_with_password(credentials).await?;

        self.client.set_access_token(Some(session.access_token.clone()));
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        info!(user_id = %session.user.id, "Signed in");

        Ok(session)
    }

    async fn sign_out(&self, session: &AuthSession) -> Result<()> {
        self.client.sign_out(&session.access_token).await?;

        self.client.set_access_token(None);
        let _ = self.events.send(AuthEvent::SignedOut);
        info!(user_id = %session.user.id, "Signed out");

        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
