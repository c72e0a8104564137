//! Identity provider trait

use crate::error::Result;
use async_trait::async_trait;
use rewards_gateway_client::{AuthSession, Credentials, SignUpResponse};
use tokio::sync::broadcast;

/// Session lifecycle change reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(AuthSession),
    TokenRefreshed(AuthSession),
    SignedOut,
}

impl AuthEvent {
    /// Session after this event, if any
    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}

/// Issues and revokes sessions.
///
/// Rejections (bad credentials, unconfirmed email) come back as
/// `SdkError::Rejected` with the provider's message.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register an account; no session is issued when confirmation is required
    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse>;

    /// Exchange credentials for a session
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession>;

    /// Revoke a session
    async fn sign_out(&self, session: &AuthSession) -> Result<()>;

    /// Upstream stream of session changes (sign-in elsewhere, refresh, revocation)
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}
