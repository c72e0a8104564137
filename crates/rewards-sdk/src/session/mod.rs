//! Session store
//!
//! Holds the current identity and its session, exposes sign-up, sign-in and
//! sign-out, and broadcasts identity changes to registered listeners.

mod registry;

pub use registry::{IdentityCallback, ListenerHandle};

use crate::credentials;
use crate::error::{Result, SdkError};
use crate::traits::{AuthEvent, AuthProvider};
use registry::ListenerRegistry;
use rewards_gateway_client::{AuthSession, AuthUser, Credentials, SignUpResponse};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// The signed-in user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque user id
    pub id: String,
    pub email: Option<String>,
    /// Free-form profile metadata (referral code, display name)
    pub metadata: serde_json::Value,
}

impl From<&AuthUser> for Identity {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            metadata: user.user_metadata.clone(),
        }
    }
}

struct SessionShared {
    session: RwLock<Option<AuthSession>>,
    registry: Arc<ListenerRegistry>,
}

impl SessionShared {
    /// Replace the session; listeners hear about it only when the identity changed
    fn apply(&self, session: Option<AuthSession>) {
        let (before, after) = {
            let mut guard = self.session.write().unwrap_or_else(|e| e.into_inner());
            let before = guard.as_ref().map(|s| s.user.id.clone());
            *guard = session;
            let after = guard.as_ref().map(|s| Identity::from(&s.user));
            (before, after)
        };

        if before.as_deref() != after.as_ref().map(|i| i.id.as_str()) {
            debug!(user_id = ?after.as_ref().map(|i| &i.id), "Identity changed");
            self.registry.notify(after.as_ref());
        }
    }
}

/// Current identity plus credential lifecycle
pub struct SessionStore {
    provider: Arc<dyn AuthProvider>,
    shared: Arc<SessionShared>,
}

impl SessionStore {
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            shared: Arc::new(SessionShared {
                session: RwLock::new(None),
                registry: Arc::new(ListenerRegistry::new()),
            }),
        }
    }

    /// Register an account.
    ///
    /// When the provider issues a session immediately the user is signed in;
    /// otherwise the response reports that confirmation is pending.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse> {
        credentials::validate(credentials)?;

        let response = self.provider.sign_up(credentials).await?;
        if let Some(session) = &response.session {
            self.shared.apply(Some(session.clone()));
        }
        Ok(response)
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, credentials: &Credentials) -> Result<Identity> {
        credentials::validate(credentials)?;

        let session = self.provider.sign_in(credentials).await?;
        let identity = Identity::from(&session.user);
        self.shared.apply(Some(session));
        info!(user_id = %identity.id, "Session established");
        Ok(identity)
    }

    /// Sign in, establishing the session only if `accept` still agrees once
    /// the provider has answered.
    ///
    /// A refused session is signed out at the provider again and `Ok(None)`
    /// is returned; local state is not touched.
    pub async fn sign_in_if(
        &self,
        credentials: &Credentials,
        accept: impl FnOnce(&Identity) -> bool,
    ) -> Result<Option<Identity>> {
        credentials::validate(credentials)?;

        let session = self.provider.sign_in(credentials).await?;
        let identity = Identity::from(&session.user);
        if !accept(&identity) {
            debug!(user_id = %identity.id, "Sign-in no longer wanted, discarding session");
            if let Err(err) = self.provider.sign_out(&session).await {
                warn!(user_id = %identity.id, error = %err, "Failed to sign out discarded session");
            }
            return Ok(None);
        }

        self.shared.apply(Some(session));
        info!(user_id = %identity.id, "Session established");
        Ok(Some(identity))
    }

    /// Sign out; the session is kept if the provider refuses
    pub async fn sign_out(&self) -> Result<()> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };

        self.provider.sign_out(&session).await?;
        self.shared.apply(None);
        Ok(())
    }

    /// Snapshot of the current session
    pub fn current_session(&self) -> Option<AuthSession> {
        self.shared
            .session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current identity, if signed in
    pub fn identity(&self) -> Option<Identity> {
        self.current_session().map(|s| Identity::from(&s.user))
    }

    /// Identity or `NotSignedIn`
    pub fn require_identity(&self) -> Result<Identity> {
        self.identity().ok_or(SdkError::NotSignedIn)
    }

    pub fn is_signed_in(&self) -> bool {
        self.identity().is_some()
    }

    /// Listen for identity changes.
    ///
    /// The first listener attaches to the provider's auth events; dropping the
    /// last handle detaches. Must be called within a tokio runtime.
    pub fn on_identity_changed(
        &self,
        callback: impl Fn(Option<&Identity>) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let provider = self.provider.clone();
        let shared = Arc::downgrade(&self.shared);

        self.shared
            .registry
            .add(Arc::new(callback), move || {
                tokio::spawn(forward_auth_events(provider, shared))
            })
    }

    /// Number of registered identity listeners
    pub fn listener_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether the upstream auth event subscription is live
    pub fn upstream_active(&self) -> bool {
        self.shared.registry.upstream_active()
    }
}

async fn forward_auth_events(provider: Arc<dyn AuthProvider>, shared: Weak<SessionShared>) {
    let mut events = provider.auth_events();

    loop {
        match events.recv().await {
            Ok(event) => {
                let Some(shared) = shared.upgrade() else { break };
                shared.apply(event.session().cloned());
                if let AuthEvent::TokenRefreshed(session) = &event {
                    debug!(user_id = %session.user.id, "Token refreshed");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Auth event listener lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
