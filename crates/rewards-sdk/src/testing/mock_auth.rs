//! In-memory identity provider for tests.

use crate::error::{Result, SdkError};
use crate::traits::{AuthEvent, AuthProvider};
use async_trait::async_trait;
use rewards_gateway_client::{AuthSession, AuthUser, Credentials, SignUpResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;

struct Account {
    password: String,
    user: AuthUser,
    confirmed: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Mock identity provider.
///
/// Accounts are email/password pairs. With confirmation required, sign-up
/// issues no session and sign-in is rejected until [`MockAuth::confirm`].
pub struct MockAuth {
    accounts: Mutex<HashMap<String, Account>>,
    require_confirmation: AtomicBool,
    sign_in_failure: Mutex<Option<SdkError>>,
    sign_in_count: AtomicU32,
    sign_in_latency: Mutex<Option<Duration>>,
    next_user: AtomicU32,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAuth {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: Mutex::new(HashMap::new()),
            require_confirmation: AtomicBool::new(false),
            sign_in_failure: Mutex::new(None),
            sign_in_count: AtomicU32::new(0),
            sign_in_latency: Mutex::new(None),
            next_user: AtomicU32::new(1),
            events,
        }
    }

    /// Withhold sessions until the email is confirmed.
    pub fn with_confirmation_required(self, required: bool) -> Self {
        self.require_confirmation.store(required, Ordering::SeqCst);
        self
    }

    /// Delay every sign-in by `latency`.
    pub fn with_sign_in_latency(self, latency: Duration) -> Self {
        *lock(&self.sign_in_latency) = Some(latency);
        self
    }

    /// Seed a confirmed account.
    pub fn with_account(self, email: &str, password: &str) -> Self {
        self.add_account(email, password, true);
        self
    }

    fn add_account(&self, email: &str, password: &str, confirmed: bool) -> AuthUser {
        let n = self.next_user.fetch_add(1, Ordering::SeqCst);
        let user = AuthUser {
            id: format!("user-{}", n),
            email: Some(email.to_string()),
            email_confirmed_at: None,
            user_metadata: serde_json::json!({}),
        };
        lock(&self.accounts).insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
                confirmed,
            },
        );
        user
    }

    /// Mark the email as confirmed.
    pub fn confirm(&self, email: &str) {
        if let Some(account) = lock(&self.accounts).get_mut(email) {
            account.confirmed = true;
            account.user.email_confirmed_at = Some("2025-01-01T00:00:00Z".to_string());
        }
    }

    /// Fail every sign-in with `error` (or stop failing with `None`).
    pub fn fail_sign_in(&self, error: Option<SdkError>) {
        *lock(&self.sign_in_failure) = error;
    }

    pub fn sign_in_count(&self) -> u32 {
        self.sign_in_count.load(Ordering::SeqCst)
    }

    /// Push an event as if it came from elsewhere (another tab, a refresh).
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// A session for a seeded account, without counting a sign-in.
    pub fn session_for(&self, email: &str) -> Option<AuthSession> {
        lock(&self.accounts)
            .get(email)
            .map(|account| session(&account.user))
    }
}

fn session(user: &AuthUser) -> AuthSession {
    AuthSession {
        access_token: format!("token-{}", user.id),
        refresh_token: Some(format!("refresh-{}", user.id)),
        expires_in: Some(3600),
        user: user.clone(),
    }
}

#[async_trait]
impl AuthProvider for MockAuth {
    async fn sign_up(&self, credentials: &Credentials) -> Result<SignUpResponse> {
        if lock(&self.accounts).contains_key(&credentials.email) {
            return Err(SdkError::Rejected("User already registered".into()));
        }

        let confirmed = !self.require_confirmation.load(Ordering::SeqCst);
        let user = self.add_account(&credentials.email, &credentials.password, confirmed);

        if !confirmed {
            return Ok(SignUpResponse {
                user: Some(user),
                session: None,
            });
        }

        let session = session(&user);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(SignUpResponse {
            user: Some(user),
            session: Some(session),
        })
    }

    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession> {
        self.sign_in_count.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.sign_in_latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = lock(&self.sign_in_failure).clone() {
            return Err(error);
        }

        let session = {
            let accounts = lock(&self.accounts);
            let account = accounts
                .get(&credentials.email)
                .filter(|account| account.password == credentials.password)
                .ok_or_else(|| SdkError::Rejected("Invalid login credentials".into()))?;
            if !account.confirmed {
                return Err(SdkError::Rejected("Email not confirmed".into()));
            }
            session(&account.user)
        };

        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, _session: &AuthSession) -> Result<()> {
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
