//! Confirmation waiter state machine
//!
//! One task per wait joins the change feed and the poll with `select!`: the
//! first channel to report confirmation wins and the other is dropped. The
//! handle owns the task and the feed's subscription guard, so leaving
//! `Waiting` (confirmation, timeout, `back()`, or dropping the handle)
//! releases both on the spot.

use super::{ConfirmationMode, ConfirmationSource, ConfirmationStatus};
use crate::config::ConfirmationSettings;
use crate::error::{Result, SdkError};
use crate::session::{Identity, SessionStore};
use crate::traits::SubscriptionGuard;
use chrono::{DateTime, Utc};
use rewards_gateway_client::{ChangeEvent, Credentials, SignUpResponse};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const AUTO_SIGN_IN_FAILED: &str =
    "Sign-up succeeded but automatic sign-in failed. Please try signing in or check auth settings.";

/// Result of handing a fresh sign-up to the waiter
pub enum SignUpOutcome {
    /// A session exists (issued by sign-up or by automatic sign-in)
    SignedIn(Identity),
    /// Confirmation pending; the handle tracks it
    AwaitingConfirmation(WaitHandle),
}

impl std::fmt::Debug for SignUpOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignUpOutcome::SignedIn(identity) => f.debug_tuple("SignedIn").field(identity).finish(),
            SignUpOutcome::AwaitingConfirmation(handle) => f
                .debug_tuple("AwaitingConfirmation")
                .field(&handle.snapshot())
                .finish(),
        }
    }
}

/// Observable state of one wait
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaitSnapshot {
    pub email: String,
    pub started_at: DateTime<Utc>,
    /// Polls issued so far
    pub attempts: u32,
    pub status: ConfirmationStatus,
    /// Last sign-in failure while waiting
    pub last_error: Option<String>,
}

pub struct ConfirmationWaiter {
    session: Arc<SessionStore>,
    source: Arc<dyn ConfirmationSource>,
    settings: ConfirmationSettings,
}

impl ConfirmationWaiter {
    pub fn new(
        session: Arc<SessionStore>,
        source: Arc<dyn ConfirmationSource>,
        settings: ConfirmationSettings,
    ) -> Self {
        Self {
            session,
            source,
            settings,
        }
    }

    /// Register, then either sign in or start waiting
    pub async fn sign_up(&self, credentials: Credentials) -> Result<SignUpOutcome> {
        let response = self.session.sign_up(&credentials).await?;
        self.after_sign_up(credentials, &response).await
    }

    /// Continue from a sign-up response.
    ///
    /// Must be called within a tokio runtime when waiting is required.
    pub async fn after_sign_up(
        &self,
        credentials: Credentials,
        response: &SignUpResponse,
    ) -> Result<SignUpOutcome> {
        if let Some(session) = &response.session {
            return Ok(SignUpOutcome::SignedIn(Identity::from(&session.user)));
        }

        match self.settings.mode {
            ConfirmationMode::AutoSignIn => match self.session.sign_in(&credentials).await {
                Ok(identity) => Ok(SignUpOutcome::SignedIn(identity)),
                Err(err) => {
                    warn!(email = %credentials.email, error = %err, "Automatic sign-in after sign-up failed");
                    Err(SdkError::Rejected(AUTO_SIGN_IN_FAILED.into()))
                }
            },
            ConfirmationMode::AwaitConfirmation => Ok(SignUpOutcome::AwaitingConfirmation(
                self.wait(credentials).await,
            )),
        }
    }

    /// Enter `Waiting` for the credentials' email
    pub async fn wait(&self, credentials: Credentials) -> WaitHandle {
        let email = credentials.email.clone();

        let (feed, guard) = match self.source.watch(&email).await {
            Ok(subscription) => {
                let (events, guard) = subscription.into_parts();
                (Some(events), Some(guard))
            }
            Err(err) => {
                warn!(email = %email, error = %err, "Confirmation feed unavailable, polling only");
                (None, None)
            }
        };

        let initial = WaitSnapshot {
            email: email.clone(),
            started_at: Utc::now(),
            attempts: 0,
            status: ConfirmationStatus::Waiting,
            last_error: None,
        };
        let (status_tx, _) = watch::channel(ConfirmationStatus::Waiting);

        let shared = Arc::new(WaitShared {
            credentials,
            session: self.session.clone(),
            source: self.source.clone(),
            settings: self.settings.clone(),
            state: Mutex::new(initial),
            status_tx,
            feed_guard: Mutex::new(guard),
            task: Mutex::new(None),
            sign_in_lock: tokio::sync::Mutex::new(()),
        });

        let task = tokio::spawn(run_wait(shared.clone(), feed));
        *lock(&shared.task) = Some(task);
        if shared.status() != ConfirmationStatus::Waiting {
            // Finished before the handle was stored
            shared.release();
        }
        info!(email = %email, "Waiting for email confirmation");

        WaitHandle { shared }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct WaitShared {
    credentials: Credentials,
    session: Arc<SessionStore>,
    source: Arc<dyn ConfirmationSource>,
    settings: ConfirmationSettings,
    state: Mutex<WaitSnapshot>,
    status_tx: watch::Sender<ConfirmationStatus>,
    feed_guard: Mutex<Option<SubscriptionGuard>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Serialises sign-in between the task and manual re-checks
    sign_in_lock: tokio::sync::Mutex<()>,
}

impl WaitShared {
    fn email(&self) -> &str {
        &self.credentials.email
    }

    fn status(&self) -> ConfirmationStatus {
        lock(&self.state).status
    }

    /// Move to `to` if the current status is one of `from`
    fn transition(&self, from: &[ConfirmationStatus], to: ConfirmationStatus) -> bool {
        if !self.enter(from, to) {
            return false;
        }
        self.announce(to);
        true
    }

    /// Record the new status without telling anyone yet
    fn enter(&self, from: &[ConfirmationStatus], to: ConfirmationStatus) -> bool {
        let mut state = lock(&self.state);
        if !from.contains(&state.status) {
            return false;
        }
        state.status = to;
        true
    }

    /// Publish a status already recorded by `enter`
    fn announce(&self, to: ConfirmationStatus) {
        debug!(email = %self.email(), status = ?to, "Confirmation status changed");
        self.status_tx.send_replace(to);

        if to != ConfirmationStatus::Waiting {
            self.release();
        }
    }

    /// Drop the feed subscription and stop the task
    fn release(&self) {
        if let Some(guard) = lock(&self.feed_guard).take() {
            guard.release();
        }
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }

    /// Count a poll; `None` once the cap is reached or the wait is over
    fn begin_poll(&self) -> Option<u32> {
        let mut state = lock(&self.state);
        if state.status != ConfirmationStatus::Waiting
            || state.attempts >= self.settings.max_attempts
        {
            return None;
        }
        state.attempts += 1;
        Some(state.attempts)
    }

    fn polls_exhausted(&self) -> bool {
        lock(&self.state).attempts >= self.settings.max_attempts
    }

    /// Sign in with the sign-up credentials.
    ///
    /// Returns true once the wait is `Confirmed`. A failure after another
    /// channel already confirmed is swallowed, and a session arriving after
    /// the wait was cancelled is discarded.
    async fn try_sign_in(&self) -> Result<bool> {
        let _serial = self.sign_in_lock.lock().await;

        match self.status() {
            ConfirmationStatus::Confirmed => return Ok(true),
            status if !status.can_recheck() => return Ok(false),
            _ => {}
        }

        // The status and the session land together, so a `back()` that wins
        // the race leaves nothing signed in; observers hear `Confirmed` only
        // once the session is in place
        let accepted = self.session.sign_in_if(&self.credentials, |_| {
            self.enter(
                &[ConfirmationStatus::Waiting, ConfirmationStatus::TimedOut],
                ConfirmationStatus::Confirmed,
            )
        });
        match accepted.await {
            Ok(Some(identity)) => {
                info!(user_id = %identity.id, "Email confirmed, signed in");
                self.announce(ConfirmationStatus::Confirmed);
                Ok(true)
            }
            Ok(None) => {
                debug!(email = %self.email(), status = ?self.status(), "Wait ended during sign-in");
                Ok(self.status() == ConfirmationStatus::Confirmed)
            }
            Err(_) if self.status() == ConfirmationStatus::Confirmed => Ok(true),
            Err(err) => {
                warn!(email = %self.email(), error = %err, "Sign-in after confirmation failed");
                lock(&self.state).last_error = Some(err.user_message());
                Err(err)
            }
        }
    }
}

/// Resolves only when the feed reports confirmation
async fn detect_via_feed(
    feed: &mut Option<mpsc::UnboundedReceiver<ChangeEvent>>,
    source: &dyn ConfirmationSource,
    email: &str,
) {
    if let Some(events) = feed.as_mut() {
        while let Some(event) = events.recv().await {
            if source.confirms(&event, email) {
                debug!(email, "Confirmation seen on change feed");
                return;
            }
        }
        *feed = None;
    }
    std::future::pending::<()>().await
}

enum PollOutcome {
    Confirmed,
    Exhausted,
}

async fn detect_via_poll(shared: &WaitShared, ticker: &mut Interval) -> PollOutcome {
    loop {
        if shared.polls_exhausted() {
            return PollOutcome::Exhausted;
        }
        ticker.tick().await;
        let Some(attempt) = shared.begin_poll() else {
            return PollOutcome::Exhausted;
        };

        match shared.source.is_confirmed(shared.email()).await {
            Ok(true) => {
                debug!(email = %shared.email(), attempt, "Confirmation seen by poll");
                return PollOutcome::Confirmed;
            }
            Ok(false) => {}
            Err(err) => warn!(email = %shared.email(), attempt, error = %err, "Confirmation poll failed"),
        }
    }
}

async fn run_wait(shared: Arc<WaitShared>, mut feed: Option<mpsc::UnboundedReceiver<ChangeEvent>>) {
    let period = shared.settings.poll_interval();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let outcome = tokio::select! {
            _ = detect_via_feed(&mut feed, shared.source.as_ref(), shared.email()) => PollOutcome::Confirmed,
            outcome = detect_via_poll(&shared, &mut ticker) => outcome,
        };

        match outcome {
            PollOutcome::Confirmed => {
                if let Ok(true) = shared.try_sign_in().await {
                    return;
                }
                if shared.status() != ConfirmationStatus::Waiting {
                    return;
                }
            }
            PollOutcome::Exhausted => {
                if shared.transition(&[ConfirmationStatus::Waiting], ConfirmationStatus::TimedOut) {
                    info!(email = %shared.email(), "Gave up waiting for email confirmation");
                }
                return;
            }
        }
    }
}

/// Owner of one confirmation wait; dropping it cancels the wait
pub struct WaitHandle {
    shared: Arc<WaitShared>,
}

impl WaitHandle {
    pub fn status(&self) -> ConfirmationStatus {
        self.shared.status()
    }

    pub fn snapshot(&self) -> WaitSnapshot {
        lock(&self.shared.state).clone()
    }

    pub fn status_changes(&self) -> watch::Receiver<ConfirmationStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Whether the poll task is still scheduled
    pub fn is_polling(&self) -> bool {
        lock(&self.shared.task).is_some()
    }

    /// Whether the change-feed subscription is still held
    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.feed_guard).is_some()
    }

    /// "I have confirmed": run the check once and sign in if it passes
    pub async fn recheck(&self) -> Result<ConfirmationStatus> {
        let status = self.status();
        if !status.can_recheck() {
            return Ok(status);
        }

        if self.shared.source.is_confirmed(self.shared.email()).await? {
            self.shared.try_sign_in().await?;
        }
        Ok(self.status())
    }

    /// "Back": abandon the wait
    pub fn cancel(&self) {
        if self.shared.transition(
            &[ConfirmationStatus::Waiting, ConfirmationStatus::TimedOut],
            ConfirmationStatus::Cancelled,
        ) {
            debug!(email = %self.shared.email(), "Confirmation wait cancelled");
        }
    }

    pub fn back(&self) {
        self.cancel();
    }
}

impl Drop for WaitHandle {
    fn drop(&mut self) {
        self.cancel();
        self.shared.release();
    }
}
