//! Token refresh with a bounded attempt budget and exponential backoff.
//!
//! One call to [`RefreshController::refresh`] walks
//! `Idle -> [Backoff ->] Calling -> Success | Failed(..)`:
//!
//! * once `max_attempts` attempts have been counted without a successful refresh,
//!   the session is cleared and `AuthError::RefreshExhausted` is returned without
//!   contacting the service;
//! * before calling, the controller waits until `base_backoff_ms * 2^attempt_count`
//!   milliseconds have passed since the previous attempt;
//! * a 401/403/404 answer clears the session immediately;
//! * any other failure leaves a still-valid session in place and yields `Ok(None)`,
//!   or clears an invalid one and yields `AuthError::SessionExpired`;
//! * the tokens sent are read after any backoff wait, and a response is only
//!   committed while the session still holds the refresh token that was sent, so
//!   a logout or new login during the refresh is never overwritten.
//!
//! Callers that queue up behind a refresh already in flight receive that refresh's
//! outcome instead of issuing another request.

use crate::api::AuthApi;
use crate::auth::expiry::{has_valid_session, Clock};
use crate::auth::store::SessionStore;
use crate::auth::token::{decode_expiries, TokenDecoder};
use crate::error::AuthError;
use crate::models::{LoggedInSession, LoginMethod, RefreshResponse, Session, TokenPair};
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Process-local refresh bookkeeping; never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshAttemptState {
    pub attempt_count: u32,
    pub last_attempt_at_ms: i64,
}

/// Why a refresh ended without a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The service no longer accepts the credentials.
    Auth,
    /// The service or network failed; the request may succeed later.
    Transient,
    /// The attempt budget is used up.
    Exhausted,
}

/// Where the most recent refresh stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Backoff,
    Calling,
    Success,
    Failed(RefreshFailure),
}

impl fmt::Display for RefreshPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RefreshPhase::Idle => write!(f, "idle"),
            RefreshPhase::Backoff => write!(f, "backoff"),
            RefreshPhase::Calling => write!(f, "calling"),
            RefreshPhase::Success => write!(f, "success"),
            RefreshPhase::Failed(RefreshFailure::Auth) => write!(f, "failed (auth)"),
            RefreshPhase::Failed(RefreshFailure::Transient) => write!(f, "failed (transient)"),
            RefreshPhase::Failed(RefreshFailure::Exhausted) => write!(f, "failed (exhausted)"),
        }
    }
}

/// `Ok(Some(session))` after a successful refresh, `Ok(None)` when a transient
/// failure left a still-valid session in place.
pub type RefreshOutcome = Result<Option<LoggedInSession>, AuthError>;

#[derive(Default)]
struct FlightRecord {
    completed: u64,
    last_outcome: Option<RefreshOutcome>,
}

pub struct RefreshController {
    max_attempts: u32,
    base_backoff_ms: u64,
    threshold_secs: i64,
    phase: Mutex<RefreshPhase>,
    completed: AtomicU64,
    flight: tokio::sync::Mutex<FlightRecord>,
}

impl RefreshController {
    pub fn new(max_attempts: u32, base_backoff_ms: u64, threshold_secs: i64) -> Self {
        Self {
            max_attempts,
            base_backoff_ms,
            threshold_secs,
            phase: Mutex::new(RefreshPhase::Idle),
            completed: AtomicU64::new(0),
            flight: tokio::sync::Mutex::new(FlightRecord::default()),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Minimum gap between the previous attempt and the next one.
    pub fn backoff_delay(&self, attempt_count: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt_count).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }

    /// Refreshes the session held by `store`.
    pub async fn refresh(
        &self,
        store: &SessionStore,
        api: &dyn AuthApi,
        decoder: &dyn TokenDecoder,
        clock: &dyn Clock,
    ) -> RefreshOutcome {
        let seen = self.completed.load(Ordering::Acquire);
        let mut flight = self.flight.lock().await;
        if flight.completed != seen {
            if let Some(outcome) = &flight.last_outcome {
                debug!("Sharing outcome of the refresh that was in flight");
                return outcome.clone();
            }
        }

        let outcome = self.attempt(store, api, decoder, clock).await;

        flight.completed += 1;
        flight.last_outcome = Some(outcome.clone());
        self.completed.store(flight.completed, Ordering::Release);
        outcome
    }

    async fn attempt(
        &self,
        store: &SessionStore,
        api: &dyn AuthApi,
        decoder: &dyn TokenDecoder,
        clock: &dyn Clock,
    ) -> RefreshOutcome {
        self.set_phase(RefreshPhase::Idle);
        let state = store.attempt_state();
        if state.attempt_count >= self.max_attempts {
            warn!(
                "Refresh budget exhausted after {} attempts, clearing session",
                state.attempt_count
            );
            self.clear(store);
            self.set_phase(RefreshPhase::Failed(RefreshFailure::Exhausted));
            return Err(AuthError::RefreshExhausted {
                attempts: state.attempt_count,
            });
        }

        if !store.session().is_logged_in() {
            return Err(AuthError::NotAuthenticated("no session to refresh".into()));
        }

        let delay = self.backoff_delay(state.attempt_count);
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let elapsed_ms = clock.now_millis().saturating_sub(state.last_attempt_at_ms);
        if elapsed_ms < delay_ms {
            let wait = Duration::from_millis(delay_ms.saturating_sub(elapsed_ms).min(delay_ms) as u64);
            debug!(
                "Backing off {}ms before refresh attempt {}",
                wait.as_millis(),
                state.attempt_count + 1
            );
            self.set_phase(RefreshPhase::Backoff);
            clock.sleep(wait).await;
        }

        // read after the wait: a logout or new login may have happened meanwhile
        let current = match store.session() {
            Session::LoggedIn(current) => current,
            Session::LoggedOut => {
                debug!("Session ended while waiting to refresh");
                self.set_phase(RefreshPhase::Idle);
                return Err(AuthError::NotAuthenticated(
                    "session ended before refresh".into(),
                ));
            }
        };

        let state = store.record_attempt(clock.now_millis());
        self.set_phase(RefreshPhase::Calling);
        debug!(
            "Refresh attempt {}/{} for user {}",
            state.attempt_count, self.max_attempts, current.user_id
        );

        let tokens = TokenPair {
            access_token: current.access_token.clone(),
            refresh_token: current.refresh_token.clone(),
        };
        let result = api
            .refresh(&tokens)
            .await
            .and_then(|response| refreshed_session(&current, response, decoder));

        match result {
            Ok(session) => self.commit_refreshed(store, &tokens.refresh_token, session),
            Err(e) if e.is_auth_class() => {
                warn!("Refresh rejected by auth service, clearing session: {}", e);
                if let Err(clear_err) = store.clear_if_current(&tokens.refresh_token) {
                    warn!("Could not remove persisted session: {}", clear_err);
                }
                self.set_phase(RefreshPhase::Failed(RefreshFailure::Auth));
                Err(e)
            }
            Err(e) => {
                self.set_phase(RefreshPhase::Failed(RefreshFailure::Transient));
                let latest = store.session();
                if has_valid_session(&latest, self.threshold_secs, clock.now_secs()) {
                    warn!("Refresh failed, keeping still-valid session: {}", e);
                    Ok(None)
                } else if !latest.is_logged_in() {
                    Err(AuthError::NotAuthenticated(
                        "session ended during refresh".into(),
                    ))
                } else {
                    warn!("Refresh failed and session is no longer valid: {}", e);
                    if let Err(clear_err) = store.clear_if_current(&tokens.refresh_token) {
                        warn!("Could not remove persisted session: {}", clear_err);
                    }
                    Err(AuthError::SessionExpired)
                }
            }
        }
    }

    /// Commits a refreshed session unless the one it was derived from is gone.
    fn commit_refreshed(
        &self,
        store: &SessionStore,
        sent_refresh_token: &str,
        session: LoggedInSession,
    ) -> RefreshOutcome {
        match store.replace_if_current(sent_refresh_token, session.clone().into()) {
            Ok(true) => {}
            Ok(false) => {
                self.set_phase(RefreshPhase::Idle);
                return match store.session() {
                    Session::LoggedIn(latest) => {
                        debug!("Session replaced during refresh, discarding refreshed tokens");
                        Ok(Some(latest))
                    }
                    Session::LoggedOut => {
                        debug!("Session ended during refresh, discarding refreshed tokens");
                        Err(AuthError::NotAuthenticated(
                            "session ended during refresh".into(),
                        ))
                    }
                };
            }
            Err(e) => warn!("Refreshed session could not be persisted: {}", e),
        }
        info!("Refreshed session for user {}", session.user_id);
        self.set_phase(RefreshPhase::Success);
        Ok(Some(session))
    }

    fn clear(&self, store: &SessionStore) {
        if let Err(e) = store.clear_session() {
            warn!("Could not remove persisted session: {}", e);
        }
    }

    fn set_phase(&self, phase: RefreshPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}

/// Builds the session that replaces `previous` after a successful refresh.
fn refreshed_session(
    previous: &LoggedInSession,
    response: RefreshResponse,
    decoder: &dyn TokenDecoder,
) -> Result<LoggedInSession, AuthError> {
    let expiries = decode_expiries(decoder, &response.access_token, &response.refresh_token)?;
    Ok(LoggedInSession {
        user_id: previous.user_id.clone(),
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at: response
            .expires_at
            .unwrap_or(expiries.access_token_expires_at),
        access_token_expires_at: expiries.access_token_expires_at,
        refresh_token_expires_at: expiries.refresh_token_expires_at,
        method: previous.method,
        public_key: match previous.method {
            LoginMethod::Nostr => previous.public_key.clone(),
            _ => None,
        },
    })
}
