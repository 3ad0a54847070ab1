use crate::auth::expiry::{has_valid_session, Clock};
use crate::auth::refresh::RefreshAttemptState;
use crate::auth::token::{decode_expiries, TokenDecoder};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{LoggedInSession, LoginMethod, PersistedSession, Session};
use crate::storage::KeyValueStorage;
use log::{debug, warn};
use std::sync::{Arc, Mutex, RwLock};

/// Owner of the current `Session` and of the refresh attempt counters.
///
/// Reads are served from memory only; durable storage is read once, when the
/// store is opened, and written by `set_session`/`clear_session`.
pub struct SessionStore {
    key: String,
    persist: bool,
    storage: Arc<dyn KeyValueStorage>,
    session: RwLock<Session>,
    attempts: Mutex<RefreshAttemptState>,
}

impl SessionStore {
    /// Opens the store, restoring a previously persisted session when persistence is enabled.
    ///
    /// A stored session is normalized (string timestamps coerced), missing expiries
    /// are reconstituted from the tokens' own `exp` claims and written back, and the
    /// result is discarded unless its refresh token outlives `default_threshold_secs`.
    /// A stored session that cannot be repaired is discarded; this never fails the
    /// construction.
    pub fn open(
        config: &AuthConfig,
        storage: Arc<dyn KeyValueStorage>,
        decoder: &dyn TokenDecoder,
        clock: &dyn Clock,
    ) -> Result<Self, AuthError> {
        if config.storage_key.trim().is_empty() {
            return Err(AuthError::MissingConfiguration("storage_key".into()));
        }

        let store = Self {
            key: config.storage_key.clone(),
            persist: config.persist,
            storage,
            session: RwLock::new(Session::LoggedOut),
            attempts: Mutex::new(RefreshAttemptState::default()),
        };

        if store.persist {
            let restored = store.restore(decoder, clock, config.default_threshold_secs);
            *store.session.write().unwrap_or_else(|e| e.into_inner()) = restored;
        }
        Ok(store)
    }

    /// The current session.
    pub fn session(&self) -> Session {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replaces the session, persists it if enabled and resets the attempt counters.
    ///
    /// The in-memory value is replaced even when writing to storage fails; the
    /// storage error is still returned.
    pub fn set_session(&self, session: Session) -> Result<(), AuthError> {
        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        self.commit(&mut current, session)
    }

    /// Like `set_session`, but only while the held session still carries
    /// `refresh_token`. Returns whether the session was replaced.
    pub(crate) fn replace_if_current(
        &self,
        refresh_token: &str,
        session: Session,
    ) -> Result<bool, AuthError> {
        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        if !holds_refresh_token(&current, refresh_token) {
            return Ok(false);
        }
        self.commit(&mut current, session).map(|_| true)
    }

    /// Logs out locally: drops the session, its persisted copy and the attempt counters.
    pub fn clear_session(&self) -> Result<(), AuthError> {
        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        self.commit(&mut current, Session::LoggedOut)
    }

    /// Clears the session only while it still carries `refresh_token`.
    pub(crate) fn clear_if_current(&self, refresh_token: &str) -> Result<bool, AuthError> {
        let mut current = self.session.write().unwrap_or_else(|e| e.into_inner());
        if !holds_refresh_token(&current, refresh_token) {
            return Ok(false);
        }
        self.commit(&mut current, Session::LoggedOut).map(|_| true)
    }

    pub fn attempt_state(&self) -> RefreshAttemptState {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Counts a refresh attempt made at `now_millis` and returns the new state.
    pub(crate) fn record_attempt(&self, now_millis: i64) -> RefreshAttemptState {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        attempts.attempt_count += 1;
        attempts.last_attempt_at_ms = now_millis;
        *attempts
    }

    fn reset_attempts(&self) {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) = RefreshAttemptState::default();
    }

    // `current` is the held write guard; storage is written before it is released.
    fn commit(&self, current: &mut Session, session: Session) -> Result<(), AuthError> {
        if let Session::LoggedIn(next) = &session {
            if !next.has_consistent_expiries() {
                warn!(
                    "Session for user {} has an access token expiring after its refresh token ({} > {})",
                    next.user_id, next.access_token_expires_at, next.refresh_token_expires_at
                );
            }
        }

        let persisted = session.to_persisted();
        let logged_in = session.is_logged_in();
        *current = session;
        self.reset_attempts();

        if !self.persist {
            return Ok(());
        }
        if logged_in {
            let json = serde_json::to_string(&persisted)?;
            self.storage.set(&self.key, &json)
        } else {
            self.storage.remove(&self.key)
        }
    }

    fn restore(&self, decoder: &dyn TokenDecoder, clock: &dyn Clock, threshold_secs: i64) -> Session {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Session::LoggedOut,
            Err(e) => {
                warn!("Could not read stored session: {}", e);
                return Session::LoggedOut;
            }
        };

        let persisted: PersistedSession = match serde_json::from_str(&raw) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Discarding unreadable stored session: {}", e);
                self.discard();
                return Session::LoggedOut;
            }
        };
        if !persisted.is_logged_in {
            return Session::LoggedOut;
        }

        let repaired = persisted.is_missing_expiries();
        let session = match reconstitute(persisted, decoder) {
            Ok(session) => session,
            Err(e) => {
                warn!("Discarding incomplete stored session: {}", e);
                self.discard();
                return Session::LoggedOut;
            }
        };

        let session = Session::LoggedIn(session);
        if repaired {
            debug!("Reconstituted missing expiries of stored session from token claims");
            match serde_json::to_string(&session.to_persisted()) {
                Ok(json) => {
                    if let Err(e) = self.storage.set(&self.key, &json) {
                        warn!("Could not write back repaired session: {}", e);
                    }
                }
                Err(e) => warn!("Could not serialize repaired session: {}", e),
            }
        }

        if !has_valid_session(&session, threshold_secs, clock.now_secs()) {
            warn!("Discarding expired stored session");
            self.discard();
            return Session::LoggedOut;
        }
        session
    }

    fn discard(&self) {
        if let Err(e) = self.storage.remove(&self.key) {
            warn!("Could not remove stored session: {}", e);
        }
    }
}

fn holds_refresh_token(session: &Session, refresh_token: &str) -> bool {
    session
        .as_logged_in()
        .map_or(false, |s| s.refresh_token == refresh_token)
}

/// Turns a persisted session into a complete one, decoding expiries from the tokens
/// when any of them is missing.
fn reconstitute(
    persisted: PersistedSession,
    decoder: &dyn TokenDecoder,
) -> Result<LoggedInSession, AuthError> {
    let access_token = persisted
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidToken("stored session has no access token".into()))?;
    let refresh_token = persisted
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidToken("stored session has no refresh token".into()))?;
    let user_id = persisted
        .user_id
        .ok_or_else(|| AuthError::Serialization("stored session has no user id".into()))?;
    let method = persisted
        .method
        .as_deref()
        .and_then(LoginMethod::parse)
        .ok_or_else(|| AuthError::Serialization("stored session has no known login method".into()))?;

    let (access_token_expires_at, refresh_token_expires_at, expires_at) = match (
        persisted.access_token_expires_at,
        persisted.refresh_token_expires_at,
        persisted.expires_at,
    ) {
        (Some(access), Some(refresh), Some(expires)) => (access, refresh, expires),
        (access, refresh, expires) => {
            let decoded = decode_expiries(decoder, &access_token, &refresh_token)?;
            let access = access.unwrap_or(decoded.access_token_expires_at);
            (
                access,
                refresh.unwrap_or(decoded.refresh_token_expires_at),
                expires.unwrap_or(access),
            )
        }
    };

    let public_key = match method {
        LoginMethod::Nostr => persisted.public_key,
        _ => None,
    };

    Ok(LoggedInSession {
        user_id,
        access_token,
        refresh_token,
        expires_at,
        access_token_expires_at,
        refresh_token_expires_at,
        method,
        public_key,
    })
}
