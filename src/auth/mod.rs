pub mod expiry;
pub mod refresh;
pub mod store;
pub mod token;

use crate::api::{AuthApi, HttpAuthApi};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::login::is_valid_referral_code;
use crate::models::{
    ChallengeResponse, LoggedInSession, LoginChallenge, LoginRequest, Session,
};
use crate::storage::KeyValueStorage;
use log::{info, warn};
use std::sync::Arc;

// Re-export necessary items
pub use expiry::{has_future_expiry, Clock, SystemClock};
pub use refresh::{RefreshAttemptState, RefreshController, RefreshFailure, RefreshOutcome, RefreshPhase};
pub use store::SessionStore;
pub use token::{JwtExpiryDecoder, TokenDecoder};

/// Authentication context of one application: the current session, its
/// persistence, and the refresh flow.
///
/// Construct one per application and share it by reference (or `Arc`); there is
/// no global session.
pub struct RustyAuth {
    config: AuthConfig,
    store: SessionStore,
    refresher: RefreshController,
    api: Arc<dyn AuthApi>,
    storage: Arc<dyn KeyValueStorage>,
    decoder: Arc<dyn TokenDecoder>,
    clock: Arc<dyn Clock>,
}

impl RustyAuth {
    /// Builds a context talking to the service at `config.api_base_url` over HTTP.
    pub fn connect(config: AuthConfig, storage: Arc<dyn KeyValueStorage>) -> Result<Self, AuthError> {
        let api = Arc::new(HttpAuthApi::new(&config)?);
        Self::new(config, api, storage)
    }

    /// Builds a context with JWT expiry decoding and the system clock.
    pub fn new(
        config: AuthConfig,
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStorage>,
    ) -> Result<Self, AuthError> {
        Self::with_parts(
            config,
            api,
            storage,
            Arc::new(JwtExpiryDecoder),
            Arc::new(SystemClock),
        )
    }

    /// Builds a context from explicit collaborators.
    ///
    /// Restores a persisted session when `config.persist` is set; see
    /// [`SessionStore::open`].
    pub fn with_parts(
        config: AuthConfig,
        api: Arc<dyn AuthApi>,
        storage: Arc<dyn KeyValueStorage>,
        decoder: Arc<dyn TokenDecoder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        config.validate()?;
        let store = SessionStore::open(&config, storage.clone(), decoder.as_ref(), clock.as_ref())?;
        let refresher = RefreshController::new(
            config.max_refresh_attempts,
            config.base_backoff_ms,
            config.default_threshold_secs,
        );
        Ok(Self {
            config,
            store,
            refresher,
            api,
            storage,
            decoder,
            clock,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Starts a login, returning the challenge to complete.
    ///
    /// A referral code pending in storage is attached to the request unless the
    /// request already carries one.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginChallenge, AuthError> {
        let request = match self.pending_referral_code() {
            Some(code) => request.with_referral_code(code),
            None => request,
        };
        request.validate()?;

        info!("Starting {} login", request.method().as_str());
        self.api.login(&request).await
    }

    /// Completes a login challenge and commits the resulting session.
    pub async fn login_challenge(
        &self,
        response: ChallengeResponse,
    ) -> Result<LoggedInSession, AuthError> {
        let login = self.api.login_challenge(&response).await?;
        let expiries =
            token::decode_expiries(self.decoder.as_ref(), &login.access_token, &login.refresh_token)?;

        let session = LoggedInSession {
            user_id: login.user_id,
            access_token: login.access_token,
            refresh_token: login.refresh_token,
            expires_at: login.expires_at.unwrap_or(expiries.access_token_expires_at),
            access_token_expires_at: expiries.access_token_expires_at,
            refresh_token_expires_at: expiries.refresh_token_expires_at,
            method: response.method(),
            public_key: response.public_key().map(str::to_string),
        };
        self.store.set_session(Session::LoggedIn(session.clone()))?;
        info!(
            "Logged in user {} via {}",
            session.user_id,
            session.method.as_str()
        );
        Ok(session)
    }

    /// Exchanges the current token pair for a new one.
    ///
    /// `Ok(None)` means the service failed transiently while the session is still
    /// valid; try again later.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresher
            .refresh(
                &self.store,
                self.api.as_ref(),
                self.decoder.as_ref(),
                self.clock.as_ref(),
            )
            .await
    }

    /// Logs out on the service (when logged in) and always clears the local session.
    pub async fn logout(&self) -> Result<(), AuthError> {
        let remote = match self.store.session() {
            Session::LoggedIn(session) => self.api.logout(&session.access_token).await,
            Session::LoggedOut => Ok(()),
        };
        self.store.clear_session()?;
        info!("Logged out");
        remote
    }

    pub fn get_session(&self) -> Session {
        self.store.session()
    }

    pub fn set_session(&self, session: Session) -> Result<(), AuthError> {
        self.store.set_session(session)
    }

    pub fn clear_session(&self) -> Result<(), AuthError> {
        self.store.clear_session()
    }

    pub fn attempt_state(&self) -> RefreshAttemptState {
        self.store.attempt_state()
    }

    pub fn refresh_phase(&self) -> RefreshPhase {
        self.refresher.phase()
    }

    /// Logged in with a refresh token outliving `threshold_secs` (default 300).
    pub fn has_valid_session(&self, threshold_secs: Option<i64>) -> bool {
        expiry::has_valid_session(
            &self.store.session(),
            self.threshold(threshold_secs),
            self.clock.now_secs(),
        )
    }

    /// Logged in with an access token outliving `threshold_secs` (default 300).
    pub fn has_valid_access_token(&self, threshold_secs: Option<i64>) -> bool {
        expiry::has_valid_access_token(
            &self.store.session(),
            self.threshold(threshold_secs),
            self.clock.now_secs(),
        )
    }

    /// `has_valid_session(t) && !has_valid_access_token(t)`, on one snapshot of the session.
    pub fn needs_refresh(&self, threshold_secs: Option<i64>) -> bool {
        expiry::needs_refresh(
            &self.store.session(),
            self.threshold(threshold_secs),
            self.clock.now_secs(),
        )
    }

    /// The access token, if it is valid for at least the default threshold.
    pub fn get_access_token(&self) -> Result<String, AuthError> {
        let session = self.store.session();
        if !expiry::has_valid_access_token(
            &session,
            self.config.default_threshold_secs,
            self.clock.now_secs(),
        ) {
            return Err(AuthError::NotAuthenticated(
                "no valid access token".into(),
            ));
        }
        match session {
            Session::LoggedIn(session) => Ok(session.access_token),
            Session::LoggedOut => Err(AuthError::NotAuthenticated("not logged in".into())),
        }
    }

    /// The refresh token, if the session stays valid for the short refresh threshold.
    pub fn get_refresh_token(&self) -> Result<String, AuthError> {
        let session = self.store.session();
        if !expiry::has_valid_session(
            &session,
            self.config.refresh_token_threshold_secs,
            self.clock.now_secs(),
        ) {
            return Err(AuthError::NotAuthenticated("session expired".into()));
        }
        match session {
            Session::LoggedIn(session) => Ok(session.refresh_token),
            Session::LoggedOut => Err(AuthError::NotAuthenticated("not logged in".into())),
        }
    }

    /// Refreshes first when the access token is stale, then returns it.
    pub async fn access_token_with_refresh(&self) -> Result<String, AuthError> {
        if self.needs_refresh(None) {
            self.refresh().await?;
        }
        self.get_access_token()
    }

    fn threshold(&self, threshold_secs: Option<i64>) -> i64 {
        threshold_secs.unwrap_or(self.config.default_threshold_secs)
    }

    fn pending_referral_code(&self) -> Option<String> {
        match self.storage.get(&self.config.referral_storage_key) {
            Ok(Some(code)) => {
                let code = code.trim().trim_matches('"').to_string();
                if is_valid_referral_code(&code) {
                    Some(code)
                } else {
                    warn!("Ignoring malformed referral code in storage");
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read referral code: {}", e);
                None
            }
        }
    }
}
