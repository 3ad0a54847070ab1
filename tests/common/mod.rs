#![allow(dead_code)]

use formshive_auth::api::AuthApi;
use formshive_auth::auth::{Clock, JwtExpiryDecoder};
use formshive_auth::models::{
    ChallengeResponse, LoggedInSession, LoginChallenge, LoginMethod, LoginRequest, LoginResponse,
    RefreshResponse, TokenPair,
};
use formshive_auth::storage::{KeyValueStorage, MemoryStorage};
use formshive_auth::{AuthConfig, AuthError, RustyAuth};
use futures::future::BoxFuture;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NOW: i64 = 1_700_000_000;
pub const STORAGE_KEY: &str = "formshive_session";
pub const NOSTR_KEY: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

/// Signs a token with an arbitrary secret; only its `exp` matters to the client.
pub fn mint(sub: &str, exp: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": sub, "exp": exp }),
        &EncodingKey::from_secret(b"auth-service-secret"),
    )
    .unwrap()
}

pub fn config() -> AuthConfig {
    AuthConfig::new("http://auth.test", STORAGE_KEY)
}

/// A logged-in session whose tokens expire `access_in`/`refresh_in` seconds after `NOW`.
pub fn session(method: LoginMethod, access_in: i64, refresh_in: i64) -> LoggedInSession {
    LoggedInSession {
        user_id: "42".into(),
        access_token: mint("42", NOW + access_in),
        refresh_token: mint("42", NOW + refresh_in),
        expires_at: NOW + access_in,
        access_token_expires_at: NOW + access_in,
        refresh_token_expires_at: NOW + refresh_in,
        method,
        public_key: match method {
            LoginMethod::Nostr => Some(NOSTR_KEY.to_string()),
            _ => None,
        },
    }
}

pub fn refreshed(access_in: i64, refresh_in: i64) -> RefreshResponse {
    RefreshResponse {
        access_token: mint("42", NOW + access_in),
        refresh_token: mint("42", NOW + refresh_in),
        expires_at: None,
    }
}

pub fn unavailable() -> AuthError {
    AuthError::from_status(503, "Service Unavailable")
}

/// Scripted stand-in for the auth service that records every call.
#[derive(Default)]
pub struct MockAuthApi {
    pub login_requests: Mutex<Vec<LoginRequest>>,
    pub challenge_responses: Mutex<Vec<ChallengeResponse>>,
    pub challenge_results: Mutex<VecDeque<Result<LoginResponse, AuthError>>>,
    pub refresh_requests: Mutex<Vec<TokenPair>>,
    pub refresh_results: Mutex<VecDeque<Result<RefreshResponse, AuthError>>>,
    pub logout_tokens: Mutex<Vec<String>>,
    pub logout_result: Mutex<Option<AuthError>>,
    refresh_calls: AtomicUsize,
}

impl MockAuthApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_refresh(&self, result: Result<RefreshResponse, AuthError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn push_challenge(&self, result: Result<LoginResponse, AuthError>) {
        self.challenge_results.lock().unwrap().push_back(result);
    }

    pub fn fail_logout(&self, error: AuthError) {
        *self.logout_result.lock().unwrap() = Some(error);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

impl AuthApi for MockAuthApi {
    fn login<'a>(
        &'a self,
        request: &'a LoginRequest,
    ) -> BoxFuture<'a, Result<LoginChallenge, AuthError>> {
        Box::pin(async move {
            self.login_requests.lock().unwrap().push(request.clone());
            Ok(LoginChallenge {
                id: "challenge-1".into(),
                challenge: Some("sign-me".into()),
                redirect_url: None,
            })
        })
    }

    fn login_challenge<'a>(
        &'a self,
        response: &'a ChallengeResponse,
    ) -> BoxFuture<'a, Result<LoginResponse, AuthError>> {
        Box::pin(async move {
            self.challenge_responses.lock().unwrap().push(response.clone());
            let next = self.challenge_results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(AuthError::Network("no scripted challenge result".into())))
        })
    }

    fn refresh<'a>(
        &'a self,
        tokens: &'a TokenPair,
    ) -> BoxFuture<'a, Result<RefreshResponse, AuthError>> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_requests.lock().unwrap().push(tokens.clone());
            // let concurrent callers observe the call as in flight
            tokio::task::yield_now().await;
            let next = self.refresh_results.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Err(AuthError::Network("no scripted refresh result".into())))
        })
    }

    fn logout<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            self.logout_tokens.lock().unwrap().push(access_token.to_string());
            match self.logout_result.lock().unwrap().clone() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        })
    }
}

/// A clock that only moves when told to, or by the waits it is asked for.
///
/// `sleep` records the requested duration and advances the clock by it. It then
/// hands control back to the executor `yield_on_sleep` times before finishing,
/// so other futures can run while a backoff is pending.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_millis: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
    yields: AtomicUsize,
}

impl ManualClock {
    pub fn at_secs(now_secs: i64) -> Self {
        Self {
            now_millis: AtomicI64::new(now_secs * 1000),
            ..Self::default()
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.now_millis
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn yield_on_sleep(&self, count: usize) {
        self.yields.store(count, Ordering::SeqCst);
    }

    /// Every duration passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.sleeps.lock().unwrap().push(duration);
        self.advance(duration);
        let yields = self.yields.load(Ordering::SeqCst);
        Box::pin(async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
        })
    }
}

/// In-memory storage whose writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failing: AtomicBool,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), AuthError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::Storage("No space left on device".into()));
        }
        Ok(())
    }
}

impl KeyValueStorage for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), AuthError> {
        self.check()?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), AuthError> {
        self.check()?;
        self.inner.remove(key)
    }
}

/// Everything a test needs to drive and inspect one `RustyAuth`.
pub struct Harness {
    pub auth: RustyAuth,
    pub api: Arc<MockAuthApi>,
    pub storage: Arc<FlakyStorage>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    let api = MockAuthApi::new();
    let storage = Arc::new(FlakyStorage::new());
    let clock = Arc::new(ManualClock::at_secs(NOW));
    let auth = RustyAuth::with_parts(
        config,
        api.clone(),
        storage.clone() as Arc<dyn KeyValueStorage>,
        Arc::new(JwtExpiryDecoder),
        clock.clone() as Arc<dyn Clock>,
    )
    .unwrap();
    Harness {
        auth,
        api,
        storage,
        clock,
    }
}
