//! Client side of the remote auth service.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::{
    ChallengeResponse, LoginChallenge, LoginRequest, LoginResponse, RefreshResponse, TokenPair,
};
use futures::future::BoxFuture;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub const LOGIN_PATH: &str = "/login";
pub const LOGIN_CHALLENGE_PATH: &str = "/login/challenge";
pub const REFRESH_PATH: &str = "/login/refresh";
pub const LOGOUT_PATH: &str = "/a/logout";

/// The four calls the session core makes to the auth service.
///
/// Failures carrying an HTTP status must be reported through
/// `AuthError::from_status` so that 401/403/404 are recognised as
/// authentication-class.
pub trait AuthApi: Send + Sync {
    /// `POST /login`
    fn login<'a>(&'a self, request: &'a LoginRequest)
        -> BoxFuture<'a, Result<LoginChallenge, AuthError>>;

    /// `POST /login/challenge`
    fn login_challenge<'a>(
        &'a self,
        response: &'a ChallengeResponse,
    ) -> BoxFuture<'a, Result<LoginResponse, AuthError>>;

    /// `POST /login/refresh`
    fn refresh<'a>(&'a self, tokens: &'a TokenPair)
        -> BoxFuture<'a, Result<RefreshResponse, AuthError>>;

    /// `POST /a/logout`, authenticated with the access token.
    fn logout<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<(), AuthError>>;
}

/// JSON-over-HTTP implementation backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAuthApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpAuthApi {
    pub fn new(config: &AuthConfig) -> Result<Self, AuthError> {
        if config.api_base_url.trim().is_empty() {
            return Err(AuthError::MissingConfiguration("api_base_url".into()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| AuthError::MissingConfiguration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B>(
        &self,
        path: &str,
        body: Option<&B>,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, AuthError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let mut request = self.http.post(&url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        Self::ensure_success(response).await
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.post(path, Some(body), None).await?;
        response
            .json::<R>()
            .await
            .map_err(|e| AuthError::Serialization(format!("{}: {}", path, e)))
    }

    /// Returns the response on success, or the error matching its status.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, AuthError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
        Err(AuthError::from_status(status.as_u16(), message))
    }
}

/// Pulls `error`/`message` out of a JSON error body, else the raw text.
fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| Some(body.to_string())),
        Err(_) => Some(body.to_string()),
    }
}

impl AuthApi for HttpAuthApi {
    fn login<'a>(
        &'a self,
        request: &'a LoginRequest,
    ) -> BoxFuture<'a, Result<LoginChallenge, AuthError>> {
        Box::pin(self.post_json(LOGIN_PATH, request))
    }

    fn login_challenge<'a>(
        &'a self,
        response: &'a ChallengeResponse,
    ) -> BoxFuture<'a, Result<LoginResponse, AuthError>> {
        Box::pin(self.post_json(LOGIN_CHALLENGE_PATH, response))
    }

    fn refresh<'a>(
        &'a self,
        tokens: &'a TokenPair,
    ) -> BoxFuture<'a, Result<RefreshResponse, AuthError>> {
        Box::pin(self.post_json(REFRESH_PATH, tokens))
    }

    fn logout<'a>(&'a self, access_token: &'a str) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(async move {
            self.post::<()>(LOGOUT_PATH, None, Some(access_token))
                .await
                .map(|_| ())
        })
    }
}
