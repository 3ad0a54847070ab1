use crate::error::AuthError;
use crate::models::session::{lenient_i64, lenient_string, LoginMethod};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

lazy_static! {
    // x-only hex public key or bech32 `npub`
    static ref NOSTR_PUBLIC_KEY_REGEX: Regex =
        Regex::new(r"^([0-9a-fA-F]{64}|npub1[02-9ac-hj-np-z]{58})$").unwrap();
    static ref REFERRAL_CODE_REGEX: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Returns true when `code` could be sent as a referral code.
pub fn is_valid_referral_code(code: &str) -> bool {
    (1..=64).contains(&code.len()) && REFERRAL_CODE_REGEX.is_match(code)
}

/// NOSTR login: the service answers with a challenge for the key to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct NostrLogin {
    /// Hex (64 characters) or `npub1...` encoded public key.
    #[validate(regex(
        path = "NOSTR_PUBLIC_KEY_REGEX",
        message = "Public key must be 64 hex characters or an npub"
    ))]
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(
        length(min = 1, max = 64),
        regex(
            path = "REFERRAL_CODE_REGEX",
            message = "Referral code must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub referral_code: Option<String>,
}

/// E-mail login: the service mails a one-time code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct EmailMagicLinkLogin {
    #[validate(email)]
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(
        length(min = 1, max = 64),
        regex(
            path = "REFERRAL_CODE_REGEX",
            message = "Referral code must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub referral_code: Option<String>,
}

/// Google login: the service answers with a redirect URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GoogleLogin {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(
        length(min = 1, max = 64),
        regex(
            path = "REFERRAL_CODE_REGEX",
            message = "Referral code must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub referral_code: Option<String>,
}

/// Payload of `POST /login`, one variant per login method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoginRequest {
    #[serde(rename = "NOSTR")]
    Nostr(NostrLogin),
    EmailMagicLink(EmailMagicLinkLogin),
    Google(GoogleLogin),
}

impl LoginRequest {
    pub fn nostr(public_key: impl Into<String>) -> Self {
        LoginRequest::Nostr(NostrLogin {
            public_key: public_key.into(),
            referral_code: None,
        })
    }

    pub fn email(email: impl Into<String>) -> Self {
        LoginRequest::EmailMagicLink(EmailMagicLinkLogin {
            email: email.into(),
            referral_code: None,
        })
    }

    pub fn google() -> Self {
        LoginRequest::Google(GoogleLogin::default())
    }

    pub fn method(&self) -> LoginMethod {
        match self {
            LoginRequest::Nostr(_) => LoginMethod::Nostr,
            LoginRequest::EmailMagicLink(_) => LoginMethod::EmailMagicLink,
            LoginRequest::Google(_) => LoginMethod::Google,
        }
    }

    pub fn referral_code(&self) -> Option<&str> {
        match self {
            LoginRequest::Nostr(login) => login.referral_code.as_deref(),
            LoginRequest::EmailMagicLink(login) => login.referral_code.as_deref(),
            LoginRequest::Google(login) => login.referral_code.as_deref(),
        }
    }

    /// Attaches `code` to whichever variant is active, unless it already has one.
    pub fn with_referral_code(mut self, code: impl Into<String>) -> Self {
        let slot = match &mut self {
            LoginRequest::Nostr(login) => &mut login.referral_code,
            LoginRequest::EmailMagicLink(login) => &mut login.referral_code,
            LoginRequest::Google(login) => &mut login.referral_code,
        };
        if slot.is_none() {
            *slot = Some(code.into());
        }
        self
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        match self {
            LoginRequest::Nostr(login) => login.validate()?,
            LoginRequest::EmailMagicLink(login) => login.validate()?,
            LoginRequest::Google(login) => login.validate()?,
        }
        Ok(())
    }
}

/// Challenge descriptor returned by `POST /login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginChallenge {
    /// Identifier to echo back with the challenge response.
    #[serde(default, deserialize_with = "lenient_string_or_empty")]
    pub id: String,
    /// Content to sign (NOSTR).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<String>,
    /// Where to send the user (Google).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NostrChallengeResponse {
    pub id: String,
    pub public_key: String,
    /// The signed challenge event, serialized as JSON.
    pub signed_event: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailChallengeResponse {
    pub id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleChallengeResponse {
    pub code: String,
    pub state: String,
}

/// Payload of `POST /login/challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeResponse {
    #[serde(rename = "NOSTR")]
    Nostr(NostrChallengeResponse),
    EmailMagicLink(EmailChallengeResponse),
    Google(GoogleChallengeResponse),
}

impl ChallengeResponse {
    pub fn method(&self) -> LoginMethod {
        match self {
            ChallengeResponse::Nostr(_) => LoginMethod::Nostr,
            ChallengeResponse::EmailMagicLink(_) => LoginMethod::EmailMagicLink,
            ChallengeResponse::Google(_) => LoginMethod::Google,
        }
    }

    /// The public key a NOSTR session is bound to.
    pub fn public_key(&self) -> Option<&str> {
        match self {
            ChallengeResponse::Nostr(response) => Some(&response.public_key),
            _ => None,
        }
    }
}

/// Access/refresh token pair, also the body of `POST /login/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Successful answer to `POST /login/challenge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(deserialize_with = "lenient_string_or_empty")]
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub expires_at: Option<i64>,
}

/// Successful answer to `POST /login/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub expires_at: Option<i64>,
}

fn lenient_string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}
