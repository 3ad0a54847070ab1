use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The login method a session was established with.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoginMethod {
    /// Signed challenge from a NOSTR key pair.
    #[serde(rename = "NOSTR")]
    Nostr,
    /// One-time code delivered by e-mail.
    EmailMagicLink,
    /// Google OAuth redirect.
    Google,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Nostr => "NOSTR",
            LoginMethod::EmailMagicLink => "EmailMagicLink",
            LoginMethod::Google => "Google",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "NOSTR" => Some(LoginMethod::Nostr),
            "EmailMagicLink" => Some(LoginMethod::EmailMagicLink),
            "Google" => Some(LoginMethod::Google),
            _ => None,
        }
    }
}

/// Tokens, identity and expiries of an authenticated user.
///
/// All timestamps are seconds since the Unix epoch. Both token expiries come from
/// the `exp` claims embedded in the tokens themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedInSession {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub access_token_expires_at: i64,
    pub refresh_token_expires_at: i64,
    pub method: LoginMethod,
    /// Only set for NOSTR sessions.
    pub public_key: Option<String>,
}

impl LoggedInSession {
    /// Access tokens are expected to expire no later than their refresh token.
    pub fn has_consistent_expiries(&self) -> bool {
        self.access_token_expires_at <= self.refresh_token_expires_at
    }
}

/// The authentication state of the current user.
///
/// Values are never mutated in place: every change builds a new `Session` and
/// replaces the stored one.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    LoggedOut,
    LoggedIn(LoggedInSession),
}

impl Session {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, Session::LoggedIn(_))
    }

    pub fn as_logged_in(&self) -> Option<&LoggedInSession> {
        match self {
            Session::LoggedIn(session) => Some(session),
            Session::LoggedOut => None,
        }
    }

    /// The shape written to durable storage.
    pub fn to_persisted(&self) -> PersistedSession {
        match self {
            Session::LoggedOut => PersistedSession::default(),
            Session::LoggedIn(session) => PersistedSession {
                is_logged_in: true,
                user_id: Some(session.user_id.clone()),
                access_token: Some(session.access_token.clone()),
                refresh_token: Some(session.refresh_token.clone()),
                expires_at: Some(session.expires_at),
                access_token_expires_at: Some(session.access_token_expires_at),
                refresh_token_expires_at: Some(session.refresh_token_expires_at),
                method: Some(session.method.as_str().to_string()),
                public_key: session.public_key.clone(),
            },
        }
    }
}

impl From<LoggedInSession> for Session {
    fn from(session: LoggedInSession) -> Self {
        Session::LoggedIn(session)
    }
}

/// A session as found in durable storage.
///
/// Every field is optional because older or hand-edited copies may be partial, and
/// numeric fields are accepted either as JSON numbers or numeric strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_logged_in: bool,
    #[serde(default, deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64", skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl PersistedSession {
    /// True when at least one of the three expiry timestamps is absent.
    pub fn is_missing_expiries(&self) -> bool {
        self.expires_at.is_none()
            || self.access_token_expires_at.is_none()
            || self.refresh_token_expires_at.is_none()
    }
}

/// Coerces a JSON number or numeric string into whole seconds.
pub(crate) fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(raw) => {
            let raw = raw.trim();
            raw.parse::<i64>().ok().or_else(|| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(coerce_i64))
}

pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(raw)) if !raw.is_empty() => Some(raw),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(flag)) => flag,
        Some(Value::String(raw)) => raw.eq_ignore_ascii_case("true"),
        _ => false,
    })
}
