//!
//! # Error Handling
//!
//! This module defines the error type `AuthError` used throughout the crate.
//! Every fallible operation of the session core (loading a persisted session,
//! decoding token claims, talking to the remote auth service, refreshing) reports
//! failures through it, so that callers can tell an authentication-class failure
//! (route the user back to login) apart from a transient one (try again later).
//!
//! `From` implementations exist for `jsonwebtoken::errors::Error`, `serde_json::Error`,
//! `reqwest::Error`, `std::io::Error` and `validator::ValidationErrors`, allowing
//! easy conversion using the `?` operator.

use std::fmt;
use validator::ValidationErrors;

/// Represents all possible errors raised by the session core.
///
/// The type is `Clone` because a single refresh outcome may be handed to several
/// callers waiting on the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// A required configuration value is absent or unusable.
    /// Fatal at construction, never recovered.
    MissingConfiguration(String),
    /// A token failed to decode or carries no `exp` claim.
    InvalidToken(String),
    /// The auth service rejected the credentials (HTTP 401, 403 or 404).
    AuthenticationFailure { status: u16, message: String },
    /// Any other non-success HTTP status returned by the auth service.
    Http { status: u16, message: String },
    /// The request never produced an HTTP status (connection refused, timeout, ...).
    Network(String),
    /// The refresh attempt budget was consumed; the session has been cleared.
    RefreshExhausted { attempts: u32 },
    /// A refresh failed and the session is no longer valid; the session has been cleared.
    SessionExpired,
    /// An accessor was called without a session that satisfies its precondition.
    NotAuthenticated(String),
    /// Reading from or writing to durable storage failed.
    Storage(String),
    /// A value could not be serialized or deserialized.
    Serialization(String),
    /// A request failed input validation before being sent.
    Validation(String),
}

impl AuthError {
    /// Builds the error matching an HTTP failure status.
    ///
    /// 401, 403 and 404 are authentication-class; everything else is reported as
    /// a plain HTTP error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 | 404 => AuthError::AuthenticationFailure { status, message },
            _ => AuthError::Http { status, message },
        }
    }

    /// True for failures that mean the credentials themselves are no longer accepted.
    pub fn is_auth_class(&self) -> bool {
        matches!(self, AuthError::AuthenticationFailure { .. })
    }

    /// The HTTP status attached to this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::AuthenticationFailure { status, .. } | AuthError::Http { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthError::MissingConfiguration(msg) => write!(f, "Missing configuration: {}", msg),
            AuthError::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            AuthError::AuthenticationFailure { status, message } => {
                write!(f, "Authentication failed ({}): {}", status, message)
            }
            AuthError::Http { status, message } => write!(f, "HTTP error ({}): {}", status, message),
            AuthError::Network(msg) => write!(f, "Network error: {}", msg),
            AuthError::RefreshExhausted { attempts } => write!(
                f,
                "Max refresh attempts exceeded after {} attempts; please log in again",
                attempts
            ),
            AuthError::SessionExpired => write!(f, "Session expired; please log in again"),
            AuthError::NotAuthenticated(msg) => write!(f, "Not authenticated: {}", msg),
            AuthError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AuthError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            AuthError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

/// Converts `jsonwebtoken::errors::Error` into `AuthError::InvalidToken`.
impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(error: jsonwebtoken::errors::Error) -> AuthError {
        AuthError::InvalidToken(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> AuthError {
        AuthError::Serialization(error.to_string())
    }
}

/// Converts `reqwest::Error` into either an HTTP error (when a status is attached)
/// or a network error.
impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> AuthError {
        match error.status() {
            Some(status) => AuthError::from_status(status.as_u16(), error.to_string()),
            None if error.is_decode() => AuthError::Serialization(error.to_string()),
            None => AuthError::Network(error.to_string()),
        }
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> AuthError {
        AuthError::Storage(error.to_string())
    }
}

/// Converts `validator::ValidationErrors` into `AuthError::Validation`.
///
/// The detailed validation messages are preserved.
impl From<ValidationErrors> for AuthError {
    fn from(error: ValidationErrors) -> AuthError {
        AuthError::Validation(error.to_string())
    }
}
