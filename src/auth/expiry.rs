//! Expiry checks and the clock they are evaluated against.
//!
//! Everything here is pure given a timestamp: the predicates never cache and
//! never touch storage, so callers may use a different threshold on every call.

use crate::models::Session;
use futures::future::BoxFuture;
use std::time::Duration;

/// Source of the current time and of asynchronous waits.
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }

    /// Suspends the caller for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock time with `tokio` timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// True iff `expires_at > now + threshold` (all in seconds). Equality is not a future expiry.
pub fn has_future_expiry(expires_at: i64, threshold_secs: i64, now_secs: i64) -> bool {
    expires_at > now_secs.saturating_add(threshold_secs)
}

/// The session is logged in and its refresh token outlives the threshold.
pub fn has_valid_session(session: &Session, threshold_secs: i64, now_secs: i64) -> bool {
    session.as_logged_in().map_or(false, |s| {
        has_future_expiry(s.refresh_token_expires_at, threshold_secs, now_secs)
    })
}

/// The session is logged in and its access token outlives the threshold.
pub fn has_valid_access_token(session: &Session, threshold_secs: i64, now_secs: i64) -> bool {
    session.as_logged_in().map_or(false, |s| {
        has_future_expiry(s.access_token_expires_at, threshold_secs, now_secs)
    })
}

/// The refresh token is still good but the access token is not.
pub fn needs_refresh(session: &Session, threshold_secs: i64, now_secs: i64) -> bool {
    has_valid_session(session, threshold_secs, now_secs)
        && !has_valid_access_token(session, threshold_secs, now_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LoggedInSession, LoginMethod};

    const NOW: i64 = 1_700_000_000;

    fn session(access_in: i64, refresh_in: i64) -> Session {
        Session::LoggedIn(LoggedInSession {
            user_id: "1".into(),
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: NOW + access_in,
            access_token_expires_at: NOW + access_in,
            refresh_token_expires_at: NOW + refresh_in,
            method: LoginMethod::EmailMagicLink,
            public_key: None,
        })
    }

    #[test]
    fn test_boundary_is_excluded() {
        assert!(!has_future_expiry(NOW + 300, 300, NOW));
        assert!(has_future_expiry(NOW + 301, 300, NOW));
        assert!(!has_future_expiry(NOW, 0, NOW));
        assert!(has_future_expiry(NOW + 1, 0, NOW));
    }

    #[test]
    fn test_future_expiry_matches_definition() {
        for threshold in [0, 1, 30, 299, 300, 301, 3600] {
            for offset in [-3600, -1, 0, 1, 29, 30, 31, 300, 301, 3600, 7200] {
                let expires_at = NOW + offset;
                assert_eq!(
                    has_future_expiry(expires_at, threshold, NOW),
                    expires_at > NOW + threshold,
                    "threshold {} offset {}",
                    threshold,
                    offset
                );
            }
        }
    }

    #[test]
    fn test_logged_out_is_never_valid() {
        assert!(!has_valid_session(&Session::LoggedOut, 0, NOW));
        assert!(!has_valid_access_token(&Session::LoggedOut, 0, NOW));
        assert!(!needs_refresh(&Session::LoggedOut, 0, NOW));
    }

    #[test]
    fn test_needs_refresh_is_derived() {
        let fixtures = [
            Session::LoggedOut,
            session(3600, 86_400),
            session(100, 86_400),
            session(-100, 86_400),
            session(-100, 200),
            session(-100, -50),
            session(400, 400),
        ];
        for fixture in &fixtures {
            for threshold in [0, 30, 300, 1000] {
                assert_eq!(
                    needs_refresh(fixture, threshold, NOW),
                    has_valid_session(fixture, threshold, NOW)
                        && !has_valid_access_token(fixture, threshold, NOW)
                );
            }
        }
    }

    #[test]
    fn test_thresholds_are_independent_per_call() {
        let s = session(100, 86_400);
        assert!(has_valid_access_token(&s, 30, NOW));
        assert!(!has_valid_access_token(&s, 300, NOW));
        assert!(!needs_refresh(&s, 30, NOW));
        assert!(needs_refresh(&s, 300, NOW));
    }

    #[test]
    fn test_system_clock_tracks_wall_time() {
        let before = chrono::Utc::now().timestamp();
        let now = SystemClock.now_secs();
        assert!(now >= before && now <= before + 1);
    }
}
