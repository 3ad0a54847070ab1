use crate::error::AuthError;
use std::env;

pub const DEFAULT_REFERRAL_STORAGE_KEY: &str = "formshive_referral_code";
pub const DEFAULT_MAX_REFRESH_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_THRESHOLD_SECS: i64 = 300;
pub const DEFAULT_REFRESH_TOKEN_THRESHOLD_SECS: i64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings for one authentication context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub api_base_url: String,
    pub storage_key: String,
    pub persist: bool,
    pub referral_storage_key: String,
    pub max_refresh_attempts: u32,
    pub base_backoff_ms: u64,
    pub default_threshold_secs: i64,
    pub refresh_token_threshold_secs: i64,
    pub request_timeout_secs: u64,
}

impl AuthConfig {
    /// Creates a configuration with defaults for everything but the two required values.
    pub fn new(api_base_url: impl Into<String>, storage_key: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            storage_key: storage_key.into(),
            persist: true,
            referral_storage_key: DEFAULT_REFERRAL_STORAGE_KEY.to_string(),
            max_refresh_attempts: DEFAULT_MAX_REFRESH_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            default_threshold_secs: DEFAULT_THRESHOLD_SECS,
            refresh_token_threshold_secs: DEFAULT_REFRESH_TOKEN_THRESHOLD_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Reads the configuration from `FORMSHIVE_*` environment variables.
    ///
    /// `FORMSHIVE_API_URL` and `FORMSHIVE_STORAGE_KEY` are required; every other
    /// variable falls back to its default when unset.
    pub fn from_env() -> Result<Self, AuthError> {
        let api_base_url = required_var("FORMSHIVE_API_URL")?;
        let storage_key = required_var("FORMSHIVE_STORAGE_KEY")?;
        let mut config = Self::new(api_base_url, storage_key);

        if let Some(persist) = parsed_var::<bool>("FORMSHIVE_PERSIST_SESSION")? {
            config.persist = persist;
        }
        if let Ok(key) = env::var("FORMSHIVE_REFERRAL_KEY") {
            config.referral_storage_key = key;
        }
        if let Some(attempts) = parsed_var::<u32>("FORMSHIVE_MAX_REFRESH_ATTEMPTS")? {
            config.max_refresh_attempts = attempts;
        }
        if let Some(timeout) = parsed_var::<u64>("FORMSHIVE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks that the required values are present.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.api_base_url.trim().is_empty() {
            return Err(AuthError::MissingConfiguration("api_base_url".into()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(AuthError::MissingConfiguration("storage_key".into()));
        }
        if self.referral_storage_key.trim().is_empty() {
            return Err(AuthError::MissingConfiguration("referral_storage_key".into()));
        }
        Ok(())
    }

    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn with_referral_storage_key(mut self, key: impl Into<String>) -> Self {
        self.referral_storage_key = key.into();
        self
    }

    pub fn with_max_refresh_attempts(mut self, attempts: u32) -> Self {
        self.max_refresh_attempts = attempts;
        self
    }

    pub fn with_base_backoff_ms(mut self, millis: u64) -> Self {
        self.base_backoff_ms = millis;
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Full URL of an auth service endpoint, `path` starting with `/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

fn required_var(name: &str) -> Result<String, AuthError> {
    env::var(name).map_err(|_| AuthError::MissingConfiguration(format!("{} must be set", name)))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, AuthError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AuthError::MissingConfiguration(format!("{} has an invalid value", name))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    }

    const VARS: [&str; 6] = [
        "FORMSHIVE_API_URL",
        "FORMSHIVE_STORAGE_KEY",
        "FORMSHIVE_PERSIST_SESSION",
        "FORMSHIVE_REFERRAL_KEY",
        "FORMSHIVE_MAX_REFRESH_ATTEMPTS",
        "FORMSHIVE_REQUEST_TIMEOUT_SECS",
    ];

    fn clear_vars() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_config_from_env() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();

        env::set_var("FORMSHIVE_API_URL", "https://api.formshive.com/v1/");
        env::set_var("FORMSHIVE_STORAGE_KEY", "formshive_session");

        let config = AuthConfig::from_env().unwrap();
        assert_eq!(config.api_base_url, "https://api.formshive.com/v1");
        assert_eq!(config.storage_key, "formshive_session");
        assert!(config.persist);
        assert_eq!(config.max_refresh_attempts, 3);
        assert_eq!(config.default_threshold_secs, 300);
        assert_eq!(config.refresh_token_threshold_secs, 30);
        assert_eq!(config.endpoint("/login"), "https://api.formshive.com/v1/login");

        env::set_var("FORMSHIVE_PERSIST_SESSION", "false");
        env::set_var("FORMSHIVE_MAX_REFRESH_ATTEMPTS", "5");
        env::set_var("FORMSHIVE_REFERRAL_KEY", "ref");

        let config = AuthConfig::from_env().unwrap();
        assert!(!config.persist);
        assert_eq!(config.max_refresh_attempts, 5);
        assert_eq!(config.referral_storage_key, "ref");

        clear_vars();
    }

    #[test]
    fn test_missing_and_invalid_values() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_vars();

        env::set_var("FORMSHIVE_API_URL", "https://api.formshive.com/v1");
        match AuthConfig::from_env() {
            Err(AuthError::MissingConfiguration(msg)) => {
                assert!(msg.contains("FORMSHIVE_STORAGE_KEY"))
            }
            other => panic!("Expected missing configuration, got {:?}", other),
        }

        env::set_var("FORMSHIVE_STORAGE_KEY", "formshive_session");
        env::set_var("FORMSHIVE_MAX_REFRESH_ATTEMPTS", "three");
        match AuthConfig::from_env() {
            Err(AuthError::MissingConfiguration(msg)) => {
                assert!(msg.contains("FORMSHIVE_MAX_REFRESH_ATTEMPTS"))
            }
            other => panic!("Expected invalid value error, got {:?}", other),
        }

        clear_vars();
    }

    #[test]
    fn test_empty_storage_key_is_rejected() {
        let config = AuthConfig::new("https://api.formshive.com", "  ");
        assert_eq!(
            config.validate(),
            Err(AuthError::MissingConfiguration("storage_key".into()))
        );
    }
}
