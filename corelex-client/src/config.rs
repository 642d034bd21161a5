//! Client configuration.
//!
//! One `ClientConfig` is consumed per client instance; there is no global
//! signing state.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::auth::BrokerConfig;
use crate::error::{ClientError, Result};
use crate::signer::SignatureScheme;

/// Environment variable names read by `ClientConfig::from_env`
pub mod env_vars {
    pub const BASE_URL: &str = "CORELEX_BASE_URL";
    pub const PRIVATE_KEY: &str = "CORELEX_PRIVATE_KEY";
    pub const KEY_SCHEME: &str = "CORELEX_KEY_SCHEME";
    pub const REQUEST_TIMEOUT_SECS: &str = "CORELEX_REQUEST_TIMEOUT_SECS";
    pub const AUTHORIZE_TIMEOUT_SECS: &str = "CORELEX_AUTHORIZE_TIMEOUT_SECS";
    pub const TOKEN_TTL_SECS: &str = "CORELEX_TOKEN_TTL_SECS";
}

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_AUTHORIZE_TIMEOUT: Duration = Duration::from_secs(30);
/// Used when the server's grant carries no expiry
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);
/// Cached tokens this close to expiry are treated as expired
pub const DEFAULT_TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5);
/// Longest lifetime given to any token, whatever the server or config says
pub const MAX_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

#[derive(Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Hex (`0x` optional) or base64 secret key
    pub private_key: String,
    pub key_scheme: SignatureScheme,
    pub request_timeout: Duration,
    pub authorize_timeout: Duration,
    pub default_token_ttl: Duration,
    pub token_refresh_margin: Duration,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("private_key", &"<redacted>")
            .field("key_scheme", &self.key_scheme)
            .field("request_timeout", &self.request_timeout)
            .field("authorize_timeout", &self.authorize_timeout)
            .field("default_token_ttl", &self.default_token_ttl)
            .field("token_refresh_margin", &self.token_refresh_margin)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(base_url: &str, private_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            private_key: private_key.to_string(),
            key_scheme: SignatureScheme::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            authorize_timeout: DEFAULT_AUTHORIZE_TIMEOUT,
            default_token_ttl: DEFAULT_TOKEN_TTL,
            token_refresh_margin: DEFAULT_TOKEN_REFRESH_MARGIN,
        }
    }

    pub fn with_key_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.key_scheme = scheme;
        self
    }

    /// Requires CORELEX_BASE_URL and CORELEX_PRIVATE_KEY
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env` but reads values through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(env_vars::BASE_URL)
            .ok_or_else(|| ClientError::Config(format!("{} not set", env_vars::BASE_URL)))?;
        let private_key = lookup(env_vars::PRIVATE_KEY)
            .ok_or_else(|| ClientError::Config(format!("{} not set", env_vars::PRIVATE_KEY)))?;

        let mut config = Self::new(&base_url, &private_key);

        if let Some(scheme) = lookup(env_vars::KEY_SCHEME) {
            config.key_scheme = scheme.parse()?;
        }
        if let Some(secs) = parse_secs(&lookup, env_vars::REQUEST_TIMEOUT_SECS)? {
            config.request_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, env_vars::AUTHORIZE_TIMEOUT_SECS)? {
            config.authorize_timeout = secs;
        }
        if let Some(secs) = parse_secs(&lookup, env_vars::TOKEN_TTL_SECS)? {
            config.default_token_ttl = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(ClientError::Config("base_url must not be empty".to_string()));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.private_key.trim().is_empty() {
            return Err(ClientError::Config("private_key must not be empty".to_string()));
        }
        if self.request_timeout.is_zero() || self.authorize_timeout.is_zero() {
            return Err(ClientError::Config("timeouts must be non-zero".to_string()));
        }
        if self.default_token_ttl.is_zero() {
            return Err(ClientError::Config("default_token_ttl must be non-zero".to_string()));
        }
        if self.default_token_ttl > MAX_TOKEN_TTL {
            return Err(ClientError::Config(format!(
                "default_token_ttl must be at most {}s",
                MAX_TOKEN_TTL.as_secs()
            )));
        }
        if self.token_refresh_margin >= self.default_token_ttl {
            return Err(ClientError::Config(
                "token_refresh_margin must be shorter than default_token_ttl".to_string(),
            ));
        }
        Ok(())
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            authorize_timeout: self.authorize_timeout,
            default_token_ttl: self.default_token_ttl,
            refresh_margin: self.token_refresh_margin,
        }
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ClientError::Config(format!("{} must be a whole number of seconds", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_from_lookup_defaults() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (env_vars::BASE_URL, "https://api.corelex.test/"),
            (env_vars::PRIVATE_KEY, "0x0707070707070707070707070707070707070707070707070707070707070707"),
        ]))
        .unwrap();

        assert_eq!(config.base_url, "https://api.corelex.test");
        assert_eq!(config.key_scheme, SignatureScheme::Ed25519);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.default_token_ttl, DEFAULT_TOKEN_TTL);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = ClientConfig::from_lookup(lookup_from(&[
            (env_vars::BASE_URL, "http://localhost:9200"),
            (env_vars::PRIVATE_KEY, "abcd"),
            (env_vars::KEY_SCHEME, "eip191"),
            (env_vars::AUTHORIZE_TIMEOUT_SECS, "7"),
            (env_vars::TOKEN_TTL_SECS, "60"),
        ]))
        .unwrap();

        assert_eq!(config.key_scheme, SignatureScheme::Eip191);
        assert_eq!(config.authorize_timeout, Duration::from_secs(7));
        assert_eq!(config.default_token_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let err = ClientConfig::from_lookup(lookup_from(&[(env_vars::BASE_URL, "https://x.test")]))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(ref m) if m.contains(env_vars::PRIVATE_KEY)));
    }

    #[test]
    fn test_bad_number_rejected() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            (env_vars::BASE_URL, "https://x.test"),
            (env_vars::PRIVATE_KEY, "abcd"),
            (env_vars::REQUEST_TIMEOUT_SECS, "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_out_of_range_token_ttl_rejected() {
        let err = ClientConfig::from_lookup(lookup_from(&[
            (env_vars::BASE_URL, "https://x.test"),
            (env_vars::PRIVATE_KEY, "abcd"),
            (env_vars::TOKEN_TTL_SECS, "10000000000000"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ClientError::Config(ref m) if m.contains("default_token_ttl")));

        let mut config = ClientConfig::new("https://x.test", "abcd");
        config.default_token_ttl = Duration::from_secs(5);
        config.token_refresh_margin = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config.default_token_ttl = MAX_TOKEN_TTL;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = ClientConfig::new("ftp://x.test", "abcd");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ClientConfig::new("https://x.test", "super-secret-key");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret-key"));
        assert!(rendered.contains("<redacted>"));
    }
}
