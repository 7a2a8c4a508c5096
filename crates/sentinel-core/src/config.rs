//! Connector settings.
//!
//! Settings are read from environment variables:
//!
//! | variable | default |
//! |---|---|
//! | `SENTINEL_API_KEY` | unset (auto-trial) |
//! | `SENTINEL_API_BASE_URL` | `https://sentinelsignal.io` |
//! | `SENTINEL_TOKEN_BASE_URL` | `https://sentinel-signal-token-service-prod.fly.dev` |
//! | `SENTINEL_CREDENTIALS_PATH` | `~/.sentinel-signal/credentials.json` |
//! | `SENTINEL_NO_TRIAL` | `0` |
//! | `SENTINEL_TIMEOUT_SECONDS` | `30` |
//!
//! `SENTINEL_API_TIMEOUT_SECONDS` is accepted as an alias for the timeout.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::paths;

/// Default scoring API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://sentinelsignal.io";

/// Default token service base URL.
pub const DEFAULT_TOKEN_BASE_URL: &str = "https://sentinel-signal-token-service-prod.fly.dev";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;

/// `User-Agent` sent on every outbound request.
pub const USER_AGENT: &str = concat!("sentinel-signal/", env!("CARGO_PKG_VERSION"));

const ENV_API_KEY: &str = "SENTINEL_API_KEY";
const ENV_API_BASE_URL: &str = "SENTINEL_API_BASE_URL";
const ENV_TOKEN_BASE_URL: &str = "SENTINEL_TOKEN_BASE_URL";
const ENV_CREDENTIALS_PATH: &str = "SENTINEL_CREDENTIALS_PATH";
const ENV_NO_TRIAL: &str = "SENTINEL_NO_TRIAL";
const ENV_TIMEOUT: &str = "SENTINEL_TIMEOUT_SECONDS";
const ENV_TIMEOUT_ALIAS: &str = "SENTINEL_API_TIMEOUT_SECONDS";

/// Resolved connector settings.
///
/// Base URLs are stored without trailing slashes so that cached records
/// can be compared against them directly.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Explicit API key. Bypasses the trial flow and the cache entirely.
    pub api_key: Option<SecretString>,
    /// Scoring API base URL.
    pub api_base_url: String,
    /// Token service base URL.
    pub token_base_url: String,
    /// Location of the cached trial credential.
    pub credentials_path: PathBuf,
    /// Disable automatic trial key minting.
    pub no_trial: bool,
    /// Timeout applied to every outbound request.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
}

impl Settings {
    /// Creates settings with explicit endpoints and cache path.
    ///
    /// No API key, auto-trial enabled, default timeout.
    pub fn new(
        api_base_url: impl AsRef<str>,
        token_base_url: impl AsRef<str>,
        credentials_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_key: None,
            api_base_url: normalize_base_url(api_base_url.as_ref()),
            token_base_url: normalize_base_url(token_base_url.as_ref()),
            credentials_path: credentials_path.into(),
            no_trial: false,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS),
            user_agent: USER_AGENT.to_string(),
        }
    }

    /// Sets an explicit API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(api_key.into().into()));
        self
    }

    /// Enables or disables automatic trial minting.
    #[must_use]
    pub const fn with_no_trial(mut self, no_trial: bool) -> Self {
        self.no_trial = no_trial;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Loads settings from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Settings::from_lookup`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through a variable lookup function.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A base URL is not a valid absolute URL
    /// - The timeout is not a positive number
    /// - The cache path needs the home directory and it cannot be determined
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_base_url = get(ENV_API_BASE_URL).unwrap_or_else(|| DEFAULT_API_BASE_URL.into());
        let token_base_url =
            get(ENV_TOKEN_BASE_URL).unwrap_or_else(|| DEFAULT_TOKEN_BASE_URL.into());
        validate_base_url(ENV_API_BASE_URL, &api_base_url)?;
        validate_base_url(ENV_TOKEN_BASE_URL, &token_base_url)?;

        let credentials_path = match get(ENV_CREDENTIALS_PATH) {
            Some(raw) => paths::expand_home(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "{ENV_CREDENTIALS_PATH} uses '~' but the home directory is unknown"
                ))
            })?,
            None => paths::default_credentials_path().ok_or_else(|| {
                Error::Config(format!(
                    "Failed to determine home directory; set {ENV_CREDENTIALS_PATH}"
                ))
            })?,
        };

        let timeout = match get(ENV_TIMEOUT).or_else(|| get(ENV_TIMEOUT_ALIAS)) {
            Some(raw) => parse_timeout(&raw)?,
            None => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECONDS),
        };

        let mut settings = Self::new(api_base_url, token_base_url, credentials_path)
            .with_no_trial(get(ENV_NO_TRIAL).is_some_and(|v| parse_flag(&v)))
            .with_timeout(timeout);
        if let Some(key) = get(ENV_API_KEY) {
            settings = settings.with_api_key(key);
        }

        Ok(settings)
    }

    /// Whether an explicit API key is configured.
    pub const fn has_explicit_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Strips surrounding whitespace and trailing slashes from a base URL.
pub fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn validate_base_url(name: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| Error::Config(format!("{name} is not a valid URL '{raw}': {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "{name} must use http or https, got '{}'",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    let seconds: f64 = raw
        .parse()
        .map_err(|_| Error::Config(format!("{ENV_TIMEOUT} must be a number, got '{raw}'")))?;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(Error::Config(format!("{ENV_TIMEOUT} must be > 0")));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::Config(format!("{ENV_TIMEOUT} is out of range: {e}")))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings =
            Settings::from_lookup(lookup(&[("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json")]))
                .unwrap();

        assert!(settings.api_key.is_none());
        assert_eq!(settings.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(settings.token_base_url, DEFAULT_TOKEN_BASE_URL);
        assert_eq!(settings.credentials_path, PathBuf::from("/tmp/c.json"));
        assert!(!settings.no_trial);
        assert_eq!(settings.timeout, Duration::from_secs(30));
        assert!(settings.user_agent.starts_with("sentinel-signal/"));
    }

    #[test]
    fn test_full_environment() {
        let settings = Settings::from_lookup(lookup(&[
            ("SENTINEL_API_KEY", "  ss_live_123  "),
            ("SENTINEL_API_BASE_URL", "https://staging.sentinelsignal.io/"),
            ("SENTINEL_TOKEN_BASE_URL", "http://localhost:8080//"),
            ("SENTINEL_CREDENTIALS_PATH", "/var/tmp/creds.json"),
            ("SENTINEL_NO_TRIAL", "TRUE"),
            ("SENTINEL_TIMEOUT_SECONDS", "2.5"),
        ]))
        .unwrap();

        assert_eq!(
            settings.api_key.as_ref().unwrap().expose_secret(),
            "ss_live_123"
        );
        assert_eq!(settings.api_base_url, "https://staging.sentinelsignal.io");
        assert_eq!(settings.token_base_url, "http://localhost:8080");
        assert!(settings.no_trial);
        assert_eq!(settings.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_blank_api_key_is_unset() {
        let settings = Settings::from_lookup(lookup(&[
            ("SENTINEL_API_KEY", "   "),
            ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
        ]))
        .unwrap();
        assert!(!settings.has_explicit_key());
    }

    #[test]
    fn test_timeout_alias() {
        let settings = Settings::from_lookup(lookup(&[
            ("SENTINEL_API_TIMEOUT_SECONDS", "7"),
            ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
        ]))
        .unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(7));
    }

    #[test]
    fn test_invalid_timeout() {
        for raw in ["abc", "0", "-1", "NaN", "inf"] {
            let result = Settings::from_lookup(lookup(&[
                ("SENTINEL_TIMEOUT_SECONDS", raw),
                ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
            ]));
            assert!(matches!(result, Err(Error::Config(_))), "accepted {raw}");
        }
    }

    #[test]
    fn test_invalid_base_url() {
        let result = Settings::from_lookup(lookup(&[
            ("SENTINEL_API_BASE_URL", "not a url"),
            ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Settings::from_lookup(lookup(&[
            ("SENTINEL_TOKEN_BASE_URL", "ftp://tokens.example"),
            ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
        ]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_no_trial_flag_values() {
        for (raw, expected) in [("1", true), ("on", true), ("0", false), ("nope", false)] {
            let settings = Settings::from_lookup(lookup(&[
                ("SENTINEL_NO_TRIAL", raw),
                ("SENTINEL_CREDENTIALS_PATH", "/tmp/c.json"),
            ]))
            .unwrap();
            assert_eq!(settings.no_trial, expected, "flag {raw}");
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(" https://a.io/// "), "https://a.io");
        assert_eq!(normalize_base_url("https://a.io/v1"), "https://a.io/v1");
    }
}
