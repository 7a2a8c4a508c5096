//! The cached trial credential record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::config::normalize_base_url;

/// Plan limits attached to a trial credential.
///
/// Informational only; nothing is enforced locally. Counters that are
/// null, negative or not integers read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Requests allowed per calendar month.
    #[serde(deserialize_with = "lenient_count")]
    pub monthly_quota: u64,
    /// Sustained requests per second.
    #[serde(deserialize_with = "lenient_count")]
    pub rps: u32,
    /// Burst allowance above `rps`.
    #[serde(deserialize_with = "lenient_count")]
    pub burst: u32,
}

fn lenient_count<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + TryFrom<u64>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value
        .as_u64()
        .and_then(|n| T::try_from(n).ok())
        .unwrap_or_default())
}

/// A trial credential as persisted in the cache file.
///
/// `token_base_url` and `api_base_url` record the endpoints the key was
/// minted against; a record is only reused when both still match the
/// configured endpoints.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Bearer token.
    pub api_key: String,
    /// Account the trial key belongs to.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Absolute expiry (serialized as RFC 3339 UTC).
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub limits: Limits,
    /// Where to send the user once the trial quota is used up.
    #[serde(default)]
    pub upgrade_url: Option<String>,
    pub token_base_url: String,
    pub api_base_url: String,
}

// Custom Debug implementation to avoid exposing the API key
impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("api_key", &"[REDACTED]")
            .field("account_id", &self.account_id)
            .field("expires_at", &self.expires_at)
            .field("limits", &self.limits)
            .field("upgrade_url", &self.upgrade_url)
            .field("token_base_url", &self.token_base_url)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl CredentialRecord {
    /// Whether `expires_at` is at or before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether both recorded endpoints match the given ones.
    ///
    /// Trailing slashes are ignored on both sides.
    pub fn matches_endpoints(&self, api_base_url: &str, token_base_url: &str) -> bool {
        normalize_base_url(&self.api_base_url) == normalize_base_url(api_base_url)
            && normalize_base_url(&self.token_base_url) == normalize_base_url(token_base_url)
    }

    /// Whether the record may be reused against the given endpoints at `now`.
    pub fn is_valid_for(&self, api_base_url: &str, token_base_url: &str, now: DateTime<Utc>) -> bool {
        !self.api_key.trim().is_empty()
            && !self.is_expired_at(now)
            && self.matches_endpoints(api_base_url, token_base_url)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    #![allow(clippy::unwrap_used)]

    use chrono::Duration;

    use super::*;

    pub(crate) const API: &str = "https://sentinelsignal.io";
    pub(crate) const TOKENS: &str = "https://sentinel-signal-token-service-prod.fly.dev";

    pub(crate) fn sample_record(api_key: &str, expires_at: DateTime<Utc>) -> CredentialRecord {
        CredentialRecord {
            api_key: api_key.to_string(),
            account_id: Some("00000000-0000-0000-0000-000000000001".to_string()),
            expires_at,
            limits: Limits {
                monthly_quota: 1000,
                rps: 1,
                burst: 5,
            },
            upgrade_url: Some("https://sentinelsignal.io/portal/dashboard".to_string()),
            token_base_url: TOKENS.to_string(),
            api_base_url: API.to_string(),
        }
    }

    #[test]
    fn test_limits_tolerate_odd_counters() {
        let limits: Limits =
            serde_json::from_str(r#"{"monthly_quota": 1000, "rps": null, "burst": -1}"#).unwrap();
        assert_eq!(
            limits,
            Limits {
                monthly_quota: 1000,
                rps: 0,
                burst: 0
            }
        );

        let limits: Limits = serde_json::from_str(r#"{"rps": 99999999999}"#).unwrap();
        assert_eq!(limits.rps, 0);
    }

    #[test]
    fn test_valid_record() {
        let now = Utc::now();
        let record = sample_record("ss_trial_abc", now + Duration::hours(1));
        assert!(record.is_valid_for(API, TOKENS, now));
    }

    #[test]
    fn test_expiry_is_strict() {
        let now = Utc::now();
        let record = sample_record("ss_trial_abc", now);
        assert!(record.is_expired_at(now));
        assert!(!record.is_valid_for(API, TOKENS, now));

        let record = sample_record("ss_trial_abc", now - Duration::hours(1));
        assert!(!record.is_valid_for(API, TOKENS, now));
    }

    #[test]
    fn test_endpoint_mismatch() {
        let now = Utc::now();
        let record = sample_record("ss_trial_abc", now + Duration::hours(1));
        assert!(!record.is_valid_for("https://staging.sentinelsignal.io", TOKENS, now));
        assert!(!record.is_valid_for(API, "http://localhost:8080", now));
    }

    #[test]
    fn test_trailing_slashes_match() {
        let now = Utc::now();
        let mut record = sample_record("ss_trial_abc", now + Duration::hours(1));
        record.api_base_url = format!("{API}/");
        record.token_base_url = format!("{TOKENS}/");
        assert!(record.matches_endpoints(API, TOKENS));
    }

    #[test]
    fn test_blank_key_is_never_valid() {
        let now = Utc::now();
        let record = sample_record("  ", now + Duration::hours(1));
        assert!(!record.is_valid_for(API, TOKENS, now));
    }

    #[test]
    fn test_debug_redacts_key() {
        let record = sample_record("ss_trial_secret", Utc::now());
        let debug = format!("{record:?}");
        assert!(!debug.contains("ss_trial_secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let record: CredentialRecord = serde_json::from_value(serde_json::json!({
            "api_key": "ss_trial_min",
            "expires_at": "2099-01-01T00:00:00Z",
            "token_base_url": TOKENS,
            "api_base_url": API,
        }))
        .unwrap();

        assert_eq!(record.limits, Limits::default());
        assert!(record.account_id.is_none());
        assert!(record.upgrade_url.is_none());
    }

    #[test]
    fn test_missing_expiry_fails_to_parse() {
        let result = serde_json::from_value::<CredentialRecord>(serde_json::json!({
            "api_key": "ss_trial_min",
            "token_base_url": TOKENS,
            "api_base_url": API,
        }));
        assert!(result.is_err());
    }
}
