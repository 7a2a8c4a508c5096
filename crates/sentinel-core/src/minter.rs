//! Trial key minting against the token service.
//!
//! A mint is a single `POST {token_base_url}/v1/keys/trial`. The response
//! carries the key, its expiry and plan limits:
//!
//! ```json
//! {
//!   "api_key": "ss_trial_abc",
//!   "account_id": "00000000-0000-0000-0000-000000000001",
//!   "expires_at": "2099-01-01T00:00:00Z",
//!   "limits": {"monthly_quota": 1000, "rps": 1, "burst": 5},
//!   "upgrade_url": "https://sentinelsignal.io/portal/dashboard"
//! }
//! ```
//!
//! The minted record is stamped with the *configured* endpoints, never the
//! ones echoed by the service, so a later endpoint change invalidates it.
//! Minting never retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::record::{CredentialRecord, Limits};

/// Trial issuance route, relative to the token base URL.
pub const TRIAL_ROUTE: &str = "/v1/keys/trial";

/// Source of fresh trial credentials.
#[async_trait]
pub trait TrialKeyMinter: Send + Sync {
    /// Requests a new trial credential.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TrialMintFailed`] on any non-success response,
    /// malformed body, transport error or timeout.
    async fn mint(&self) -> Result<CredentialRecord>;
}

/// Wire shape of a successful trial issuance response.
///
/// Only `api_key` and `expires_at` are required. The informational fields are
/// taken loosely so an unexpected shape never costs a working key.
#[derive(Debug, Deserialize)]
struct TrialKeyResponse {
    api_key: Option<String>,
    expires_at: Option<String>,
    #[serde(default)]
    account_id: Option<Value>,
    #[serde(default)]
    limits: Option<Value>,
    #[serde(default)]
    upgrade_url: Option<Value>,
}

/// Opaque identifier as a string; numbers keep their decimal form.
fn opaque_id(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn loose_limits(value: Option<Value>) -> Limits {
    value.map_or_else(Limits::default, |v| {
        serde_json::from_value(v).unwrap_or_else(|e| {
            debug!("Ignoring unreadable trial limits: {e}");
            Limits::default()
        })
    })
}

/// Mints trial keys over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTrialKeyMinter {
    client: reqwest::Client,
    token_base_url: String,
    api_base_url: String,
    timeout_secs: f64,
}

impl HttpTrialKeyMinter {
    /// Creates a minter for the endpoints in `settings`.
    ///
    /// The HTTP client is bounded by `settings.timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            token_base_url: settings.token_base_url.clone(),
            api_base_url: settings.api_base_url.clone(),
            timeout_secs: settings.timeout.as_secs_f64(),
        })
    }

    fn trial_url(&self) -> String {
        format!("{}{TRIAL_ROUTE}", self.token_base_url)
    }

    fn build_record(&self, url: &str, body: Value) -> Result<CredentialRecord> {
        if !body.is_object() {
            return Err(Error::mint_failed(
                None,
                format!("Trial key response from {url} was not a JSON object"),
            ));
        }

        let parsed: TrialKeyResponse = serde_json::from_value(body).map_err(|e| {
            Error::mint_failed(None, format!("Trial key response from {url} is malformed: {e}"))
        })?;

        let api_key = parsed
            .api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::mint_failed(None, "Trial key response missing api_key"))?;

        let expires_at = parsed
            .expires_at
            .as_deref()
            .ok_or_else(|| Error::mint_failed(None, "Trial key response missing expires_at"))
            .and_then(|raw| {
                DateTime::parse_from_rfc3339(raw.trim())
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| {
                        Error::mint_failed(None, format!("Invalid expires_at '{raw}': {e}"))
                    })
            })?;

        Ok(CredentialRecord {
            api_key,
            account_id: opaque_id(parsed.account_id),
            expires_at,
            limits: loose_limits(parsed.limits),
            upgrade_url: parsed
                .upgrade_url
                .as_ref()
                .and_then(Value::as_str)
                .filter(|u| !u.trim().is_empty())
                .map(str::to_string),
            token_base_url: self.token_base_url.clone(),
            api_base_url: self.api_base_url.clone(),
        })
    }
}

#[async_trait]
impl TrialKeyMinter for HttpTrialKeyMinter {
    #[instrument(skip(self), fields(token_base_url = %self.token_base_url))]
    async fn mint(&self) -> Result<CredentialRecord> {
        let url = self.trial_url();

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| {
                let detail = if e.is_timeout() {
                    format!("Request to {url} timed out after {}s", self.timeout_secs)
                } else {
                    format!("Failed to mint trial key from {url}: {e}")
                };
                warn!(%detail, "Trial key mint failed");
                Error::mint_failed(None, detail)
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            Error::mint_failed(
                Some(status.as_u16()),
                format!("Failed to read trial key response from {url}: {e}"),
            )
        })?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|parse_err| {
            debug!("Trial key response is not JSON: {parse_err}");
            serde_json::json!({ "raw_text": text })
        });

        if !status.is_success() {
            warn!(status = status.as_u16(), "Token service rejected trial mint");
            return Err(Error::mint_failed(
                Some(status.as_u16()),
                format!("Trial key mint failed ({}): {body}", status.as_u16()),
            ));
        }

        let record = self.build_record(&url, body)?;
        info!(
            account_id = record.account_id.as_deref().unwrap_or("unknown"),
            expires_at = %record.expires_at,
            "Minted trial key"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const API: &str = "https://sentinelsignal.io";

    fn settings_for(server: &MockServer) -> Settings {
        Settings::new(API, server.uri(), "/unused/credentials.json")
            .with_timeout(Duration::from_secs(5))
    }

    fn trial_body() -> Value {
        serde_json::json!({
            "api_key": "ss_trial_abc",
            "account_id": "00000000-0000-0000-0000-000000000001",
            "expires_at": "2099-01-01T00:00:00Z",
            "limits": {"monthly_quota": 1000, "rps": 1, "burst": 5},
            "upgrade_url": "https://sentinelsignal.io/portal/dashboard",
            "api_base_url": "https://elsewhere.example",
            "token_base_url": "https://elsewhere.example"
        })
    }

    fn expect_mint_failure(result: Result<CredentialRecord>) -> (Option<u16>, String) {
        match result {
            Err(Error::TrialMintFailed { status, detail }) => (status, detail),
            other => panic!("expected TrialMintFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_mint_stamps_configured_endpoints() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(trial_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let settings = settings_for(&mock_server);
        let minter = HttpTrialKeyMinter::new(&settings).unwrap();
        let record = minter.mint().await.unwrap();

        assert_eq!(record.api_key, "ss_trial_abc");
        assert_eq!(
            record.account_id.as_deref(),
            Some("00000000-0000-0000-0000-000000000001")
        );
        assert_eq!(record.expires_at.to_rfc3339(), "2099-01-01T00:00:00+00:00");
        assert_eq!(record.limits.monthly_quota, 1000);
        assert_eq!(record.limits.burst, 5);
        assert_eq!(record.api_base_url, settings.api_base_url);
        assert_eq!(record.token_base_url, settings.token_base_url);
    }

    #[tokio::test]
    async fn test_sends_user_agent() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .and(header("user-agent", crate::config::USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_json(trial_body()))
            .expect(1)
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        assert!(minter.mint().await.is_ok());
    }

    #[tokio::test]
    async fn test_error_status_is_mint_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({"detail": "trial issuance paused"})),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let (status, detail) = expect_mint_failure(minter.mint().await);

        assert_eq!(status, Some(503));
        assert!(detail.contains("trial issuance paused"));
    }

    #[tokio::test]
    async fn test_non_json_error_body_is_preserved() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let (status, detail) = expect_mint_failure(minter.mint().await);

        assert_eq!(status, Some(502));
        assert!(detail.contains("bad gateway"));
    }

    #[tokio::test]
    async fn test_numeric_account_id_is_kept_as_string() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "api_key": "ss_trial_abc",
                "account_id": 42,
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let record = minter.mint().await.unwrap();

        assert_eq!(record.api_key, "ss_trial_abc");
        assert_eq!(record.account_id.as_deref(), Some("42"));
        assert_eq!(record.limits, Limits::default());
    }

    #[tokio::test]
    async fn test_odd_limits_do_not_fail_the_mint() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "api_key": "ss_trial_abc",
                "account_id": null,
                "expires_at": "2099-01-01T00:00:00Z",
                "limits": {"monthly_quota": 1000, "rps": null, "burst": "5"},
                "upgrade_url": 7
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let record = minter.mint().await.unwrap();

        assert_eq!(record.api_key, "ss_trial_abc");
        assert_eq!(record.account_id, None);
        assert_eq!(record.upgrade_url, None);
        assert_eq!(
            record.limits,
            Limits {
                monthly_quota: 1000,
                rps: 0,
                burst: 0
            }
        );
    }

    #[tokio::test]
    async fn test_non_object_limits_fall_back_to_defaults() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "api_key": "ss_trial_abc",
                "expires_at": "2099-01-01T00:00:00Z",
                "limits": "unlimited"
            })))
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let record = minter.mint().await.unwrap();
        assert_eq!(record.limits, Limits::default());
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "expires_at": "2099-01-01T00:00:00Z"
            })))
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let (_, detail) = expect_mint_failure(minter.mint().await);
        assert!(detail.contains("api_key"));
    }

    #[tokio::test]
    async fn test_missing_or_invalid_expiry() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "api_key": "ss_trial_abc",
                "expires_at": "next tuesday"
            })))
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let (_, detail) = expect_mint_failure(minter.mint().await);
        assert!(detail.contains("expires_at"));
    }

    #[tokio::test]
    async fn test_non_object_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(["nope"])))
            .mount(&mock_server)
            .await;

        let minter = HttpTrialKeyMinter::new(&settings_for(&mock_server)).unwrap();
        let (_, detail) = expect_mint_failure(minter.mint().await);
        assert!(detail.contains("not a JSON object"));
    }

    #[tokio::test]
    async fn test_timeout_is_mint_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path(TRIAL_ROUTE))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(trial_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&mock_server)
            .await;

        let settings = settings_for(&mock_server).with_timeout(Duration::from_millis(200));
        let minter = HttpTrialKeyMinter::new(&settings).unwrap();
        let (status, detail) = expect_mint_failure(minter.mint().await);

        assert_eq!(status, None);
        assert!(detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unreachable_service() {
        let settings = Settings::new(API, "http://127.0.0.1:9", "/unused/credentials.json")
            .with_timeout(Duration::from_secs(2));
        let minter = HttpTrialKeyMinter::new(&settings).unwrap();
        let (status, _) = expect_mint_failure(minter.mint().await);
        assert_eq!(status, None);
    }
}
