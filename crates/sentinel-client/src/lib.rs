//! # sentinel-client
//!
//! Proxied Sentinel Signal API operations.
//!
//! [`SentinelClient`] resolves a credential before every call, attaches it as
//! a bearer token and classifies the outcome. Calls never return `Err`: every
//! result, including local credential failures and argument validation
//! errors, comes back as a [`ToolResponse`].
//!
//! | operation | request |
//! |---|---|
//! | [`SentinelClient::score_workflow`] | `POST /v1/score` |
//! | [`SentinelClient::get_limits`] | `GET /v1/limits` |
//! | [`SentinelClient::get_usage`] | `GET /v1/usage?month=YYYY-MM` |
//! | [`SentinelClient::submit_feedback`] | `POST /v1/feedback` |
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sentinel_client::{ScoreRequest, SentinelClient};
//! use sentinel_core::Settings;
//! use serde_json::json;
//!
//! # async fn example() -> sentinel_core::Result<()> {
//! let client = SentinelClient::from_settings(Arc::new(Settings::from_env()?))?;
//!
//! let response = client
//!     .score_workflow(ScoreRequest::new("claims_triage", json!({"claim_id": "c-1"})))
//!     .await;
//! println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::Utc;
use reqwest::header::{ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response};
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use sentinel_core::{
    CredentialResolver, Error, Outcome, Settings, ToolFailure, ToolResponse, classify,
    parse_retry_after,
};

pub mod request;

pub use request::{ScoreRequest, require_object, validate_month};

/// Client for the proxied scoring API operations.
#[derive(Debug, Clone)]
pub struct SentinelClient {
    http: reqwest::Client,
    resolver: Arc<CredentialResolver>,
    base_url: String,
}

impl SentinelClient {
    /// Creates a client that draws credentials from `resolver`.
    ///
    /// Requests go to the resolver's configured scoring API and are bounded
    /// by its configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(resolver: Arc<CredentialResolver>) -> sentinel_core::Result<Self> {
        let settings = resolver.settings();
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        let base_url = settings.api_base_url.clone();

        Ok(Self {
            http,
            resolver,
            base_url,
        })
    }

    /// Creates a client with the default file cache and HTTP token service.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be built.
    pub fn from_settings(settings: Arc<Settings>) -> sentinel_core::Result<Self> {
        let resolver = Arc::new(CredentialResolver::from_settings(settings)?);
        Self::new(resolver)
    }

    /// Returns the credential resolver.
    #[must_use]
    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Scores a workflow payload.
    pub async fn score_workflow(&self, request: ScoreRequest) -> ToolResponse {
        if let Err(failure) = request.validate() {
            return failure.into();
        }
        match serde_json::to_value(&request) {
            Ok(body) => self.call(Method::POST, "/v1/score", None, Some(body)).await,
            Err(e) => ToolFailure::invalid_arguments(format!("Failed to encode request: {e}")).into(),
        }
    }

    /// Returns plan limits for the current key.
    pub async fn get_limits(&self) -> ToolResponse {
        self.call(Method::GET, "/v1/limits", None, None).await
    }

    /// Returns usage for the current key, optionally for a given `YYYY-MM`.
    pub async fn get_usage(&self, month: Option<&str>) -> ToolResponse {
        let month = month.map(str::trim).filter(|m| !m.is_empty());
        if let Err(failure) = month.map_or(Ok(()), validate_month) {
            return failure.into();
        }
        self.call(Method::GET, "/v1/usage", month.map(|m| ("month", m)), None)
            .await
    }

    /// Submits structured feedback for a prior scoring request.
    pub async fn submit_feedback(&self, feedback: Value) -> ToolResponse {
        if let Err(failure) = require_object("feedback", &feedback) {
            return failure.into();
        }
        self.call(Method::POST, "/v1/feedback", None, Some(feedback))
            .await
    }

    #[instrument(skip(self, query, body))]
    async fn call(
        &self,
        method: Method,
        path: &str,
        query: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> ToolResponse {
        let credential = match self.resolver.resolve().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "No usable credential");
                return ToolFailure::from(&e).into();
            }
        };

        let url = format!("{}{path}", self.base_url);
        let mut request = self
            .http
            .request(method, &url)
            .bearer_auth(credential.api_key.expose_secret())
            .header(ACCEPT, "application/json");
        if let Some(pair) = query {
            request = request.query(&[pair]);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let outcome = match request.send().await {
            Ok(response) => read_response(response).await,
            Err(e) => transport_outcome(&e, &url),
        };

        if let Outcome::Response { status, .. } = &outcome {
            debug!(status, source = %credential.source, "Sentinel API responded");
        }
        classify(outcome, credential.record.as_ref())
    }
}

async fn read_response(response: Response) -> Outcome {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, Utc::now()));
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
    let url = response.url().to_string();

    match response.text().await {
        Ok(text) => Outcome::Response {
            status,
            body: decode_body(&text, is_json),
            retry_after,
        },
        Err(e) => transport_outcome(&e, &url),
    }
}

fn decode_body(text: &str, is_json: bool) -> Value {
    if is_json {
        if text.trim().is_empty() {
            return Value::Null;
        }
        if let Ok(value) = serde_json::from_str(text) {
            return value;
        }
        debug!("Response declared JSON but failed to parse, keeping raw text");
    }
    serde_json::json!({ "raw_text": text })
}

fn transport_outcome(err: &reqwest::Error, url: &str) -> Outcome {
    let detail = format!("HTTP request to {url} failed: {err}");
    warn!(%detail, "Sentinel API request failed");
    if err.is_timeout() {
        Outcome::Timeout { detail }
    } else {
        Outcome::Network { detail }
    }
}
