//! Outcome classification.
//!
//! Every proxied call ends in exactly one [`ToolResponse`]. Failures carry an
//! [`Action`] the calling agent can branch on without parsing prose:
//!
//! | outcome | action |
//! |---|---|
//! | 2xx | `success` |
//! | 401, 403, no resolvable credential | `configure_credentials` |
//! | 402 | `upgrade_required` |
//! | 429 | `retry_later` |
//! | anything else, network error, timeout | `generic_failure` |
//!
//! Serialized envelopes:
//!
//! ```json
//! {"ok": true, "status": 200, "data": {"score": 0.93}}
//! {"ok": false, "error": {"action": "retry_later", "code": "rate_limited",
//!   "status": 429, "message": "Trial rate limit exceeded", "retry_after_seconds": 2}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::Error;
use crate::record::CredentialRecord;

/// What the caller should do about an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Success,
    ConfigureCredentials,
    UpgradeRequired,
    RetryLater,
    GenericFailure,
}

impl Action {
    /// Maps an HTTP status code to its action.
    pub const fn for_status(status: u16) -> Self {
        match status {
            200..=299 => Self::Success,
            401 | 403 => Self::ConfigureCredentials,
            402 => Self::UpgradeRequired,
            429 => Self::RetryLater,
            _ => Self::GenericFailure,
        }
    }
}

/// Machine-readable failure code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    QuotaExhausted,
    RateLimited,
    UpstreamError,
    NetworkError,
    Timeout,
    CredentialsUnavailable,
    TrialMintFailed,
    InvalidArguments,
}

/// Completed outcome of an outbound call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A response arrived.
    Response {
        status: u16,
        /// Decoded body (`{"raw_text": ...}` for non-JSON bodies).
        body: Value,
        /// `Retry-After` hint in seconds, if the response carried one.
        retry_after: Option<u64>,
    },
    /// The request exceeded the configured timeout.
    Timeout { detail: String },
    /// The request failed before a response arrived.
    Network { detail: String },
}

/// Failure half of the envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolFailure {
    pub action: Action,
    pub code: ErrorCode,
    /// Upstream status; `None` for local and transport failures.
    pub status: Option<u16>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl ToolFailure {
    fn new(action: Action, code: ErrorCode, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            action,
            code,
            status,
            message: message.into(),
            upgrade_url: None,
            retry_after_seconds: None,
            detail: None,
        }
    }

    /// Local argument validation failure.
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(
            Action::GenericFailure,
            ErrorCode::InvalidArguments,
            None,
            message,
        )
    }
}

impl From<&Error> for ToolFailure {
    fn from(err: &Error) -> Self {
        match err {
            Error::NoCredentialConfigured => Self::new(
                Action::ConfigureCredentials,
                ErrorCode::CredentialsUnavailable,
                None,
                format!("{err}. Set SENTINEL_API_KEY or allow auto-trial by unsetting SENTINEL_NO_TRIAL."),
            ),
            Error::TrialMintFailed { status, detail } => {
                let mut failure = Self::new(
                    Action::ConfigureCredentials,
                    ErrorCode::TrialMintFailed,
                    *status,
                    "Could not obtain a trial API key. Set SENTINEL_API_KEY to use your own key.",
                );
                failure.detail = Some(serde_json::json!({ "detail": detail }));
                failure
            }
            other => Self::new(
                Action::ConfigureCredentials,
                ErrorCode::CredentialsUnavailable,
                None,
                format!("Could not resolve an API key: {other}"),
            ),
        }
    }
}

impl From<Error> for ToolFailure {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

/// Result of a proxied call, as handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResponse {
    Success { status: u16, data: Value },
    Failure(ToolFailure),
}

impl ToolResponse {
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub const fn action(&self) -> Action {
        match self {
            Self::Success { .. } => Action::Success,
            Self::Failure(failure) => failure.action,
        }
    }

    pub const fn failure(&self) -> Option<&ToolFailure> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

impl From<ToolFailure> for ToolResponse {
    fn from(failure: ToolFailure) -> Self {
        Self::Failure(failure)
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ToolFailure>,
}

impl Serialize for ToolResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let envelope = match self {
            Self::Success { status, data } => Envelope {
                ok: true,
                status: Some(*status),
                data: Some(data),
                error: None,
            },
            Self::Failure(failure) => Envelope {
                ok: false,
                status: None,
                data: None,
                error: Some(failure),
            },
        };
        envelope.serialize(serializer)
    }
}

/// Classifies an outbound call's outcome.
///
/// `record` is the credential record the call was made with; its
/// `upgrade_url` is used for 402 responses that don't carry one.
pub fn classify(outcome: Outcome, record: Option<&CredentialRecord>) -> ToolResponse {
    let (status, body, retry_after) = match outcome {
        Outcome::Response {
            status,
            body,
            retry_after,
        } => (status, body, retry_after),
        Outcome::Timeout { detail } => {
            let mut failure = ToolFailure::new(
                Action::GenericFailure,
                ErrorCode::Timeout,
                None,
                "Request to Sentinel API timed out",
            );
            failure.detail = Some(serde_json::json!({ "detail": detail }));
            return failure.into();
        }
        Outcome::Network { detail } => {
            let mut failure = ToolFailure::new(
                Action::GenericFailure,
                ErrorCode::NetworkError,
                None,
                "HTTP request to Sentinel API failed",
            );
            failure.detail = Some(serde_json::json!({ "detail": detail }));
            return failure.into();
        }
    };

    let action = Action::for_status(status);
    if action == Action::Success {
        let data = if body.is_object() {
            body
        } else {
            serde_json::json!({ "result": body })
        };
        return ToolResponse::Success { status, data };
    }

    let (code, default_message) = match status {
        401 => (
            ErrorCode::Unauthorized,
            "The API key was rejected. Set SENTINEL_API_KEY to a valid key or reset cached credentials.",
        ),
        403 => (
            ErrorCode::Forbidden,
            "The API key is not allowed to perform this operation.",
        ),
        402 => (
            ErrorCode::QuotaExhausted,
            "Quota exhausted. Upgrade your plan to continue.",
        ),
        429 => (ErrorCode::RateLimited, "Rate limit exceeded. Retry later."),
        _ => (ErrorCode::UpstreamError, "Sentinel API request failed"),
    };

    let message = body_message(&body).unwrap_or_else(|| match code {
        ErrorCode::UpstreamError => format!("{default_message} ({status})"),
        _ => default_message.to_string(),
    });

    let mut failure = ToolFailure::new(action, code, Some(status), message);
    match action {
        Action::UpgradeRequired => {
            failure.upgrade_url = body_upgrade_url(&body)
                .or_else(|| record.and_then(|r| r.upgrade_url.clone()));
        }
        Action::RetryLater => {
            failure.retry_after_seconds = retry_after.or_else(|| body_retry_after(&body));
        }
        _ => {}
    }
    failure.detail = Some(body);
    failure.into()
}

/// Classifies a bare status code and body.
pub fn classify_status(status: u16, body: Value, record: Option<&CredentialRecord>) -> ToolResponse {
    classify(
        Outcome::Response {
            status,
            body,
            retry_after: None,
        },
        record,
    )
}

/// Parses a `Retry-After` header value (delta-seconds or HTTP-date).
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(seconds);
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    Some(u64::try_from((at - now).num_seconds()).unwrap_or(0))
}

fn detail_field<'a>(body: &'a Value, key: &str) -> Option<&'a Value> {
    body.get("detail")
        .and_then(|d| d.get(key))
        .or_else(|| body.get(key))
}

fn body_message(body: &Value) -> Option<String> {
    let detail = body.get("detail");
    detail
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .or_else(|| detail.and_then(Value::as_str))
        .or_else(|| body.get("message").and_then(Value::as_str))
        .or_else(|| body.get("error").and_then(Value::as_str))
        .or_else(|| {
            body.get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
        .filter(|m| !m.trim().is_empty())
        .map(str::to_string)
}

fn body_upgrade_url(body: &Value) -> Option<String> {
    detail_field(body, "upgrade_url")
        .and_then(Value::as_str)
        .filter(|u| !u.trim().is_empty())
        .map(str::to_string)
}

fn body_retry_after(body: &Value) -> Option<u64> {
    detail_field(body, "retry_after_seconds")
        .or_else(|| detail_field(body, "retry_after"))
        .and_then(|v| v.as_u64().or_else(|| v.as_f64().and_then(ceil_seconds)))
}

/// Rounds fractional seconds up, clamped to `0..=u32::MAX`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ceil_seconds(seconds: f64) -> Option<u64> {
    // Finite, non-negative and at most u32::MAX: the cast is exact.
    (seconds.is_finite() && seconds >= 0.0)
        .then(|| seconds.ceil().min(f64::from(u32::MAX)) as u64)
}
