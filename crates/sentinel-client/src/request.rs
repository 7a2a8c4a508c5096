//! Request arguments and their shape validation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sentinel_core::ToolFailure;

/// Arguments for `POST /v1/score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Workflow identifier, e.g. `"claims_triage"`.
    pub workflow: String,
    /// Workflow-specific input object.
    pub payload: Value,
    /// Optional scoring options object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

impl ScoreRequest {
    pub fn new(workflow: impl Into<String>, payload: Value) -> Self {
        Self {
            workflow: workflow.into(),
            payload,
            options: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Checks argument shapes before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an `invalid_arguments` failure if:
    /// - `workflow` is blank
    /// - `payload` is not a JSON object
    /// - `options` is present but not a JSON object
    pub fn validate(&self) -> Result<(), ToolFailure> {
        if self.workflow.trim().is_empty() {
            return Err(ToolFailure::invalid_arguments("workflow must not be empty"));
        }
        require_object("payload", &self.payload)?;
        if let Some(options) = &self.options {
            require_object("options", options)?;
        }
        Ok(())
    }
}

/// Checks that `month` is `YYYY-MM` with a real month.
///
/// # Errors
///
/// Returns an `invalid_arguments` failure otherwise.
pub fn validate_month(month: &str) -> Result<(), ToolFailure> {
    let well_formed = month.len() == 7
        && month.as_bytes()[4] == b'-'
        && NaiveDate::parse_from_str(&format!("{month}-01"), "%Y-%m-%d").is_ok();
    if well_formed {
        Ok(())
    } else {
        Err(ToolFailure::invalid_arguments(format!(
            "month must use YYYY-MM format, got '{month}'"
        )))
    }
}

/// Checks that `value` is a JSON object.
///
/// # Errors
///
/// Returns an `invalid_arguments` failure naming `field` otherwise.
pub fn require_object(field: &str, value: &Value) -> Result<(), ToolFailure> {
    if value.is_object() {
        Ok(())
    } else {
        Err(ToolFailure::invalid_arguments(format!(
            "{field} must be a JSON object"
        )))
    }
}
