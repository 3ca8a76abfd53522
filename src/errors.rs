use serde::Serialize;
use thiserror::Error;

/// Failures surfaced by the backend gateway. One attempt per call, so these
/// are reported to the caller as-is.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("API request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response from backend: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Everything that can stop an analyze or apply action.
#[derive(Debug, Error)]
pub enum AssistError {
    #[error("No job posting found on this page")]
    NoJobFound,

    #[error("Daily application limit reached ({limit})")]
    QuotaExceeded { limit: u32 },

    #[error("Auto-apply is disabled")]
    AutoApplyDisabled,

    #[error("Backend error: {0}")]
    Backend(#[from] GatewayError),

    #[error("No application form found on this page")]
    FormNotFound,

    #[error("Another operation is already in progress")]
    Busy,

    #[error("Analyze a job before applying")]
    NotAnalyzed,

    #[error("Page changed before the operation finished")]
    Superseded,

    #[error("Storage error: {0}")]
    Storage(anyhow::Error),

    #[error("Page error: {0}")]
    Page(anyhow::Error),
}

impl AssistError {
    /// The status line shown to the user for this failure.
    pub fn user_message(&self, action: Action) -> String {
        match self {
            AssistError::Backend(_) | AssistError::Storage(_) | AssistError::Page(_) => {
                match action {
                    Action::Analyze => "Failed to analyze job posting".to_string(),
                    Action::Apply => "Failed to submit application".to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Analyze,
    Apply,
}

/// Result of a user intent as reported back to whoever triggered it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            message: Some(message.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_message_names_limit() {
        let err = AssistError::QuotaExceeded { limit: 10 };
        assert_eq!(
            err.user_message(Action::Apply),
            "Daily application limit reached (10)"
        );
    }

    #[test]
    fn test_backend_failures_get_generic_message() {
        let err = AssistError::Backend(GatewayError::Status {
            status: 500,
            message: "boom".to_string(),
        });
        assert_eq!(err.user_message(Action::Analyze), "Failed to analyze job posting");
        assert_eq!(err.user_message(Action::Apply), "Failed to submit application");
    }

    #[test]
    fn test_form_not_found_is_distinct_from_no_job() {
        assert_ne!(
            AssistError::FormNotFound.user_message(Action::Apply),
            AssistError::NoJobFound.user_message(Action::Apply)
        );
    }

    #[test]
    fn test_outcome_serializes_failure_shape() {
        let value = serde_json::to_value(Outcome::failed("nope")).unwrap();
        assert_eq!(value, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_gateway_status_accessor() {
        let err = GatewayError::Status {
            status: 404,
            message: "missing".to_string(),
        };
        assert_eq!(err.status(), Some(404));
        assert_eq!(GatewayError::Decode("x".to_string()).status(), None);
    }
}
