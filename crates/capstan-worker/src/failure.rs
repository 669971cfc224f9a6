//! Handler-error to wire-failure translation
//!
//! Whatever a handler throws is lifted into a structured failure record
//! before it crosses the wire: the message survives verbatim, the source is
//! a fixed marker identifying this worker, and the failure info carries the
//! error's concrete type name with module paths and reference sigils
//! stripped.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed source marker stamped on every failure this worker reports
pub const FAILURE_SOURCE: &str = "CapstanWorker";

/// Wire failure record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub message: String,
    pub source: String,
    pub info: FailureInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureInfo {
    Application(ApplicationFailureInfo),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationFailureInfo {
    #[serde(rename = "type")]
    pub error_type: String,
    pub non_retryable: bool,
    pub details: Option<serde_json::Value>,
}

/// A typed, possibly non-retryable failure raised by user code
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ApplicationError {
    pub message: String,
    pub non_retryable: bool,
    pub details: Option<serde_json::Value>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            non_retryable: false,
            details: None,
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            non_retryable: true,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Error returned by decision, activity, and query handlers
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Application(#[from] ApplicationError),

    #[error("{message}")]
    Other { type_name: String, message: String },
}

impl HandlerError {
    /// Wrap an arbitrary error, capturing its concrete type name
    pub fn other<E: std::error::Error>(err: &E) -> Self {
        Self::Other {
            type_name: short_type_name(std::any::type_name::<E>()).to_string(),
            message: err.to_string(),
        }
    }

    /// Plain message error
    pub fn message(message: impl Into<String>) -> Self {
        Self::Other {
            type_name: "Error".to_string(),
            message: message.into(),
        }
    }

    fn type_name(&self) -> &str {
        match self {
            Self::Application(_) => "ApplicationError",
            Self::Other { type_name, .. } => type_name,
        }
    }
}

/// Lift a handler error into the wire failure record
///
/// The non-retryable flag comes from the error itself when it is an
/// application error, otherwise from the caller.
pub fn application_failure(
    err: &HandlerError,
    non_retryable: bool,
    details: Option<serde_json::Value>,
) -> Failure {
    let non_retryable = match err {
        HandlerError::Application(app) => app.non_retryable,
        HandlerError::Other { .. } => non_retryable,
    };

    Failure {
        message: err.to_string(),
        source: FAILURE_SOURCE.to_string(),
        info: FailureInfo::Application(ApplicationFailureInfo {
            error_type: err.type_name().to_string(),
            non_retryable,
            details,
        }),
    }
}

/// Bare type name: no module path, no reference or pointer sigils
fn short_type_name(full: &str) -> &str {
    let stripped = full.trim_start_matches(['&', '*']).trim_start_matches("mut ");
    stripped.rsplit("::").next().unwrap_or(stripped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Error)]
    #[error("the disk is on fire")]
    struct DiskOnFire;

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(short_type_name("&core::num::ParseIntError"), "ParseIntError");
        assert_eq!(short_type_name("PlainError"), "PlainError");
    }

    #[test]
    fn test_other_error_translation() {
        let err = HandlerError::other(&DiskOnFire);
        let failure = application_failure(&err, true, None);

        assert_eq!(failure.message, "the disk is on fire");
        assert_eq!(failure.source, FAILURE_SOURCE);
        let FailureInfo::Application(info) = failure.info;
        assert_eq!(info.error_type, "DiskOnFire");
        assert!(info.non_retryable);
    }

    #[test]
    fn test_application_error_carries_its_own_retryability() {
        let err = HandlerError::from(
            ApplicationError::non_retryable("bad input").with_details(json!({"field": "id"})),
        );
        // caller-supplied flag is overridden by the application error
        let failure = application_failure(&err, false, Some(json!({"field": "id"})));

        let FailureInfo::Application(info) = failure.info;
        assert_eq!(info.error_type, "ApplicationError");
        assert!(info.non_retryable);
        assert_eq!(info.details, Some(json!({"field": "id"})));

        // a retryable application error stays retryable even when the
        // caller claims otherwise
        let retryable = HandlerError::from(ApplicationError::new("flaky downstream"));
        let failure = application_failure(&retryable, true, None);
        let FailureInfo::Application(info) = failure.info;
        assert!(!info.non_retryable);
    }

    #[test]
    fn test_plain_message_error() {
        let err = HandlerError::message("boom");
        let failure = application_failure(&err, false, None);
        assert_eq!(failure.message, "boom");
        let FailureInfo::Application(info) = failure.info;
        assert_eq!(info.error_type, "Error");
        assert!(!info.non_retryable);
    }
}
