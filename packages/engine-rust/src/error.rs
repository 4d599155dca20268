//! Error taxonomy for operation execution.
//!
//! Every error carries a [`Status`] classification that survives wrapping,
//! so a validation failure raised three levels deep inside a federated named
//! operation still reaches the caller as `BadRequest`.

use std::fmt;

use serde::Serialize;

/// Classification of an operation failure, for clients to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    BadRequest,
    Forbidden,
    NotFound,
    Conflict,
    NotImplemented,
    /// The executor is misconfigured; not a problem with the request.
    Configuration,
    Timeout,
    Unavailable,
    Internal,
}

impl Status {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Configuration => "CONFIGURATION",
            Self::Timeout => "TIMEOUT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by handlers, hooks and the executor.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },
    #[error("{message}")]
    Unauthorised { message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unsupported operation: {op_type}")]
    Unsupported { op_type: String },
    #[error("no handler could be resolved for operation type {op_type}")]
    NoHandler { op_type: String },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("executor overloaded, try again later")]
    Overloaded,
    #[error("operation {op_type} failed: {source}")]
    Failed {
        op_type: String,
        #[source]
        source: Box<OperationError>,
    },
    #[error("executor {executor_id} failed: {source}")]
    Federated {
        executor_id: String,
        #[source]
        source: Box<OperationError>,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// A validation error with a single message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![message.into()],
        }
    }

    pub fn unauthorised(message: impl Into<String>) -> Self {
        Self::Unauthorised {
            message: message.into(),
        }
    }

    /// Wraps an error raised while executing `op_type`. An error that is
    /// already a `Failed` wrapper is returned unchanged, so nested executions
    /// do not stack wrappers.
    #[must_use]
    pub fn failure(op_type: &str, source: OperationError) -> Self {
        match source {
            already @ Self::Failed { .. } => already,
            other => Self::Failed {
                op_type: op_type.to_string(),
                source: Box::new(other),
            },
        }
    }

    #[must_use]
    pub fn federated(executor_id: &str, source: OperationError) -> Self {
        Self::Federated {
            executor_id: executor_id.to_string(),
            source: Box::new(source),
        }
    }

    /// Classification of this error, looking through wrappers.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Validation { .. } => Status::BadRequest,
            Self::Unauthorised { .. } => Status::Forbidden,
            Self::NotFound(_) => Status::NotFound,
            Self::Conflict(_) => Status::Conflict,
            Self::Unsupported { .. } => Status::NotImplemented,
            Self::NoHandler { .. } => Status::Configuration,
            Self::Timeout { .. } => Status::Timeout,
            Self::Overloaded => Status::Unavailable,
            Self::Failed { source, .. } | Self::Federated { source, .. } => source.status(),
            Self::Internal(_) => Status::Internal,
        }
    }

    /// The innermost error, below any `Failed`/`Federated` wrappers.
    #[must_use]
    pub fn root(&self) -> &OperationError {
        match self {
            Self::Failed { source, .. } | Self::Federated { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("malformed JSON: {err}"))
    }
}

/// Client-facing rendering of an [`OperationError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub status: Status,
    pub message: String,
    /// Full diagnostic chain; only filled in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorReport {
    #[must_use]
    pub fn new(error: &OperationError, debug: bool) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            detail: debug.then(|| format!("{error:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_wrapping_keeps_status_and_message() {
        let err = OperationError::failure("Count", OperationError::validation("bad input"));
        assert_eq!(err.status(), Status::BadRequest);
        assert_eq!(
            err.to_string(),
            "operation Count failed: validation failed: bad input"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn failure_is_not_double_wrapped() {
        let inner = OperationError::failure("Count", OperationError::Overloaded);
        let outer = OperationError::failure("OperationChain", inner);
        match &outer {
            OperationError::Failed { op_type, source } => {
                assert_eq!(op_type, "Count");
                assert!(matches!(**source, OperationError::Overloaded));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn federated_wrapping_keeps_status() {
        let err = OperationError::federated(
            "graphA",
            OperationError::failure("Get", OperationError::unauthorised("no")),
        );
        assert_eq!(err.status(), Status::Forbidden);
        assert!(matches!(err.root(), OperationError::Unauthorised { .. }));
    }

    #[test]
    fn no_handler_is_a_configuration_error() {
        let err = OperationError::NoHandler {
            op_type: "X".into(),
        };
        assert_eq!(err.status(), Status::Configuration);
    }

    #[test]
    fn report_detail_only_in_debug_mode() {
        let err = OperationError::NotFound("job 1".into());
        let quiet = ErrorReport::new(&err, false);
        assert_eq!(quiet.status, Status::NotFound);
        assert_eq!(quiet.message, "not found: job 1");
        assert!(quiet.detail.is_none());

        let loud = ErrorReport::new(&err, true);
        assert!(loud.detail.unwrap().contains("NotFound"));
    }

    #[test]
    fn report_serializes_status_name() {
        let report = ErrorReport::new(&OperationError::Overloaded, false);
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"{"status":"UNAVAILABLE","message":"executor overloaded, try again later"}"#
        );
    }
}
