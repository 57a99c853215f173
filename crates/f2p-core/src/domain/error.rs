//! Domain-level error taxonomy for Fail2Pass evaluation.

use serde::{Deserialize, Serialize};

/// Fail2Pass domain errors.
///
/// None of these abort a run: the orchestrator folds every variant into the
/// owning instance's report as an [`ErrorRecord`].
#[derive(Debug, thiserror::Error)]
pub enum F2pError {
    #[error("build error: {0}")]
    Build(String),

    #[error("apply error: {0}")]
    Apply(String),

    #[error("execution timed out after {timeout_secs}s")]
    ExecutionTimeout { timeout_secs: u64 },

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("classification error: {0}")]
    Classification(String),

    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl F2pError {
    /// Stable kind tag used in persisted reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            F2pError::Build(_) => ErrorKind::BuildError,
            F2pError::Apply(_) => ErrorKind::ApplyError,
            F2pError::ExecutionTimeout { .. } => ErrorKind::ExecutionTimeout,
            F2pError::ParseFailure(_) => ErrorKind::ParseFailure,
            F2pError::Classification(_) => ErrorKind::ClassificationError,
            F2pError::InvalidInstance(_) => ErrorKind::InvalidInstance,
            F2pError::Serialization(_) | F2pError::Io(_) => ErrorKind::Internal,
        }
    }

    /// Convert into a report record.
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Serializable error category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BuildError,
    ApplyError,
    ExecutionTimeout,
    ParseFailure,
    ClassificationError,
    InvalidInstance,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BuildError => "build_error",
            ErrorKind::ApplyError => "apply_error",
            ErrorKind::ExecutionTimeout => "execution_timeout",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::ClassificationError => "classification_error",
            ErrorKind::InvalidInstance => "invalid_instance",
            ErrorKind::Internal => "internal",
        }
    }
}

/// One diagnostic attached to an instance report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Result type for Fail2Pass domain operations.
pub type Result<T> = std::result::Result<T, F2pError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f2p_error_display() {
        let err = F2pError::Build("docker build exited with 1".to_string());
        assert!(err.to_string().contains("build error"));

        let err = F2pError::ExecutionTimeout { timeout_secs: 30 };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(
            F2pError::Apply("hunk #1 failed".into()).kind(),
            ErrorKind::ApplyError
        );
        assert_eq!(
            F2pError::Classification("empty id".into()).kind(),
            ErrorKind::ClassificationError
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(F2pError::from(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_error_record_serializes_snake_case_kind() {
        let record = F2pError::ParseFailure("no report".into()).to_record();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "parse_failure");
        assert!(json["message"].as_str().unwrap().contains("no report"));
    }
}
