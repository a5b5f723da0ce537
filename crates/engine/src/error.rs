use crate::validation::ValidationIssue;
use common::error::DiagnosticMessage;
use dag::DagError;
use serde::Serialize;
use shared_clients::{ErrorClass, PlatformError};
use std::fmt::{Display, Formatter};
use templates::TemplateError;
use thiserror::Error;

/// Run-level failures. Anything here aborts the run without partial results.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no usable external identifier: {context}")]
    Schema { context: DiagnosticMessage },
    #[error("org unreachable: {context}")]
    Connectivity { context: DiagnosticMessage },
    #[error("authentication failed: {context}")]
    Auth {
        context: DiagnosticMessage,
        /// The org needs a fresh OAuth grant before it can be used again.
        reconnect_required: bool,
    },
    #[error("pre-flight validation failed: {context}")]
    Validation {
        context: DiagnosticMessage,
        issues: Vec<ValidationIssue>,
    },
    #[error("invalid configuration: {context}")]
    Configuration { context: DiagnosticMessage },
    #[error("run cancelled: {context}")]
    Cancelled { context: DiagnosticMessage },
    #[error("platform call failed: {context}")]
    Platform {
        context: DiagnosticMessage,
        #[source]
        source: PlatformError,
    },
}

impl EngineError {
    #[track_caller]
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        let errors = issues.iter().filter(|i| i.is_error()).count();
        Self::Validation {
            context: DiagnosticMessage::new(format!(
                "{errors} error(s) among {} finding(s)",
                issues.len()
            )),
            issues,
        }
    }

    #[track_caller]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    pub fn requires_reconnect(&self) -> bool {
        matches!(
            self,
            EngineError::Auth {
                reconnect_required: true,
                ..
            }
        )
    }
}

impl From<PlatformError> for EngineError {
    #[track_caller]
    fn from(err: PlatformError) -> Self {
        let context = DiagnosticMessage::new(err.to_string());
        match err.class() {
            ErrorClass::Auth => EngineError::Auth {
                reconnect_required: err.requires_reconnect(),
                context,
            },
            ErrorClass::Connectivity => EngineError::Connectivity { context },
            _ => EngineError::Platform {
                context,
                source: err,
            },
        }
    }
}

impl From<DagError> for EngineError {
    #[track_caller]
    fn from(err: DagError) -> Self {
        EngineError::configuration(err.to_string())
    }
}

impl From<TemplateError> for EngineError {
    #[track_caller]
    fn from(err: TemplateError) -> Self {
        EngineError::configuration(err.to_string())
    }
}

/// Why a single record did not make it into the target org.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordErrorKind {
    /// A lookup referenced a source record with no target counterpart.
    DependencyUnresolved,
    /// Still retryable when the run stopped.
    TransientLoad,
    /// Rejected by the platform, or retries exhausted.
    FatalLoad,
    /// A required mapping produced no value.
    InvalidRecord,
    /// Never submitted because the run was cancelled.
    Cancelled,
}

impl Display for RecordErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RecordErrorKind::DependencyUnresolved => "dependency_unresolved",
            RecordErrorKind::TransientLoad => "transient_load",
            RecordErrorKind::FatalLoad => "fatal_load",
            RecordErrorKind::InvalidRecord => "invalid_record",
            RecordErrorKind::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordError {
    /// Source record identifier.
    pub record_id: String,
    pub kind: RecordErrorKind,
    /// Platform error code, when there was one.
    pub code: Option<String>,
    pub message: String,
}

impl RecordError {
    pub fn new(record_id: impl Into<String>, kind: RecordErrorKind, message: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            kind,
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: Option<&str>) -> Self {
        self.code = code.map(str::to_string);
        self
    }
}
