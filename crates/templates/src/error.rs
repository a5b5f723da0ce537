use common::error::diagnostics::DiagnosticMessage;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template already registered: {context}")]
    Duplicate { context: DiagnosticMessage },
    #[error("template lookup failed: {context}")]
    NotFound { context: DiagnosticMessage },
    #[error("invalid template: {context}")]
    Invalid { context: DiagnosticMessage },
    #[error("query render failed: {context}")]
    Render {
        context: DiagnosticMessage,
        #[source]
        source: minijinja::Error,
    },
    #[error("serde yaml error: {context}")]
    SerdeYaml {
        context: DiagnosticMessage,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("I/O error: {context}")]
    Io {
        context: DiagnosticMessage,
        #[source]
        source: io::Error,
    },
}

impl TemplateError {
    #[track_caller]
    pub fn duplicate(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::Duplicate {
            context: DiagnosticMessage::new(format!("Template '{id}' is already registered")),
        }
    }

    #[track_caller]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            context: DiagnosticMessage::new(message.into()),
        }
    }

    #[track_caller]
    pub fn invalid(template: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            context: DiagnosticMessage::new(format!("{template}: {}", message.into())),
        }
    }
}

impl From<minijinja::Error> for TemplateError {
    #[track_caller]
    fn from(err: minijinja::Error) -> Self {
        TemplateError::Render {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<serde_yaml::Error> for TemplateError {
    #[track_caller]
    fn from(err: serde_yaml::Error) -> Self {
        TemplateError::SerdeYaml {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}

impl From<io::Error> for TemplateError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        TemplateError::Io {
            context: DiagnosticMessage::new(err.to_string()),
            source: err,
        }
    }
}
