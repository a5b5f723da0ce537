pub mod diagnostics;
pub use crate::config::error::ConfigError;
pub use diagnostics::DiagnosticMessage;

use std::{error::Error as StdError, fmt::Debug};
use thiserror::Error;

/// Top-level error surfaced by the `migrator` binary.
#[derive(Debug, Error)]
pub enum MigratorError {
    #[error("initialisation failed: {context}")]
    Init {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("validation failed: {context}")]
    Validate {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("migration run failed: {context}")]
    Run {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
    #[error("clone failed: {context}")]
    Clone {
        context: DiagnosticMessage,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

#[track_caller]
fn boxed<E>(err: E) -> (DiagnosticMessage, Option<Box<dyn StdError + Send + Sync>>)
where
    E: StdError + Send + Sync + 'static,
{
    (DiagnosticMessage::new(err.to_string()), Some(Box::new(err)))
}

impl MigratorError {
    #[track_caller]
    pub fn init<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let (context, source) = boxed(err);
        Self::Init { context, source }
    }

    #[track_caller]
    pub fn init_msg(message: impl Into<String>) -> Self {
        Self::Init {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn validate<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let (context, source) = boxed(err);
        Self::Validate { context, source }
    }

    #[track_caller]
    pub fn validate_msg(message: impl Into<String>) -> Self {
        Self::Validate {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn run<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        let (context, source) = boxed(err);
        Self::Run { context, source }
    }

    #[track_caller]
    pub fn run_msg(message: impl Into<String>) -> Self {
        Self::Run {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }

    #[track_caller]
    pub fn clone_failed(message: impl Into<String>) -> Self {
        Self::Clone {
            context: DiagnosticMessage::new(message.into()),
            source: None,
        }
    }
}
