use common::error::DiagnosticMessage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("Found duplicated declaration of step: {context}")]
    DuplicateNode { context: DiagnosticMessage },
    #[error("Expected dependency not found: {context}")]
    MissingDependency { context: DiagnosticMessage },
    #[error("Found cyclic step dependencies: {}", .steps.join(" -> "))]
    CycleDetected {
        steps: Vec<String>,
        context: DiagnosticMessage,
    },
}

impl DagError {
    #[track_caller]
    pub fn duplicate_node(step: impl Into<String>) -> Self {
        Self::DuplicateNode {
            context: DiagnosticMessage::new(step.into()),
        }
    }

    #[track_caller]
    pub fn missing_dependency(step: &str, dependency: &str) -> Self {
        Self::MissingDependency {
            context: DiagnosticMessage::new(format!(
                "step '{step}' depends on '{dependency}' which is not declared"
            )),
        }
    }

    #[track_caller]
    pub fn cycle_detected(steps: Vec<String>) -> Self {
        Self::CycleDetected {
            context: DiagnosticMessage::new(format!("cycle between {steps:?}")),
            steps,
        }
    }
}

pub type DagResult<T> = Result<T, DagError>;
