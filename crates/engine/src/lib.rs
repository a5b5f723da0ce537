//! Template-driven migration of records between two orgs.
//!
//! [`Migrator`] is the entry point: it resolves each object type's
//! external-identifier field, runs the pre-flight [`ValidationEngine`] and
//! hands the run to the [`ExecutionEngine`].

pub mod cloning;
pub mod context;
pub mod error;
pub mod executor;
pub mod external_id;
pub mod mapping;
pub mod migrator;
pub mod registry;
pub mod validation;

#[cfg(test)]
pub(crate) mod fixtures;

pub use cloning::{CloneFailure, CloneFailureKind, CloneResult, CloningService};
pub use context::{ExecutionConfig, ExecutionContext, RunSignal, Selection};
pub use error::{EngineError, RecordError, RecordErrorKind};
pub use executor::{ExecutionEngine, ExecutionResult, ExecutionStatus, StepResult};
pub use external_id::{
    DetectionStrategy, ExternalIdConfig, ExternalIdMap, ExternalIdResolver, ResolvedField,
};
pub use mapping::{MappedRecord, RecordMapping};
pub use migrator::{Migrator, PreparedRun, RunReport, RunRequest};
pub use registry::{Getter, Register, TemplateRegistry};
pub use validation::{CheckKind, ValidationEngine, ValidationIssue, ValidationResult};
