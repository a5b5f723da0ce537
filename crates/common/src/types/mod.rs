pub mod org;
pub mod record;
pub mod retry;
pub mod schema;

pub use org::{OrgId, OrgType};
pub use record::{Record, RecordExt, ID_FIELD};
pub use retry::RetryPolicy;
pub use schema::{FieldDescribe, FieldType, ObjectDescribe, PicklistValue};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Severity attached to validation findings and integrity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}
