use common::types::{OrgId, Record};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use templates::LoadOperation;

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub total_size: usize,
    pub done: bool,
    #[serde(default)]
    pub next_records_url: Option<String>,
    #[serde(default)]
    pub records: Vec<Record>,
}

/// Submission path for a load call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Collection endpoint, many rows per request.
    Bulk,
    /// One request per row.
    PerRecord,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub operation: LoadOperation,
    pub object_type: String,
    /// Key field for upserts. Ignored by insert and update.
    pub external_id_field: Option<String>,
    pub rows: Vec<Record>,
    pub mode: LoadMode,
}

impl LoadRequest {
    /// Same request restricted to `rows`.
    pub fn with_rows(&self, rows: Vec<Record>) -> Self {
        Self {
            operation: self.operation,
            object_type: self.object_type.clone(),
            external_id_field: self.external_id_field.clone(),
            rows,
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    #[serde(rename = "statusCode", alias = "errorCode")]
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Outcome of one row, in request order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub success: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub errors: Vec<RowError>,
}

impl RowOutcome {
    pub fn ok(id: impl Into<String>, created: bool) -> Self {
        Self {
            success: true,
            id: Some(id.into()),
            created,
            errors: Vec::new(),
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            id: None,
            created: false,
            errors: vec![RowError {
                code: code.into(),
                message: message.into(),
                fields: Vec::new(),
            }],
        }
    }

    pub fn first_code(&self) -> Option<&str> {
        self.errors.first().map(|e| e.code.as_str())
    }

    pub fn error_text(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<String>>()
            .join("; ")
    }
}

/// Credentials for one authenticated call.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub org_id: OrgId,
    pub instance_url: String,
    pub access_token: String,
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("org_id", &self.org_id)
            .field("instance_url", &self.instance_url)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

fn default_expires_in() -> u64 {
    7_200
}

#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub instance_url: String,
    /// Seconds; the platform omits it for the default two hour session.
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

impl Debug for TokenResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("instance_url", &self.instance_url)
            .field("expires_in", &self.expires_in)
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgIdentity {
    pub organization_id: String,
    pub user_id: String,
    #[serde(default)]
    pub preferred_username: Option<String>,
}
