use common::types::{Record, RecordExt, RetryPolicy, Severity, ID_FIELD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

/// Target-field marker standing in for the external-identifier field, which
/// is only known once the orgs' schemas have been resolved.
pub const EXTERNAL_ID_PLACEHOLDER: &str = "@external_id";

fn default_batch_size() -> usize {
    200
}

fn default_external_id_field() -> String {
    EXTERNAL_ID_PLACEHOLDER.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTemplate {
    pub id: String,
    pub name: String,
    pub category: String,
    pub version: String,
    pub complexity: Complexity,
    pub estimated_duration_minutes: u32,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<EtlStep>,
}

impl MigrationTemplate {
    pub fn step(&self, name: &str) -> Option<&EtlStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Object types whose external identifier must be resolved before a run.
    pub fn object_types(&self) -> BTreeSet<String> {
        let mut types = BTreeSet::new();
        for step in &self.steps {
            types.insert(step.extract.object_type.clone());
            types.insert(step.load.object_type.clone());
            for mapping in &step.transform.mappings {
                if let Transformation::Lookup { object_type } = &mapping.transform {
                    types.insert(object_type.clone());
                }
            }
        }
        types
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtlStep {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// An optional step whose records all fail is reported as partial, not failed.
    #[serde(default)]
    pub optional: bool,
    pub extract: ExtractSpec,
    pub transform: TransformSpec,
    pub load: LoadSpec,
    #[serde(default)]
    pub validation: Option<ValidationSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractSpec {
    pub object_type: String,
    /// minijinja template; see [`crate::render::QueryVars`] for the variables.
    pub query: String,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSpec {
    pub mappings: Vec<FieldMapping>,
}

impl TransformSpec {
    pub fn external_id_mappings(&self) -> impl Iterator<Item = &FieldMapping> {
        self.mappings
            .iter()
            .filter(|m| m.target_field == EXTERNAL_ID_PLACEHOLDER)
    }

    pub fn lookups(&self) -> impl Iterator<Item = (&FieldMapping, &str)> {
        self.mappings.iter().filter_map(|m| match &m.transform {
            Transformation::Lookup { object_type } => Some((m, object_type.as_str())),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(default)]
    pub source_field: Option<String>,
    pub target_field: String,
    #[serde(default)]
    pub transform: Transformation,
    #[serde(default)]
    pub required: bool,
}

impl FieldMapping {
    pub fn direct(source: &str, target: &str) -> Self {
        Self {
            source_field: Some(source.to_string()),
            target_field: target.to_string(),
            transform: Transformation::Direct,
            required: false,
        }
    }

    pub fn external_id() -> Self {
        Self {
            required: true,
            ..Self::direct(ID_FIELD, EXTERNAL_ID_PLACEHOLDER)
        }
    }

    pub fn lookup(source: &str, target: &str, object_type: &str) -> Self {
        Self {
            transform: Transformation::Lookup {
                object_type: object_type.to_string(),
            },
            ..Self::direct(source, target)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Closed set of field transformations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transformation {
    #[default]
    Direct,
    /// Replace a source reference with the target id it was migrated to.
    Lookup { object_type: String },
    Constant { value: Json },
    Computed { function: ComputedFn },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "fn", rename_all = "snake_case")]
pub enum ComputedFn {
    Concat {
        fields: Vec<String>,
        #[serde(default)]
        separator: String,
    },
    Upper {
        field: String,
    },
    Lower {
        field: String,
    },
    Trim {
        field: String,
    },
    /// First non-empty value among `fields`.
    Coalesce {
        fields: Vec<String>,
    },
}

impl ComputedFn {
    pub fn evaluate(&self, record: &Record) -> Json {
        match self {
            ComputedFn::Concat { fields, separator } => {
                let parts = fields
                    .iter()
                    .filter_map(|f| record.text_field(f))
                    .filter(|v| !v.is_empty())
                    .collect::<Vec<String>>();
                if parts.is_empty() {
                    Json::Null
                } else {
                    Json::String(parts.join(separator))
                }
            }
            ComputedFn::Upper { field } => record
                .text_field(field)
                .map(|v| Json::String(v.to_uppercase()))
                .unwrap_or(Json::Null),
            ComputedFn::Lower { field } => record
                .text_field(field)
                .map(|v| Json::String(v.to_lowercase()))
                .unwrap_or(Json::Null),
            ComputedFn::Trim { field } => record
                .text_field(field)
                .map(|v| Json::String(v.trim().to_string()))
                .unwrap_or(Json::Null),
            ComputedFn::Coalesce { fields } => fields
                .iter()
                .filter_map(|f| record.get(f))
                .find(|v| !is_blank(v))
                .cloned()
                .unwrap_or(Json::Null),
        }
    }
}

pub fn is_blank(value: &Json) -> bool {
    match value {
        Json::Null => true,
        Json::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOperation {
    Insert,
    Update,
    Upsert,
}

impl Display for LoadOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadOperation::Insert => write!(f, "insert"),
            LoadOperation::Update => write!(f, "update"),
            LoadOperation::Upsert => write!(f, "upsert"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSpec {
    pub object_type: String,
    pub operation: LoadOperation,
    #[serde(default = "default_external_id_field")]
    pub external_id_field: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationSpec {
    #[serde(default)]
    pub integrity: Vec<IntegrityCheck>,
    #[serde(default)]
    pub dependencies: Vec<DependencyCheck>,
    #[serde(default)]
    pub picklists: Vec<PicklistCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    pub name: String,
    pub predicate: IntegrityPredicate,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum IntegrityPredicate {
    Required { field: String },
    MaxLength { field: String, max: usize },
    Pattern { field: String, pattern: String },
}

impl IntegrityPredicate {
    pub fn field(&self) -> &str {
        match self {
            IntegrityPredicate::Required { field }
            | IntegrityPredicate::MaxLength { field, .. }
            | IntegrityPredicate::Pattern { field, .. } => field,
        }
    }

    /// `Err` carries a human readable reason. Absent values only fail `Required`.
    pub fn evaluate(&self, record: &Record) -> Result<(), String> {
        match self {
            IntegrityPredicate::Required { field } => match record.get(field) {
                Some(v) if !is_blank(v) => Ok(()),
                _ => Err(format!("'{field}' is required but empty")),
            },
            IntegrityPredicate::MaxLength { field, max } => match record.text_field(field) {
                Some(v) if v.chars().count() > *max => Err(format!(
                    "'{field}' is {} characters long, limit is {max}",
                    v.chars().count()
                )),
                _ => Ok(()),
            },
            IntegrityPredicate::Pattern { field, pattern } => {
                let re = Regex::new(pattern)
                    .map_err(|e| format!("pattern for '{field}' does not compile: {e}"))?;
                match record.text_field(field) {
                    Some(v) if !re.is_match(&v) => {
                        Err(format!("'{field}' value '{v}' does not match {pattern}"))
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheck {
    /// Object type the reference points at.
    pub object_type: String,
    /// Reference field on the step's own records.
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicklistCheck {
    pub field: String,
    /// Compare against the target org's live values; otherwise the source org's.
    #[serde(default = "default_true")]
    pub validate_against_target: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Json) -> Record {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn computed_functions_are_pure_over_the_record() {
        let r = record(json!({"First": " Ada ", "Last": "Lovelace", "Nick": ""}));

        let concat = ComputedFn::Concat {
            fields: vec!["Last".into(), "Missing".into(), "First".into()],
            separator: ", ".into(),
        };
        assert_eq!(concat.evaluate(&r), json!("Lovelace,  Ada "));
        assert_eq!(
            ComputedFn::Trim { field: "First".into() }.evaluate(&r),
            json!("Ada")
        );
        assert_eq!(
            ComputedFn::Upper { field: "Last".into() }.evaluate(&r),
            json!("LOVELACE")
        );
        assert_eq!(
            ComputedFn::Coalesce {
                fields: vec!["Nick".into(), "Last".into()]
            }
            .evaluate(&r),
            json!("Lovelace")
        );
        assert_eq!(
            ComputedFn::Lower { field: "Missing".into() }.evaluate(&r),
            Json::Null
        );
    }

    #[test]
    fn integrity_predicates_report_reasons() {
        let r = record(json!({"Name": "Acme", "Email": "not-an-email", "Blank": "  "}));

        assert!(IntegrityPredicate::Required { field: "Name".into() }
            .evaluate(&r)
            .is_ok());
        assert!(IntegrityPredicate::Required { field: "Blank".into() }
            .evaluate(&r)
            .is_err());
        assert!(IntegrityPredicate::MaxLength {
            field: "Name".into(),
            max: 3
        }
        .evaluate(&r)
        .is_err());
        let err = IntegrityPredicate::Pattern {
            field: "Email".into(),
            pattern: r"^[^@]+@[^@]+$".into(),
        }
        .evaluate(&r)
        .expect_err("pattern mismatch");
        assert!(err.contains("not-an-email"));
        assert!(IntegrityPredicate::Pattern {
            field: "Missing".into(),
            pattern: "x".into(),
        }
        .evaluate(&r)
        .is_ok());
    }

    #[test]
    fn mappings_deserialize_with_tagged_transformations() {
        let spec: TransformSpec = serde_yaml::from_str(
            r#"
mappings:
  - { source_field: Id, target_field: "@external_id", required: true }
  - { source_field: AccountId, target_field: AccountId, transform: { kind: lookup, object_type: Account } }
  - { target_field: LeadSource, transform: { kind: constant, value: Migration } }
  - target_field: Description
    transform: { kind: computed, function: { fn: coalesce, fields: [Description, Name] } }
"#,
        )
        .expect("spec");

        assert_eq!(spec.external_id_mappings().count(), 1);
        let lookups: Vec<&str> = spec.lookups().map(|(_, t)| t).collect();
        assert_eq!(lookups, vec!["Account"]);
        assert_eq!(
            spec.mappings[2].transform,
            Transformation::Constant {
                value: json!("Migration")
            }
        );
        assert_eq!(spec.mappings[0].transform, Transformation::Direct);
    }
}
