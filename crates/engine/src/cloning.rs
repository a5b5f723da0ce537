use crate::context::RunSignal;
use crate::error::EngineError;
use crate::executor::load::{LoadPlan, PendingRow};
use crate::external_id::ExternalIdResolver;
use common::types::{FieldType, OrgId, Record, RetryPolicy, ID_FIELD};
use log::{info, warn};
use serde::Serialize;
use shared_clients::{LoadMode, RateLimitedClient};
use std::sync::Arc;
use templates::{is_blank, quote_list, LoadOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneFailureKind {
    /// No usable external-identifier field on one side.
    Schema,
    NotFound,
    Load,
    Connectivity,
    Auth,
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneFailure {
    pub kind: CloneFailureKind,
    pub message: String,
}

impl From<EngineError> for CloneFailure {
    fn from(err: EngineError) -> Self {
        let kind = match &err {
            EngineError::Schema { .. } => CloneFailureKind::Schema,
            EngineError::Connectivity { .. } => CloneFailureKind::Connectivity,
            EngineError::Auth { .. } => CloneFailureKind::Auth,
            _ => CloneFailureKind::Platform,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneResult {
    pub success: bool,
    pub target_record_id: Option<String>,
    /// Value written to the target's key field: the source record id.
    pub external_id: Option<String>,
    pub error: Option<CloneFailure>,
}

impl CloneResult {
    fn failed(error: impl Into<CloneFailure>) -> Self {
        Self {
            success: false,
            target_record_id: None,
            external_id: None,
            error: Some(error.into()),
        }
    }
}

/// Copies one record between orgs outside a template run. Every createable
/// field both orgs share is copied, except identifiers and references.
pub struct CloningService {
    client: Arc<RateLimitedClient>,
    resolver: ExternalIdResolver,
    retry: RetryPolicy,
}

impl CloningService {
    pub fn new(
        client: Arc<RateLimitedClient>,
        resolver: ExternalIdResolver,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            resolver,
            retry,
        }
    }

    pub async fn clone_record(
        &self,
        source: &OrgId,
        target: &OrgId,
        record_id: &str,
        object_type: &str,
    ) -> CloneResult {
        match self.try_clone(source, target, record_id, object_type).await {
            Ok(result) => result,
            Err(err) => {
                warn!("clone object={object_type} record={record_id} failed: {err}");
                CloneResult::failed(err)
            }
        }
    }

    async fn try_clone(
        &self,
        source: &OrgId,
        target: &OrgId,
        record_id: &str,
        object_type: &str,
    ) -> Result<CloneResult, EngineError> {
        let keys = self.resolver.reconcile(source, target, object_type).await?;
        let source_schema = self.resolver.describe(source, object_type).await?;
        let target_schema = self.resolver.describe(target, object_type).await?;

        let fields: Vec<&str> = source_schema
            .fields
            .iter()
            .filter(|f| f.createable && f.name != ID_FIELD)
            .filter(|f| !matches!(f.field_type, FieldType::Id | FieldType::Reference))
            .filter(|f| !f.name.eq_ignore_ascii_case(keys.extract_field()))
            .filter(|f| target_schema.field(&f.name).is_some_and(|t| t.createable))
            .map(|f| f.name.as_str())
            .collect();
        let mut projection = vec![ID_FIELD];
        projection.extend(fields.iter().copied());
        let soql = format!(
            "SELECT {} FROM {object_type} WHERE Id IN ({})",
            projection.join(", "),
            quote_list(&[record_id])
        );
        let Some(record) = self.client.query(source, &soql).await?.into_iter().next() else {
            return Ok(CloneResult::failed(CloneFailure {
                kind: CloneFailureKind::NotFound,
                message: format!("{object_type} {record_id} does not exist in org {source}"),
            }));
        };

        let mut row = Record::new();
        for field in fields {
            if let Some(value) = record.get(field).filter(|v| !is_blank(v)) {
                row.insert(field.to_string(), value.clone());
            }
        }
        row.insert(keys.load_field().to_string(), record_id.into());

        let signal = RunSignal::default();
        let plan = LoadPlan {
            client: &self.client,
            org: target,
            object_type,
            operation: LoadOperation::Upsert,
            external_id_field: Some(keys.load_field()),
            batch_size: 1,
            mode: LoadMode::PerRecord,
            max_concurrency: 1,
            retry: &self.retry,
            signal: &signal,
        };
        let mut report = plan
            .run(vec![PendingRow {
                source_id: record_id.to_string(),
                row,
            }])
            .await?;

        if let Some((_, target_id)) = report.loaded.pop() {
            info!("cloned object={object_type} source={record_id} target={target_id}");
            return Ok(CloneResult {
                success: true,
                target_record_id: Some(target_id),
                external_id: Some(record_id.to_string()),
                error: None,
            });
        }
        let message = report
            .errors
            .into_iter()
            .map(|e| e.message)
            .collect::<Vec<String>>()
            .join("; ");
        Ok(CloneResult::failed(CloneFailure {
            kind: CloneFailureKind::Load,
            message,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{harness, Harness, EXT, SOURCE, TARGET};
    use common::config::components::external_id::ExternalIdSettings;
    use serde_json::json;
    use test_utils::{record, schema, PlatformCall};

    fn service(h: &Harness) -> CloningService {
        CloningService::new(
            h.client.clone(),
            ExternalIdResolver::new(h.client.clone(), ExternalIdSettings::default()),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn copies_shared_fields_and_keys_by_source_id() {
        let h = harness();
        h.platform.insert_records(
            SOURCE,
            "Account",
            vec![record(json!({
                "Id": "SA1", "Name": "Acme", "Industry": "Energy",
                "OwnerId": "005S1", "External_ID__c": "stale"
            }))],
        );

        let result = service(&h)
            .clone_record(&h.source(), &h.target(), "SA1", "Account")
            .await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.external_id.as_deref(), Some("SA1"));
        let cloned = h.platform.records(TARGET, "Account");
        assert_eq!(cloned.len(), 1);
        assert_eq!(cloned[0].get("Name"), Some(&json!("Acme")));
        assert_eq!(cloned[0].get(EXT), Some(&json!("SA1")));
        assert!(cloned[0].get("OwnerId").is_none());
        assert_eq!(
            result.target_record_id.as_deref(),
            cloned[0].get("Id").and_then(|v| v.as_str())
        );
    }

    #[tokio::test]
    async fn cloning_twice_updates_the_same_target_record() {
        let h = harness();
        h.seed_accounts(&[("SA1", Some("Acme"))]);
        let service = service(&h);
        let first = service
            .clone_record(&h.source(), &h.target(), "SA1", "Account")
            .await;
        let second = service
            .clone_record(&h.source(), &h.target(), "SA1", "Account")
            .await;
        assert_eq!(first.target_record_id, second.target_record_id);
        assert_eq!(h.platform.records(TARGET, "Account").len(), 1);
    }

    #[tokio::test]
    async fn missing_target_key_field_fails_without_a_load() {
        let h = harness();
        h.platform.add_describe(TARGET, schema::account(&[]));
        h.seed_accounts(&[("SA1", Some("Acme"))]);

        let result = service(&h)
            .clone_record(&h.source(), &h.target(), "SA1", "Account")
            .await;

        assert!(!result.success);
        assert_eq!(
            result.error.as_ref().map(|e| e.kind),
            Some(CloneFailureKind::Schema)
        );
        assert!(h.platform.load_calls().is_empty());
        assert!(!h
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Query { .. })));
    }

    #[tokio::test]
    async fn unknown_record_is_not_found() {
        let h = harness();
        let result = service(&h)
            .clone_record(&h.source(), &h.target(), "SA404", "Account")
            .await;
        assert_eq!(
            result.error.map(|e| e.kind),
            Some(CloneFailureKind::NotFound)
        );
    }

    #[tokio::test]
    async fn rejected_row_is_a_load_failure() {
        let h = harness();
        h.seed_accounts(&[("SA1", None)]);
        let result = service(&h)
            .clone_record(&h.source(), &h.target(), "SA1", "Account")
            .await;
        let error = result.error.expect("load failure");
        assert_eq!(error.kind, CloneFailureKind::Load);
        assert!(error.message.contains("REQUIRED_FIELD_MISSING"));
    }
}
