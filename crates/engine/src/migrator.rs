use crate::cloning::{CloneResult, CloningService};
use crate::context::{ExecutionConfig, ExecutionContext, RunSignal, Selection};
use crate::error::EngineError;
use crate::executor::{ExecutionEngine, ExecutionResult};
use crate::external_id::ExternalIdResolver;
use crate::registry::{Getter, TemplateRegistry};
use crate::validation::{ValidationEngine, ValidationResult};
use common::config::components::execution::ExecutionSettings;
use common::config::components::external_id::ExternalIdSettings;
use common::types::OrgId;
use log::{info, warn};
use serde::Serialize;
use shared_clients::RateLimitedClient;
use std::sync::Arc;

/// What the caller wants migrated.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub template_id: String,
    pub source: OrgId,
    pub target: OrgId,
    pub selected: Selection,
    /// Falls back to the configured execution settings.
    pub config: Option<ExecutionConfig>,
    pub signal: RunSignal,
}

impl RunRequest {
    pub fn new(
        template_id: impl Into<String>,
        source: impl Into<OrgId>,
        target: impl Into<OrgId>,
        selected: Selection,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            source: source.into(),
            target: target.into(),
            selected,
            config: None,
            signal: RunSignal::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_signal(mut self, signal: RunSignal) -> Self {
        self.signal = signal;
        self
    }
}

/// A run whose template and join keys are resolved. The resolver keeps the
/// schemas it described for the validation pass.
pub struct PreparedRun {
    pub context: ExecutionContext,
    resolver: ExternalIdResolver,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub validation: ValidationResult,
    pub execution: ExecutionResult,
}

pub struct Migrator {
    client: Arc<RateLimitedClient>,
    registry: TemplateRegistry,
    execution: ExecutionSettings,
    external_id: ExternalIdSettings,
}

impl Migrator {
    pub fn new(
        client: Arc<RateLimitedClient>,
        registry: TemplateRegistry,
        execution: ExecutionSettings,
        external_id: ExternalIdSettings,
    ) -> Self {
        Self {
            client,
            registry,
            execution,
            external_id,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    fn resolver(&self) -> ExternalIdResolver {
        ExternalIdResolver::new(Arc::clone(&self.client), self.external_id.clone())
    }

    pub async fn prepare(&self, request: RunRequest) -> Result<PreparedRun, EngineError> {
        let template = self.registry.get(&request.template_id)?;
        if request.source == request.target {
            return Err(EngineError::configuration(format!(
                "source and target are both org {}",
                request.source
            )));
        }
        let resolver = self.resolver();
        let external_ids = resolver
            .resolve_template(&template, &request.source, &request.target)
            .await?;
        let config = request
            .config
            .unwrap_or_else(|| ExecutionConfig::from(&self.execution));
        let context = ExecutionContext::new(
            request.source,
            request.target,
            template,
            request.selected,
            external_ids,
            config,
        )
        .with_signal(request.signal);
        Ok(PreparedRun { context, resolver })
    }

    pub async fn validate(&self, prepared: &PreparedRun) -> ValidationResult {
        let ctx = &prepared.context;
        ValidationEngine::new(
            Arc::clone(&self.client),
            self.execution.large_selection_threshold,
        )
        .validate(
            &ctx.template,
            &ctx.source,
            &ctx.target,
            &ctx.selected_ids,
            &prepared.resolver,
        )
        .await
    }

    pub async fn execute(&self, prepared: &PreparedRun) -> Result<ExecutionResult, EngineError> {
        ExecutionEngine::new(Arc::clone(&self.client))
            .execute_template(&prepared.context)
            .await
    }

    /// Prepares, validates and executes. Any error-severity finding stops the
    /// run before the first write.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, EngineError> {
        let prepared = self.prepare(request).await?;
        let validation = self.validate(&prepared).await;
        if !validation.is_valid {
            warn!(
                "run={} refused, {} validation error(s)",
                prepared.context.run_id,
                validation.errors().count()
            );
            return Err(EngineError::validation(validation.issues));
        }
        let execution = self.execute(&prepared).await?;
        info!(
            "run={} finished status={:?} succeeded={} failed={}",
            execution.run_id,
            execution.status,
            execution.successful_records,
            execution.failed_records
        );
        Ok(RunReport {
            validation,
            execution,
        })
    }

    pub async fn clone_record(
        &self,
        source: &OrgId,
        target: &OrgId,
        record_id: &str,
        object_type: &str,
    ) -> CloneResult {
        CloningService::new(
            Arc::clone(&self.client),
            self.resolver(),
            self.execution.retry.clone(),
        )
        .clone_record(source, target, record_id, object_type)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionStatus;
    use crate::fixtures::{builtin, harness, selection, Harness, SOURCE, TARGET};
    use crate::validation::CheckKind;
    use matches::assert_matches;
    use serde_json::json;
    use test_utils::{record, schema, PlatformCall};

    fn migrator(h: &Harness) -> Migrator {
        let registry = TemplateRegistry::with_templates([
            builtin("account-contact"),
            builtin("opportunity-pipeline"),
        ])
        .expect("registry");
        Migrator::new(
            h.client.clone(),
            registry,
            ExecutionSettings::default(),
            ExternalIdSettings::default(),
        )
    }

    #[tokio::test]
    async fn validated_run_executes() {
        let h = harness();
        h.seed_accounts(&[("SA1", Some("Acme"))]);
        h.platform.insert_records(
            SOURCE,
            "Opportunity",
            vec![record(json!({
                "Id": "SO1", "Name": "Renewal", "StageName": "Prospecting",
                "CloseDate": "2026-12-01", "AccountId": "SA1", "NextStep": "Call back"
            }))],
        );

        let report = migrator(&h)
            .run(RunRequest::new(
                "opportunity-pipeline",
                SOURCE,
                TARGET,
                selection("Account", &["SA1"]),
            ))
            .await
            .expect("run");

        assert!(report.validation.is_valid);
        assert_eq!(report.execution.status, ExecutionStatus::Success);
        let opportunities = h.platform.records(TARGET, "Opportunity");
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].get("Description"), Some(&json!("Call back")));
        assert_eq!(opportunities[0].get("LeadSource"), Some(&json!("Org Migration")));
    }

    #[tokio::test]
    async fn validation_errors_prevent_any_write() {
        let h = harness();
        h.platform.insert_records(
            SOURCE,
            "Account",
            vec![record(json!({"Id": "SA1", "Name": "Acme", "Industry": "Mining"}))],
        );

        let err = migrator(&h)
            .run(RunRequest::new(
                "account-contact",
                SOURCE,
                TARGET,
                selection("Account", &["SA1"]),
            ))
            .await
            .expect_err("invalid picklist value");

        match err {
            EngineError::Validation { issues, .. } => {
                assert!(issues.iter().any(|i| i.check == CheckKind::Picklist));
            }
            other => panic!("expected a validation error, got {other}"),
        }
        assert!(h.platform.load_calls().is_empty());
    }

    #[tokio::test]
    async fn schema_gap_aborts_before_extraction() {
        let h = harness();
        h.platform.add_describe(TARGET, schema::contact(&[]));
        let err = migrator(&h)
            .prepare(RunRequest::new(
                "account-contact",
                SOURCE,
                TARGET,
                selection("Account", &["SA1"]),
            ))
            .await
            .err()
            .expect("schema error");
        assert_matches!(err, EngineError::Schema { .. });
        assert!(!h
            .platform
            .calls()
            .iter()
            .any(|c| matches!(c, PlatformCall::Query { .. })));
    }

    #[tokio::test]
    async fn unknown_template_and_same_org_are_configuration_errors() {
        let h = harness();
        let migrator = migrator(&h);
        assert_matches!(
            migrator
                .prepare(RunRequest::new("nope", SOURCE, TARGET, Selection::new()))
                .await
                .err(),
            Some(EngineError::Configuration { .. })
        );
        assert_matches!(
            migrator
                .prepare(RunRequest::new("account-contact", SOURCE, SOURCE, Selection::new()))
                .await
                .err(),
            Some(EngineError::Configuration { .. })
        );
        assert!(h.platform.calls().is_empty());
    }
}
