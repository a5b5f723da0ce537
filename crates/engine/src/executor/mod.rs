pub mod load;
pub mod transform;

use crate::context::ExecutionContext;
use crate::error::{EngineError, RecordError};
use crate::mapping::{MappedRecord, RecordMapping};
use chrono::{DateTime, Utc};
use common::types::RecordExt;
use dag::StepDag;
use load::{LoadPlan, PendingRow};
use log::{info, warn};
use serde::Serialize;
use shared_clients::{ErrorClass, LoadMode, RateLimitedClient};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use templates::{render_extract_query, EtlStep, LoadOperation, QueryVars};
use transform::transform_record;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub name: String,
    pub object_type: String,
    pub status: ExecutionStatus,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<RecordError>,
    /// Step-level failure, e.g. the extraction query was rejected.
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StepResult {
    fn new(step: &EtlStep) -> Self {
        Self {
            name: step.name.clone(),
            object_type: step.load.object_type.clone(),
            status: ExecutionStatus::Success,
            total: 0,
            succeeded: 0,
            failed: 0,
            errors: Vec::new(),
            error: None,
            duration_ms: 0,
        }
    }

    /// Failed only when nothing succeeded and the step is not optional.
    fn finish(mut self, step: &EtlStep, started: Instant) -> Self {
        self.failed = self.errors.len();
        let nothing_loaded = self.succeeded == 0 && (self.failed > 0 || self.error.is_some());
        self.status = if self.failed == 0 && self.error.is_none() {
            ExecutionStatus::Success
        } else if nothing_loaded && !step.optional {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Partial
        };
        self.duration_ms = elapsed_ms(started);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub run_id: Uuid,
    pub template_id: String,
    pub source: String,
    pub target: String,
    pub status: ExecutionStatus,
    pub total_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
    pub steps: Vec<StepResult>,
    pub mapping: RecordMapping,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub cancelled: bool,
    /// A non-successful step stopped the run because partial success is disabled.
    pub halted: bool,
}

impl ExecutionResult {
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.name == name)
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Runs a template's steps in dependency order against one org pair.
pub struct ExecutionEngine {
    client: Arc<RateLimitedClient>,
}

impl ExecutionEngine {
    pub fn new(client: Arc<RateLimitedClient>) -> Self {
        Self { client }
    }

    /// Configuration and schema problems are reported before the first
    /// platform call. Per-record failures never abort the run; a rejected
    /// session that cannot be refreshed does.
    pub async fn execute_template(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionResult, EngineError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let template = Arc::clone(&ctx.template);
        let dag = StepDag::build(&template)?;
        let order = dag.execution_order()?;
        for step in &order {
            ctx.external_ids.get(&step.load.object_type)?;
        }
        info!(
            "run={} template={} source={} target={} steps={}",
            ctx.run_id,
            template.id,
            ctx.source,
            ctx.target,
            order.len()
        );

        let mut mapping = RecordMapping::default();
        let mut steps = Vec::with_capacity(order.len());
        let mut halted = false;
        for step in &order {
            if ctx.signal.is_cancelled() {
                warn!("run={} cancelled before step={}", ctx.run_id, step.name);
                break;
            }
            let parents = dag.dependencies(&step.name);
            let result = self.run_step(ctx, step, &parents, &mut mapping).await?;
            info!(
                "run={} step={} status={:?} succeeded={} failed={}",
                ctx.run_id, result.name, result.status, result.succeeded, result.failed
            );
            let stop = !ctx.config.allow_partial_success && result.status != ExecutionStatus::Success;
            steps.push(result);
            if stop {
                warn!("run={} halted after step={}", ctx.run_id, step.name);
                halted = true;
                break;
            }
        }

        let cancelled = ctx.signal.is_cancelled() && !halted;
        let total_records = steps.iter().map(|s| s.total).sum();
        let successful_records = steps.iter().map(|s| s.succeeded).sum::<usize>();
        let failed_records = steps.iter().map(|s| s.failed).sum();
        let complete = steps.len() == order.len()
            && steps.iter().all(|s| s.status == ExecutionStatus::Success)
            && !cancelled;
        let status = if complete {
            ExecutionStatus::Success
        } else if successful_records > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        };

        Ok(ExecutionResult {
            run_id: ctx.run_id,
            template_id: template.id.clone(),
            source: ctx.source.to_string(),
            target: ctx.target.to_string(),
            status,
            total_records,
            successful_records,
            failed_records,
            steps,
            mapping,
            started_at,
            duration_ms: elapsed_ms(started),
            cancelled,
            halted,
        })
    }

    async fn run_step(
        &self,
        ctx: &ExecutionContext,
        step: &EtlStep,
        parents: &[&EtlStep],
        mapping: &mut RecordMapping,
    ) -> Result<StepResult, EngineError> {
        let started = Instant::now();
        let mut result = StepResult::new(step);
        let keys = ctx.external_ids.get(&step.load.object_type)?;

        let parent_ids: BTreeSet<String> = parents
            .iter()
            .flat_map(|p| mapping.source_ids_for_step(&p.name))
            .collect();
        let vars = QueryVars {
            external_id_field: keys.extract_field().to_string(),
            ids: ctx.selected_for(&step.extract.object_type).to_vec(),
            parent_ids: parent_ids.into_iter().collect(),
        };
        if vars.effective_ids().is_empty() {
            info!("run={} step={} has no records to extract", ctx.run_id, step.name);
            return Ok(result.finish(step, started));
        }

        let soql = render_extract_query(&step.extract, &vars)?;
        let records = match self.client.query(&ctx.source, &soql).await {
            Ok(records) => records,
            Err(err) if err.class() == ErrorClass::Auth => return Err(err.into()),
            Err(err) => {
                warn!("run={} step={} extraction failed: {err}", ctx.run_id, step.name);
                result.error = Some(format!("extraction failed: {err}"));
                return Ok(result.finish(step, started));
            }
        };
        result.total = records.len();

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            match transform_record(record, &step.transform, keys.load_field(), mapping) {
                Ok(row) => rows.push(PendingRow {
                    source_id: record.id().unwrap_or_default().to_string(),
                    row,
                }),
                Err(err) => result.errors.push(err),
            }
        }

        let mode = if rows.len() > ctx.config.bulk_threshold {
            LoadMode::Bulk
        } else {
            LoadMode::PerRecord
        };
        let plan = LoadPlan {
            client: &self.client,
            org: &ctx.target,
            object_type: &step.load.object_type,
            operation: step.load.operation,
            external_id_field: (step.load.operation == LoadOperation::Upsert)
                .then(|| keys.load_field()),
            batch_size: ctx.config.batch_size_for(&step.load),
            mode,
            max_concurrency: ctx.config.max_concurrency,
            retry: ctx.config.retry_for(&step.load),
            signal: &ctx.signal,
        };
        let report = plan.run(rows).await?;

        for (source_id, target_id) in report.loaded {
            mapping.insert(
                source_id,
                MappedRecord {
                    object_type: step.load.object_type.clone(),
                    target_id,
                    step: step.name.clone(),
                },
            );
            result.succeeded += 1;
        }
        result.errors.extend(report.errors);
        Ok(result.finish(step, started))
    }
}
