use crate::external_id::ExternalIdMap;
use common::config::components::execution::ExecutionSettings;
use common::types::{OrgId, RetryPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;
use templates::{LoadSpec, MigrationTemplate};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Selected source record ids, by object type.
pub type Selection = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionConfig {
    /// Upper bound on rows per load call; a step's own batch size may lower it.
    pub batch_size: usize,
    /// Load batches of one step in flight at once.
    pub max_concurrency: usize,
    /// Row count above which a step loads through the collection endpoint.
    pub bulk_threshold: usize,
    /// Replaces every step's retry policy when set.
    pub retry_override: Option<RetryPolicy>,
    pub allow_partial_success: bool,
}

impl From<&ExecutionSettings> for ExecutionConfig {
    fn from(settings: &ExecutionSettings) -> Self {
        Self {
            batch_size: settings.batch_size,
            max_concurrency: settings.max_concurrency,
            bulk_threshold: settings.bulk_threshold,
            retry_override: None,
            allow_partial_success: settings.allow_partial_success,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self::from(&ExecutionSettings::default())
    }
}

impl ExecutionConfig {
    pub fn retry_for<'a>(&'a self, load: &'a LoadSpec) -> &'a RetryPolicy {
        self.retry_override.as_ref().unwrap_or(&load.retry)
    }

    pub fn batch_size_for(&self, load: &LoadSpec) -> usize {
        load.batch_size.min(self.batch_size).max(1)
    }
}

/// Cooperative stop signal: an explicit cancellation or a passed deadline.
/// Checked between steps and between load batches, never mid-write.
#[derive(Debug, Clone, Default)]
pub struct RunSignal {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RunSignal {
    pub fn new(token: CancellationToken, deadline: Option<Instant>) -> Self {
        Self { token, deadline }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Everything one run needs. Built per invocation and dropped with it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub source: OrgId,
    pub target: OrgId,
    pub template: Arc<MigrationTemplate>,
    pub selected_ids: Selection,
    pub external_ids: ExternalIdMap,
    pub config: ExecutionConfig,
    pub signal: RunSignal,
}

impl ExecutionContext {
    pub fn new(
        source: OrgId,
        target: OrgId,
        template: Arc<MigrationTemplate>,
        selected_ids: Selection,
        external_ids: ExternalIdMap,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            target,
            template,
            selected_ids,
            external_ids,
            config,
            signal: RunSignal::default(),
        }
    }

    pub fn with_signal(mut self, signal: RunSignal) -> Self {
        self.signal = signal;
        self
    }

    pub fn selected_for(&self, object_type: &str) -> &[String] {
        self.selected_ids
            .get(object_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn selected_count(&self) -> usize {
        self.selected_ids.values().map(Vec::len).sum()
    }
}
