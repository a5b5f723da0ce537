use crate::types::RetryPolicy;
use serde::Deserialize;

fn default_batch_size() -> usize {
    200
}

fn default_max_concurrency() -> usize {
    4
}

fn default_bulk_threshold() -> usize {
    200
}

fn default_large_selection_threshold() -> usize {
    200
}

fn default_true() -> bool {
    true
}

/// Defaults applied to every run unless the caller overrides them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExecutionSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Row count above which loads switch to collection submissions.
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    #[serde(default = "default_true")]
    pub allow_partial_success: bool,
    #[serde(default = "default_large_selection_threshold")]
    pub large_selection_threshold: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            bulk_threshold: default_bulk_threshold(),
            allow_partial_success: true,
            large_selection_threshold: default_large_selection_threshold(),
            retry: RetryPolicy::default(),
        }
    }
}
