use crate::context::RunSignal;
use crate::error::{EngineError, RecordError, RecordErrorKind};
use common::types::{OrgId, Record, RetryPolicy};
use futures_util::stream::{self, StreamExt};
use log::{debug, warn};
use shared_clients::error::TRANSPORT_ERROR_CODE;
use shared_clients::{
    ErrorClass, LoadMode, LoadRequest, PlatformError, RateLimitedClient, RowOutcome,
};
use std::time::Duration;
use templates::LoadOperation;

/// A transformed row waiting to be written, keyed by its source id.
#[derive(Debug, Clone)]
pub struct PendingRow {
    pub source_id: String,
    pub row: Record,
}

#[derive(Debug, Default)]
pub struct LoadReport {
    /// Source id and target id of every row the platform accepted.
    pub loaded: Vec<(String, String)>,
    pub errors: Vec<RecordError>,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.loaded.extend(other.loaded);
        self.errors.extend(other.errors);
    }
}

/// How one set of rows is written to one org.
pub struct LoadPlan<'a> {
    pub client: &'a RateLimitedClient,
    pub org: &'a OrgId,
    pub object_type: &'a str,
    pub operation: LoadOperation,
    /// Key field for upserts.
    pub external_id_field: Option<&'a str>,
    pub batch_size: usize,
    pub mode: LoadMode,
    pub max_concurrency: usize,
    pub retry: &'a RetryPolicy,
    pub signal: &'a RunSignal,
}

impl LoadPlan<'_> {
    /// A row code is retried when the policy lists it. Transport failures
    /// without a platform code are always retried while attempts remain.
    fn code_retryable(&self, code: &str) -> bool {
        code == TRANSPORT_ERROR_CODE || self.retry.is_retryable(code)
    }

    fn batch_retryable(&self, err: &PlatformError) -> bool {
        err.is_transient() && err.code().is_none_or(|code| self.code_retryable(code))
    }

    /// Writes `rows` in batches with bounded concurrency. Only an
    /// authentication failure aborts; every other failure ends up as a
    /// record error.
    pub async fn run(&self, rows: Vec<PendingRow>) -> Result<LoadReport, EngineError> {
        let batch_size = self.batch_size.max(1);
        let mut batches = Vec::with_capacity(rows.len().div_ceil(batch_size));
        let mut rows = rows.into_iter().peekable();
        while rows.peek().is_some() {
            batches.push(rows.by_ref().take(batch_size).collect::<Vec<PendingRow>>());
        }
        debug!(
            "object={} rows_in_batches={} mode={:?}",
            self.object_type,
            batches.len(),
            self.mode
        );

        let results: Vec<Result<LoadReport, EngineError>> = stream::iter(batches)
            .map(|batch| self.load_batch(batch))
            .buffered(self.max_concurrency.max(1))
            .collect()
            .await;

        let mut report = LoadReport::default();
        for result in results {
            report.merge(result?);
        }
        Ok(report)
    }

    fn request(&self, rows: &[PendingRow]) -> LoadRequest {
        LoadRequest {
            operation: self.operation,
            object_type: self.object_type.to_string(),
            external_id_field: self.external_id_field.map(str::to_string),
            rows: rows.iter().map(|r| r.row.clone()).collect(),
            mode: self.mode,
        }
    }

    /// Submits one batch, resubmitting only the rows (or the whole batch)
    /// that failed retryably until `max_attempts` submissions were made.
    async fn load_batch(&self, batch: Vec<PendingRow>) -> Result<LoadReport, EngineError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut report = LoadReport::default();
        let mut pending = batch;
        let mut attempt = 1u32;

        loop {
            if self.signal.is_cancelled() {
                let (kind, reason) = if attempt == 1 {
                    (RecordErrorKind::Cancelled, "run cancelled before the row was submitted")
                } else {
                    (RecordErrorKind::TransientLoad, "run cancelled while the row awaited a retry")
                };
                report.errors.extend(
                    pending
                        .into_iter()
                        .map(|p| RecordError::new(p.source_id, kind, reason)),
                );
                return Ok(report);
            }

            let retry_allowed = attempt < max_attempts;
            let mut retry = Vec::new();
            let mut retry_after = None;
            match self.client.load(self.org, &self.request(&pending)).await {
                Ok(outcomes) if outcomes.len() == pending.len() => {
                    for (row, outcome) in pending.into_iter().zip(outcomes) {
                        self.settle(row, outcome, attempt, retry_allowed, &mut retry, &mut report);
                    }
                }
                Ok(outcomes) => {
                    let message = format!(
                        "platform answered {} outcomes for {} rows",
                        outcomes.len(),
                        pending.len()
                    );
                    report.errors.extend(pending.into_iter().map(|p| {
                        RecordError::new(p.source_id, RecordErrorKind::FatalLoad, message.clone())
                    }));
                }
                Err(err) if err.class() == ErrorClass::Auth => return Err(err.into()),
                Err(err) if self.batch_retryable(&err) && retry_allowed => {
                    warn!(
                        "object={} batch of {} failed on attempt {attempt}: {err}",
                        self.object_type,
                        pending.len()
                    );
                    retry_after = err.retry_after();
                    retry = pending;
                }
                Err(err) => {
                    let message = if self.batch_retryable(&err) {
                        format!("gave up after {attempt} attempts: {err}")
                    } else {
                        err.to_string()
                    };
                    report.errors.extend(pending.into_iter().map(|p| {
                        RecordError::new(p.source_id, RecordErrorKind::FatalLoad, message.clone())
                            .with_code(err.code())
                    }));
                }
            }

            if retry.is_empty() {
                return Ok(report);
            }
            let delay = self
                .retry
                .backoff(attempt)
                .max(retry_after.unwrap_or(Duration::ZERO));
            debug!(
                "object={} retrying {} rows in {}s",
                self.object_type,
                retry.len(),
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
            pending = retry;
            attempt += 1;
        }
    }

    fn settle(
        &self,
        row: PendingRow,
        outcome: RowOutcome,
        attempt: u32,
        retry_allowed: bool,
        retry: &mut Vec<PendingRow>,
        report: &mut LoadReport,
    ) {
        if outcome.success {
            match outcome.id {
                Some(id) => report.loaded.push((row.source_id, id)),
                None => report.errors.push(RecordError::new(
                    row.source_id,
                    RecordErrorKind::FatalLoad,
                    "platform accepted the row without returning an id",
                )),
            }
            return;
        }

        let code = outcome.first_code();
        let retryable = code.is_some_and(|c| self.code_retryable(c));
        if retryable && retry_allowed {
            retry.push(row);
            return;
        }
        let message = if retryable {
            format!("gave up after {attempt} attempts: {}", outcome.error_text())
        } else {
            outcome.error_text()
        };
        report.errors.push(
            RecordError::new(row.source_id, RecordErrorKind::FatalLoad, message).with_code(code),
        );
    }
}
