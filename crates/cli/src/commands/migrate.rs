use crate::app::{load_config, runtime, App};
use crate::commands::print_json;
use clap::Args;
use common::error::MigratorError;
use engine::{
    EngineError, ExecutionConfig, ExecutionStatus, RunRequest, RunSignal, Selection,
};
use log::{info, warn};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Args)]
pub struct MigrateArgs {
    /// Template identifier
    #[arg(long)]
    pub template: String,
    /// Org to read from, as named in migrator.yml
    #[arg(long)]
    pub source: String,
    /// Org to write to, as named in migrator.yml
    #[arg(long)]
    pub target: String,
    /// Records to migrate as `Type=id,id`; repeatable
    #[arg(long = "select", value_name = "TYPE=IDS", value_parser = parse_selection, required = true)]
    pub select: Vec<(String, Vec<String>)>,
    /// Stop after the first step that does not fully succeed
    #[arg(long)]
    pub no_partial: bool,
    /// Stop starting new batches after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

fn parse_selection(raw: &str) -> Result<(String, Vec<String>), String> {
    let (object_type, ids) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=id,id but got '{raw}'"))?;
    let object_type = object_type.trim();
    if object_type.is_empty() {
        return Err(format!("missing object type in '{raw}'"));
    }
    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(format!("no record ids given for {object_type}"));
    }
    Ok((object_type.to_string(), ids))
}

impl MigrateArgs {
    fn selection(&self) -> Selection {
        let mut selection = Selection::new();
        for (object_type, ids) in &self.select {
            let entry = selection.entry(object_type.clone()).or_insert_with(Vec::new);
            for id in ids {
                if !entry.contains(id) {
                    entry.push(id.clone());
                }
            }
        }
        selection
    }

    fn request(&self, app: &App) -> Result<RunRequest, MigratorError> {
        let source = app.org(&self.source)?;
        let target = app.org(&self.target)?;
        let mut config = ExecutionConfig::from(&app.config.execution);
        if self.no_partial {
            config.allow_partial_success = false;
        }
        let deadline = self
            .timeout
            .map(|secs| Instant::now() + Duration::from_secs(secs));
        Ok(
            RunRequest::new(self.template.clone(), source, target, self.selection())
                .with_config(config)
                .with_signal(RunSignal::new(CancellationToken::new(), deadline)),
        )
    }
}

pub fn handle_validate(args: &MigrateArgs, config_path: Option<PathBuf>) -> Result<(), MigratorError> {
    let config = load_config(config_path)?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let app = App::build(config).await?;
        let request = args.request(&app)?;
        let prepared = app
            .migrator
            .prepare(request)
            .await
            .map_err(MigratorError::validate)?;
        let result = app.migrator.validate(&prepared).await;
        print_json(&result)?;
        if result.is_valid {
            Ok(())
        } else {
            Err(MigratorError::validate_msg(format!(
                "{} error(s) found",
                result.errors().count()
            )))
        }
    })
}

pub fn handle_run(args: &MigrateArgs, config_path: Option<PathBuf>) -> Result<(), MigratorError> {
    let config = load_config(config_path)?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let app = App::build(config).await?;
        let request = args.request(&app)?;
        let refresher = app.start_refresher();
        let outcome = app.migrator.run(request).await;
        refresher.shutdown().await;

        let report = match outcome {
            Ok(report) => report,
            Err(EngineError::Validation { issues, .. }) => {
                print_json(&issues)?;
                return Err(MigratorError::validate_msg(
                    "pre-flight validation failed, nothing was written",
                ));
            }
            Err(e) => return Err(MigratorError::run(e)),
        };
        print_json(&report)?;

        let execution = &report.execution;
        match execution.status {
            ExecutionStatus::Success => {
                info!("run={} completed", execution.run_id);
                Ok(())
            }
            ExecutionStatus::Partial => {
                warn!(
                    "run={} partially succeeded, {} record(s) failed",
                    execution.run_id, execution.failed_records
                );
                Ok(())
            }
            ExecutionStatus::Failed => Err(MigratorError::run_msg(format!(
                "run {} failed, {} of {} record(s) migrated",
                execution.run_id, execution.successful_records, execution.total_records
            ))),
        }
    })
}
