use crate::app::{load_config, runtime, App};
use crate::commands::print_json;
use clap::Args;
use common::error::MigratorError;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct CloneArgs {
    #[arg(long)]
    pub source: String,
    #[arg(long)]
    pub target: String,
    /// Object type of the record, e.g. Account
    #[arg(long = "object")]
    pub object_type: String,
    /// Source record id
    #[arg(long = "record")]
    pub record_id: String,
}

pub fn handle_clone(args: &CloneArgs, config_path: Option<PathBuf>) -> Result<(), MigratorError> {
    let config = load_config(config_path)?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let app = App::build(config).await?;
        let source = app.org(&args.source)?;
        let target = app.org(&args.target)?;
        if source == target {
            return Err(MigratorError::clone_failed(format!(
                "source and target are both org {source}"
            )));
        }
        let result = app
            .migrator
            .clone_record(&source, &target, &args.record_id, &args.object_type)
            .await;
        print_json(&result)?;
        match &result.error {
            None => Ok(()),
            Some(failure) => Err(MigratorError::clone_failed(format!(
                "{} {}: {}",
                args.object_type, args.record_id, failure.message
            ))),
        }
    })
}
