use crate::app::{load_config, runtime, App};
use crate::commands::print_json;
use clap::{Args, Subcommand};
use common::error::MigratorError;
use log::info;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum TokensSubcommand {
    /// Token metadata of every connected org
    Health,
    /// Finish the OAuth consent flow for an org
    Connect(ConnectArgs),
    /// Refresh every token that is close to expiring
    Refresh,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Org name from migrator.yml
    #[arg(long)]
    pub org: String,
    /// Authorization code returned to the redirect uri
    #[arg(long)]
    pub code: String,
    /// PKCE code verifier used when the flow started
    #[arg(long)]
    pub verifier: String,
    /// Overrides the org's configured redirect uri
    #[arg(long)]
    pub redirect_uri: Option<String>,
}

pub fn handle_tokens(cmd: &TokensSubcommand, config_path: Option<PathBuf>) -> Result<(), MigratorError> {
    let config = load_config(config_path)?;
    let runtime = runtime()?;
    runtime.block_on(async {
        let app = App::build(config).await?;
        match cmd {
            TokensSubcommand::Health => print_json(&app.tokens.health()),
            TokensSubcommand::Connect(args) => {
                let org = app.org(&args.org)?;
                let health = app
                    .tokens
                    .complete_grant(&org, &args.code, &args.verifier, args.redirect_uri.as_deref())
                    .await
                    .map_err(MigratorError::init)?;
                print_json(&health)
            }
            TokensSubcommand::Refresh => {
                let refreshed = app.tokens.refresh_due().await;
                info!("refreshed {refreshed} token(s)");
                print_json(&app.tokens.health())
            }
        }
    })
}
