mod app;
mod commands;
mod credentials;

use crate::commands::clone::{handle_clone, CloneArgs};
use crate::commands::migrate::{handle_run, handle_validate, MigrateArgs};
use crate::commands::templates::{handle_templates, TemplatesSubcommand};
use crate::commands::tokens::{handle_tokens, TokensSubcommand};
use clap::{Parser, Subcommand};
use common::error::MigratorError;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "migrator")]
pub struct Cli {
    #[arg(
        long = "config-path",
        short = 'c',
        help = "path to migrator.yml or the directory holding it",
        global = true
    )]
    pub config_path: Option<PathBuf>,
    /// Multi-line log output
    #[arg(long, global = true)]
    pub pretty: bool,
    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand)]
pub enum Cmd {
    /// Inspect registered migration templates
    #[command(subcommand)]
    Templates(TemplatesSubcommand),
    /// Run the pre-flight checks for a migration without writing anything
    Validate(MigrateArgs),
    /// Validate, then migrate the selected records
    Run(MigrateArgs),
    /// Copy a single record between orgs
    Clone(CloneArgs),
    /// Org connection and token lifecycle
    #[command(subcommand)]
    Tokens(TokensSubcommand),
}

fn run_cmd(func: Result<(), MigratorError>) {
    if let Err(e) = func {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init_logger("info", cli.pretty);

    let config_path = cli.config_path;
    match cli.command {
        Cmd::Templates(cmd) => run_cmd(handle_templates(&cmd, config_path)),
        Cmd::Validate(args) => run_cmd(handle_validate(&args, config_path)),
        Cmd::Run(args) => run_cmd(handle_run(&args, config_path)),
        Cmd::Clone(args) => run_cmd(handle_clone(&args, config_path)),
        Cmd::Tokens(cmd) => run_cmd(handle_tokens(&cmd, config_path)),
    }
}
