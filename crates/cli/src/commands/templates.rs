use crate::app::{build_registry, load_config};
use crate::commands::print_json;
use clap::{Args, Subcommand};
use common::error::MigratorError;
use dag::StepDag;
use engine::Getter;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Subcommand)]
pub enum TemplatesSubcommand {
    /// List every registered template
    List(ListArgs),
    /// Print one template, or its step graph
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only templates of this category
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    pub id: String,
    /// Emit the step dependency graph in DOT format
    #[arg(long)]
    pub dot: bool,
}

#[derive(Serialize)]
struct TemplateSummary<'a> {
    id: &'a str,
    name: &'a str,
    category: &'a str,
    version: &'a str,
    steps: Vec<&'a str>,
}

pub fn handle_templates(
    cmd: &TemplatesSubcommand,
    config_path: Option<PathBuf>,
) -> Result<(), MigratorError> {
    let config = load_config(config_path)?;
    let registry = build_registry(&config)?;

    match cmd {
        TemplatesSubcommand::List(args) => {
            let templates = match &args.category {
                Some(category) => registry.by_category(category),
                None => registry.list(),
            };
            let summaries: Vec<TemplateSummary> = templates
                .iter()
                .map(|t| TemplateSummary {
                    id: &t.id,
                    name: &t.name,
                    category: &t.category,
                    version: &t.version,
                    steps: t.steps.iter().map(|s| s.name.as_str()).collect(),
                })
                .collect();
            print_json(&summaries)
        }
        TemplatesSubcommand::Show(args) => {
            let template = registry.get(&args.id).map_err(MigratorError::init)?;
            if args.dot {
                let dag = StepDag::build(&template).map_err(MigratorError::init)?;
                println!("{}", dag.to_dot_string());
                Ok(())
            } else {
                print_json(template.as_ref())
            }
        }
    }
}
