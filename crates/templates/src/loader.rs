use crate::error::TemplateError;
use crate::models::MigrationTemplate;
use common::utils::paths_with_ext;
use log::info;
use std::fs;
use std::path::Path;

pub fn parse_template(yaml: &str) -> Result<MigrationTemplate, TemplateError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Reads every `*.yml`/`*.yaml` file below `dir` as one template.
pub fn load_templates(dir: &Path) -> Result<Vec<MigrationTemplate>, TemplateError> {
    let mut paths = paths_with_ext(dir, "yml");
    paths.extend(paths_with_ext(dir, "yaml"));

    let mut templates = Vec::with_capacity(paths.len());
    for path in paths {
        info!("loading template from {}", path.display());
        let file = fs::File::open(&path)?;
        let template: MigrationTemplate = serde_yaml::from_reader(file)?;
        templates.push(template);
    }
    Ok(templates)
}
