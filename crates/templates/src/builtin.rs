use crate::error::TemplateError;
use crate::loader::parse_template;
use crate::models::MigrationTemplate;

const ACCOUNT_CONTACT: &str = include_str!("../builtin/account_contact.yml");
const OPPORTUNITY_PIPELINE: &str = include_str!("../builtin/opportunity_pipeline.yml");

/// Templates shipped with the migrator.
pub fn builtin_templates() -> Result<Vec<MigrationTemplate>, TemplateError> {
    [ACCOUNT_CONTACT, OPPORTUNITY_PIPELINE]
        .into_iter()
        .map(parse_template)
        .collect()
}
