use crate::error::TemplateError;
use crate::models::{
    EtlStep, IntegrityPredicate, MigrationTemplate, Transformation, EXTERNAL_ID_PLACEHOLDER,
};
use common::types::ID_FIELD;
use minijinja::Environment;
use regex::Regex;
use std::collections::HashSet;

/// Structural checks that need no I/O. Dependency cycles are detected by the
/// step graph, not here.
pub fn validate_template(template: &MigrationTemplate) -> Result<(), TemplateError> {
    let id = template.id.as_str();
    if id.trim().is_empty() {
        return Err(TemplateError::invalid("<unnamed>", "template id is empty"));
    }
    if template.steps.is_empty() {
        return Err(TemplateError::invalid(id, "template declares no steps"));
    }

    let mut names = HashSet::new();
    for step in &template.steps {
        if !names.insert(step.name.as_str()) {
            return Err(TemplateError::invalid(
                id,
                format!("step '{}' is declared more than once", step.name),
            ));
        }
    }

    for step in &template.steps {
        for dep in &step.depends_on {
            if !names.contains(dep.as_str()) {
                return Err(TemplateError::invalid(
                    id,
                    format!(
                        "step '{}' depends on '{dep}', which is not a step of this template",
                        step.name
                    ),
                ));
            }
        }
        validate_step(id, step)?;
    }
    Ok(())
}

fn validate_step(id: &str, step: &EtlStep) -> Result<(), TemplateError> {
    let name = &step.name;
    let ext_mappings = step.transform.external_id_mappings().collect::<Vec<_>>();
    match ext_mappings.as_slice() {
        [only] if only.source_field.as_deref() == Some(ID_FIELD)
            && only.transform == Transformation::Direct => {}
        [_] => {
            return Err(TemplateError::invalid(
                id,
                format!("step '{name}': the {EXTERNAL_ID_PLACEHOLDER} mapping must copy '{ID_FIELD}' directly"),
            ))
        }
        other => {
            return Err(TemplateError::invalid(
                id,
                format!(
                    "step '{name}': expected exactly one mapping targeting {EXTERNAL_ID_PLACEHOLDER}, found {}",
                    other.len()
                ),
            ))
        }
    }

    for mapping in &step.transform.mappings {
        let needs_source = matches!(
            mapping.transform,
            Transformation::Direct | Transformation::Lookup { .. }
        );
        if needs_source && mapping.source_field.is_none() {
            return Err(TemplateError::invalid(
                id,
                format!(
                    "step '{name}': mapping to '{}' needs a source_field",
                    mapping.target_field
                ),
            ));
        }
    }

    if step.load.object_type != step.extract.object_type {
        return Err(TemplateError::invalid(
            id,
            format!(
                "step '{name}': loads '{}' but extracts '{}'",
                step.load.object_type, step.extract.object_type
            ),
        ));
    }
    if step.load.batch_size == 0 {
        return Err(TemplateError::invalid(id, format!("step '{name}': batch_size must be > 0")));
    }
    if step.load.retry.max_attempts == 0 {
        return Err(TemplateError::invalid(
            id,
            format!("step '{name}': retry.max_attempts must be >= 1"),
        ));
    }

    let env = Environment::new();
    env.template_from_str(&step.extract.query).map_err(|e| {
        TemplateError::invalid(id, format!("step '{name}': query does not parse: {e}"))
    })?;
    if let Some(filter) = &step.extract.filter {
        env.template_from_str(filter).map_err(|e| {
            TemplateError::invalid(id, format!("step '{name}': filter does not parse: {e}"))
        })?;
    }

    if let Some(validation) = &step.validation {
        for check in &validation.integrity {
            if let IntegrityPredicate::Pattern { pattern, .. } = &check.predicate {
                Regex::new(pattern).map_err(|e| {
                    TemplateError::invalid(
                        id,
                        format!("step '{name}': check '{}' has a bad pattern: {e}", check.name),
                    )
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::*;
    use common::types::RetryPolicy;
    use matches::assert_matches;

    fn step(name: &str, deps: &[&str]) -> EtlStep {
        EtlStep {
            name: name.into(),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            optional: false,
            extract: ExtractSpec {
                object_type: "Account".into(),
                query: "SELECT Id, Name FROM Account WHERE Id IN ({{ ids }})".into(),
                filter: None,
            },
            transform: TransformSpec {
                mappings: vec![FieldMapping::external_id(), FieldMapping::direct("Name", "Name")],
            },
            load: LoadSpec {
                object_type: "Account".into(),
                operation: LoadOperation::Upsert,
                external_id_field: EXTERNAL_ID_PLACEHOLDER.into(),
                batch_size: 200,
                retry: RetryPolicy::default(),
            },
            validation: None,
        }
    }

    fn template(steps: Vec<EtlStep>) -> MigrationTemplate {
        MigrationTemplate {
            id: "t".into(),
            name: "T".into(),
            category: "test".into(),
            version: "1".into(),
            complexity: Complexity::Simple,
            estimated_duration_minutes: 1,
            description: None,
            steps,
        }
    }

    #[test]
    fn accepts_well_formed_template() {
        validate_template(&template(vec![step("a", &[]), step("b", &["a"])])).expect("valid");
    }

    #[test]
    fn rejects_unknown_dependency() {
        let err = validate_template(&template(vec![step("a", &["ghost"])])).expect_err("invalid");
        assert_matches!(err, TemplateError::Invalid { .. });
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn rejects_missing_or_duplicate_external_id_mapping() {
        let mut missing = step("a", &[]);
        missing.transform.mappings.remove(0);
        assert!(validate_template(&template(vec![missing])).is_err());

        let mut twice = step("a", &[]);
        twice.transform.mappings.push(FieldMapping::external_id());
        assert!(validate_template(&template(vec![twice])).is_err());

        let mut wrong_source = step("a", &[]);
        wrong_source.transform.mappings[0].source_field = Some("Name".into());
        assert!(validate_template(&template(vec![wrong_source])).is_err());
    }

    #[test]
    fn rejects_duplicate_steps_and_bad_batches() {
        assert!(validate_template(&template(vec![step("a", &[]), step("a", &[])])).is_err());

        let mut zero = step("a", &[]);
        zero.load.batch_size = 0;
        assert!(validate_template(&template(vec![zero])).is_err());
    }

    #[test]
    fn rejects_unparseable_query() {
        let mut bad = step("a", &[]);
        bad.extract.query = "SELECT {{ ids FROM Account".into();
        assert!(validate_template(&template(vec![bad])).is_err());
    }
}
