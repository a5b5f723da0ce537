use dag::StepDag;
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use templates::{validate_template, MigrationTemplate, TemplateError};

#[derive(Debug, Default)]
struct State {
    templates: HashMap<String, Arc<MigrationTemplate>>,
}

/// Process-wide template registry. Populated once by the composition root;
/// templates are immutable after registration.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    inner: Arc<RwLock<State>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `templates`, failing on the first rejected one.
    pub fn with_templates<I>(templates: I) -> Result<Self, TemplateError>
    where
        I: IntoIterator<Item = MigrationTemplate>,
    {
        let registry = Self::new();
        for template in templates {
            registry.register_template(template)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.inner.read().templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Register: Send + Sync + 'static {
    fn register_template(&self, template: MigrationTemplate) -> Result<(), TemplateError>;
}

pub trait Getter: Send + Sync + 'static {
    fn get(&self, id: &str) -> Result<Arc<MigrationTemplate>, TemplateError>;
    /// Every template, ordered by display name.
    fn list(&self) -> Vec<Arc<MigrationTemplate>>;
    fn by_category(&self, category: &str) -> Vec<Arc<MigrationTemplate>>;
}

impl Register for TemplateRegistry {
    fn register_template(&self, template: MigrationTemplate) -> Result<(), TemplateError> {
        validate_template(&template)?;
        StepDag::build(&template)
            .map_err(|e| TemplateError::invalid(&template.id, e.to_string()))?;

        let mut g = self.inner.write();
        if g.templates.contains_key(&template.id) {
            return Err(TemplateError::duplicate(&template.id));
        }
        info!(
            "registered template id={} steps={}",
            template.id,
            template.steps.len()
        );
        g.templates.insert(template.id.clone(), Arc::new(template));
        Ok(())
    }
}

impl Getter for TemplateRegistry {
    fn get(&self, id: &str) -> Result<Arc<MigrationTemplate>, TemplateError> {
        let g = self.inner.read();
        g.templates.get(id).cloned().ok_or_else(|| {
            let mut known: Vec<&str> = g.templates.keys().map(String::as_str).collect();
            known.sort_unstable();
            TemplateError::not_found(format!(
                "template '{id}' is not registered, known templates are [{}]",
                known.join(", ")
            ))
        })
    }

    fn list(&self) -> Vec<Arc<MigrationTemplate>> {
        let mut all: Vec<Arc<MigrationTemplate>> =
            self.inner.read().templates.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        all
    }

    fn by_category(&self, category: &str) -> Vec<Arc<MigrationTemplate>> {
        self.list()
            .into_iter()
            .filter(|t| t.category.eq_ignore_ascii_case(category))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matches::assert_matches;
    use templates::builtin::builtin_templates;

    fn builtins() -> Vec<MigrationTemplate> {
        builtin_templates().expect("builtin templates parse")
    }

    #[test]
    fn lists_by_name_and_category() {
        let registry = TemplateRegistry::with_templates(builtins()).expect("registry");
        let names: Vec<String> = registry.list().iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["Accounts with Contacts", "Opportunity Pipeline"]);
        assert_eq!(registry.by_category("Sales").len(), 2);
        assert!(registry.by_category("service").is_empty());
        assert_eq!(registry.get("account-contact").expect("get").steps.len(), 2);
    }

    #[test]
    fn rejects_duplicates() {
        let registry = TemplateRegistry::new();
        let template = builtins().remove(0);
        registry.register_template(template.clone()).expect("first");
        assert_matches!(
            registry.register_template(template),
            Err(TemplateError::Duplicate { .. })
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_cyclic_templates_at_registration() {
        let mut template = builtins().remove(0);
        template.steps[0].depends_on = vec!["contacts".to_string()];
        let registry = TemplateRegistry::new();
        let err = registry.register_template(template).expect_err("cycle");
        assert_matches!(err, TemplateError::Invalid { .. });
        assert!(err.to_string().contains("cyclic"));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_template_lists_known_ids() {
        let registry = TemplateRegistry::with_templates(builtins()).expect("registry");
        let err = registry.get("nope").expect_err("missing");
        assert!(err.to_string().contains("account-contact, opportunity-pipeline"));
    }
}
