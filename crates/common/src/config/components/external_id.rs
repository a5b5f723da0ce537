use serde::Deserialize;

fn default_namespace() -> String {
    "dcr".to_string()
}

fn default_field_name() -> String {
    "External_ID__c".to_string()
}

fn default_fallback_field() -> String {
    "Migration_Key__c".to_string()
}

/// Candidate external-identifier fields, in detection order:
/// `<namespace>__<field_name>`, `<field_name>`, `<fallback_field>`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ExternalIdSettings {
    #[serde(default = "default_namespace")]
    pub managed_namespace: String,
    #[serde(default = "default_field_name")]
    pub field_name: String,
    #[serde(default = "default_fallback_field")]
    pub fallback_field: String,
}

impl Default for ExternalIdSettings {
    fn default() -> Self {
        Self {
            managed_namespace: default_namespace(),
            field_name: default_field_name(),
            fallback_field: default_fallback_field(),
        }
    }
}

impl ExternalIdSettings {
    pub fn managed_field(&self) -> String {
        format!("{}__{}", self.managed_namespace, self.field_name)
    }

    pub fn unmanaged_field(&self) -> &str {
        &self.field_name
    }
}
