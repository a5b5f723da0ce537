use crate::context::{ExecutionConfig, ExecutionContext, Selection};
use crate::external_id::ExternalIdResolver;
use common::config::components::external_id::ExternalIdSettings;
use common::types::OrgId;
use serde_json::json;
use shared_clients::RateLimitedClient;
use std::sync::Arc;
use templates::builtin::builtin_templates;
use templates::MigrationTemplate;
use test_utils::{client_for, record, schema, FakePlatform};

pub(crate) const EXT: &str = "External_ID__c";
pub(crate) const SOURCE: &str = "source";
pub(crate) const TARGET: &str = "target";

pub(crate) struct Harness {
    pub platform: Arc<FakePlatform>,
    pub client: Arc<RateLimitedClient>,
}

impl Harness {
    pub fn source(&self) -> OrgId {
        OrgId::new(SOURCE)
    }

    pub fn target(&self) -> OrgId {
        OrgId::new(TARGET)
    }

    pub fn resolver(&self) -> ExternalIdResolver {
        ExternalIdResolver::new(Arc::clone(&self.client), ExternalIdSettings::default())
    }

    pub async fn context(
        &self,
        template: MigrationTemplate,
        selection: Selection,
        config: ExecutionConfig,
    ) -> ExecutionContext {
        let external_ids = self
            .resolver()
            .resolve_template(&template, &self.source(), &self.target())
            .await
            .expect("external ids resolve");
        ExecutionContext::new(
            self.source(),
            self.target(),
            Arc::new(template),
            selection,
            external_ids,
            config,
        )
    }

    pub fn seed_accounts(&self, accounts: &[(&str, Option<&str>)]) {
        let records = accounts
            .iter()
            .map(|(id, name)| record(json!({"Id": id, "Name": name, "Industry": "Energy"})))
            .collect();
        self.platform.insert_records(SOURCE, "Account", records);
    }

    pub fn seed_contacts(&self, contacts: &[(&str, &str, &str)]) {
        let records = contacts
            .iter()
            .map(|(id, last_name, account)| {
                record(json!({
                    "Id": id, "LastName": last_name, "AccountId": account,
                    "Email": format!("{}@example.com", last_name.to_lowercase()),
                    "LeadSource": "Web"
                }))
            })
            .collect();
        self.platform.insert_records(SOURCE, "Contact", records);
    }
}

/// Two orgs sharing the unmanaged key field on every standard object.
pub(crate) fn harness() -> Harness {
    let platform = Arc::new(FakePlatform::new());
    for (org, prefix) in [(SOURCE, "S"), (TARGET, "T")] {
        platform.add_org(org, prefix);
        platform.add_describe(org, schema::account(&[EXT]));
        platform.add_describe(org, schema::contact(&[EXT]));
        platform.add_describe(org, schema::opportunity(&[EXT]));
    }
    let client = client_for(Arc::clone(&platform), &[SOURCE, TARGET]);
    Harness { platform, client }
}

pub(crate) fn builtin(id: &str) -> MigrationTemplate {
    builtin_templates()
        .expect("builtin templates")
        .into_iter()
        .find(|t| t.id == id)
        .expect("builtin template exists")
}

pub(crate) fn selection(object_type: &str, ids: &[&str]) -> Selection {
    Selection::from([(
        object_type.to_string(),
        ids.iter().map(|s| s.to_string()).collect(),
    )])
}
