use crate::credentials::FileCredentialStore;
use common::config::components::global::MigratorConfig;
use common::config::loader::read_config;
use common::error::MigratorError;
use common::types::OrgId;
use engine::{Migrator, Register, TemplateRegistry};
use log::{info, warn};
use shared_clients::{HttpPlatformClient, RateLimitedClient, RefreshHandle, TokenManager};
use std::path::PathBuf;
use std::sync::Arc;
use templates::builtin::builtin_templates;
use templates::loader::load_templates;
use tokio::runtime::Runtime;

/// Everything a command needs, wired once from `migrator.yml`.
pub struct App {
    pub config: MigratorConfig,
    pub tokens: Arc<TokenManager>,
    pub client: Arc<RateLimitedClient>,
    pub migrator: Migrator,
}

pub fn load_config(config_path: Option<PathBuf>) -> Result<MigratorConfig, MigratorError> {
    let config = read_config(config_path).map_err(MigratorError::init)?;
    config.validate().map_err(MigratorError::init)?;
    Ok(config)
}

/// Built-in templates plus every `*.yml` under `templates_dir`.
pub fn build_registry(config: &MigratorConfig) -> Result<TemplateRegistry, MigratorError> {
    let registry = TemplateRegistry::new();
    for template in builtin_templates().map_err(MigratorError::init)? {
        registry
            .register_template(template)
            .map_err(MigratorError::init)?;
    }
    if let Some(dir) = &config.templates_dir {
        let loaded = load_templates(dir).map_err(MigratorError::init)?;
        info!("loaded {} template(s) from {}", loaded.len(), dir.display());
        for template in loaded {
            registry
                .register_template(template)
                .map_err(MigratorError::init)?;
        }
    }
    Ok(registry)
}

impl App {
    pub async fn build(config: MigratorConfig) -> Result<Self, MigratorError> {
        let registry = build_registry(&config)?;
        let http = Arc::new(
            HttpPlatformClient::with_timeout(
                &config.api_version,
                config.rate_limit.request_timeout(),
            )
            .map_err(MigratorError::init)?,
        );
        let store = Arc::new(FileCredentialStore::new(config.credentials_dir.clone()));
        let tokens = Arc::new(TokenManager::new(
            http.clone(),
            store,
            config.orgs.clone(),
            config.tokens.clone(),
        ));
        let known = tokens.load_known().await.map_err(MigratorError::init)?;
        if known == 0 {
            warn!(
                "no stored credentials under {}, connect an org with `migrator tokens connect`",
                config.credentials_dir.display()
            );
        }
        let client = Arc::new(RateLimitedClient::new(
            http,
            Arc::clone(&tokens),
            config.rate_limit.clone(),
        ));
        let migrator = Migrator::new(
            Arc::clone(&client),
            registry,
            config.execution.clone(),
            config.external_id.clone(),
        );
        Ok(Self {
            config,
            tokens,
            client,
            migrator,
        })
    }

    /// Maps a configured org name to its id, rejecting unknown names.
    pub fn org(&self, name: &str) -> Result<OrgId, MigratorError> {
        self.config.get_org(name).map_err(MigratorError::init)?;
        Ok(OrgId::new(name))
    }

    /// Proactive token refresh plus identity-cache sweeps.
    pub fn start_refresher(&self) -> RefreshHandle {
        self.client
            .spawn_upkeep(self.config.tokens.refresh_interval())
    }
}

pub fn runtime() -> Result<Runtime, MigratorError> {
    Runtime::new().map_err(MigratorError::init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::Getter;
    use matches::assert_matches;
    use std::fs;
    use tempfile::tempdir;

    const ACCOUNT_CONTACT: &str = include_str!("../../templates/builtin/account_contact.yml");

    fn write_config(root: &std::path::Path) {
        fs::write(
            root.join("migrator.yml"),
            "name: acme\n\
             orgs:\n  \
               source: { instance_url: \"https://source.example.com\", login_url: \"https://login.example.com\", client_id: src }\n  \
               target: { instance_url: \"https://target.example.com\", login_url: \"https://login.example.com\", client_id: tgt }\n\
             templates_dir: templates\n",
        )
        .unwrap();
    }

    #[test]
    fn registry_holds_builtins_and_templates_dir() {
        let dir = tempdir().unwrap();
        write_config(dir.path());
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(
            dir.path().join("templates/partner.yml"),
            ACCOUNT_CONTACT.replace("id: account-contact", "id: partner-accounts"),
        )
        .unwrap();

        let config = load_config(Some(dir.path().to_path_buf())).unwrap();
        let registry = build_registry(&config).unwrap();

        let ids: Vec<String> = registry.list().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert!(registry.get("partner-accounts").is_ok());
        assert!(registry.get("opportunity-pipeline").is_ok());
    }

    #[test]
    fn template_shadowing_a_builtin_is_rejected() {
        let dir = tempdir().unwrap();
        write_config(dir.path());
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("templates/dup.yml"), ACCOUNT_CONTACT).unwrap();

        let config = load_config(Some(dir.path().to_path_buf())).unwrap();
        assert_matches!(build_registry(&config), Err(MigratorError::Init { .. }));
    }

    #[tokio::test]
    async fn unknown_org_names_are_rejected() {
        let dir = tempdir().unwrap();
        write_config(dir.path());
        fs::create_dir(dir.path().join("templates")).unwrap();

        let config = load_config(Some(dir.path().to_path_buf())).unwrap();
        let app = App::build(config).await.unwrap();

        assert_eq!(app.org("source").unwrap(), OrgId::new("source"));
        assert_matches!(app.org("staging"), Err(MigratorError::Init { .. }));
        assert!(app.tokens.health().is_empty());
    }

    #[test]
    fn zero_request_timeout_is_rejected() {
        let dir = tempdir().unwrap();
        write_config(dir.path());
        fs::create_dir(dir.path().join("templates")).unwrap();
        let path = dir.path().join("migrator.yml");
        let mut yaml = fs::read_to_string(&path).unwrap();
        yaml.push_str("rate_limit: { request_timeout_secs: 0 }\n");
        fs::write(&path, yaml).unwrap();

        assert_matches!(
            load_config(Some(dir.path().to_path_buf())),
            Err(MigratorError::Init { .. })
        );
    }

    #[tokio::test]
    async fn app_builds_with_the_configured_request_timeout() {
        let dir = tempdir().unwrap();
        write_config(dir.path());
        fs::create_dir(dir.path().join("templates")).unwrap();
        let path = dir.path().join("migrator.yml");
        let mut yaml = fs::read_to_string(&path).unwrap();
        yaml.push_str("rate_limit: { request_timeout_secs: 15 }\n");
        fs::write(&path, yaml).unwrap();

        let config = load_config(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(config.rate_limit.request_timeout(), std::time::Duration::from_secs(15));
        let app = App::build(config).await.unwrap();
        let handle = app.start_refresher();
        handle.shutdown().await;
        assert!(app.client.identity_cache().is_empty());
    }
}
