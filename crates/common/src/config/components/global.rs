use crate::config::components::execution::ExecutionSettings;
use crate::config::components::external_id::ExternalIdSettings;
use crate::config::components::orgs::{OrgConnection, OrgConnections};
use crate::config::components::rate_limit::RateLimitSettings;
use crate::config::components::tokens::TokenSettings;
use crate::config::error::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;

fn default_api_version() -> String {
    "60.0".to_string()
}

fn default_credentials_dir() -> PathBuf {
    PathBuf::from(".migrator/credentials")
}

// ---------------- global config ----------------
#[derive(Debug, Clone, Deserialize)]
pub struct MigratorConfig {
    pub name: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    pub orgs: OrgConnections,
    #[serde(default = "default_credentials_dir")]
    pub credentials_dir: PathBuf,
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default)]
    pub execution: ExecutionSettings,
    #[serde(default)]
    pub tokens: TokenSettings,
    #[serde(default)]
    pub external_id: ExternalIdSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

impl MigratorConfig {
    pub fn get_org(&self, name: &str) -> Result<&OrgConnection, ConfigError> {
        self.orgs.get(name).ok_or_else(|| {
            let mut available = self.orgs.keys().cloned().collect::<Vec<String>>();
            available.sort();
            ConfigError::missing_connection(name, &available)
        })
    }

    /// Rejects settings that would stall or loop a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.batch_size == 0 {
            return Err(ConfigError::invalid_setting("execution.batch_size must be > 0"));
        }
        if self.execution.max_concurrency == 0 {
            return Err(ConfigError::invalid_setting(
                "execution.max_concurrency must be > 0",
            ));
        }
        if self.execution.retry.max_attempts == 0 {
            return Err(ConfigError::invalid_setting(
                "execution.retry.max_attempts must be >= 1",
            ));
        }
        if self.rate_limit.max_concurrent_per_org == 0 {
            return Err(ConfigError::invalid_setting(
                "rate_limit.max_concurrent_per_org must be > 0",
            ));
        }
        if self.rate_limit.request_timeout_secs == 0 {
            return Err(ConfigError::invalid_setting(
                "rate_limit.request_timeout_secs must be > 0",
            ));
        }
        if self.tokens.max_consecutive_failures == 0 {
            return Err(ConfigError::invalid_setting(
                "tokens.max_consecutive_failures must be > 0",
            ));
        }
        Ok(())
    }
}
