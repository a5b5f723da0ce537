//! In-memory stand-ins for the platform and the credential store.

pub mod platform;
pub mod schema;

pub use platform::{FakePlatform, PlatformCall};

use chrono::{Duration as ChronoDuration, Utc};
use common::config::components::orgs::{OrgConnection, OrgConnections};
use common::config::components::rate_limit::RateLimitSettings;
use common::config::components::tokens::TokenSettings;
use common::types::{OrgId, OrgType, Record};
use parking_lot::Mutex;
use shared_clients::{CredentialStore, PlatformError, RateLimitedClient, TokenManager, TokenRecord};
use std::collections::HashMap;
use std::sync::Arc;

pub const INSTANCE_URL: &str = "https://fake.example.com";

pub fn record(value: serde_json::Value) -> Record {
    serde_json::from_value(value).expect("fixture record must be a JSON object")
}

#[derive(Default)]
pub struct InMemoryCredentialStore {
    records: Mutex<HashMap<OrgId, TokenRecord>>,
    saves: Mutex<usize>,
}

impl InMemoryCredentialStore {
    /// Store holding a token valid for two hours for each of `orgs`.
    pub fn with_valid_tokens(orgs: &[&str]) -> Self {
        let store = Self::default();
        for org in orgs {
            store.put(token_record(org, 7_200));
        }
        store
    }

    pub fn put(&self, record: TokenRecord) {
        self.records.lock().insert(record.org_id.clone(), record);
    }

    pub fn get(&self, org: &str) -> Option<TokenRecord> {
        self.records.lock().get(&OrgId::new(org)).cloned()
    }

    pub fn saves(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_credentials(&self, org_id: &OrgId) -> Result<Option<TokenRecord>, PlatformError> {
        Ok(self.records.lock().get(org_id).cloned())
    }

    async fn save_credentials(&self, record: &TokenRecord) -> Result<(), PlatformError> {
        *self.saves.lock() += 1;
        self.put(record.clone());
        Ok(())
    }

    async fn known_orgs(&self) -> Result<Vec<OrgId>, PlatformError> {
        let mut orgs: Vec<OrgId> = self.records.lock().keys().cloned().collect();
        orgs.sort();
        Ok(orgs)
    }
}

pub fn token_record(org: &str, expires_in_secs: i64) -> TokenRecord {
    TokenRecord {
        org_id: OrgId::new(org),
        access_token: format!("{org}-access-0"),
        refresh_token: format!("{org}-refresh"),
        instance_url: INSTANCE_URL.to_string(),
        org_type: OrgType::Sandbox,
        expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        last_refresh_attempt: None,
        last_refresh_success: None,
        consecutive_failures: 0,
        requires_reconnect: false,
    }
}

pub fn connections(orgs: &[&str]) -> OrgConnections {
    orgs.iter()
        .map(|org| {
            (
                org.to_string(),
                OrgConnection {
                    instance_url: INSTANCE_URL.to_string(),
                    login_url: INSTANCE_URL.to_string(),
                    client_id: format!("{org}-client"),
                    client_secret: None,
                    redirect_uri: None,
                    org_type: OrgType::Sandbox,
                },
            )
        })
        .collect()
}

/// Rate-limited client over `platform` with valid tokens for `orgs`.
pub fn client_for(platform: Arc<FakePlatform>, orgs: &[&str]) -> Arc<RateLimitedClient> {
    let store = Arc::new(InMemoryCredentialStore::with_valid_tokens(orgs));
    let tokens = TokenManager::new(
        platform.clone(),
        store,
        connections(orgs),
        TokenSettings::default(),
    );
    Arc::new(RateLimitedClient::new(
        platform,
        Arc::new(tokens),
        RateLimitSettings::default(),
    ))
}
