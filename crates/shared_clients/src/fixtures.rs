//! In-crate fakes for unit tests.

use crate::api::TokenEndpoint;
use crate::error::PlatformError;
use crate::tokens::{CredentialStore, TokenManager, TokenRecord};
use crate::types::TokenResponse;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::config::components::orgs::{OrgConnection, OrgConnections};
use common::config::components::tokens::TokenSettings;
use common::types::{OrgId, OrgType};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Token endpoint answering `access-<n>` on the n-th refresh, failing the
/// first `failures` refreshes.
#[derive(Default)]
pub(crate) struct ScriptedEndpoint {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<bool>>,
}

impl ScriptedEndpoint {
    pub(crate) fn failing(times: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures: Mutex::new(std::iter::repeat(true).take(times).collect()),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedEndpoint {
    async fn refresh(
        &self,
        _connection: &OrgConnection,
        _refresh_token: &str,
    ) -> Result<TokenResponse, PlatformError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::task::yield_now().await;
        if self.failures.lock().pop_front().unwrap_or(false) {
            return Err(PlatformError::transient("token endpoint unavailable", None));
        }
        Ok(TokenResponse {
            access_token: format!("access-{n}"),
            refresh_token: None,
            instance_url: "https://acme.example.com".to_string(),
            expires_in: 7_200,
        })
    }

    async fn exchange_code(
        &self,
        _connection: &OrgConnection,
        code: &str,
        _code_verifier: &str,
        _redirect_uri: &str,
    ) -> Result<TokenResponse, PlatformError> {
        Ok(TokenResponse {
            access_token: format!("granted-{code}"),
            refresh_token: Some("refresh-new".to_string()),
            instance_url: "https://acme.example.com".to_string(),
            expires_in: 7_200,
        })
    }
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) records: Mutex<HashMap<OrgId, TokenRecord>>,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credentials(&self, org_id: &OrgId) -> Result<Option<TokenRecord>, PlatformError> {
        Ok(self.records.lock().get(org_id).cloned())
    }

    async fn save_credentials(&self, record: &TokenRecord) -> Result<(), PlatformError> {
        self.records
            .lock()
            .insert(record.org_id.clone(), record.clone());
        Ok(())
    }

    async fn known_orgs(&self) -> Result<Vec<OrgId>, PlatformError> {
        Ok(self.records.lock().keys().cloned().collect())
    }
}

pub(crate) fn org() -> OrgId {
    OrgId::new("prod")
}

/// Stored record for [`org`] whose access token is `access-0`.
pub(crate) fn record(expires_in_secs: i64) -> TokenRecord {
    TokenRecord {
        org_id: org(),
        access_token: "access-0".to_string(),
        refresh_token: "refresh-0".to_string(),
        instance_url: "https://acme.example.com".to_string(),
        org_type: OrgType::Production,
        expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
        last_refresh_attempt: None,
        last_refresh_success: None,
        consecutive_failures: 0,
        requires_reconnect: false,
    }
}

pub(crate) fn manager(
    endpoint: Arc<ScriptedEndpoint>,
    stored: TokenRecord,
) -> (TokenManager, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    store.records.lock().insert(stored.org_id.clone(), stored);
    let mut connections = OrgConnections::new();
    connections.insert(
        "prod".to_string(),
        OrgConnection {
            instance_url: "https://acme.example.com".to_string(),
            login_url: "https://login.example.com".to_string(),
            client_id: "client".to_string(),
            client_secret: None,
            redirect_uri: Some("http://localhost:8765/callback".to_string()),
            org_type: OrgType::Production,
        },
    );
    let tm = TokenManager::new(
        endpoint,
        store.clone(),
        connections,
        TokenSettings::default(),
    );
    (tm, store)
}
