use crate::api::TokenEndpoint;
use crate::error::PlatformError;
use crate::types::{Session, TokenResponse};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::config::components::orgs::{OrgConnection, OrgConnections};
use common::config::components::tokens::TokenSettings;
use common::types::{OrgId, OrgType};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Stored OAuth state of one org. Only [`TokenManager`] mutates it.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub org_id: OrgId,
    pub access_token: String,
    pub refresh_token: String,
    pub instance_url: String,
    #[serde(default)]
    pub org_type: OrgType,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub last_refresh_attempt: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_refresh_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub requires_reconnect: bool,
}

impl Debug for TokenRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("org_id", &self.org_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("instance_url", &self.instance_url)
            .field("org_type", &self.org_type)
            .field("expires_at", &self.expires_at)
            .field("consecutive_failures", &self.consecutive_failures)
            .field("requires_reconnect", &self.requires_reconnect)
            .finish()
    }
}

impl TokenRecord {
    pub fn from_grant(
        org_id: OrgId,
        org_type: OrgType,
        response: TokenResponse,
        refresh_token: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id,
            access_token: response.access_token,
            refresh_token,
            instance_url: response.instance_url,
            org_type,
            expires_at: now + ChronoDuration::seconds(response.expires_in as i64),
            last_refresh_attempt: Some(now),
            last_refresh_success: Some(now),
            consecutive_failures: 0,
            requires_reconnect: false,
        }
    }

    pub fn session(&self) -> Session {
        Session {
            org_id: self.org_id.clone(),
            instance_url: self.instance_url.clone(),
            access_token: self.access_token.clone(),
        }
    }

    pub fn expires_within(&self, seconds: u64, now: DateTime<Utc>) -> bool {
        self.expires_at - now <= ChronoDuration::seconds(seconds as i64)
    }

    fn apply_refresh(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.access_token = response.access_token;
        if let Some(rotated) = response.refresh_token {
            self.refresh_token = rotated;
        }
        self.instance_url = response.instance_url;
        self.expires_at = now + ChronoDuration::seconds(response.expires_in as i64);
        self.last_refresh_attempt = Some(now);
        self.last_refresh_success = Some(now);
        self.consecutive_failures = 0;
    }
}

/// Persistence of OAuth credentials. Encryption at rest is the adapter's
/// concern.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credentials(&self, org_id: &OrgId) -> Result<Option<TokenRecord>, PlatformError>;
    async fn save_credentials(&self, record: &TokenRecord) -> Result<(), PlatformError>;
    async fn known_orgs(&self) -> Result<Vec<OrgId>, PlatformError>;
}

/// A usable session, with a warning when it is stale because refreshing failed.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub session: Session,
    pub warning: Option<String>,
}

/// Token metadata safe to report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenHealth {
    pub org_id: OrgId,
    pub instance_url: String,
    pub expires_at: DateTime<Utc>,
    pub last_refresh_attempt: Option<DateTime<Utc>>,
    pub last_refresh_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub requires_reconnect: bool,
}

#[derive(Clone, Copy)]
enum Trigger<'a> {
    /// Foreground request found the token inside the safety margin.
    Expiring,
    /// The platform rejected this access token.
    Rejected(&'a str),
    /// Background sweep.
    Proactive,
}

/// Owns the token lifecycle of every connected org.
///
/// Refreshes for one org are serialised so concurrent callers share a
/// single exchange with the token endpoint.
pub struct TokenManager {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn CredentialStore>,
    connections: OrgConnections,
    settings: TokenSettings,
    records: RwLock<HashMap<OrgId, TokenRecord>>,
    flights: Mutex<HashMap<OrgId, Arc<AsyncMutex<()>>>>,
}

fn reconnect_error(org: &OrgId) -> PlatformError {
    PlatformError::reconnect_required(format!(
        "token refresh for org {org} is suspended; complete the OAuth grant again"
    ))
}

impl TokenManager {
    pub fn new(
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn CredentialStore>,
        connections: OrgConnections,
        settings: TokenSettings,
    ) -> Self {
        Self {
            endpoint,
            store,
            connections,
            settings,
            records: RwLock::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Loads every org the credential store knows about into the cache.
    pub async fn load_known(&self) -> Result<usize, PlatformError> {
        let orgs = self.store.known_orgs().await?;
        let mut loaded = 0;
        for org in orgs {
            if let Some(record) = self.store.get_credentials(&org).await? {
                self.records.write().insert(org, record);
                loaded += 1;
            }
        }
        debug!("loaded {loaded} stored token records");
        Ok(loaded)
    }

    pub async fn get_valid_token(&self, org: &OrgId) -> Result<TokenGrant, PlatformError> {
        let record = self.record(org).await?;
        if record.requires_reconnect {
            return Err(reconnect_error(org));
        }
        if !record.expires_within(self.settings.expiry_safety_margin_secs, Utc::now()) {
            return Ok(TokenGrant {
                session: record.session(),
                warning: None,
            });
        }
        self.refresh(org, Trigger::Expiring).await
    }

    /// Refreshes after the platform rejected `rejected_token`. A caller that
    /// lost the race to another refresh gets the already renewed session.
    pub async fn force_refresh(
        &self,
        org: &OrgId,
        rejected_token: &str,
    ) -> Result<Session, PlatformError> {
        Ok(self.refresh(org, Trigger::Rejected(rejected_token)).await?.session)
    }

    pub async fn complete_grant(
        &self,
        org: &OrgId,
        code: &str,
        code_verifier: &str,
        redirect_uri: Option<&str>,
    ) -> Result<TokenHealth, PlatformError> {
        let connection = self.connection(org)?;
        let redirect_uri = redirect_uri
            .or(connection.redirect_uri.as_deref())
            .ok_or_else(|| {
                PlatformError::credentials(format!("no redirect_uri configured for org {org}"))
            })?;

        let flight = self.flight(org);
        let _guard = flight.lock().await;
        let response = self
            .endpoint
            .exchange_code(connection, code, code_verifier, redirect_uri)
            .await?;
        let refresh_token = response.refresh_token.clone().ok_or_else(|| {
            PlatformError::credentials(format!(
                "grant for org {org} returned no refresh token; request the refresh_token scope"
            ))
        })?;
        let record = TokenRecord::from_grant(
            org.clone(),
            connection.org_type,
            response,
            refresh_token,
            Utc::now(),
        );
        self.store.save_credentials(&record).await?;
        let health = health_of(&record);
        self.records.write().insert(org.clone(), record);
        info!("org={org} connected, token expires_at={}", health.expires_at);
        Ok(health)
    }

    /// Refreshes every cached token expiring within the proactive window.
    /// Returns how many were renewed.
    pub async fn refresh_due(&self) -> usize {
        let now = Utc::now();
        let window = self.settings.proactive_window_secs;
        let due: Vec<OrgId> = self
            .records
            .read()
            .values()
            .filter(|r| !r.requires_reconnect && r.expires_within(window, now))
            .map(|r| r.org_id.clone())
            .collect();

        let mut renewed = 0;
        for org in due {
            match self.refresh(&org, Trigger::Proactive).await {
                Ok(grant) if grant.warning.is_none() => renewed += 1,
                Ok(_) => {}
                Err(e) => warn!("org={org} background refresh failed: {e}"),
            }
        }
        renewed
    }

    pub fn spawn_refresher(self: &Arc<Self>, interval: Duration) -> RefreshHandle {
        let manager = Arc::clone(self);
        let handle = RefreshHandle::spawn(interval, move || {
            let manager = Arc::clone(&manager);
            async move {
                let renewed = manager.refresh_due().await;
                debug!("background token sweep renewed={renewed}");
            }
        });
        info!("token refresher started, interval={}s", interval.as_secs());
        handle
    }

    pub fn health(&self) -> Vec<TokenHealth> {
        let mut health: Vec<TokenHealth> = self.records.read().values().map(health_of).collect();
        health.sort_by(|a, b| a.org_id.cmp(&b.org_id));
        health
    }

    fn connection(&self, org: &OrgId) -> Result<&OrgConnection, PlatformError> {
        self.connections.get(org.as_str()).ok_or_else(|| {
            PlatformError::credentials(format!("org {org} is not configured"))
        })
    }

    fn flight(&self, org: &OrgId) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.flights.lock().entry(org.clone()).or_default())
    }

    async fn record(&self, org: &OrgId) -> Result<TokenRecord, PlatformError> {
        let cached = self.records.read().get(org).cloned();
        if let Some(record) = cached {
            return Ok(record);
        }
        match self.store.get_credentials(org).await? {
            Some(record) => Ok(self
                .records
                .write()
                .entry(org.clone())
                .or_insert(record)
                .clone()),
            None => Err(PlatformError::credentials(format!(
                "no stored credentials for org {org}; complete the OAuth grant first"
            ))),
        }
    }

    fn update(&self, record: &TokenRecord, apply: impl FnOnce(&mut TokenRecord)) -> TokenRecord {
        let mut records = self.records.write();
        let entry = records
            .entry(record.org_id.clone())
            .or_insert_with(|| record.clone());
        apply(entry);
        entry.clone()
    }

    async fn persist(&self, record: &TokenRecord) {
        if let Err(e) = self.store.save_credentials(record).await {
            warn!("org={} failed to persist token record: {e}", record.org_id);
        }
    }

    async fn refresh(&self, org: &OrgId, trigger: Trigger<'_>) -> Result<TokenGrant, PlatformError> {
        let flight = self.flight(org);
        let _guard = flight.lock().await;

        let record = self.record(org).await?;
        if record.requires_reconnect {
            return Err(reconnect_error(org));
        }
        let now = Utc::now();
        let still_fresh = match trigger {
            Trigger::Expiring => {
                !record.expires_within(self.settings.expiry_safety_margin_secs, now)
            }
            Trigger::Rejected(token) => record.access_token != token,
            Trigger::Proactive => !record.expires_within(self.settings.proactive_window_secs, now),
        };
        if still_fresh {
            return Ok(TokenGrant {
                session: record.session(),
                warning: None,
            });
        }

        let connection = self.connection(org)?;
        match self.endpoint.refresh(connection, &record.refresh_token).await {
            Ok(response) => {
                let updated = self.update(&record, |r| r.apply_refresh(response, now));
                self.persist(&updated).await;
                info!("org={org} token refreshed, expires_at={}", updated.expires_at);
                Ok(TokenGrant {
                    session: updated.session(),
                    warning: None,
                })
            }
            Err(err) => {
                let max_failures = self.settings.max_consecutive_failures;
                let updated = self.update(&record, |r| {
                    r.last_refresh_attempt = Some(now);
                    r.consecutive_failures += 1;
                    if r.consecutive_failures >= max_failures {
                        r.requires_reconnect = true;
                    }
                });
                self.persist(&updated).await;

                if updated.requires_reconnect {
                    warn!(
                        "org={org} token refresh failed {} times in a row, reconnect required",
                        updated.consecutive_failures
                    );
                    return Err(reconnect_error(org));
                }
                warn!(
                    "org={org} token refresh failed, consecutive_failures={}: {err}",
                    updated.consecutive_failures
                );
                match trigger {
                    Trigger::Rejected(_) => Err(PlatformError::auth(format!(
                        "session for org {org} was rejected and could not be refreshed: {err}"
                    ))),
                    _ => Ok(TokenGrant {
                        session: updated.session(),
                        warning: Some(format!(
                            "token refresh for org {org} failed {} time(s); using the cached token",
                            updated.consecutive_failures
                        )),
                    }),
                }
            }
        }
    }
}

fn health_of(record: &TokenRecord) -> TokenHealth {
    TokenHealth {
        org_id: record.org_id.clone(),
        instance_url: record.instance_url.clone(),
        expires_at: record.expires_at,
        last_refresh_attempt: record.last_refresh_attempt,
        last_refresh_success: record.last_refresh_success,
        consecutive_failures: record.consecutive_failures,
        requires_reconnect: record.requires_reconnect,
    }
}

/// Background refresher started by [`TokenManager::spawn_refresher`].
pub struct RefreshHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshHandle {
    /// Runs `tick` every `interval` until shut down. The first run happens
    /// one interval after spawning.
    pub(crate) fn spawn<F, Fut>(interval: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => tick().await,
                }
            }
        });
        Self { cancel, handle }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            warn!("token refresher stopped abnormally: {e}");
        }
    }
}
