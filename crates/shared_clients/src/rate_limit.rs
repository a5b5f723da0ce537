use crate::api::PlatformApi;
use crate::error::{ErrorClass, PlatformError};
use crate::identity_cache::IdentityCache;
use crate::tokens::{RefreshHandle, TokenManager};
use crate::types::{LoadMode, LoadRequest, OrgIdentity, RowOutcome, Session};
use common::config::components::rate_limit::RateLimitSettings;
use common::types::{ObjectDescribe, OrgId, Record};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const IDENTITY_TTL: Duration = Duration::from_secs(300);
const IDENTITY_CAPACITY: usize = 256;

/// Every platform call goes through here. Calls are capped per org and an
/// auth rejection triggers one token refresh and retry. Throttled reads are
/// retried with backoff; throttled loads are returned to the caller, whose
/// retry policy owns write attempts.
pub struct RateLimitedClient {
    api: Arc<dyn PlatformApi>,
    tokens: Arc<TokenManager>,
    settings: RateLimitSettings,
    permits: Mutex<HashMap<OrgId, Arc<Semaphore>>>,
    identities: IdentityCache,
}

impl RateLimitedClient {
    pub fn new(
        api: Arc<dyn PlatformApi>,
        tokens: Arc<TokenManager>,
        settings: RateLimitSettings,
    ) -> Self {
        Self {
            api,
            tokens,
            settings,
            permits: Mutex::new(HashMap::new()),
            identities: IdentityCache::new(IDENTITY_TTL, IDENTITY_CAPACITY),
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub fn identity_cache(&self) -> &IdentityCache {
        &self.identities
    }

    /// Background upkeep: each tick renews tokens nearing expiry and sweeps
    /// expired identities out of the cache.
    pub fn spawn_upkeep(self: &Arc<Self>, interval: Duration) -> RefreshHandle {
        let client = Arc::clone(self);
        let handle = RefreshHandle::spawn(interval, move || {
            let client = Arc::clone(&client);
            async move {
                let renewed = client.tokens.refresh_due().await;
                let swept = client.identities.sweep();
                debug!("upkeep tick renewed={renewed} identities_swept={swept}");
            }
        });
        info!("client upkeep started, interval={}s", interval.as_secs());
        handle
    }

    fn semaphore(&self, org: &OrgId) -> Arc<Semaphore> {
        let ceiling = self.settings.max_concurrent_per_org.max(1);
        Arc::clone(
            self.permits
                .lock()
                .entry(org.clone())
                .or_insert_with(|| Arc::new(Semaphore::new(ceiling))),
        )
    }

    fn read_retries(&self) -> u32 {
        self.settings.max_rate_limit_retries
    }

    fn throttle_backoff(&self, retry: u32) -> Duration {
        let factor = 2u64.saturating_pow(retry.saturating_sub(1));
        Duration::from_millis(self.settings.rate_limit_backoff_ms.saturating_mul(factor))
    }

    async fn call<T, F, Fut>(
        &self,
        org: &OrgId,
        operation: &str,
        throttle_retries: u32,
        f: F,
    ) -> Result<T, PlatformError>
    where
        F: Fn(Session) -> Fut,
        Fut: Future<Output = Result<T, PlatformError>>,
    {
        let grant = self.tokens.get_valid_token(org).await?;
        if let Some(warning) = &grant.warning {
            warn!("org={org} {warning}");
        }
        let mut session = grant.session;
        let semaphore = self.semaphore(org);
        let mut refreshed = false;
        let mut throttled = 0u32;

        loop {
            let result = {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|_| PlatformError::unexpected("request limiter closed"))?;
                f(session.clone()).await
            };
            match result {
                Ok(value) => return Ok(value),
                Err(err)
                    if err.class() == ErrorClass::Auth
                        && !err.requires_reconnect()
                        && !refreshed =>
                {
                    debug!("org={org} {operation} rejected the session, refreshing");
                    refreshed = true;
                    session = self
                        .tokens
                        .force_refresh(org, &session.access_token)
                        .await?;
                }
                Err(PlatformError::RateLimited { retry_after, .. })
                    if throttled < throttle_retries =>
                {
                    throttled += 1;
                    let wait = retry_after.unwrap_or_else(|| self.throttle_backoff(throttled));
                    warn!(
                        "org={org} {operation} throttled, retry={throttled} wait_ms={}",
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Connectivity probe; answers from the identity cache when possible.
    pub async fn identity(&self, org: &OrgId) -> Result<OrgIdentity, PlatformError> {
        let token = self.tokens.get_valid_token(org).await?.session.access_token;
        if let Some(identity) = self.identities.get(&token) {
            return Ok(identity);
        }
        let identity = self
            .call(org, "identity", self.read_retries(), |s| async move {
                self.api.identity(&s).await
            })
            .await?;
        self.identities.insert(&token, identity.clone());
        Ok(identity)
    }

    /// Runs `soql` and follows pagination until the result set is complete.
    pub async fn query(&self, org: &OrgId, soql: &str) -> Result<Vec<Record>, PlatformError> {
        let mut page = self
            .call(org, "query", self.read_retries(), |s| async move {
                self.api.query(&s, soql).await
            })
            .await?;
        let mut records = std::mem::take(&mut page.records);
        while !page.done {
            let Some(next) = page.next_records_url.take() else {
                break;
            };
            let next = next.as_str();
            page = self
                .call(org, "query_more", self.read_retries(), |s| async move {
                    self.api.query_more(&s, next).await
                })
                .await?;
            records.append(&mut page.records);
        }
        debug!("org={org} query returned {} records", records.len());
        Ok(records)
    }

    pub async fn describe(
        &self,
        org: &OrgId,
        object_type: &str,
    ) -> Result<ObjectDescribe, PlatformError> {
        self.call(org, "describe", self.read_retries(), |s| async move {
            self.api.describe(&s, object_type).await
        })
        .await
    }

    /// Per-record loads are submitted one row per call so that a retried
    /// call never resubmits rows that already succeeded. A transient failure
    /// stops the submission: that row and the rows after it come back as
    /// failed outcomes carrying the error's code, and rows written before it
    /// keep their outcomes. Only an auth failure is returned as an error.
    pub async fn load(
        &self,
        org: &OrgId,
        request: &LoadRequest,
    ) -> Result<Vec<RowOutcome>, PlatformError> {
        match request.mode {
            LoadMode::Bulk => {
                self.call(org, "load", 0, |s| async move { self.api.load(&s, request).await })
                    .await
            }
            LoadMode::PerRecord => {
                let mut outcomes = Vec::with_capacity(request.rows.len());
                for (index, row) in request.rows.iter().enumerate() {
                    let single = request.with_rows(vec![row.clone()]);
                    let single = &single;
                    let result = self
                        .call(org, "load", 0, |s| async move { self.api.load(&s, single).await })
                        .await;
                    match result {
                        Ok(mut outcome) => match outcome.pop() {
                            Some(o) if outcome.is_empty() => outcomes.push(o),
                            _ => {
                                let err = PlatformError::unexpected(
                                    "single row load did not answer with exactly one outcome",
                                );
                                outcomes.push(RowOutcome::failed(err.row_code(), err.to_string()));
                            }
                        },
                        Err(err) if err.class() == ErrorClass::Auth => return Err(err),
                        Err(err) if err.is_transient() => {
                            let unsent = request.rows.len() - index - 1;
                            warn!(
                                "org={org} object={} row load failed, {unsent} row(s) not submitted: {err}",
                                request.object_type
                            );
                            outcomes.push(RowOutcome::failed(err.row_code(), err.to_string()));
                            outcomes.extend((0..unsent).map(|_| {
                                RowOutcome::failed(
                                    err.row_code(),
                                    format!("not submitted after an earlier row failed: {err}"),
                                )
                            }));
                            break;
                        }
                        Err(err) => {
                            outcomes.push(RowOutcome::failed(err.row_code(), err.to_string()))
                        }
                    }
                }
                Ok(outcomes)
            }
        }
    }
}
