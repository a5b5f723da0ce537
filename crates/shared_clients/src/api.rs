use crate::error::PlatformError;
use crate::types::{LoadRequest, OrgIdentity, QueryResult, RowOutcome, Session, TokenResponse};
use async_trait::async_trait;
use common::config::components::orgs::OrgConnection;
use common::types::ObjectDescribe;

/// Data operations against one org's platform API.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    /// Lightweight read used as a connectivity probe.
    async fn identity(&self, session: &Session) -> Result<OrgIdentity, PlatformError>;

    async fn query(&self, session: &Session, soql: &str) -> Result<QueryResult, PlatformError>;

    async fn query_more(
        &self,
        session: &Session,
        next_records_url: &str,
    ) -> Result<QueryResult, PlatformError>;

    async fn describe(
        &self,
        session: &Session,
        object_type: &str,
    ) -> Result<ObjectDescribe, PlatformError>;

    /// Returns one outcome per row, in request order. Row level failures are
    /// outcomes; `Err` means the request as a whole failed.
    async fn load(
        &self,
        session: &Session,
        request: &LoadRequest,
    ) -> Result<Vec<RowOutcome>, PlatformError>;
}

/// OAuth token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(
        &self,
        connection: &OrgConnection,
        refresh_token: &str,
    ) -> Result<TokenResponse, PlatformError>;

    /// Authorization code exchange with a PKCE verifier.
    async fn exchange_code(
        &self,
        connection: &OrgConnection,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, PlatformError>;
}
