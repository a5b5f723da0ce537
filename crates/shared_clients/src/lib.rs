pub mod api;
pub mod error;
pub mod http;
pub mod identity_cache;
pub mod rate_limit;
pub mod tokens;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use api::{PlatformApi, TokenEndpoint};
pub use error::{ErrorClass, PlatformError};
pub use http::HttpPlatformClient;
pub use identity_cache::IdentityCache;
pub use rate_limit::RateLimitedClient;
pub use tokens::{CredentialStore, RefreshHandle, TokenGrant, TokenHealth, TokenManager, TokenRecord};
pub use types::{
    LoadMode, LoadRequest, OrgIdentity, QueryResult, RowError, RowOutcome, Session, TokenResponse,
};
