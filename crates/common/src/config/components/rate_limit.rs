use serde::Deserialize;
use std::time::Duration;

fn default_max_concurrent() -> usize {
    8
}

fn default_rate_limit_retries() -> u32 {
    3
}

fn default_rate_limit_backoff_ms() -> u64 {
    1_000
}

fn default_request_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RateLimitSettings {
    /// Ceiling on in-flight requests per org.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_org: usize,
    #[serde(default = "default_rate_limit_retries")]
    pub max_rate_limit_retries: u32,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    /// Upper bound on a single HTTP request, connect to last byte.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_concurrent_per_org: default_max_concurrent(),
            max_rate_limit_retries: default_rate_limit_retries(),
            rate_limit_backoff_ms: default_rate_limit_backoff_ms(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RateLimitSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
