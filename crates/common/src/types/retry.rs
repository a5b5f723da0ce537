use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

const MAX_BACKOFF_SECS: u64 = 300;

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_seconds() -> u64 {
    2
}

fn default_retryable_codes() -> BTreeSet<String> {
    [
        "UNABLE_TO_LOCK_ROW",
        "REQUEST_LIMIT_EXCEEDED",
        "SERVER_UNAVAILABLE",
        "QUERY_TIMEOUT",
        "TIMEOUT",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// How a load retries transient failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total submissions allowed for a row, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    #[serde(default = "default_retryable_codes")]
    pub retryable_codes: BTreeSet<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
            retryable_codes: default_retryable_codes(),
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, code: &str) -> bool {
        self.retryable_codes.contains(code)
    }

    /// Delay before retry number `retry` (1-based): `backoff_seconds * 2^(retry-1)`,
    /// capped so the sequence never decreases.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        let secs = self
            .backoff_seconds
            .saturating_mul(1u64 << exp)
            .min(MAX_BACKOFF_SECS.max(self.backoff_seconds));
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_non_decreasing() {
        let policy = RetryPolicy {
            max_attempts: 12,
            backoff_seconds: 3,
            ..RetryPolicy::default()
        };
        let delays: Vec<Duration> = (1..=12).map(|n| policy.backoff(n)).collect();
        assert_eq!(delays[0], Duration::from_secs(3));
        assert_eq!(delays[1], Duration::from_secs(6));
        assert_eq!(delays[2], Duration::from_secs(12));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*delays.last().unwrap(), Duration::from_secs(MAX_BACKOFF_SECS));
    }

    #[test]
    fn default_codes_cover_lock_contention() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable("UNABLE_TO_LOCK_ROW"));
        assert!(!policy.is_retryable("REQUIRED_FIELD_MISSING"));
    }
}
