use serde::Deserialize;
use std::time::Duration;

fn default_refresh_interval() -> u64 {
    300
}

fn default_safety_margin() -> u64 {
    300
}

fn default_proactive_window() -> u64 {
    900
}

fn default_max_failures() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TokenSettings {
    /// Period of the background refresh sweep.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Tokens expiring sooner than this are refreshed before being handed out.
    #[serde(default = "default_safety_margin")]
    pub expiry_safety_margin_secs: u64,
    /// Tokens expiring within this window are refreshed by the background sweep.
    #[serde(default = "default_proactive_window")]
    pub proactive_window_secs: u64,
    /// Consecutive refresh failures after which an org requires reconnecting.
    #[serde(default = "default_max_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            expiry_safety_margin_secs: default_safety_margin(),
            proactive_window_secs: default_proactive_window(),
            max_consecutive_failures: default_max_failures(),
        }
    }
}

impl TokenSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}
