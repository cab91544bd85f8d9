//! Restore session timers and local copy policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for restore sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Scheduling tick; a new block starts on the tick after the previous
    /// one completes, and a pending abort is honoured within one tick
    /// (default: 100ms)
    #[serde(with = "crate::duration")]
    pub tick: Duration,

    /// How often a requesting block is checked for fixability (default: 1s)
    #[serde(with = "crate::duration")]
    pub fixable_check: Duration,

    /// How often a requesting block is checked for stalls (default: 5s)
    #[serde(with = "crate::duration")]
    pub stall_check: Duration,

    /// Re-scan and re-request after this long without progress (default: 60s)
    #[serde(with = "crate::duration")]
    pub stall_after: Duration,

    /// Keep fragments in the local store after their block is restored
    /// (default: true)
    pub keep_local_copies: bool,
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(100),
            fixable_check: Duration::from_secs(1),
            stall_check: Duration::from_secs(5),
            stall_after: Duration::from_secs(60),
            keep_local_copies: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RestoreConfig::default();
        assert_eq!(config.tick, Duration::from_millis(100));
        assert_eq!(config.stall_after, Duration::from_secs(60));
        assert!(config.keep_local_copies);
    }

    #[test]
    fn test_partial_toml() {
        let config: RestoreConfig = toml::from_str(
            r#"
            stall_after = "2m"
            keep_local_copies = false
            "#,
        )
        .unwrap();
        assert_eq!(config.stall_after, Duration::from_secs(120));
        assert_eq!(config.fixable_check, Duration::from_secs(1));
        assert!(!config.keep_local_copies);
    }
}
