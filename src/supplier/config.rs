//! Connector timers and the needed-bytes policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lower bound for the storage a customer asks for in total.
pub const DEFAULT_MINIMUM_NEEDED_BYTES: u64 = 32 * 1024 * 1024;

/// Supplier count assumed when none is configured.
pub const DEFAULT_DESIRED_SUPPLIERS: usize = 7;

/// Configuration shared read-only by every connector of a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// How long a service request may stay unanswered (default: 20s)
    #[serde(with = "crate::duration")]
    pub request_timeout: Duration,

    /// How long to wait for a cancel acknowledgement (default: 10s)
    #[serde(with = "crate::duration")]
    pub refuse_timeout: Duration,

    /// How long to wait for the queue subscription reply (default: 10s)
    #[serde(with = "crate::duration")]
    pub queue_timeout: Duration,

    /// Total storage the customer wants across all suppliers (default: 32 MiB)
    pub needed_bytes_total: u64,

    /// Configured supplier count; `None` falls back to the minimum policy
    pub desired_suppliers: Option<usize>,

    /// Floor used when no supplier count is configured (default: 32 MiB)
    pub minimum_needed_bytes: u64,

    /// Supplier count used with the floor (default: 7)
    pub default_desired_suppliers: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(20),
            refuse_timeout: Duration::from_secs(10),
            queue_timeout: Duration::from_secs(10),
            needed_bytes_total: DEFAULT_MINIMUM_NEEDED_BYTES,
            desired_suppliers: None,
            minimum_needed_bytes: DEFAULT_MINIMUM_NEEDED_BYTES,
            default_desired_suppliers: DEFAULT_DESIRED_SUPPLIERS,
        }
    }
}

impl ConnectorConfig {
    /// Per-supplier quota: `ceil(2 * total / suppliers)`.
    ///
    /// The factor of two leaves room for parity. Without a configured
    /// supplier count the floor `ceil(2 * minimum / default_suppliers)` is used.
    pub fn needed_bytes(&self) -> u64 {
        match self.desired_suppliers {
            Some(n) if n > 0 => self.needed_bytes_total.saturating_mul(2).div_ceil(n as u64),
            _ => self
                .minimum_needed_bytes
                .saturating_mul(2)
                .div_ceil(self.default_desired_suppliers.max(1) as u64),
        }
    }
}
