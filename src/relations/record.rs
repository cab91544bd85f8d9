//! Relation records stored in the directory.

use serde::{Deserialize, Serialize};

/// Default key prefix for customer/supplier relations.
pub const DEFAULT_PREFIX: &str = "customer_supplier";

/// Directory key of one relation slot: `prefix:customer:index`.
pub fn make_key(prefix: &str, customer: &str, index: usize) -> String {
    format!("{}:{}:{}", prefix, customer, index)
}

/// "This supplier stores data for this customer."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    pub customer_id: String,
    pub supplier_id: String,
    /// Unix seconds of publication
    pub time: u64,
    /// Unused until records are signed
    #[serde(default)]
    pub signature: String,
}

impl RelationRecord {
    pub fn new(customer_id: impl Into<String>, supplier_id: impl Into<String>, time: u64) -> Self {
        Self {
            customer_id: customer_id.into(),
            supplier_id: supplier_id.into(),
            time,
            signature: String::new(),
        }
    }

    /// Parse a stored value; corrupt or partial values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        serde_json::from_str(value).ok()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
