//! Customer/supplier relations in the shared directory.
//!
//! Suppliers publish "I store data for this customer" at the first free
//! index under the customer's key prefix; anyone can scan the prefix to
//! rebuild the customer's supplier list without knowing its length.

pub mod directory;
pub mod lookup;
pub mod mock;
pub mod record;

#[cfg(test)]
mod proptests;

pub use directory::{DirectoryError, DirectoryService};
pub use lookup::{LookupConfig, LookupError, Probe, PublishOutcome, RelationLookup};
pub use record::{make_key, RelationRecord, DEFAULT_PREFIX};

use crate::ids::PeerId;

/// Map a scanned supplier list onto supplier slots; empty entries are gaps.
pub fn slots_from_relations(suppliers: &[String]) -> Vec<Option<PeerId>> {
    suppliers
        .iter()
        .map(|s| (!s.is_empty()).then(|| PeerId::new(s.as_str())))
        .collect()
}
