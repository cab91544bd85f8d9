//! Custodia - peer-to-peer backup engine
//!
//! A customer's backups are erasure coded and spread over a set of
//! suppliers. This crate holds the three coordinating pieces of that
//! network:
//!
//! - `restore`: pulls the fragments of a backup back block by block and
//!   appends the decoded payload to an output sink in order
//! - `supplier`: one connector per (customer, supplier) pair negotiating
//!   storage service and tracking its connectivity
//! - `relations`: the customer/supplier relation records in the shared
//!   key-value directory
//!
//! Supporting modules provide identifiers, the erasure codec, and the local
//! fragment and label stores. Network transports are collaborators behind
//! traits; in-memory mocks ship alongside each trait.

pub mod codec;
pub mod duration;
pub mod ids;
pub mod relations;
pub mod restore;
pub mod store;
pub mod supplier;
