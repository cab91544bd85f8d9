//! Local durable state.
//!
//! - **Fragments**: cache of fragments keyed by `(backup, block, slot, kind)`,
//!   written by the restore engine as fragments arrive so a restarted restore
//!   resumes from what survived.
//! - **Labels**: one small file per `(customer, supplier)` pair holding the
//!   coarse connectivity label of the supplier connector.

pub mod fragments;
pub mod labels;

pub use fragments::{write_block, FragmentStore, FsFragmentStore, MemoryFragmentStore};
pub use labels::{derive_label_path, FsLabelStore, LabelStore, MemoryLabelStore};

use thiserror::Error;

/// Errors that can occur in the local stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Fragment not found: {0}")]
    NotFound(String),

    #[error("Invalid storage path component: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
