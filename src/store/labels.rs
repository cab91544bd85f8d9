//! Coarse connectivity labels of supplier connectors.
//!
//! The label file path is derived from both identities so that any process
//! looking at the same data directory finds the same file:
//!
//! ```text
//! <root>/suppliers/<sha256(customer)[..16]>/<sha256(supplier)[..16]>/service
//! ```

use super::StoreError;
use crate::ids::PeerId;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Persistence of the coarse label of one `(customer, supplier)` pair.
pub trait LabelStore: Send + Sync {
    /// Read the stored label; `None` when absent or unreadable.
    fn load(&self, customer: &PeerId, supplier: &PeerId) -> Option<String>;

    /// Replace the stored label.
    fn save(&self, customer: &PeerId, supplier: &PeerId, label: &str) -> Result<(), StoreError>;
}

fn short_hash(id: &PeerId) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    hex::encode(&digest[..16])
}

/// Deterministic label file path for a `(customer, supplier)` pair.
pub fn derive_label_path(root: &Path, customer: &PeerId, supplier: &PeerId) -> PathBuf {
    root.join("suppliers")
        .join(short_hash(customer))
        .join(short_hash(supplier))
        .join("service")
}

/// Filesystem-backed label store.
#[derive(Debug, Clone)]
pub struct FsLabelStore {
    root: PathBuf,
}

impl FsLabelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl LabelStore for FsLabelStore {
    fn load(&self, customer: &PeerId, supplier: &PeerId) -> Option<String> {
        fs::read_to_string(derive_label_path(&self.root, customer, supplier))
            .ok()
            .map(|s| s.trim().to_string())
    }

    fn save(&self, customer: &PeerId, supplier: &PeerId, label: &str) -> Result<(), StoreError> {
        let path = derive_label_path(&self.root, customer, supplier);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, label)?;
        Ok(())
    }
}

/// In-memory label store for tests. Clones share the same labels.
#[derive(Debug, Default, Clone)]
pub struct MemoryLabelStore {
    labels: Arc<Mutex<HashMap<(PeerId, PeerId), String>>>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a label (for test setup).
    pub fn put(&self, customer: &PeerId, supplier: &PeerId, label: &str) {
        if let Ok(mut labels) = self.labels.lock() {
            labels.insert((customer.clone(), supplier.clone()), label.to_string());
        }
    }
}

impl LabelStore for MemoryLabelStore {
    fn load(&self, customer: &PeerId, supplier: &PeerId) -> Option<String> {
        self.labels
            .lock()
            .ok()?
            .get(&(customer.clone(), supplier.clone()))
            .cloned()
    }

    fn save(&self, customer: &PeerId, supplier: &PeerId, label: &str) -> Result<(), StoreError> {
        self.put(customer, supplier, label);
        Ok(())
    }
}
