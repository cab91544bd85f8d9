//! Fragment cache.
//!
//! ## Layout
//!
//! ```text
//! <root>/<pathID...>/<version>/<block>-<slot>-<Data|Parity>
//! ```

use super::StoreError;
use crate::codec::BlockFragments;
use crate::ids::{BackupId, FragmentId, FragmentKind};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Durable local cache of fragments.
///
/// Calls are short and synchronous; the restore engine invokes them from its
/// event handlers.
pub trait FragmentStore: Send + Sync {
    /// Store a fragment, replacing any previous content.
    fn write(&self, id: &FragmentId, bytes: &[u8]) -> Result<(), StoreError>;

    /// Whether a fragment is cached locally.
    fn exists(&self, id: &FragmentId) -> bool;

    /// Read a cached fragment.
    fn read(&self, id: &FragmentId) -> Result<Vec<u8>, StoreError>;

    /// Remove a cached fragment. Removing a missing fragment is not an error.
    fn remove(&self, id: &FragmentId) -> Result<(), StoreError>;
}

/// Write every fragment present in `fragments` for one block; returns how
/// many were written.
pub fn write_block(
    store: &dyn FragmentStore,
    backup_id: &BackupId,
    block_number: u64,
    fragments: &BlockFragments,
) -> Result<usize, StoreError> {
    let mut written = 0;
    for (kind, segments) in [
        (FragmentKind::Data, &fragments.data),
        (FragmentKind::Parity, &fragments.parity),
    ] {
        for (slot, payload) in segments.iter().enumerate() {
            if let Some(payload) = payload {
                let id = FragmentId::new(backup_id.clone(), block_number, slot, kind);
                store.write(&id, payload)?;
                written += 1;
            }
        }
    }
    Ok(written)
}

/// Filesystem-backed fragment store.
#[derive(Debug, Clone)]
pub struct FsFragmentStore {
    root: PathBuf,
}

impl FsFragmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all fragments of a backup version.
    pub fn backup_dir(&self, backup_id: &BackupId) -> Result<PathBuf, StoreError> {
        let mut dir = self.root.clone();
        for component in backup_id.path_id.split('/').chain([backup_id.version.as_str()]) {
            if component.is_empty() || component == "." || component == ".." {
                return Err(StoreError::InvalidPath(backup_id.to_string()));
            }
            dir.push(component);
        }
        Ok(dir)
    }

    fn path(&self, id: &FragmentId) -> Result<PathBuf, StoreError> {
        Ok(self.backup_dir(&id.backup_id)?.join(id.file_name()))
    }
}

impl FragmentStore for FsFragmentStore {
    fn write(&self, id: &FragmentId, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn exists(&self, id: &FragmentId) -> bool {
        self.path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    fn read(&self, id: &FragmentId) -> Result<Vec<u8>, StoreError> {
        let path = self.path(id)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(id.to_string()),
            _ => StoreError::Io(e),
        })
    }

    fn remove(&self, id: &FragmentId) -> Result<(), StoreError> {
        match fs::remove_file(self.path(id)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// In-memory fragment store for tests and offline tooling.
#[derive(Debug, Default)]
pub struct MemoryFragmentStore {
    fragments: Mutex<HashMap<FragmentId, Vec<u8>>>,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached fragments.
    pub fn len(&self) -> usize {
        self.fragments.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FragmentStore for MemoryFragmentStore {
    fn write(&self, id: &FragmentId, bytes: &[u8]) -> Result<(), StoreError> {
        let mut fragments = self
            .fragments
            .lock()
            .map_err(|_| StoreError::Io(std::io::Error::other("fragment store poisoned")))?;
        fragments.insert(id.clone(), bytes.to_vec());
        Ok(())
    }

    fn exists(&self, id: &FragmentId) -> bool {
        self.fragments
            .lock()
            .map(|f| f.contains_key(id))
            .unwrap_or(false)
    }

    fn read(&self, id: &FragmentId) -> Result<Vec<u8>, StoreError> {
        self.fragments
            .lock()
            .ok()
            .and_then(|f| f.get(id).cloned())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn remove(&self, id: &FragmentId) -> Result<(), StoreError> {
        if let Ok(mut fragments) = self.fragments.lock() {
            fragments.remove(id);
        }
        Ok(())
    }
}
