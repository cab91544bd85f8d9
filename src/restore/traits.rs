//! Collaborators of the restore engine.
//!
//! The request queue delivers fragments from suppliers, `PeerStatus`
//! says who is worth asking, and a `RestoreObserver` hears about
//! progress. All of them can be mocked; see `restore::mock`.

use super::RestoreError;
use crate::ids::{BackupId, FragmentId, FragmentKind, PeerId};
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

/// Outcome of a single fragment request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Supplier refused the request")]
    Refused,

    #[error("Supplier does not have the fragment")]
    NotFound,

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Permanent failures count against the scheme's correctable-error
    /// budget; transient ones are retried by the stall re-scan.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RequestError::Refused | RequestError::NotFound)
    }
}

/// A fragment delivered by a supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub id: FragmentId,
    pub payload: Vec<u8>,
}

impl Fragment {
    pub fn new(id: FragmentId, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }
}

/// Queue of outgoing fragment requests.
///
/// `request` resolves exactly once. The session drops the futures of
/// requests it no longer needs and tells the queue through the cancel
/// methods so it can forget them too.
#[async_trait]
pub trait FragmentRequestQueue: Send + Sync {
    /// Ask `peer` for one fragment.
    async fn request(&self, peer: &PeerId, id: &FragmentId) -> Result<Fragment, RequestError>;

    /// Forget pending requests for one block.
    fn cancel_block(&self, backup_id: &BackupId, block_number: u64);

    /// Forget every pending request of a backup.
    fn cancel_backup(&self, backup_id: &BackupId);
}

/// Liveness of peers, as far as this node knows.
pub trait PeerStatus: Send + Sync {
    fn is_online(&self, peer: &PeerId) -> bool;
}

/// Fixed set of online peers.
#[derive(Debug, Clone, Default)]
pub struct StaticPeerStatus {
    online: HashSet<PeerId>,
}

impl StaticPeerStatus {
    pub fn new(online: impl IntoIterator<Item = PeerId>) -> Self {
        Self {
            online: online.into_iter().collect(),
        }
    }

    /// Nobody is online; only local fragments can be used.
    pub fn offline() -> Self {
        Self::default()
    }
}

impl PeerStatus for StaticPeerStatus {
    fn is_online(&self, peer: &PeerId) -> bool {
        self.online.contains(peer)
    }
}

/// Restore progress notifications. Every method defaults to a no-op.
pub trait RestoreObserver: Send + Sync {
    /// A valid fragment for the current block arrived from a supplier.
    fn fragment_received(&self, _backup_id: &BackupId, _slot: usize, _kind: FragmentKind, _bytes: usize) {}

    /// A block was decoded and appended to the output.
    fn block_restored(&self, _backup_id: &BackupId, _block_number: u64, _bytes: usize) {}

    /// The session resolved. Called exactly once; a task that stops
    /// without a result reports `RestoreError::Cancelled`.
    fn finished(&self, _backup_id: &BackupId, _outcome: &Result<super::RestoreReport, RestoreError>) {}
}
