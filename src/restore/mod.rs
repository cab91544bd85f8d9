//! Block-by-block restore of a backup version.
//!
//! A restore session walks the blocks of a backup in order. For each
//! block it collects data and parity fragments, from the local fragment
//! store first and then from the suppliers in parallel, and decodes the
//! block as soon as the erasure scheme says it is fixable. Decoded
//! payloads are appended to the output sink strictly in block order.
//!
//! ## Design
//!
//! - **Machine**: `RestoreMachine` is a synchronous `(state, event) -> actions`
//!   table. It never awaits.
//! - **Driver**: `RestoreSession` runs the machine on a tokio task, fans
//!   requests out through the `FragmentRequestQueue`, decodes on the
//!   blocking pool and owns every timer.
//! - **Monitor**: `RestoreMonitor` keeps one live session per backup and
//!   tracks bytes received per supplier slot.
//!
//! ## Failure budget
//!
//! A block fails the whole session once more distinct suppliers have
//! failed permanently than the scheme can correct. Transient failures
//! are retried when the block stalls.

pub mod config;
pub mod machine;
pub mod mock;
pub mod monitor;
pub mod session;
pub mod traits;

#[cfg(test)]
mod proptests;

pub use config::RestoreConfig;
pub use machine::{RestoreAction, RestoreEvent, RestoreMachine, RestoreState};
pub use monitor::{DoneCallback, RestoreMonitor};
pub use session::{AbortHandle, RestoreContext, RestoreRequest, RestoreSession};
pub use traits::{
    Fragment, FragmentRequestQueue, PeerStatus, RequestError, RestoreObserver, StaticPeerStatus,
};

use crate::codec::CodecError;
use crate::ids::BackupId;
use thiserror::Error;

/// Typed failure of a restore session.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Restore aborted")]
    Aborted,

    #[error("Block {block} is uncorrectable: {failed} suppliers failed, scheme tolerates {budget}")]
    Uncorrectable {
        block: u64,
        failed: usize,
        budget: usize,
    },

    #[error("Block decode failed: {0}")]
    DecodeFailed(#[source] CodecError),

    #[error("Restored block is invalid: {0}")]
    InvalidBlock(String),

    #[error("Unsupported erasure scheme: {0}")]
    Scheme(#[source] CodecError),

    #[error("Output write failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("Restore of {0} is already running")]
    AlreadyRunning(BackupId),

    #[error("Restore task ended without a result")]
    Cancelled,
}

/// Successful outcome of a restore session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub backup_id: BackupId,
    /// Blocks appended to the output
    pub blocks: u64,
    /// Payload bytes appended to the output
    pub bytes_written: u64,
}
