//! Erasure coding boundary for block restore.
//!
//! The restore engine treats the codec as a black box: it asks for the
//! segment counts of a scheme, evaluates the fixability predicate over the
//! fragments it holds, and hands a full block directory to `decode` once the
//! predicate holds. `decode` returns the *padded* block; the envelope module
//! strips the padding and recovers the user payload.
//!
//! ## Implementations
//!
//! - [`XorParityCodec`]: N data + N parity segments, each parity covering two
//!   neighbouring data segments.

pub mod envelope;
pub mod xor;

pub use envelope::BlockEnvelope;
pub use xor::XorParityCodec;

use crate::ids::BackupId;
use thiserror::Error;

/// Errors that can occur while encoding or decoding a block
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown erasure scheme: {0}")]
    UnknownScheme(String),

    #[error("Block is not fixable with the fragments on hand")]
    NotFixable,

    #[error("Fragment size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Wrong number of segments: expected {expected}, got {actual}")]
    SegmentCount { expected: usize, actual: usize },

    #[error("Malformed block envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Decode worker failed: {0}")]
    Worker(String),
}

/// Static properties of an erasure scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeInfo {
    pub name: String,
    pub data_segments: usize,
    pub parity_segments: usize,
    /// Number of suppliers the scheme is laid out for.
    pub suppliers: usize,
    /// How many suppliers may fail permanently before a block is lost.
    pub correctable_errors: usize,
}

/// Fragments of one block, indexed by supplier slot. `None` marks a
/// fragment that is not on hand.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockFragments {
    pub data: Vec<Option<Vec<u8>>>,
    pub parity: Vec<Option<Vec<u8>>>,
}

impl BlockFragments {
    pub fn empty(info: &SchemeInfo) -> Self {
        Self {
            data: vec![None; info.data_segments],
            parity: vec![None; info.parity_segments],
        }
    }

    pub fn data_bitmap(&self) -> Vec<bool> {
        self.data.iter().map(Option::is_some).collect()
    }

    pub fn parity_bitmap(&self) -> Vec<bool> {
        self.parity.iter().map(Option::is_some).collect()
    }
}

/// Erasure codec consumed by the restore engine.
///
/// `decode` is CPU-bound; callers run it off the event loop.
pub trait ErasureCodec: Send + Sync {
    /// Describe a scheme by name.
    fn scheme(&self, name: &str) -> Result<SchemeInfo, CodecError>;

    /// Fixability predicate over the currently held fragments.
    ///
    /// Must agree with `decode`: whenever it returns `true`, `decode` over
    /// the same fragments succeeds.
    fn is_fixable(&self, scheme: &str, data: &[bool], parity: &[bool]) -> bool;

    /// Reconstruct the padded block from the fragments on hand.
    fn decode(&self, scheme: &str, fragments: BlockFragments) -> Result<Vec<u8>, CodecError>;

    /// Split a padded block into data and parity fragments.
    fn encode(&self, scheme: &str, block: &[u8]) -> Result<BlockFragments, CodecError>;
}

/// Split a payload into enveloped blocks of at most `block_size` bytes and
/// erasure code each one. An empty payload still yields one (last) block.
pub fn encode_backup(
    codec: &dyn ErasureCodec,
    scheme: &str,
    backup_id: &BackupId,
    payload: &[u8],
    block_size: usize,
) -> Result<Vec<BlockFragments>, CodecError> {
    let block_size = block_size.max(1);
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(block_size).collect()
    };
    let last = chunks.len() - 1;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let envelope = BlockEnvelope::new(backup_id.to_string(), i as u64, i == last, chunk.to_vec());
            codec.encode(scheme, &envelope.to_padded()?)
        })
        .collect()
}
