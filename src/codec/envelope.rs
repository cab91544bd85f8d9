//! Block envelope: the unit that is erasure coded.
//!
//! A block is serialized with CBOR and prefixed with its length in ASCII
//! decimal so the zero padding added by the codec can be stripped again:
//!
//! ```text
//! <len>:<cbor(BlockEnvelope)><padding...>
//! ```
//!
//! The `last_block` flag travels inside the envelope; the restore engine
//! never infers it from outside.

use super::CodecError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Longest accepted length prefix (`u64::MAX` has 20 digits).
const MAX_PREFIX_DIGITS: usize = 20;

/// One block of a backup version, as produced by the backup side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEnvelope {
    /// Textual backup id this block belongs to
    pub backup_id: String,

    /// Sequential block number, starting at 0
    pub block_number: u64,

    /// Set on the final block of the backup version
    pub last_block: bool,

    /// User payload carried by this block
    pub data: Vec<u8>,
}

impl BlockEnvelope {
    pub fn new(backup_id: impl Into<String>, block_number: u64, last_block: bool, data: Vec<u8>) -> Self {
        Self {
            backup_id: backup_id.into(),
            block_number,
            last_block,
            data,
        }
    }

    /// Serialize into the length-prefixed form handed to the codec.
    pub fn to_padded(&self) -> Result<Vec<u8>, CodecError> {
        let body = to_cbor(self)?;
        let mut out = format!("{}:", body.len()).into_bytes();
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Parse a decoded (possibly zero padded) block.
    pub fn from_padded(bytes: &[u8]) -> Result<Self, CodecError> {
        let split = bytes
            .iter()
            .take(MAX_PREFIX_DIGITS + 1)
            .position(|b| *b == b':')
            .ok_or_else(|| CodecError::MalformedEnvelope("missing length prefix".to_string()))?;

        let length: usize = std::str::from_utf8(&bytes[..split])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| CodecError::MalformedEnvelope("bad length prefix".to_string()))?;

        let end = split
            .checked_add(1)
            .and_then(|start| start.checked_add(length))
            .ok_or_else(|| CodecError::MalformedEnvelope(format!("length prefix {} out of range", length)))?;
        let body = bytes
            .get(split + 1..end)
            .ok_or_else(|| CodecError::MalformedEnvelope(format!("truncated body, need {} bytes", length)))?;

        from_cbor(body)
    }
}

/// Serialize a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| CodecError::MalformedEnvelope(format!("CBOR encoding failed: {:?}", e)))?;
    Ok(bytes)
}

/// Deserialize a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes)
        .map_err(|e| CodecError::MalformedEnvelope(format!("CBOR decoding failed: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_is_stripped() {
        let block = BlockEnvelope::new("0/1/F1", 3, true, b"payload".to_vec());
        let mut padded = block.to_padded().unwrap();
        padded.extend_from_slice(&[0u8; 37]);

        let parsed = BlockEnvelope::from_padded(&padded).unwrap();
        assert_eq!(parsed, block);
        assert!(parsed.last_block);
    }

    #[test]
    fn test_missing_prefix_is_malformed() {
        let result = BlockEnvelope::from_padded(&[0u8; 64]);
        assert!(matches!(result, Err(CodecError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let block = BlockEnvelope::new("0/1/F1", 0, false, vec![7; 100]);
        let padded = block.to_padded().unwrap();
        let result = BlockEnvelope::from_padded(&padded[..padded.len() / 2]);
        assert!(matches!(result, Err(CodecError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_huge_length_prefix_is_malformed() {
        let mut bytes = format!("{}:", u64::MAX).into_bytes();
        bytes.extend_from_slice(&[0u8; 32]);
        let result = BlockEnvelope::from_padded(&bytes);
        assert!(matches!(result, Err(CodecError::MalformedEnvelope(_))));

        let near_max = format!("{}:", usize::MAX - 1).into_bytes();
        assert!(BlockEnvelope::from_padded(&near_max).is_err());
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let result = BlockEnvelope::from_padded(b"4:\xff\xff\xff\xff");
        assert!(matches!(result, Err(CodecError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_cbor_is_deterministic() {
        let block = BlockEnvelope::new("0/1/F1", 9, false, vec![1, 2, 3]);
        assert_eq!(to_cbor(&block).unwrap(), to_cbor(&block).unwrap());
    }
}
