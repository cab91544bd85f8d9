//! Trait abstraction for the shared key/value directory.
//!
//! Enables the in-memory implementation in `relations::mock` for testing.

use async_trait::async_trait;
use thiserror::Error;

/// Directory transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Directory transport error: {0}")]
    Transport(String),

    #[error("Directory request timed out")]
    Timeout,
}

/// Shared key/value directory used to publish and discover relations.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Read a key; `Ok(None)` when nothing is stored there.
    async fn get(&self, key: &str) -> Result<Option<String>, DirectoryError>;

    /// Store a value with its age (unix seconds of the write).
    async fn set(&self, key: &str, value: &str, age: u64) -> Result<(), DirectoryError>;

    /// Delete a key.
    async fn delete(&self, key: &str) -> Result<(), DirectoryError>;
}
