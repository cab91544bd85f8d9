//! In-memory directory for testing.

use super::directory::{DirectoryError, DirectoryService};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory directory with probe recording and injectable failures.
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<DirectoryState>>,
}

#[derive(Default)]
struct DirectoryState {
    values: HashMap<String, String>,
    failing_keys: HashSet<String>,
    reads: Vec<String>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a raw value (for test setup).
    pub fn put(&self, key: &str, value: &str) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.values.insert(key.to_string(), value.to_string());
    }

    /// Current raw value of a key.
    pub fn value(&self, key: &str) -> Option<String> {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.values.get(key).cloned()
    }

    /// Make every access to `key` fail with a transport error.
    pub fn fail_on(&self, key: &str) {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.failing_keys.insert(key.to_string());
    }

    /// Keys read so far, in order.
    pub fn reads(&self) -> Vec<String> {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.reads.clone()
    }

    /// Snapshot of all stored values.
    pub fn snapshot(&self) -> HashMap<String, String> {
        let s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.values.clone()
    }

    fn check(s: &DirectoryState, key: &str) -> Result<(), DirectoryError> {
        if s.failing_keys.contains(key) {
            return Err(DirectoryError::Transport(format!("simulated failure on {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn get(&self, key: &str) -> Result<Option<String>, DirectoryError> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        s.reads.push(key.to_string());
        Self::check(&s, key)?;
        Ok(s.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _age: u64) -> Result<(), DirectoryError> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::check(&s, key)?;
        s.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DirectoryError> {
        let mut s = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Self::check(&s, key)?;
        s.values.remove(key);
        Ok(())
    }
}
