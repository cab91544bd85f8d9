//! Identifiers shared by the restore, supplier and relation subsystems.
//!
//! A fragment is addressed as `pathID/version/block-slot-Kind`, e.g.
//! `0/1/F20240101120000AM/3-2-Parity`. The path part may itself contain
//! slashes; the version is always the last path component before the
//! fragment suffix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when parsing identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("Invalid backup id: {0}")]
    InvalidBackupId(String),

    #[error("Invalid fragment id: {0}")]
    InvalidFragmentId(String),

    #[error("Invalid fragment kind: {0}")]
    InvalidKind(String),
}

/// Identity of a remote peer (customer or supplier).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identity of one immutable backup version: `(pathID, versionName)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackupId {
    pub path_id: String,
    pub version: String,
}

impl BackupId {
    pub fn new(path_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            path_id: path_id.into(),
            version: version.into(),
        }
    }

    /// Filesystem-safe form, used for temporary file names and log fields.
    pub fn flat(&self) -> String {
        self.to_string().replace('/', "_")
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path_id, self.version)
    }
}

impl FromStr for BackupId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((path, version)) if !path.is_empty() && !version.is_empty() => {
                Ok(Self::new(path, version))
            }
            _ => Err(IdError::InvalidBackupId(s.to_string())),
        }
    }
}

/// Whether a fragment carries data or parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FragmentKind {
    Data,
    Parity,
}

impl FragmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FragmentKind::Data => "Data",
            FragmentKind::Parity => "Parity",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FragmentKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Data" => Ok(FragmentKind::Data),
            "Parity" => Ok(FragmentKind::Parity),
            other => Err(IdError::InvalidKind(other.to_string())),
        }
    }
}

/// Identity of a single fragment: `(backupID, blockNumber, peerSlot, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FragmentId {
    pub backup_id: BackupId,
    pub block_number: u64,
    pub slot: usize,
    pub kind: FragmentKind,
}

impl FragmentId {
    pub fn new(backup_id: BackupId, block_number: u64, slot: usize, kind: FragmentKind) -> Self {
        Self {
            backup_id,
            block_number,
            slot,
            kind,
        }
    }

    /// File name of this fragment inside its backup directory.
    pub fn file_name(&self) -> String {
        format!("{}-{}-{}", self.block_number, self.slot, self.kind)
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.backup_id, self.file_name())
    }
}

impl FromStr for FragmentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IdError::InvalidFragmentId(s.to_string());

        let (backup, suffix) = s.rsplit_once('/').ok_or_else(invalid)?;
        let backup_id: BackupId = backup.parse().map_err(|_| invalid())?;

        let mut parts = suffix.splitn(3, '-');
        let block_number = parts
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .ok_or_else(invalid)?;
        let slot = parts
            .next()
            .and_then(|p| p.parse::<usize>().ok())
            .ok_or_else(invalid)?;
        let kind = parts.next().ok_or_else(invalid)?.parse()?;

        Ok(Self::new(backup_id, block_number, slot, kind))
    }
}
