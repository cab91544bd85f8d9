//! Bounded probing of customer/supplier relations in the directory.
//!
//! Relations of a customer live at `prefix:customer:0`, `prefix:customer:1`,
//! ... with no stored count, so every operation probes indices in order and
//! classifies what it finds:
//!
//! | Probe result | Class |
//! |---|---|
//! | empty, unparseable, foreign customer | miss |
//! | supplier is the local identity | self-hit |
//! | supplier already seen at a lower index | duplicate (treated as miss) |
//! | anything else | other-hit |
//!
//! A scan stops at `limit_lookups`, or once `max_misses_in_row` misses follow
//! the last success. Publish and erase act on the first miss or self-hit.
//! Overwriting misses heals foreign and duplicated entries.

use super::directory::{DirectoryError, DirectoryService};
use super::record::{make_key, RelationRecord, DEFAULT_PREFIX};
use crate::ids::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during a relation lookup
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("Directory operation failed at index {index}: {source}")]
    Directory {
        index: usize,
        #[source]
        source: DirectoryError,
    },

    #[error("Record serialization failed: {0}")]
    Serialization(String),
}

/// Lookup tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Directory key prefix (default: `customer_supplier`)
    pub prefix: String,

    /// Hard cap on probed indices (default: 100)
    pub limit_lookups: usize,

    /// Consecutive misses after the last success that end a scan (default: 3)
    pub max_misses_in_row: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            limit_lookups: 100,
            max_misses_in_row: 3,
        }
    }
}

/// Classification of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Miss,
    SelfHit(String),
    Duplicate(String),
    OtherHit(String),
}

/// What a lookup task does when it finds a writable slot.
#[derive(Debug, Clone)]
enum Mode {
    Scan,
    Publish(RelationRecord),
    Erase,
}

/// Result of a publish or erase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Index that was written (publish) or deleted (erase), if any slot was found
    pub index: Option<usize>,

    /// Suppliers seen before the written index, gaps as empty strings
    pub suppliers: Vec<String>,
}

/// Relation lookup service.
///
/// Holds the directory handle and the local identity; every call runs an
/// independent probe task.
#[derive(Clone)]
pub struct RelationLookup {
    directory: Arc<dyn DirectoryService>,
    local_id: PeerId,
    config: LookupConfig,
}

impl RelationLookup {
    pub fn new(directory: Arc<dyn DirectoryService>, local_id: PeerId, config: LookupConfig) -> Self {
        Self {
            directory,
            local_id,
            config,
        }
    }

    pub fn config(&self) -> &LookupConfig {
        &self.config
    }

    /// Discover the ordered supplier list of a customer.
    pub async fn scan(&self, customer: &PeerId) -> Result<Vec<String>, LookupError> {
        let task = LookupTask::new(self, customer, Mode::Scan);
        let (suppliers, _) = task.run().await?;
        Ok(suppliers)
    }

    /// Publish "the local identity is one of this customer's suppliers".
    pub async fn publish(&self, customer: &PeerId) -> Result<PublishOutcome, LookupError> {
        let record = RelationRecord::new(customer.as_str(), self.local_id.as_str(), unix_now());
        let task = LookupTask::new(self, customer, Mode::Publish(record));
        let (suppliers, index) = task.run().await?;
        Ok(PublishOutcome { index, suppliers })
    }

    /// Remove the local identity's relation to a customer.
    pub async fn erase(&self, customer: &PeerId) -> Result<PublishOutcome, LookupError> {
        let task = LookupTask::new(self, customer, Mode::Erase);
        let (suppliers, index) = task.run().await?;
        Ok(PublishOutcome { index, suppliers })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// State of one probe run.
struct LookupTask<'a> {
    lookup: &'a RelationLookup,
    customer: &'a PeerId,
    mode: Mode,
    index: usize,
    last_success: Option<usize>,
    misses_in_row: usize,
    result: BTreeMap<usize, String>,
}

impl<'a> LookupTask<'a> {
    fn new(lookup: &'a RelationLookup, customer: &'a PeerId, mode: Mode) -> Self {
        Self {
            lookup,
            customer,
            mode,
            index: 0,
            last_success: None,
            misses_in_row: 0,
            result: BTreeMap::new(),
        }
    }

    fn key(&self) -> String {
        make_key(&self.lookup.config.prefix, self.customer.as_str(), self.index)
    }

    /// Classify a raw directory value at the current index.
    fn classify(&self, value: Option<&str>) -> Probe {
        let Some(record) = value.and_then(RelationRecord::parse) else {
            debug!(customer = %self.customer, index = self.index, "empty or invalid relation record");
            return Probe::Miss;
        };
        if record.customer_id != self.customer.as_str() {
            debug!(
                customer = %self.customer,
                index = self.index,
                owner = %record.customer_id,
                "relation record belongs to another customer"
            );
            return Probe::Miss;
        }
        if record.supplier_id == self.lookup.local_id.as_str() {
            return Probe::SelfHit(record.supplier_id);
        }
        if self.result.values().any(|s| *s == record.supplier_id) {
            debug!(
                customer = %self.customer,
                index = self.index,
                supplier = %record.supplier_id,
                "duplicated relation record"
            );
            return Probe::Duplicate(record.supplier_id);
        }
        Probe::OtherHit(record.supplier_id)
    }

    fn should_stop(&self) -> bool {
        if self.index >= self.lookup.config.limit_lookups {
            debug!(customer = %self.customer, "lookup limit reached");
            return true;
        }
        if self.misses_in_row >= self.lookup.config.max_misses_in_row {
            debug!(
                customer = %self.customer,
                last_success = ?self.last_success,
                "too many misses in a row"
            );
            return true;
        }
        false
    }

    fn record_success(&mut self, supplier: String) {
        self.last_success = Some(self.index);
        self.misses_in_row = 0;
        self.result.insert(self.index, supplier);
    }

    /// Contiguous prefix `0..=last_success` with gaps as empty strings.
    fn suppliers(&self) -> Vec<String> {
        match self.last_success {
            Some(last) => (0..=last)
                .map(|i| self.result.get(&i).cloned().unwrap_or_default())
                .collect(),
            None => Vec::new(),
        }
    }

    fn directory_error(&self, source: DirectoryError) -> LookupError {
        warn!(customer = %self.customer, index = self.index, error = %source, "relation lookup failed");
        LookupError::Directory {
            index: self.index,
            source,
        }
    }

    /// Write or delete at the current index, depending on mode.
    async fn act(&self) -> Result<(), LookupError> {
        let key = self.key();
        match &self.mode {
            Mode::Publish(record) => {
                let payload = record
                    .to_json()
                    .map_err(|e| LookupError::Serialization(e.to_string()))?;
                debug!(customer = %self.customer, index = self.index, "publishing relation");
                self.lookup
                    .directory
                    .set(&key, &payload, record.time)
                    .await
                    .map_err(|e| self.directory_error(e))
            }
            Mode::Erase => {
                debug!(customer = %self.customer, index = self.index, "erasing relation");
                self.lookup
                    .directory
                    .delete(&key)
                    .await
                    .map_err(|e| self.directory_error(e))
            }
            Mode::Scan => Ok(()),
        }
    }

    async fn run(mut self) -> Result<(Vec<String>, Option<usize>), LookupError> {
        let publishing = !matches!(self.mode, Mode::Scan);

        while !self.should_stop() {
            let key = self.key();
            let value = self
                .lookup
                .directory
                .get(&key)
                .await
                .map_err(|e| self.directory_error(e))?;

            match self.classify(value.as_deref()) {
                Probe::Miss | Probe::Duplicate(_) => {
                    if publishing {
                        self.act().await?;
                        return Ok((self.suppliers(), Some(self.index)));
                    }
                    self.misses_in_row += 1;
                }
                Probe::SelfHit(supplier) => {
                    self.record_success(supplier);
                    if publishing {
                        self.act().await?;
                        return Ok((self.suppliers(), Some(self.index)));
                    }
                }
                Probe::OtherHit(supplier) => {
                    self.record_success(supplier);
                }
            }
            self.index += 1;
        }

        let suppliers = self.suppliers();
        debug!(customer = %self.customer, ?suppliers, "relation lookup finished");
        Ok((suppliers, None))
    }
}
