//! Property-based tests for relation lookups
//!
//! Tests for:
//! - Scan termination bound
//! - Publish idempotency
//! - Scan result shape

use super::lookup::{LookupConfig, RelationLookup};
use super::mock::MemoryDirectory;
use super::record::{make_key, RelationRecord, DEFAULT_PREFIX};
use crate::ids::PeerId;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

const CUSTOMER: &str = "customer";

/// Slot content: None = empty, Some(i) = record for supplier `s{i}`.
fn layout() -> impl Strategy<Value = Vec<Option<u8>>> {
    prop::collection::vec(prop::option::of(0u8..6), 0..20)
}

fn populate(dir: &MemoryDirectory, layout: &[Option<u8>]) {
    for (i, slot) in layout.iter().enumerate() {
        if let Some(s) = slot {
            let record = RelationRecord::new(CUSTOMER, format!("s{}", s), 1);
            dir.put(
                &make_key(DEFAULT_PREFIX, CUSTOMER, i),
                &record.to_json().unwrap(),
            );
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Directory content reduced to key -> supplier.
fn relations(dir: &MemoryDirectory) -> HashMap<String, String> {
    dir.snapshot()
        .into_iter()
        .filter_map(|(k, v)| RelationRecord::parse(&v).map(|r| (k, r.supplier_id)))
        .collect()
}

proptest! {
    /// Property: scan probes at most min(cap, last_success + misses + 1) keys
    #[test]
    fn scan_probe_count_is_bounded(
        layout in layout(),
        cap in 1usize..30,
        misses in 1usize..5,
    ) {
        let dir = MemoryDirectory::new();
        populate(&dir, &layout);
        let config = LookupConfig { limit_lookups: cap, max_misses_in_row: misses, ..LookupConfig::default() };
        let lookup = RelationLookup::new(Arc::new(dir.clone()), PeerId::new("me"), config);

        let suppliers = runtime().block_on(lookup.scan(&PeerId::new(CUSTOMER))).unwrap();

        let probes = dir.reads().len();
        let last_success = suppliers.len() as isize - 1;
        let bound = cap.min((last_success + misses as isize + 1) as usize);
        prop_assert!(probes <= bound, "probes {} > bound {}", probes, bound);
        prop_assert!(suppliers.len() <= cap);
    }

    /// Property: scan results never repeat a supplier
    #[test]
    fn scan_results_are_unique(layout in layout()) {
        let dir = MemoryDirectory::new();
        populate(&dir, &layout);
        let lookup = RelationLookup::new(Arc::new(dir.clone()), PeerId::new("me"), LookupConfig::default());

        let suppliers = runtime().block_on(lookup.scan(&PeerId::new(CUSTOMER))).unwrap();
        let named: Vec<_> = suppliers.iter().filter(|s| !s.is_empty()).collect();
        let mut dedup = named.clone();
        dedup.sort();
        dedup.dedup();
        prop_assert_eq!(named.len(), dedup.len());
    }

    /// Property: publishing twice leaves the same relations as publishing once
    #[test]
    fn publish_is_idempotent(layout in layout()) {
        let once = MemoryDirectory::new();
        let twice = MemoryDirectory::new();
        populate(&once, &layout);
        populate(&twice, &layout);
        let rt = runtime();

        let l1 = RelationLookup::new(Arc::new(once.clone()), PeerId::new("me"), LookupConfig::default());
        rt.block_on(l1.publish(&PeerId::new(CUSTOMER))).unwrap();

        let l2 = RelationLookup::new(Arc::new(twice.clone()), PeerId::new("me"), LookupConfig::default());
        rt.block_on(l2.publish(&PeerId::new(CUSTOMER))).unwrap();
        rt.block_on(l2.publish(&PeerId::new(CUSTOMER))).unwrap();

        prop_assert_eq!(relations(&once), relations(&twice));
    }
}
