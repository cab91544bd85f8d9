//! Property-based tests for the restore machine
//!
//! Tests for:
//! - Decode is scheduled exactly when the held fragments are fixable
//! - Scheduled decodes reproduce the block payload
//! - Abort always terminates

use super::machine::{RestoreAction, RestoreEvent, RestoreMachine, RestoreState};
use super::mock::MockFragmentQueue;
use super::session::RestoreContext;
use super::traits::StaticPeerStatus;
use crate::codec::{encode_backup, BlockEnvelope, BlockFragments, ErasureCodec, XorParityCodec};
use crate::ids::{BackupId, PeerId};
use crate::store::{write_block, MemoryFragmentStore};
use proptest::prelude::*;
use std::sync::Arc;

const SCHEME: &str = "ecc/7x7";
const SEGMENTS: usize = 7;

fn backup() -> BackupId {
    BackupId::new("0/0/7", "F20240101")
}

fn bitmap() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), SEGMENTS)
}

/// Machine whose suppliers are all offline, so only local fragments count.
fn offline_machine(store: Arc<MemoryFragmentStore>) -> RestoreMachine {
    let codec = Arc::new(XorParityCodec::new());
    let ctx = RestoreContext::new(
        Arc::new(MockFragmentQueue::new()),
        codec.clone(),
        store,
        Arc::new(StaticPeerStatus::offline()),
    );
    let suppliers = (0..SEGMENTS).map(|i| Some(PeerId::new(format!("s{}", i)))).collect();
    RestoreMachine::new(&ctx, backup(), codec.scheme(SCHEME).unwrap(), suppliers)
}

fn keep(fragments: &BlockFragments, data: &[bool], parity: &[bool]) -> BlockFragments {
    let mask = |segments: &[Option<Vec<u8>>], bits: &[bool]| -> Vec<Option<Vec<u8>>> {
        segments
            .iter()
            .zip(bits)
            .map(|(s, keep)| if *keep { s.clone() } else { None })
            .collect()
    };
    BlockFragments {
        data: mask(&fragments.data, data),
        parity: mask(&fragments.parity, parity),
    }
}

proptest! {
    /// Property: a block with only local fragments is decoded iff the codec calls them fixable
    #[test]
    fn decode_iff_fixable(
        payload in prop::collection::vec(any::<u8>(), 0..300),
        data in bitmap(),
        parity in bitmap(),
    ) {
        let codec = XorParityCodec::new();
        let blocks = encode_backup(&codec, SCHEME, &backup(), &payload, 4096).unwrap();
        let held = keep(&blocks[0], &data, &parity);

        let store = Arc::new(MemoryFragmentStore::new());
        write_block(store.as_ref(), &backup(), 0, &held).unwrap();

        let mut machine = offline_machine(store);
        machine.handle(RestoreEvent::Init);
        let actions = machine.handle(RestoreEvent::Tick);

        let fixable = codec.is_fixable(SCHEME, &data, &parity);
        prop_assert_eq!(machine.state() == RestoreState::Decoding, fixable);

        let decode = actions.into_iter().find_map(|a| match a {
            RestoreAction::Decode { fragments, .. } => Some(fragments),
            _ => None,
        });
        prop_assert_eq!(decode.is_some(), fixable);

        if let Some(fragments) = decode {
            let padded = codec.decode(SCHEME, fragments).unwrap();
            let envelope = BlockEnvelope::from_padded(&padded).unwrap();
            prop_assert_eq!(envelope.data, payload);
        }
    }

    /// Property: abort resolves the session from any point of a block
    #[test]
    fn abort_always_terminates(
        data in bitmap(),
        parity in bitmap(),
        ticks in 0usize..3,
    ) {
        let codec = XorParityCodec::new();
        let blocks = encode_backup(&codec, SCHEME, &backup(), b"abort", 4096).unwrap();
        let store = Arc::new(MemoryFragmentStore::new());
        write_block(store.as_ref(), &backup(), 0, &keep(&blocks[0], &data, &parity)).unwrap();

        let mut machine = offline_machine(store);
        machine.handle(RestoreEvent::Init);
        for _ in 0..ticks {
            machine.handle(RestoreEvent::Tick);
        }

        let actions = machine.handle(RestoreEvent::Abort);
        prop_assert_eq!(machine.state(), RestoreState::Aborted);
        prop_assert!(actions.iter().any(|a| matches!(a, RestoreAction::Resolve(Err(_)))));
        prop_assert!(machine.handle(RestoreEvent::Tick).is_empty());
    }
}
