//! Restore state machine.
//!
//! `RestoreMachine::handle` applies one event and returns the actions the
//! driver must carry out. Local collaborators (fragment store, fixability
//! predicate, peer status, observer) are called inline because they are
//! cheap and synchronous; anything that waits is returned as an action.
//!
//! ## States
//!
//! ```text
//! STARTUP -init-> RUNNING -tick-> REQUESTING -fixable-> DECODING
//!                    ^                                     |
//!                    |                              decoded, valid
//!                    |                                     v
//!                    +------- appended, not last ---- BLOCK_COMPLETE
//!                                                          |
//!                                               appended, last block
//!                                                          v
//!                                                        DONE
//! ```
//!
//! ABORTED and FAILED are reachable from every non-terminal state. All
//! three terminal states cancel outstanding requests, close the sink and
//! resolve the session exactly once.

use super::session::RestoreContext;
use super::traits::{Fragment, PeerStatus, RequestError, RestoreObserver};
use super::{RestoreError, RestoreReport};
use crate::codec::{BlockEnvelope, BlockFragments, CodecError, ErasureCodec, SchemeInfo};
use crate::ids::{BackupId, FragmentId, FragmentKind, PeerId};
use crate::store::FragmentStore;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const KINDS: [FragmentKind; 2] = [FragmentKind::Data, FragmentKind::Parity];

/// Restore session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestoreState {
    Startup,
    Running,
    Requesting,
    Decoding,
    BlockComplete,
    Aborted,
    Failed,
    Done,
}

impl RestoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreState::Startup => "STARTUP",
            RestoreState::Running => "RUNNING",
            RestoreState::Requesting => "REQUESTING",
            RestoreState::Decoding => "DECODING",
            RestoreState::BlockComplete => "BLOCK_COMPLETE",
            RestoreState::Aborted => "ABORTED",
            RestoreState::Failed => "FAILED",
            RestoreState::Done => "DONE",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RestoreState::Aborted | RestoreState::Failed | RestoreState::Done
        )
    }
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the restore machine.
#[derive(Debug)]
pub enum RestoreEvent {
    Init,
    /// Scheduling tick (RUNNING starts the next block)
    Tick,
    /// Periodic fixability check while requesting
    FixableCheck,
    /// Periodic stall check while requesting
    StallCheck,
    Abort,
    /// A fragment request resolved
    RequestDone {
        requested: FragmentId,
        result: Result<Fragment, RequestError>,
    },
    /// The decode worker finished
    DecodeDone(Result<Vec<u8>, CodecError>),
    /// The decoded payload was appended to the sink
    Appended(Result<(), std::io::Error>),
}

/// Side effects for the driver, executed in order.
#[derive(Debug)]
pub enum RestoreAction {
    Request { peer: PeerId, fragment: FragmentId },
    Decode { block_number: u64, fragments: BlockFragments },
    Append { block_number: u64, data: Vec<u8> },
    /// Drop the pending requests of one block
    CancelBlock(u64),
    /// Drop every pending request and any running decode
    CancelAll,
    CloseSink,
    Resolve(Result<RestoreReport, RestoreError>),
}

/// Synchronous core of a restore session.
pub struct RestoreMachine {
    backup_id: BackupId,
    scheme: SchemeInfo,
    suppliers: Vec<Option<PeerId>>,
    codec: Arc<dyn ErasureCodec>,
    store: Arc<dyn FragmentStore>,
    peers: Arc<dyn PeerStatus>,
    observer: Option<Arc<dyn RestoreObserver>>,
    keep_local_copies: bool,
    stall_after: Duration,

    state: RestoreState,
    block: u64,
    next_block: u64,
    fragments: BlockFragments,
    outstanding: HashSet<FragmentId>,
    failed_slots: BTreeSet<usize>,
    last_action: Instant,

    // decoded block waiting for its append
    pending_len: usize,
    pending_last: bool,

    blocks_restored: u64,
    bytes_written: u64,
}

impl RestoreMachine {
    /// `suppliers[slot]` is the peer holding that slot's fragments; the
    /// list is padded or cut to the scheme's supplier count.
    pub fn new(
        ctx: &RestoreContext,
        backup_id: BackupId,
        scheme: SchemeInfo,
        mut suppliers: Vec<Option<PeerId>>,
    ) -> Self {
        suppliers.resize(scheme.suppliers, None);
        let fragments = BlockFragments::empty(&scheme);
        Self {
            backup_id,
            scheme,
            suppliers,
            codec: ctx.codec.clone(),
            store: ctx.store.clone(),
            peers: ctx.peers.clone(),
            observer: ctx.observer.clone(),
            keep_local_copies: ctx.config.keep_local_copies,
            stall_after: ctx.config.stall_after,
            state: RestoreState::Startup,
            block: 0,
            next_block: 0,
            fragments,
            outstanding: HashSet::new(),
            failed_slots: BTreeSet::new(),
            last_action: Instant::now(),
            pending_len: 0,
            pending_last: false,
            blocks_restored: 0,
            bytes_written: 0,
        }
    }

    pub fn state(&self) -> RestoreState {
        self.state
    }

    pub fn backup_id(&self) -> &BackupId {
        &self.backup_id
    }

    pub fn scheme(&self) -> &SchemeInfo {
        &self.scheme
    }

    /// Block currently (or last) being restored.
    pub fn block_number(&self) -> u64 {
        self.block
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Requests issued for the current block and not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Fragments on hand for the current block as (data, parity) bitmaps.
    pub fn on_hand(&self) -> (Vec<bool>, Vec<bool>) {
        (self.fragments.data_bitmap(), self.fragments.parity_bitmap())
    }

    /// Apply one event. Terminal states ignore everything.
    pub fn handle(&mut self, event: RestoreEvent) -> Vec<RestoreAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }

        let from = self.state;
        let actions = match (self.state, event) {
            (_, RestoreEvent::Abort) => self.abort(),
            (RestoreState::Startup, RestoreEvent::Init) => {
                self.state = RestoreState::Running;
                Vec::new()
            }
            (RestoreState::Running, RestoreEvent::Tick) => self.start_block(),
            (RestoreState::Requesting, RestoreEvent::RequestDone { requested, result }) => {
                self.request_done(requested, result)
            }
            (RestoreState::Requesting, RestoreEvent::FixableCheck) => self.try_decode(),
            (RestoreState::Requesting, RestoreEvent::StallCheck) => self.check_stall(),
            (RestoreState::Decoding, RestoreEvent::DecodeDone(result)) => self.decode_done(result),
            (RestoreState::BlockComplete, RestoreEvent::Appended(result)) => self.appended(result),
            (_, RestoreEvent::RequestDone { requested, .. }) => {
                // late answer while decoding; the block no longer needs it
                self.outstanding.remove(&requested);
                Vec::new()
            }
            _ => Vec::new(),
        };

        if self.state != from {
            debug!(
                backup_id = %self.backup_id,
                block = self.block,
                from = %from,
                to = %self.state,
                "Restore transition"
            );
        }
        actions
    }

    fn segments(&self, kind: FragmentKind) -> usize {
        match kind {
            FragmentKind::Data => self.scheme.data_segments,
            FragmentKind::Parity => self.scheme.parity_segments,
        }
    }

    fn slot_mut(&mut self, kind: FragmentKind, slot: usize) -> Option<&mut Option<Vec<u8>>> {
        match kind {
            FragmentKind::Data => self.fragments.data.get_mut(slot),
            FragmentKind::Parity => self.fragments.parity.get_mut(slot),
        }
    }

    fn has(&self, kind: FragmentKind, slot: usize) -> bool {
        let segment = match kind {
            FragmentKind::Data => self.fragments.data.get(slot),
            FragmentKind::Parity => self.fragments.parity.get(slot),
        };
        matches!(segment, Some(Some(_)))
    }

    fn fragment_id(&self, slot: usize, kind: FragmentKind) -> FragmentId {
        FragmentId::new(self.backup_id.clone(), self.block, slot, kind)
    }

    fn start_block(&mut self) -> Vec<RestoreAction> {
        self.block = self.next_block;
        self.next_block += 1;
        self.fragments = BlockFragments::empty(&self.scheme);
        self.outstanding.clear();
        self.failed_slots.clear();
        self.last_action = Instant::now();
        self.state = RestoreState::Requesting;

        self.refresh()
    }

    /// Pick up local fragments, then either decode or ask the suppliers
    /// for whatever is still missing.
    fn refresh(&mut self) -> Vec<RestoreAction> {
        self.scan_local();
        let decode = self.try_decode();
        if !decode.is_empty() {
            return decode;
        }
        self.request_missing()
    }

    fn scan_local(&mut self) {
        let mut found = 0;
        for kind in KINDS {
            for slot in 0..self.segments(kind) {
                if self.has(kind, slot) {
                    continue;
                }
                let id = self.fragment_id(slot, kind);
                if !self.store.exists(&id) {
                    continue;
                }
                match self.store.read(&id) {
                    Ok(payload) if payload.is_empty() => {
                        debug!(fragment = %id, "Ignoring empty local fragment");
                    }
                    Ok(payload) => {
                        if let Some(segment) = self.slot_mut(kind, slot) {
                            *segment = Some(payload);
                            found += 1;
                        }
                    }
                    Err(e) => warn!(fragment = %id, error = %e, "Failed to read local fragment"),
                }
            }
        }
        debug!(backup_id = %self.backup_id, block = self.block, found, "Scanned local fragments");
    }

    fn request_missing(&mut self) -> Vec<RestoreAction> {
        let mut actions = Vec::new();
        for slot in 0..self.suppliers.len() {
            let Some(peer) = self.suppliers[slot].clone() else {
                continue;
            };
            if self.failed_slots.contains(&slot) || !self.peers.is_online(&peer) {
                continue;
            }
            for kind in KINDS {
                if slot >= self.segments(kind) || self.has(kind, slot) {
                    continue;
                }
                let id = self.fragment_id(slot, kind);
                if self.outstanding.insert(id.clone()) {
                    actions.push(RestoreAction::Request {
                        peer: peer.clone(),
                        fragment: id,
                    });
                }
            }
        }
        debug!(
            backup_id = %self.backup_id,
            block = self.block,
            requested = actions.len(),
            "Requested fragments"
        );
        actions
    }

    fn request_done(
        &mut self,
        requested: FragmentId,
        result: Result<Fragment, RequestError>,
    ) -> Vec<RestoreAction> {
        if !self.outstanding.remove(&requested) {
            return Vec::new();
        }

        match result {
            Ok(fragment) => {
                if let Some(actions) = self.fragment_arrived(fragment) {
                    return actions;
                }
            }
            Err(error) => {
                debug!(fragment = %requested, error = %error, "Fragment request failed");
                if error.is_permanent() {
                    if let Some(actions) = self.slot_failed(requested.slot) {
                        return actions;
                    }
                }
            }
        }

        if self.outstanding.is_empty() {
            self.try_decode()
        } else {
            Vec::new()
        }
    }

    /// Count a supplier slot as failed; fails the session once the
    /// scheme's budget is exceeded.
    fn slot_failed(&mut self, slot: usize) -> Option<Vec<RestoreAction>> {
        self.failed_slots.insert(slot);
        let budget = self.scheme.correctable_errors;
        if self.failed_slots.len() > budget {
            let failed = self.failed_slots.len();
            return Some(self.fail(RestoreError::Uncorrectable {
                block: self.block,
                failed,
                budget,
            }));
        }
        None
    }

    /// Segment length the fragments on hand agree on: the most common
    /// length, once at least two fragments share it and no other length
    /// is as common.
    fn agreed_len(&self) -> Option<usize> {
        let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
        for segment in self.fragments.data.iter().chain(self.fragments.parity.iter()).flatten() {
            *counts.entry(segment.len()).or_default() += 1;
        }
        let mut ranked: Vec<(usize, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        match ranked.as_slice() {
            [(len, top), rest @ ..] if *top >= 2 && rest.first().map_or(true, |(_, next)| next < top) => {
                Some(*len)
            }
            _ => None,
        }
    }

    fn fragment_arrived(&mut self, fragment: Fragment) -> Option<Vec<RestoreAction>> {
        let Fragment { id, payload } = fragment;
        if id.backup_id != self.backup_id || id.slot >= self.segments(id.kind) {
            debug!(fragment = %id, "Dropping fragment that does not belong to this restore");
            return None;
        }
        if id.block_number != self.block {
            debug!(fragment = %id, block = self.block, "Dropping fragment for another block");
            return None;
        }

        let expected = self.agreed_len();
        if payload.is_empty() || expected.is_some_and(|len| len != payload.len()) {
            warn!(
                fragment = %id,
                bytes = payload.len(),
                expected = ?expected,
                "Rejecting fragment with a bad length"
            );
            return self.slot_failed(id.slot);
        }

        if let Err(e) = self.store.write(&id, &payload) {
            warn!(fragment = %id, error = %e, "Failed to cache fragment locally");
        }
        self.last_action = Instant::now();
        if let Some(observer) = &self.observer {
            observer.fragment_received(&self.backup_id, id.slot, id.kind, payload.len());
        }
        if let Some(segment) = self.slot_mut(id.kind, id.slot) {
            *segment = Some(payload);
        }
        None
    }

    /// Drop fragments on hand whose length disagrees with the rest,
    /// including cached copies, and count their slots as failed.
    fn discard_mismatched(&mut self) -> Option<Vec<RestoreAction>> {
        let expected = self.agreed_len()?;
        let mut mismatched = Vec::new();
        for kind in KINDS {
            let segments = match kind {
                FragmentKind::Data => &self.fragments.data,
                FragmentKind::Parity => &self.fragments.parity,
            };
            for (slot, segment) in segments.iter().enumerate() {
                if segment.as_ref().is_some_and(|s| s.len() != expected) {
                    mismatched.push((kind, slot));
                }
            }
        }

        for (kind, slot) in mismatched {
            let id = self.fragment_id(slot, kind);
            warn!(fragment = %id, expected, "Discarding fragment with a bad length");
            if let Some(segment) = self.slot_mut(kind, slot) {
                *segment = None;
            }
            if let Err(e) = self.store.remove(&id) {
                warn!(fragment = %id, error = %e, "Failed to remove local fragment");
            }
            if let Some(actions) = self.slot_failed(slot) {
                return Some(actions);
            }
        }
        None
    }

    /// Move to DECODING if the fragments on hand make the block fixable.
    fn try_decode(&mut self) -> Vec<RestoreAction> {
        if let Some(actions) = self.discard_mismatched() {
            return actions;
        }
        let fixable = self.codec.is_fixable(
            &self.scheme.name,
            &self.fragments.data_bitmap(),
            &self.fragments.parity_bitmap(),
        );
        if !fixable {
            return Vec::new();
        }

        self.state = RestoreState::Decoding;
        vec![RestoreAction::Decode {
            block_number: self.block,
            fragments: std::mem::take(&mut self.fragments),
        }]
    }

    fn check_stall(&mut self) -> Vec<RestoreAction> {
        if self.last_action.elapsed() <= self.stall_after {
            return Vec::new();
        }
        info!(
            backup_id = %self.backup_id,
            block = self.block,
            "No progress, re-scanning and re-requesting fragments"
        );
        self.last_action = Instant::now();
        self.refresh()
    }

    fn decode_done(&mut self, result: Result<Vec<u8>, CodecError>) -> Vec<RestoreAction> {
        let padded = match result {
            Ok(padded) => padded,
            Err(e) => return self.fail(RestoreError::DecodeFailed(e)),
        };
        let envelope = match BlockEnvelope::from_padded(&padded) {
            Ok(envelope) => envelope,
            Err(e) => return self.fail(RestoreError::InvalidBlock(e.to_string())),
        };
        if envelope.backup_id != self.backup_id.to_string() || envelope.block_number != self.block {
            let reason = format!(
                "expected {} block {}, got {} block {}",
                self.backup_id, self.block, envelope.backup_id, envelope.block_number
            );
            return self.fail(RestoreError::InvalidBlock(reason));
        }

        self.state = RestoreState::BlockComplete;
        self.pending_len = envelope.data.len();
        self.pending_last = envelope.last_block;
        vec![RestoreAction::Append {
            block_number: self.block,
            data: envelope.data,
        }]
    }

    fn appended(&mut self, result: Result<(), std::io::Error>) -> Vec<RestoreAction> {
        if let Err(e) = result {
            return self.fail(RestoreError::Sink(e));
        }

        self.bytes_written += self.pending_len as u64;
        self.blocks_restored += 1;
        if let Some(observer) = &self.observer {
            observer.block_restored(&self.backup_id, self.block, self.pending_len);
        }
        if !self.keep_local_copies {
            self.remove_local();
        }
        self.outstanding.clear();

        if self.pending_last {
            self.state = RestoreState::Done;
            info!(
                backup_id = %self.backup_id,
                blocks = self.blocks_restored,
                bytes = self.bytes_written,
                "Restore finished"
            );
            vec![
                RestoreAction::CancelAll,
                RestoreAction::CloseSink,
                RestoreAction::Resolve(Ok(self.report())),
            ]
        } else {
            self.state = RestoreState::Running;
            vec![RestoreAction::CancelBlock(self.block)]
        }
    }

    fn remove_local(&self) {
        for kind in KINDS {
            for slot in 0..self.segments(kind) {
                let id = self.fragment_id(slot, kind);
                if let Err(e) = self.store.remove(&id) {
                    warn!(fragment = %id, error = %e, "Failed to remove local fragment");
                }
            }
        }
    }

    fn report(&self) -> RestoreReport {
        RestoreReport {
            backup_id: self.backup_id.clone(),
            blocks: self.blocks_restored,
            bytes_written: self.bytes_written,
        }
    }

    fn abort(&mut self) -> Vec<RestoreAction> {
        info!(backup_id = %self.backup_id, block = self.block, "Restore aborted");
        self.state = RestoreState::Aborted;
        self.terminate(Err(RestoreError::Aborted))
    }

    fn fail(&mut self, error: RestoreError) -> Vec<RestoreAction> {
        warn!(backup_id = %self.backup_id, block = self.block, error = %error, "Restore failed");
        self.state = RestoreState::Failed;
        self.terminate(Err(error))
    }

    fn terminate(&mut self, outcome: Result<RestoreReport, RestoreError>) -> Vec<RestoreAction> {
        self.outstanding.clear();
        self.fragments = BlockFragments::default();
        vec![
            RestoreAction::CancelAll,
            RestoreAction::CloseSink,
            RestoreAction::Resolve(outcome),
        ]
    }
}
