//! Async driver of a restore session.
//!
//! The session task owns the machine, the sink, every in-flight fragment
//! request and the decode worker. Events come from four places:
//!
//! - the abort signal (checked first on every wake-up)
//! - completed fragment requests
//! - the decode worker on the blocking pool
//! - the tick, fixability and stall timers
//!
//! Requests are wrapped in `Abortable` so a finished block can drop its
//! stragglers without waiting for them; nothing runs for the session once
//! it has resolved.

use super::config::RestoreConfig;
use super::machine::{RestoreAction, RestoreEvent, RestoreMachine};
use super::traits::{Fragment, FragmentRequestQueue, PeerStatus, RequestError, RestoreObserver};
use super::{RestoreError, RestoreReport};
use crate::codec::{CodecError, ErasureCodec};
use crate::ids::{BackupId, FragmentId, PeerId};
use crate::store::FragmentStore;
use futures::future::{self, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

type Outcome = Result<RestoreReport, RestoreError>;

type RequestFuture = BoxFuture<'static, Option<(FragmentId, Result<Fragment, RequestError>)>>;

/// Collaborators shared by restore sessions.
#[derive(Clone)]
pub struct RestoreContext {
    pub queue: Arc<dyn FragmentRequestQueue>,
    pub codec: Arc<dyn ErasureCodec>,
    pub store: Arc<dyn FragmentStore>,
    pub peers: Arc<dyn PeerStatus>,
    pub observer: Option<Arc<dyn RestoreObserver>>,
    pub config: RestoreConfig,
}

impl RestoreContext {
    pub fn new(
        queue: Arc<dyn FragmentRequestQueue>,
        codec: Arc<dyn ErasureCodec>,
        store: Arc<dyn FragmentStore>,
        peers: Arc<dyn PeerStatus>,
    ) -> Self {
        Self {
            queue,
            codec,
            store,
            peers,
            observer: None,
            config: RestoreConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RestoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RestoreObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

/// What to restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreRequest {
    pub backup_id: BackupId,
    /// Erasure scheme the backup was written with
    pub scheme: String,
    /// Supplier per slot; `None` marks an empty slot
    pub suppliers: Vec<Option<PeerId>>,
}

impl RestoreRequest {
    pub fn new(backup_id: BackupId, scheme: impl Into<String>, suppliers: Vec<Option<PeerId>>) -> Self {
        Self {
            backup_id,
            scheme: scheme.into(),
            suppliers,
        }
    }
}

/// Requests abort of a running session. Idempotent.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A running restore.
///
/// Dropping the session does not stop it; call `abort` for that.
pub struct RestoreSession {
    backup_id: BackupId,
    abort: AbortHandle,
    task: JoinHandle<Outcome>,
}

impl RestoreSession {
    /// Spawn a session restoring `request` into `sink`, starting at block 0.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<W>(ctx: RestoreContext, request: RestoreRequest, sink: W) -> Result<Self, RestoreError>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let scheme = ctx.codec.scheme(&request.scheme).map_err(RestoreError::Scheme)?;
        let backup_id = request.backup_id.clone();
        let machine = RestoreMachine::new(&ctx, request.backup_id, scheme, request.suppliers);

        let (tx, rx) = watch::channel(false);
        let driver = Driver {
            machine,
            queue: ctx.queue,
            codec: ctx.codec,
            observer: ctx.observer,
            config: ctx.config,
            sink: Box::new(sink),
            abort: rx,
            in_flight: FuturesUnordered::new(),
            requests: HashMap::new(),
            decode: None,
            close_error: None,
            resolved: false,
        };

        info!(backup_id = %backup_id, "Restore started");
        Ok(Self {
            backup_id,
            abort: AbortHandle { tx: Arc::new(tx) },
            task: tokio::spawn(driver.run()),
        })
    }

    pub fn backup_id(&self) -> &BackupId {
        &self.backup_id
    }

    /// Abort the session; its outcome becomes `RestoreError::Aborted`
    /// unless it already resolved.
    pub fn abort(&self) {
        self.abort.abort();
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the session to resolve.
    pub async fn wait(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(backup_id = %self.backup_id, error = %e, "Restore task did not complete");
                Err(RestoreError::Cancelled)
            }
        }
    }
}

struct Driver {
    machine: RestoreMachine,
    queue: Arc<dyn FragmentRequestQueue>,
    codec: Arc<dyn ErasureCodec>,
    observer: Option<Arc<dyn RestoreObserver>>,
    config: RestoreConfig,
    sink: Box<dyn AsyncWrite + Unpin + Send>,
    abort: watch::Receiver<bool>,
    in_flight: FuturesUnordered<RequestFuture>,
    requests: HashMap<FragmentId, future::AbortHandle>,
    decode: Option<JoinHandle<Result<Vec<u8>, CodecError>>>,
    close_error: Option<std::io::Error>,
    resolved: bool,
}

impl Driver {
    async fn run(mut self) -> Outcome {
        let mut tick = interval(self.config.tick);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let now = Instant::now();
        let mut fixable = interval_at(now + self.config.fixable_check, self.config.fixable_check);
        fixable.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stall = interval_at(now + self.config.stall_check, self.config.stall_check);
        stall.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut abort_open = true;
        let mut pending = VecDeque::from([RestoreEvent::Init]);

        loop {
            while let Some(event) = pending.pop_front() {
                for action in self.machine.handle(event) {
                    if let Some(outcome) = self.execute(action, &mut pending).await {
                        self.finish(&outcome);
                        return outcome;
                    }
                }
            }

            let event = tokio::select! {
                biased;

                changed = self.abort.changed(), if abort_open => match changed {
                    Ok(()) if *self.abort.borrow() => RestoreEvent::Abort,
                    Ok(()) => continue,
                    Err(_) => {
                        // every abort handle is gone; run to completion
                        abort_open = false;
                        continue;
                    }
                },
                Some(done) = self.in_flight.next(), if !self.in_flight.is_empty() => match done {
                    Some((requested, result)) => {
                        self.requests.remove(&requested);
                        RestoreEvent::RequestDone { requested, result }
                    }
                    None => continue,
                },
                result = join_decode(&mut self.decode), if self.decode.is_some() => {
                    self.decode = None;
                    RestoreEvent::DecodeDone(result)
                }
                _ = tick.tick() => RestoreEvent::Tick,
                _ = fixable.tick() => RestoreEvent::FixableCheck,
                _ = stall.tick() => RestoreEvent::StallCheck,
            };
            pending.push_back(event);
        }
    }

    async fn execute(&mut self, action: RestoreAction, pending: &mut VecDeque<RestoreEvent>) -> Option<Outcome> {
        match action {
            RestoreAction::Request { peer, fragment } => self.request(peer, fragment),
            RestoreAction::Decode {
                block_number,
                fragments,
            } => {
                debug!(backup_id = %self.machine.backup_id(), block = block_number, "Decoding block");
                let codec = self.codec.clone();
                let scheme = self.machine.scheme().name.clone();
                self.decode = Some(tokio::task::spawn_blocking(move || codec.decode(&scheme, fragments)));
            }
            RestoreAction::Append { block_number, data } => {
                debug!(block = block_number, bytes = data.len(), "Appending block");
                // a sink that stops reading must not hold off abort
                tokio::select! {
                    biased;

                    _ = abort_requested(&mut self.abort) => pending.push_front(RestoreEvent::Abort),
                    result = self.sink.write_all(&data) => pending.push_back(RestoreEvent::Appended(result)),
                }
            }
            RestoreAction::CancelBlock(block_number) => {
                self.cancel_requests(|id| id.block_number == block_number);
                self.queue.cancel_block(self.machine.backup_id(), block_number);
            }
            RestoreAction::CancelAll => {
                self.cancel_requests(|_| true);
                // a running decode is detached; its result is never read
                self.decode = None;
                self.queue.cancel_backup(self.machine.backup_id());
            }
            RestoreAction::CloseSink => {
                if let Err(e) = self.sink.shutdown().await {
                    warn!(backup_id = %self.machine.backup_id(), error = %e, "Failed to close output");
                    self.close_error = Some(e);
                }
            }
            RestoreAction::Resolve(outcome) => {
                return Some(match (outcome, self.close_error.take()) {
                    (Ok(_), Some(e)) => Err(RestoreError::Sink(e)),
                    (outcome, _) => outcome,
                });
            }
        }
        None
    }

    fn request(&mut self, peer: PeerId, fragment: FragmentId) {
        let queue = self.queue.clone();
        let id = fragment.clone();
        let (request, handle) = future::abortable(async move {
            let result = queue.request(&peer, &id).await;
            (id, result)
        });
        self.requests.insert(fragment, handle);
        self.in_flight.push(request.map(Result::ok).boxed());
    }

    fn cancel_requests(&mut self, matches: impl Fn(&FragmentId) -> bool) {
        self.requests.retain(|id, handle| {
            if matches(id) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    fn finish(&mut self, outcome: &Outcome) {
        self.resolved = true;
        let backup_id = self.machine.backup_id();
        match outcome {
            Ok(report) => info!(
                backup_id = %backup_id,
                blocks = report.blocks,
                bytes = report.bytes_written,
                "Restore done"
            ),
            Err(e) => warn!(backup_id = %backup_id, error = %e, "Restore ended"),
        }
        if let Some(observer) = &self.observer {
            observer.finished(backup_id, outcome);
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // panicked or dropped with the runtime; observers still hear about it
        if !self.resolved {
            warn!(backup_id = %self.machine.backup_id(), "Restore task stopped without resolving");
            if let Some(observer) = &self.observer {
                observer.finished(self.machine.backup_id(), &Err(RestoreError::Cancelled));
            }
        }
    }
}

/// Resolves once abort has been requested; never if every handle is gone.
async fn abort_requested(abort: &mut watch::Receiver<bool>) {
    loop {
        if *abort.borrow_and_update() {
            return;
        }
        if abort.changed().await.is_err() {
            future::pending::<()>().await;
        }
    }
}

async fn join_decode(handle: &mut Option<JoinHandle<Result<Vec<u8>, CodecError>>>) -> Result<Vec<u8>, CodecError> {
    match handle {
        Some(handle) => match handle.await {
            Ok(result) => result,
            Err(e) => Err(CodecError::Worker(e.to_string())),
        },
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_backup, BlockFragments, XorParityCodec};
    use crate::ids::FragmentKind;
    use crate::restore::mock::{MockFragmentQueue, MockResponse};
    use crate::restore::StaticPeerStatus;
    use crate::store::MemoryFragmentStore;
    use std::time::Duration;

    const SCHEME: &str = "ecc/4x4";

    fn backup() -> BackupId {
        BackupId::new("0/0/1", "F20240101")
    }

    fn suppliers() -> Vec<Option<PeerId>> {
        (0..4).map(|i| Some(PeerId::new(format!("s{}", i)))).collect()
    }

    fn context(queue: &MockFragmentQueue) -> RestoreContext {
        RestoreContext::new(
            Arc::new(queue.clone()),
            Arc::new(XorParityCodec::new()),
            Arc::new(MemoryFragmentStore::new()),
            Arc::new(StaticPeerStatus::new(suppliers().into_iter().flatten())),
        )
    }

    fn encode(payload: &[u8], block_size: usize) -> Vec<BlockFragments> {
        encode_backup(&XorParityCodec::new(), SCHEME, &backup(), payload, block_size).unwrap()
    }

    fn id(block: u64, slot: usize, kind: FragmentKind) -> FragmentId {
        FragmentId::new(backup(), block, slot, kind)
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_all_blocks_in_order() {
        let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let queue = MockFragmentQueue::new();
        for (block, fragments) in encode(&payload, 1024).iter().enumerate() {
            queue.serve_block(&backup(), block as u64, fragments);
        }

        let (sink, mut output) = tokio::io::duplex(64 * 1024);
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            sink,
        )
        .unwrap();

        let report = session.wait().await.unwrap();
        assert_eq!(report.blocks, 5);
        assert_eq!(report.bytes_written, 5000);

        let mut restored = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut output, &mut restored)
            .await
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decodes_without_waiting_for_silent_supplier() {
        let blocks = encode(b"four suppliers, one silent", 1024);
        let queue = MockFragmentQueue::new();
        let fragments = &blocks[0];
        // XOR parity alone cannot rebuild data 1 from d0, d2 and p3, so
        // suppliers 0 and 2 hand over their parity too
        for slot in [0, 2] {
            queue.respond(id(0, slot, FragmentKind::Data), MockResponse::Deliver(fragments.data[slot].clone().unwrap()));
            queue.respond(id(0, slot, FragmentKind::Parity), MockResponse::Deliver(fragments.parity[slot].clone().unwrap()));
        }
        queue.respond(id(0, 3, FragmentKind::Parity), MockResponse::Deliver(fragments.parity[3].clone().unwrap()));
        queue.respond(id(0, 3, FragmentKind::Data), MockResponse::Fail(RequestError::Timeout));
        // supplier 1 is never scripted, so it never answers

        let started = Instant::now();
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            tokio::io::sink(),
        )
        .unwrap();
        let report = session.wait().await.unwrap();

        assert_eq!(report.bytes_written, 26);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(queue.cancelled_backups(), vec![backup()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_resolves_promptly() {
        let queue = MockFragmentQueue::new();
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            tokio::io::sink(),
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(queue.requests().len(), 8);

        let started = Instant::now();
        session.abort();
        session.abort();
        let outcome = session.wait().await;

        assert!(matches!(outcome, Err(RestoreError::Aborted)));
        assert!(started.elapsed() <= Duration::from_millis(100));
        assert_eq!(queue.cancelled_backups(), vec![backup()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_while_sink_is_blocked() {
        let payload = vec![5u8; 4096];
        let queue = MockFragmentQueue::new();
        for (block, fragments) in encode(&payload, 1024).iter().enumerate() {
            queue.serve_block(&backup(), block as u64, fragments);
        }

        // nobody reads the other end, so the first append never completes
        let (sink, _output) = tokio::io::duplex(16);
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            sink,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!session.is_finished());

        session.abort();
        let outcome = tokio::time::timeout(Duration::from_secs(1), session.wait())
            .await
            .unwrap();
        assert!(matches!(outcome, Err(RestoreError::Aborted)));
        assert_eq!(queue.cancelled_backups(), vec![backup()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_length_prefix_fails_block() {
        let codec = XorParityCodec::new();
        let mut block = format!("{}:", u64::MAX).into_bytes();
        block.resize(64, 0);
        let fragments = codec.encode("ecc/2x2", &block).unwrap();

        let queue = MockFragmentQueue::new();
        queue.serve_block(&backup(), 0, &fragments);
        let suppliers: Vec<_> = suppliers().into_iter().take(2).collect();
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), "ecc/2x2", suppliers),
            tokio::io::sink(),
        )
        .unwrap();

        let outcome = session.wait().await;
        assert!(matches!(outcome, Err(RestoreError::InvalidBlock(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_fragment_from_one_supplier_is_tolerated() {
        let payload: Vec<u8> = (0..80u8).collect();
        let mut fragments = encode(&payload, 1024).remove(0);
        fragments.data[3] = Some(vec![0xAA]);
        let queue = MockFragmentQueue::new();
        queue.serve_block(&backup(), 0, &fragments);

        let (sink, mut output) = tokio::io::duplex(4096);
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            sink,
        )
        .unwrap();

        let report = session.wait().await.unwrap();
        assert_eq!(report.bytes_written, 80);
        let mut restored = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut output, &mut restored)
            .await
            .unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncorrectable_block_fails() {
        let queue = MockFragmentQueue::new();
        for slot in [1, 2] {
            queue.respond(id(0, slot, FragmentKind::Data), MockResponse::Fail(RequestError::NotFound));
        }
        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            tokio::io::sink(),
        )
        .unwrap();

        let outcome = session.wait().await;
        assert!(matches!(
            outcome,
            Err(RestoreError::Uncorrectable { block: 0, failed: 2, budget: 1 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_scheme_is_rejected() {
        let queue = MockFragmentQueue::new();
        let result = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), "ecc/3x3", suppliers()),
            tokio::io::sink(),
        );
        assert!(matches!(result, Err(RestoreError::Scheme(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_blocks_cancel_their_requests() {
        let blocks = encode(&[3u8; 2000], 1024);
        let queue = MockFragmentQueue::new();
        for (block, fragments) in blocks.iter().enumerate() {
            let mut partial = fragments.clone();
            // parity of slot 1 is held back; data alone is enough
            partial.parity[1] = None;
            queue.serve_block(&backup(), block as u64, &partial);
        }

        let session = RestoreSession::start(
            context(&queue),
            RestoreRequest::new(backup(), SCHEME, suppliers()),
            tokio::io::sink(),
        )
        .unwrap();
        session.wait().await.unwrap();

        assert_eq!(queue.cancelled_blocks(), vec![(backup(), 0)]);
    }
}
