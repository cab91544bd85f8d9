//! Integration tests for restoring a backup through the public API.
//!
//! These tests drive complete sessions against a filesystem fragment store:
//! - Local fragments are used first, the network only fills the gaps
//! - An aborted restore resumes from the fragments it already cached
//! - Local copies are removed when the session is told not to keep them
//! - The monitor refuses a second restore of the same backup
//!
//! Suppliers are simulated with the shipped `MockFragmentQueue`.

use custodia::codec::{encode_backup, BlockFragments, XorParityCodec};
use custodia::ids::{BackupId, FragmentId, FragmentKind, PeerId};
use custodia::restore::mock::{MockFragmentQueue, MockResponse};
use custodia::restore::{
    RequestError, RestoreConfig, RestoreContext, RestoreError, RestoreMonitor, RestoreRequest,
    RestoreSession, StaticPeerStatus,
};
use custodia::store::{write_block, FragmentStore, FsFragmentStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

// === Test Fixtures ===

const SCHEME: &str = "ecc/4x4";

fn backup() -> BackupId {
    BackupId::new("0/0/3", "F20240315")
}

fn suppliers() -> Vec<Option<PeerId>> {
    (0..4).map(|i| Some(PeerId::new(format!("supplier-{}", i)))).collect()
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn encode(payload: &[u8]) -> Vec<BlockFragments> {
    encode_backup(&XorParityCodec::new(), SCHEME, &backup(), payload, 1024).unwrap()
}

fn context(queue: &MockFragmentQueue, store: Arc<FsFragmentStore>) -> RestoreContext {
    RestoreContext::new(
        Arc::new(queue.clone()),
        Arc::new(XorParityCodec::new()),
        store,
        Arc::new(StaticPeerStatus::new(suppliers().into_iter().flatten())),
    )
}

fn request() -> RestoreRequest {
    RestoreRequest::new(backup(), SCHEME, suppliers())
}

/// Run a session to completion and return its output.
async fn restore(session: RestoreSession, mut output: tokio::io::DuplexStream) -> Vec<u8> {
    let report = session.wait().await.unwrap();
    let mut restored = Vec::new();
    output.read_to_end(&mut restored).await.unwrap();
    assert_eq!(report.bytes_written, restored.len() as u64);
    restored
}

fn fragment_ids(blocks: &[BlockFragments]) -> Vec<FragmentId> {
    let mut ids = Vec::new();
    for (block, fragments) in blocks.iter().enumerate() {
        for slot in 0..fragments.data.len() {
            for kind in [FragmentKind::Data, FragmentKind::Parity] {
                ids.push(FragmentId::new(backup(), block as u64, slot, kind));
            }
        }
    }
    ids
}

// === Tests ===

#[tokio::test(start_paused = true)]
async fn test_local_fragments_first_network_for_the_rest() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsFragmentStore::new(temp_dir.path()));
    let payload = payload(3000);
    let blocks = encode(&payload);
    assert_eq!(blocks.len(), 3);

    // half of every block is already on disk
    let queue = MockFragmentQueue::new();
    for (block, fragments) in blocks.iter().enumerate() {
        let mut local = BlockFragments::default();
        let mut remote = BlockFragments::default();
        for slot in 0..4 {
            let data = fragments.data[slot].clone();
            if slot < 2 {
                local.data.push(data);
                remote.data.push(None);
            } else {
                local.data.push(None);
                remote.data.push(data);
            }
            local.parity.push(None);
            remote.parity.push(fragments.parity[slot].clone());
        }
        write_block(store.as_ref(), &backup(), block as u64, &local).unwrap();
        queue.serve_block(&backup(), block as u64, &remote);
    }

    let (sink, output) = tokio::io::duplex(64 * 1024);
    let session = RestoreSession::start(context(&queue, store), request(), sink).unwrap();
    assert_eq!(restore(session, output).await, payload);

    // locally held data segments are never requested
    for (_, id) in queue.requests() {
        assert!(
            !(id.kind == FragmentKind::Data && id.slot < 2),
            "requested local fragment {}",
            id
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_aborted_restore_resumes_from_cache() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsFragmentStore::new(temp_dir.path()));
    let payload = payload(2000);
    let blocks = encode(&payload);

    // first run: block 0 arrives, block 1 never does
    let first = MockFragmentQueue::new();
    first.serve_block(&backup(), 0, &blocks[0]);
    let session = RestoreSession::start(context(&first, store.clone()), request(), tokio::io::sink()).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    session.abort();
    assert!(matches!(session.wait().await, Err(RestoreError::Aborted)));
    assert!(store.exists(&FragmentId::new(backup(), 0, 3, FragmentKind::Parity)));

    // second run: only block 1 goes to the network
    let second = MockFragmentQueue::new();
    second.serve_block(&backup(), 1, &blocks[1]);
    let (sink, output) = tokio::io::duplex(64 * 1024);
    let session = RestoreSession::start(context(&second, store), request(), sink).unwrap();
    assert_eq!(restore(session, output).await, payload);

    assert!(!second.requests().is_empty());
    assert!(second.requests().iter().all(|(_, id)| id.block_number == 1));
}

#[tokio::test(start_paused = true)]
async fn test_local_copies_removed_when_not_kept() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsFragmentStore::new(temp_dir.path()));
    let payload = payload(2500);
    let blocks = encode(&payload);
    for (block, fragments) in blocks.iter().enumerate() {
        write_block(store.as_ref(), &backup(), block as u64, fragments).unwrap();
    }

    let queue = MockFragmentQueue::new();
    let ctx = context(&queue, store.clone()).with_config(RestoreConfig {
        keep_local_copies: false,
        ..RestoreConfig::default()
    });
    let (sink, output) = tokio::io::duplex(64 * 1024);
    let session = RestoreSession::start(ctx, request(), sink).unwrap();
    assert_eq!(restore(session, output).await, payload);

    assert!(queue.requests().is_empty());
    for id in fragment_ids(&blocks) {
        assert!(!store.exists(&id), "{} still on disk", id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_monitor_runs_one_session_per_backup() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(FsFragmentStore::new(temp_dir.path()));
    let payload = payload(1500);
    let blocks = encode(&payload);

    // every first attempt at block 0 times out
    let queue = MockFragmentQueue::new();
    for id in fragment_ids(&blocks[..1]) {
        queue.respond(id, MockResponse::Fail(RequestError::Timeout));
    }
    let monitor = RestoreMonitor::new();
    let (sink, output) = tokio::io::duplex(64 * 1024);
    let session = monitor.start(context(&queue, store.clone()), request(), sink).unwrap();

    let duplicate = monitor.start(context(&queue, store.clone()), request(), tokio::io::sink());
    assert!(matches!(duplicate, Err(RestoreError::AlreadyRunning(id)) if id == backup()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(queue.requests().len(), 8);
    assert!(monitor.is_working(&backup()));

    // suppliers come back; the stall re-scan asks again
    for (block, fragments) in blocks.iter().enumerate() {
        queue.serve_block(&backup(), block as u64, fragments);
    }
    let config = RestoreConfig::default();
    tokio::time::sleep(config.stall_after + config.stall_check).await;

    assert_eq!(restore(session, output).await, payload);
    assert!(!monitor.is_working(&backup()));

    // once finished the backup can be restored again
    let again = monitor.start(context(&queue, store), request(), tokio::io::sink()).unwrap();
    again.wait().await.unwrap();
}
