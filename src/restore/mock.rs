//! Scripted fragment request queue for tests.

use super::traits::{Fragment, FragmentRequestQueue, RequestError};
use crate::codec::BlockFragments;
use crate::ids::{BackupId, FragmentId, FragmentKind, PeerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How the mock answers a request for one fragment.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Deliver this payload under the requested id
    Deliver(Vec<u8>),
    /// Deliver a fragment with a different id (late or misrouted answer)
    DeliverAs(FragmentId, Vec<u8>),
    Fail(RequestError),
    /// Answer after a delay
    Delay(Duration, Box<MockResponse>),
    /// Never answer
    Hang,
}

/// Mock queue; fragments without a scripted response never answer.
#[derive(Clone, Default)]
pub struct MockFragmentQueue {
    state: Arc<Mutex<QueueState>>,
}

#[derive(Default)]
struct QueueState {
    responses: HashMap<FragmentId, MockResponse>,
    requests: Vec<(PeerId, FragmentId)>,
    cancelled_blocks: Vec<(BackupId, u64)>,
    cancelled_backups: Vec<BackupId>,
}

impl MockFragmentQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for one fragment.
    pub fn respond(&self, id: FragmentId, response: MockResponse) {
        self.state.lock().unwrap().responses.insert(id, response);
    }

    /// Deliver every fragment present in `fragments` for one block.
    pub fn serve_block(&self, backup_id: &BackupId, block_number: u64, fragments: &BlockFragments) {
        for (kind, segments) in [
            (FragmentKind::Data, &fragments.data),
            (FragmentKind::Parity, &fragments.parity),
        ] {
            for (slot, payload) in segments.iter().enumerate() {
                if let Some(payload) = payload {
                    let id = FragmentId::new(backup_id.clone(), block_number, slot, kind);
                    self.respond(id, MockResponse::Deliver(payload.clone()));
                }
            }
        }
    }

    /// Every request made so far, in order.
    pub fn requests(&self) -> Vec<(PeerId, FragmentId)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn cancelled_blocks(&self) -> Vec<(BackupId, u64)> {
        self.state.lock().unwrap().cancelled_blocks.clone()
    }

    pub fn cancelled_backups(&self) -> Vec<BackupId> {
        self.state.lock().unwrap().cancelled_backups.clone()
    }
}

#[async_trait]
impl FragmentRequestQueue for MockFragmentQueue {
    async fn request(&self, peer: &PeerId, id: &FragmentId) -> Result<Fragment, RequestError> {
        let mut response = {
            let mut state = self.state.lock().unwrap();
            state.requests.push((peer.clone(), id.clone()));
            state.responses.get(id).cloned().unwrap_or(MockResponse::Hang)
        };

        loop {
            match response {
                MockResponse::Deliver(payload) => return Ok(Fragment::new(id.clone(), payload)),
                MockResponse::DeliverAs(other, payload) => return Ok(Fragment::new(other, payload)),
                MockResponse::Fail(e) => return Err(e),
                MockResponse::Delay(delay, next) => {
                    tokio::time::sleep(delay).await;
                    response = *next;
                }
                MockResponse::Hang => return futures::future::pending().await,
            }
        }
    }

    fn cancel_block(&self, backup_id: &BackupId, block_number: u64) {
        self.state
            .lock()
            .unwrap()
            .cancelled_blocks
            .push((backup_id.clone(), block_number));
    }

    fn cancel_backup(&self, backup_id: &BackupId) {
        self.state
            .lock()
            .unwrap()
            .cancelled_backups
            .push(backup_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(slot: usize) -> FragmentId {
        FragmentId::new(BackupId::new("0/0", "F1"), 0, slot, FragmentKind::Data)
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_responses() {
        let queue = MockFragmentQueue::new();
        queue.respond(id(0), MockResponse::Deliver(vec![1, 2]));
        queue.respond(
            id(1),
            MockResponse::Delay(
                Duration::from_secs(3),
                Box::new(MockResponse::Fail(RequestError::Refused)),
            ),
        );

        let peer = PeerId::new("s0");
        let fragment = queue.request(&peer, &id(0)).await.unwrap();
        assert_eq!(fragment.payload, vec![1, 2]);

        let started = tokio::time::Instant::now();
        assert_eq!(queue.request(&peer, &id(1)).await, Err(RequestError::Refused));
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(queue.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_unscripted_request_hangs() {
        let queue = MockFragmentQueue::new();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            queue.request(&PeerId::new("s0"), &id(0)),
        )
        .await;
        assert!(result.is_err());
    }
}
