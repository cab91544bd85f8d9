//! Scripted service transport for tests.

use super::transport::{ServiceReply, ServiceRequest, ServiceTransport, TransportError};
use crate::ids::PeerId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// How the mock answers one kind of request.
#[derive(Debug, Clone)]
pub enum MockReply {
    Reply(ServiceReply),
    Error(TransportError),
    /// Never answer; the connector's timer has to fire
    Hang,
}

/// A message the mock has been asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRequest {
    pub supplier: PeerId,
    pub request_id: Uuid,
    pub request: ServiceRequest,
}

/// Mock transport answering per request kind (`ServiceRequest::kind`).
#[derive(Clone)]
pub struct MockServiceTransport {
    state: Arc<Mutex<MockState>>,
}

struct MockState {
    replies: HashMap<&'static str, MockReply>,
    sent: Vec<SentRequest>,
}

impl MockServiceTransport {
    /// Transport that never answers anything.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                replies: HashMap::new(),
                sent: Vec::new(),
            })),
        }
    }

    /// Transport whose suppliers accept service, queue and cancel requests.
    pub fn accepting() -> Self {
        let mock = Self::new();
        mock.on("request_service", MockReply::Reply(ServiceReply::Ack("accepted".into())));
        mock.on("queue", MockReply::Reply(ServiceReply::Ack("ok".into())));
        mock.on("cancel_service", MockReply::Reply(ServiceReply::Ack("accepted".into())));
        mock
    }

    /// Script the reply for a request kind.
    pub fn on(&self, kind: &'static str, reply: MockReply) {
        self.state.lock().unwrap().replies.insert(kind, reply);
    }

    pub fn sent(&self) -> Vec<SentRequest> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent().iter().map(|s| s.request.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent().iter().filter(|s| s.request.kind() == kind).count()
    }
}

impl Default for MockServiceTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceTransport for MockServiceTransport {
    async fn send(
        &self,
        supplier: &PeerId,
        request_id: Uuid,
        request: ServiceRequest,
    ) -> Result<ServiceReply, TransportError> {
        let reply = {
            let mut state = self.state.lock().unwrap();
            let reply = state
                .replies
                .get(request.kind())
                .cloned()
                .unwrap_or(MockReply::Hang);
            state.sent.push(SentRequest {
                supplier: supplier.clone(),
                request_id,
                request,
            });
            reply
        };

        match reply {
            MockReply::Reply(reply) => Ok(reply),
            MockReply::Error(e) => Err(e),
            MockReply::Hang => futures::future::pending().await,
        }
    }
}
