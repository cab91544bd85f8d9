//! Service negotiation messages and the transport that carries them.
//!
//! The transport is a boundary: the crate builds the payloads and
//! interprets replies, delivery and signing belong to the caller.

use crate::ids::PeerId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Service name negotiated with suppliers.
pub const SUPPLIER_SERVICE: &str = "service_supplier";

/// Queue a supplier publishes file modifications on.
pub const FILE_MODIFIED_QUEUE: &str = "supplier-file-modified";

/// Method the customer consumes queue events with.
pub const QUEUE_CALLBACK_METHOD: &str = "customer_supplier_file_modified";

/// Transport failure for a negotiation message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Supplier unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Payload encoding failed: {0}")]
    Encoding(String),
}

/// Supplier reply to a negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
    /// Positive or negative acknowledgement; see `ServiceAck`
    Ack(String),
    /// The supplier answered with a failure packet
    Fail(String),
}

/// Payload of a service request to a supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplierServiceInfo {
    pub needed_bytes: u64,
    pub customer_id: String,
}

/// One item of a queue subscription exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub scope: String,
    pub action: String,
    pub consumer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
}

impl QueueItem {
    fn consumer(action: &str, consumer_id: &str) -> Self {
        Self {
            scope: "consumer".to_string(),
            action: action.to_string(),
            consumer_id: consumer_id.to_string(),
            method: None,
            queue_id: None,
        }
    }
}

/// Global id of the queue `alias` owned by `owner` and served by `supplier`.
pub fn queue_id(alias: &str, owner: &PeerId, supplier: &PeerId) -> String {
    format!("{}&{}&{}", alias, owner, supplier)
}

/// Negotiation message sent to a supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceRequest {
    /// Ask the supplier to start storing for the customer
    RequestService {
        service: String,
        info: SupplierServiceInfo,
    },
    /// Ask the supplier to stop storing for the customer
    CancelService { service: String },
    /// Subscribe to (or unsubscribe from) the supplier's queue
    Queue { items: Vec<QueueItem> },
}

impl ServiceRequest {
    pub fn request_service(needed_bytes: u64, customer: &PeerId) -> Self {
        ServiceRequest::RequestService {
            service: SUPPLIER_SERVICE.to_string(),
            info: SupplierServiceInfo {
                needed_bytes,
                customer_id: customer.to_string(),
            },
        }
    }

    pub fn cancel_service() -> Self {
        ServiceRequest::CancelService {
            service: SUPPLIER_SERVICE.to_string(),
        }
    }

    /// start, add_callback, subscribe on the file-modified queue.
    pub fn subscribe_queue(customer: &PeerId, supplier: &PeerId) -> Self {
        let consumer = customer.as_str();
        ServiceRequest::Queue {
            items: vec![
                QueueItem::consumer("start", consumer),
                QueueItem {
                    method: Some(QUEUE_CALLBACK_METHOD.to_string()),
                    ..QueueItem::consumer("add_callback", consumer)
                },
                QueueItem {
                    queue_id: Some(queue_id(FILE_MODIFIED_QUEUE, customer, supplier)),
                    ..QueueItem::consumer("subscribe", consumer)
                },
            ],
        }
    }

    /// Inverse of `subscribe_queue`, in reverse order.
    pub fn unsubscribe_queue(customer: &PeerId, supplier: &PeerId) -> Self {
        let consumer = customer.as_str();
        ServiceRequest::Queue {
            items: vec![
                QueueItem {
                    queue_id: Some(queue_id(FILE_MODIFIED_QUEUE, customer, supplier)),
                    ..QueueItem::consumer("unsubscribe", consumer)
                },
                QueueItem {
                    method: Some(QUEUE_CALLBACK_METHOD.to_string()),
                    ..QueueItem::consumer("remove_callback", consumer)
                },
                QueueItem::consumer("stop", consumer),
            ],
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServiceRequest::RequestService { .. } => "request_service",
            ServiceRequest::CancelService { .. } => "cancel_service",
            ServiceRequest::Queue { .. } => "queue",
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Encoding(e.to_string()))
    }
}

/// Delivers negotiation messages to suppliers.
///
/// Each call resolves exactly once with the supplier's reply or a
/// transport failure. `request_id` correlates the reply.
#[async_trait]
pub trait ServiceTransport: Send + Sync {
    async fn send(
        &self,
        supplier: &PeerId,
        request_id: Uuid,
        request: ServiceRequest,
    ) -> Result<ServiceReply, TransportError>;
}
