//! Supplier connectors.
//!
//! Each (customer, supplier) pair is negotiated by its own connector:
//! request service, subscribe to the supplier's file-modified queue,
//! cancel on disconnect. Consumers only see the coarse label
//! (CONNECTED / DISCONNECTED / NO_SERVICE), which is also persisted so
//! a restart resumes from the last confirmed status.
//!
//! ## Layout
//!
//! - `state`: pure transition table
//! - `connector`: tokio task driving one connector, plus its handle
//! - `registry`: owned map of live connectors
//! - `transport`: negotiation payloads and the delivery boundary
//! - `config`: timers and the needed-bytes policy

pub mod config;
pub mod connector;
pub mod mock;
pub mod registry;
pub mod state;
pub mod transport;

#[cfg(test)]
mod proptests;

pub use config::ConnectorConfig;
pub use connector::{ConnectorError, ConnectorHandle, StatusCallback, SupplierConnector};
pub use registry::ConnectorRegistry;
pub use state::{
    transition, CoarseLabel, ConnectorAction, ConnectorEvent, ConnectorState, ServiceAck,
    Transition,
};
pub use transport::{ServiceReply, ServiceRequest, ServiceTransport, TransportError};
