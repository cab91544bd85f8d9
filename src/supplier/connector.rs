//! Per-supplier negotiation driver.
//!
//! A `SupplierConnector` runs as its own tokio task. It owns the state,
//! the pending-disconnect flag, the in-flight negotiation messages and
//! the state timer; nothing else mutates them. Callers talk to it
//! through a cloneable `ConnectorHandle`.
//!
//! ## Event sources
//!
//! - handle calls (`connect`, `disconnect`, `ack`, `shutdown`, `close`)
//! - transport replies, correlated by request id
//! - the per-state timer (REQUEST: 20s, REFUSE / QUEUE_PENDING: 10s)
//!
//! Coarse labels are written to the `LabelStore` on entering CONNECTED,
//! DISCONNECTED or NO_SERVICE, before observers hear about the change.

use super::config::ConnectorConfig;
use super::state::{
    transition, CoarseLabel, ConnectorAction, ConnectorEvent, ConnectorState, ServiceAck,
};
use super::transport::{ServiceReply, ServiceRequest, ServiceTransport, TransportError};
use crate::ids::PeerId;
use crate::store::{LabelStore, StoreError};
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Observer of coarse status changes: `(supplier, new_label)`.
pub type StatusCallback = Arc<dyn Fn(&PeerId, CoarseLabel) + Send + Sync>;

type Observers = Arc<Mutex<BTreeMap<String, StatusCallback>>>;

type InFlight = FuturesUnordered<BoxFuture<'static, (Uuid, Result<ServiceReply, TransportError>)>>;

/// Connector errors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Connector already exists for supplier {supplier} of customer {customer}")]
    AlreadyExists { customer: PeerId, supplier: PeerId },

    #[error("Connector for supplier {0} is closed")]
    Closed(PeerId),

    #[error("Label store error: {0}")]
    Store(#[from] StoreError),
}

/// Cloneable front of a running connector.
#[derive(Clone)]
pub struct ConnectorHandle {
    id: Uuid,
    customer: PeerId,
    supplier: PeerId,
    needed_bytes: u64,
    events: mpsc::UnboundedSender<ConnectorEvent>,
    state: watch::Receiver<ConnectorState>,
    observers: Observers,
}

impl ConnectorHandle {
    /// Unique id of the connector instance behind this handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn customer(&self) -> &PeerId {
        &self.customer
    }

    pub fn supplier(&self) -> &PeerId {
        &self.supplier
    }

    pub fn needed_bytes(&self) -> u64 {
        self.needed_bytes
    }

    /// Current state.
    pub fn state(&self) -> ConnectorState {
        *self.state.borrow()
    }

    /// Current coarse label, if the state has one.
    pub fn label(&self) -> Option<CoarseLabel> {
        self.state().label()
    }

    /// Stream of states, starting with the current one.
    pub fn state_stream(&self) -> WatchStream<ConnectorState> {
        WatchStream::new(self.state.clone())
    }

    /// Wait until the connector reaches `target`.
    pub async fn wait_for(&self, target: ConnectorState) -> Result<(), ConnectorError> {
        let mut rx = self.state.clone();
        loop {
            if *rx.borrow_and_update() == target {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return if *rx.borrow() == target {
                    Ok(())
                } else {
                    Err(ConnectorError::Closed(self.supplier.clone()))
                };
            }
        }
    }

    /// Queue an event for the connector task.
    pub fn send(&self, event: ConnectorEvent) -> Result<(), ConnectorError> {
        self.events
            .send(event)
            .map_err(|_| ConnectorError::Closed(self.supplier.clone()))
    }

    pub fn connect(&self) -> Result<(), ConnectorError> {
        self.send(ConnectorEvent::Connect)
    }

    pub fn disconnect(&self) -> Result<(), ConnectorError> {
        self.send(ConnectorEvent::Disconnect)
    }

    /// Deliver an unsolicited acknowledgement from the supplier.
    pub fn ack(&self, payload: impl Into<String>) -> Result<(), ConnectorError> {
        self.send(ConnectorEvent::Ack(ServiceAck::new(payload)))
    }

    pub fn shutdown(&self) -> Result<(), ConnectorError> {
        self.send(ConnectorEvent::Shutdown)
    }

    pub fn close(&self) -> Result<(), ConnectorError> {
        self.send(ConnectorEvent::Close)
    }

    /// Drive the connector to CLOSED from whatever state it is in.
    ///
    /// States accept either `shutdown` or `close`, never both, so both
    /// are sent.
    pub fn terminate(&self) -> Result<(), ConnectorError> {
        self.shutdown()?;
        self.close()
    }

    /// Register (or replace) a named status observer.
    pub fn add_callback(&self, name: impl Into<String>, callback: StatusCallback) {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), callback);
    }

    /// Remove a named observer; returns whether it was registered.
    pub fn remove_callback(&self, name: &str) -> bool {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}

impl std::fmt::Debug for ConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorHandle")
            .field("customer", &self.customer)
            .field("supplier", &self.supplier)
            .field("state", &self.state())
            .finish()
    }
}

/// Task side of one supplier relationship.
pub struct SupplierConnector {
    id: Uuid,
    customer: PeerId,
    supplier: PeerId,
    needed_bytes: u64,
    config: ConnectorConfig,
    transport: Arc<dyn ServiceTransport>,
    labels: Arc<dyn LabelStore>,

    state: ConnectorState,
    pending_disconnect: bool,
    request_id: Option<Uuid>,
    timer: Option<(Instant, ConnectorEvent)>,
    in_flight: InFlight,

    events: mpsc::UnboundedReceiver<ConnectorEvent>,
    state_tx: watch::Sender<ConnectorState>,
    observers: Observers,
    on_closed: Option<Box<dyn FnOnce() + Send>>,
}

impl SupplierConnector {
    /// Build a connector and its handle. The initial state comes from the
    /// persisted label; the quota defaults to `config.needed_bytes()`.
    pub fn new(
        customer: PeerId,
        supplier: PeerId,
        needed_bytes: Option<u64>,
        config: ConnectorConfig,
        transport: Arc<dyn ServiceTransport>,
        labels: Arc<dyn LabelStore>,
    ) -> (Self, ConnectorHandle) {
        let persisted = labels.load(&customer, &supplier);
        let state = ConnectorState::from_persisted(persisted.as_deref());
        let needed_bytes = needed_bytes.unwrap_or_else(|| config.needed_bytes());
        let id = Uuid::new_v4();

        let (events_tx, events) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(state);
        let observers: Observers = Arc::new(Mutex::new(BTreeMap::new()));

        debug!(
            supplier = %supplier,
            customer = %customer,
            state = %state,
            needed_bytes,
            "Supplier connector created"
        );

        let handle = ConnectorHandle {
            id,
            customer: customer.clone(),
            supplier: supplier.clone(),
            needed_bytes,
            events: events_tx,
            state: state_rx,
            observers: observers.clone(),
        };

        let connector = Self {
            id,
            customer,
            supplier,
            needed_bytes,
            config,
            transport,
            labels,
            state,
            pending_disconnect: false,
            request_id: None,
            timer: None,
            in_flight: FuturesUnordered::new(),
            events,
            state_tx,
            observers,
            on_closed: None,
        };

        (connector, handle)
    }

    /// Run `f` once when the connector reaches CLOSED.
    pub fn on_closed(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.on_closed = Some(Box::new(f));
        self
    }

    /// Spawn the connector task on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Event loop; returns when the connector is CLOSED or every handle
    /// has been dropped.
    pub async fn run(mut self) {
        loop {
            let deadline = self.timer.as_ref().map(|(at, _)| *at);

            let event = tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                Some((id, reply)) = self.in_flight.next(), if !self.in_flight.is_empty() => {
                    match self.reply_event(id, reply) {
                        Some(event) => event,
                        None => continue,
                    }
                }
                _ = wait_until(deadline) => match self.timer.take() {
                    Some((_, event)) => event,
                    None => continue,
                },
            };

            self.handle(event);

            if self.state == ConnectorState::Closed {
                break;
            }
        }

        debug!(supplier = %self.supplier, id = %self.id, "Supplier connector stopped");
    }

    fn reply_event(
        &self,
        id: Uuid,
        reply: Result<ServiceReply, TransportError>,
    ) -> Option<ConnectorEvent> {
        if self.request_id != Some(id) {
            debug!(supplier = %self.supplier, request_id = %id, "Ignoring stale reply");
            return None;
        }
        match reply {
            Ok(ServiceReply::Ack(payload)) => Some(ConnectorEvent::Ack(ServiceAck {
                request_id: Some(id),
                payload,
            })),
            Ok(ServiceReply::Fail(reason)) => {
                debug!(supplier = %self.supplier, reason = %reason, "Supplier replied with failure");
                Some(ConnectorEvent::Fail)
            }
            Err(e) => {
                debug!(supplier = %self.supplier, error = %e, "Negotiation message failed");
                Some(ConnectorEvent::Fail)
            }
        }
    }

    fn handle(&mut self, event: ConnectorEvent) {
        let from = self.state;
        let t = transition(from, self.pending_disconnect, &event);
        self.pending_disconnect = t.pending_disconnect;

        if t.to == from && t.actions.is_empty() {
            return;
        }

        debug!(
            supplier = %self.supplier,
            from = %from,
            to = %t.to,
            event = event.name(),
            pending_disconnect = self.pending_disconnect,
            "Connector transition"
        );

        if t.to != from {
            self.state = t.to;
            self.arm_timer();
            if let Some(label) = t.to.label() {
                if let Err(e) = self.persist(label) {
                    warn!(supplier = %self.supplier, error = %e, "Failed to persist supplier label");
                }
            }
            self.state_tx.send_replace(t.to);
        }

        for action in t.actions {
            self.execute(action);
        }
    }

    fn arm_timer(&mut self) {
        let now = Instant::now();
        self.timer = match self.state {
            ConnectorState::Request => {
                Some((now + self.config.request_timeout, ConnectorEvent::Timer20s))
            }
            ConnectorState::Refuse => {
                Some((now + self.config.refuse_timeout, ConnectorEvent::Timer10s))
            }
            ConnectorState::QueuePending => {
                Some((now + self.config.queue_timeout, ConnectorEvent::Timer10s))
            }
            _ => None,
        };
    }

    fn persist(&self, label: CoarseLabel) -> Result<(), ConnectorError> {
        self.labels
            .save(&self.customer, &self.supplier, label.as_str())?;
        Ok(())
    }

    fn execute(&mut self, action: ConnectorAction) {
        match action {
            ConnectorAction::RequestService => {
                let request = ServiceRequest::request_service(self.needed_bytes, &self.customer);
                self.dispatch(request);
            }
            ConnectorAction::CancelService => self.dispatch(ServiceRequest::cancel_service()),
            ConnectorAction::RequestQueue => {
                let request = ServiceRequest::subscribe_queue(&self.customer, &self.supplier);
                self.dispatch(request);
            }
            ConnectorAction::CancelQueue => {
                let request = ServiceRequest::unsubscribe_queue(&self.customer, &self.supplier);
                self.dispatch(request);
            }
            ConnectorAction::CleanRequest => self.request_id = None,
            ConnectorAction::Report(label) => self.notify(label),
            ConnectorAction::Destroy => self.destroy(),
        }
    }

    /// Send a negotiation message; its reply becomes the awaited one.
    fn dispatch(&mut self, request: ServiceRequest) {
        let request_id = Uuid::new_v4();
        self.request_id = Some(request_id);

        debug!(
            supplier = %self.supplier,
            request_id = %request_id,
            kind = request.kind(),
            "Sending negotiation message"
        );

        let transport = self.transport.clone();
        let supplier = self.supplier.clone();
        self.in_flight.push(
            async move {
                let reply = transport.send(&supplier, request_id, request).await;
                (request_id, reply)
            }
            .boxed(),
        );
    }

    fn notify(&self, label: CoarseLabel) {
        match label {
            CoarseLabel::Connected => info!(supplier = %self.supplier, "Supplier connected"),
            CoarseLabel::NoService => warn!(supplier = %self.supplier, "Supplier has no service"),
            CoarseLabel::Disconnected => {
                warn!(supplier = %self.supplier, "Supplier disconnected")
            }
        }

        let callbacks: Vec<StatusCallback> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for callback in callbacks {
            callback(&self.supplier, label);
        }
    }

    fn destroy(&mut self) {
        self.in_flight = FuturesUnordered::new();
        self.timer = None;
        self.request_id = None;
        if let Some(on_closed) = self.on_closed.take() {
            on_closed();
        }
        debug!(supplier = %self.supplier, customer = %self.customer, "Supplier connector destroyed");
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
