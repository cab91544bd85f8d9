//! Owned registry of live supplier connectors.
//!
//! One connector per (customer, supplier) pair. Connectors remove
//! themselves when they reach CLOSED; the registry never hands out a
//! handle to a destroyed connector it still knows about.

use super::config::ConnectorConfig;
use super::connector::{ConnectorError, ConnectorHandle, SupplierConnector};
use super::state::ConnectorState;
use super::transport::ServiceTransport;
use crate::ids::PeerId;
use crate::restore::PeerStatus;
use crate::store::LabelStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

type ConnectorMap = HashMap<PeerId, HashMap<PeerId, ConnectorHandle>>;

/// Registry of connectors, keyed by customer then supplier.
///
/// Clones share the same connectors.
#[derive(Clone)]
pub struct ConnectorRegistry {
    local_id: PeerId,
    config: ConnectorConfig,
    transport: Arc<dyn ServiceTransport>,
    labels: Arc<dyn LabelStore>,
    connectors: Arc<Mutex<ConnectorMap>>,
}

impl ConnectorRegistry {
    /// `local_id` is the customer used when a caller does not name one.
    pub fn new(
        local_id: PeerId,
        config: ConnectorConfig,
        transport: Arc<dyn ServiceTransport>,
        labels: Arc<dyn LabelStore>,
    ) -> Self {
        Self {
            local_id,
            config,
            transport,
            labels,
            connectors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorMap> {
        self.connectors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create and spawn the connector for `(customer, supplier)`.
    ///
    /// Must be called inside a tokio runtime. Fails if the pair already
    /// has a live connector.
    pub fn create(
        &self,
        supplier: &PeerId,
        customer: Option<&PeerId>,
        needed_bytes: Option<u64>,
    ) -> Result<ConnectorHandle, ConnectorError> {
        let customer = customer.unwrap_or(&self.local_id).clone();
        let mut connectors = self.lock();

        if connectors
            .get(&customer)
            .is_some_and(|by_supplier| by_supplier.contains_key(supplier))
        {
            return Err(ConnectorError::AlreadyExists {
                customer,
                supplier: supplier.clone(),
            });
        }

        let (connector, handle) = SupplierConnector::new(
            customer.clone(),
            supplier.clone(),
            needed_bytes,
            self.config.clone(),
            self.transport.clone(),
            self.labels.clone(),
        );

        let registry = Arc::downgrade(&self.connectors);
        let (id, c, s) = (handle.id(), customer.clone(), supplier.clone());
        connector
            .on_closed(move || unregister(registry, &c, &s, id))
            .spawn();

        connectors
            .entry(customer)
            .or_default()
            .insert(supplier.clone(), handle.clone());
        Ok(handle)
    }

    /// Connector for the pair, if live.
    pub fn get(&self, supplier: &PeerId, customer: Option<&PeerId>) -> Option<ConnectorHandle> {
        let customer = customer.unwrap_or(&self.local_id);
        self.lock()
            .get(customer)
            .and_then(|by_supplier| by_supplier.get(supplier))
            .cloned()
    }

    /// Whether `supplier` has a live connector for the customer.
    pub fn is_supplier(&self, supplier: &PeerId, customer: Option<&PeerId>) -> bool {
        self.get(supplier, customer).is_some()
    }

    /// All live connectors of a customer.
    pub fn connectors(&self, customer: Option<&PeerId>) -> Vec<ConnectorHandle> {
        let customer = customer.unwrap_or(&self.local_id);
        self.lock()
            .get(customer)
            .map(|by_supplier| by_supplier.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of live connectors across customers.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask every live connector to terminate.
    pub fn shutdown_all(&self) {
        let handles: Vec<ConnectorHandle> = self
            .lock()
            .values()
            .flat_map(|by_supplier| by_supplier.values().cloned())
            .collect();
        for handle in handles {
            // a connector that already closed has nothing left to do
            let _ = handle.terminate();
        }
    }
}

impl PeerStatus for ConnectorRegistry {
    /// A supplier is online when its connector for the local customer is
    /// CONNECTED.
    fn is_online(&self, peer: &PeerId) -> bool {
        self.get(peer, None)
            .is_some_and(|handle| handle.state() == ConnectorState::Connected)
    }
}

fn unregister(registry: Weak<Mutex<ConnectorMap>>, customer: &PeerId, supplier: &PeerId, id: uuid::Uuid) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let mut connectors = registry.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(by_supplier) = connectors.get_mut(customer) {
        if by_supplier.get(supplier).is_some_and(|h| h.id() == id) {
            by_supplier.remove(supplier);
            debug!(customer = %customer, supplier = %supplier, "Connector unregistered");
        }
        if by_supplier.is_empty() {
            connectors.remove(customer);
        }
    }
}
