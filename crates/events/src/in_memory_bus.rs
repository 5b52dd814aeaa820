//! In-process audit bus.
//!
//! Carries [`EventEnvelope`]s only. A listener either sees every tenant (an
//! audit-log writer) or is pinned to one tenant at subscribe time, in which
//! case envelopes of other tenants never reach its channel.

use std::sync::{Mutex, mpsc};

use thiserror::Error;

use stockroute_core::TenantId;

use crate::EventEnvelope;
use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditBusError {
    #[error("audit bus listener table is poisoned")]
    Poisoned,
}

struct Listener<P> {
    tenant: Option<TenantId>,
    sender: mpsc::Sender<EventEnvelope<P>>,
}

impl<P: Clone> Listener<P> {
    /// `false` once the receiving side is gone.
    fn offer(&self, envelope: &EventEnvelope<P>) -> bool {
        match self.tenant {
            Some(tenant) if tenant != envelope.tenant_id() => true,
            _ => self.sender.send(envelope.clone()).is_ok(),
        }
    }
}

/// Broadcast of audit envelopes over std channels. Delivery stops silently
/// for listeners whose [`Subscription`] was dropped.
pub struct InMemoryAuditBus<P> {
    listeners: Mutex<Vec<Listener<P>>>,
}

impl<P> InMemoryAuditBus<P> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Envelopes of `tenant_id` only.
    pub fn subscribe_tenant(&self, tenant_id: TenantId) -> Subscription<EventEnvelope<P>> {
        self.attach(Some(tenant_id))
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    fn attach(&self, tenant: Option<TenantId>) -> Subscription<EventEnvelope<P>> {
        let (sender, receiver) = mpsc::channel();
        // A poisoned table still hands out a subscription that stays empty.
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(Listener { tenant, sender });
        }
        Subscription::new(receiver)
    }
}

impl<P> Default for InMemoryAuditBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> std::fmt::Debug for InMemoryAuditBus<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryAuditBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<P> EventBus<EventEnvelope<P>> for InMemoryAuditBus<P>
where
    P: Clone + Send + 'static,
{
    type Error = AuditBusError;

    fn publish(&self, envelope: EventEnvelope<P>) -> Result<(), Self::Error> {
        let mut listeners = self.listeners.lock().map_err(|_| AuditBusError::Poisoned)?;
        listeners.retain(|listener| listener.offer(&envelope));
        Ok(())
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<P>> {
        self.attach(None)
    }
}
