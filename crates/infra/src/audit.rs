//! Fire-and-forget audit trail.
//!
//! Every committed change is published as an [`EventEnvelope`] with a JSON
//! payload. Publishing can fail; the failure is logged and swallowed so the
//! originating operation still succeeds.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::warn;
use uuid::Uuid;

use stockroute_core::{AggregateId, TenantId, UserId};
use stockroute_events::{EventBus, EventEnvelope};

pub type AuditEnvelope = EventEnvelope<JsonValue>;

/// Accepts audit records. Implementations must never fail the caller.
pub trait AuditSink: Send + Sync {
    fn record(&self, envelope: AuditEnvelope);
}

impl<S> AuditSink for Arc<S>
where
    S: AuditSink + ?Sized,
{
    fn record(&self, envelope: AuditEnvelope) {
        (**self).record(envelope)
    }
}

/// Publishes audit envelopes to an event bus.
#[derive(Debug)]
pub struct BusAuditSink<B> {
    bus: B,
}

impl<B> BusAuditSink<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> AuditSink for BusAuditSink<B>
where
    B: EventBus<AuditEnvelope>,
{
    fn record(&self, envelope: AuditEnvelope) {
        let event_type = envelope.event_type().to_string();
        let aggregate_id = envelope.aggregate_id();
        if let Err(e) = self.bus.publish(envelope) {
            warn!(%event_type, %aggregate_id, error = ?e, "audit publish failed");
        }
    }
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _envelope: AuditEnvelope) {}
}

/// One audit record before it is wrapped.
#[derive(Debug, Clone)]
pub struct AuditEntry<'a> {
    pub tenant_id: TenantId,
    pub aggregate_id: AggregateId,
    pub aggregate_type: &'a str,
    /// Revision the change produced.
    pub revision: u64,
    pub event_type: &'a str,
    pub occurred_at: DateTime<Utc>,
    pub actor: Option<UserId>,
}

impl AuditEntry<'_> {
    /// Serialize `payload` and hand the envelope to `sink`.
    ///
    /// A payload that fails to serialize is logged and skipped.
    pub fn emit<P: Serialize>(self, sink: &dyn AuditSink, payload: &P) {
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(event_type = self.event_type, error = %e, "audit payload serialization failed");
                return;
            }
        };
        let mut envelope = EventEnvelope::new(
            Uuid::now_v7(),
            self.tenant_id,
            self.aggregate_id,
            self.aggregate_type,
            self.revision,
            self.event_type,
            self.occurred_at,
            payload,
        );
        if let Some(actor) = self.actor {
            envelope = envelope.with_actor(actor);
        }
        sink.record(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroute_events::{InMemoryAuditBus, Subscription};

    fn entry(tenant_id: TenantId) -> AuditEntry<'static> {
        AuditEntry {
            tenant_id,
            aggregate_id: AggregateId::new(),
            aggregate_type: "allocation",
            revision: 1,
            event_type: "allocation.created",
            occurred_at: Utc::now(),
            actor: Some(UserId::new()),
        }
    }

    #[test]
    fn bus_sink_publishes_the_envelope() {
        let bus: Arc<InMemoryAuditBus<JsonValue>> = Arc::new(InMemoryAuditBus::new());
        let sub: Subscription<AuditEnvelope> = bus.subscribe();
        let sink = BusAuditSink::new(bus.clone());
        let tenant = TenantId::new();

        entry(tenant).emit(&sink, &serde_json::json!({ "quantity": 60 }));

        let got = sub.drain();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tenant_id(), tenant);
        assert_eq!(got[0].event_type(), "allocation.created");
        assert_eq!(got[0].payload()["quantity"], 60);
        assert!(got[0].actor().is_some());
    }

    struct FailingBus;

    impl EventBus<AuditEnvelope> for FailingBus {
        type Error = String;

        fn publish(&self, _message: AuditEnvelope) -> Result<(), Self::Error> {
            Err("bus closed".to_string())
        }

        fn subscribe(&self) -> Subscription<AuditEnvelope> {
            let (_tx, rx) = std::sync::mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn publish_failure_is_swallowed() {
        let sink = BusAuditSink::new(FailingBus);
        entry(TenantId::new()).emit(&sink, &"payload");
    }
}
