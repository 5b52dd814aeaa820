use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockroute_core::{AggregateId, TenantId, UserId};

/// Envelope for an event, containing multi-tenant + record metadata.
///
/// This is the unit published to the audit bus.
///
/// Notes:
/// - **Multi-tenancy** is enforced here via `tenant_id`.
/// - `sequence_number` is the record revision the event produced.
/// - `actor` is absent for system-initiated changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    tenant_id: TenantId,

    aggregate_id: AggregateId,
    aggregate_type: String,

    /// Revision of the record after the change.
    sequence_number: u64,

    event_type: String,
    occurred_at: DateTime<Utc>,
    actor: Option<UserId>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        event_id: Uuid,
        tenant_id: TenantId,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            tenant_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            event_type: event_type.into(),
            occurred_at,
            actor: None,
            payload,
        }
    }

    pub fn with_actor(mut self, actor: UserId) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
