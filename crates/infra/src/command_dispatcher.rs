//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the record (tenant-scoped) or start from an empty aggregate
//!   ↓
//! 2. Handle command (pure decision logic, produces events)
//!   ↓
//! 3. Apply events in memory
//!   ↓
//! 4. Persist: insert / compare-and-swap / remove, keyed on the loaded revision
//!   ↓
//! 5. Publish one audit envelope per event
//! ```
//!
//! An empty decision performs no write and publishes nothing; aggregates use
//! it for idempotent no-ops such as re-escalating to a level already reached.
//!
//! Persistence and publication are split so a caller that must commit more
//! than one record (a transfer plus its allocation link) can publish only once
//! everything has been stored.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument};

use stockroute_allocation::{Allocation, AllocationEvent};
use stockroute_core::{
    Aggregate, AggregateId, DomainError, Entity, ExpectedVersion, TenantId, UserId, Versioned,
};
use stockroute_events::Event;
use stockroute_transfers::{Transfer, TransferEvent};

use crate::audit::{AuditEntry, AuditSink};
use crate::error::{ServiceError, ServiceResult};
use crate::store::{Guard, RecordStore};

/// An aggregate kept as a versioned record.
pub trait StoredAggregate: Aggregate<Error = DomainError> + Clone {
    /// Type identifier carried on audit envelopes (e.g. "allocation").
    const AGGREGATE_TYPE: &'static str;

    /// False once the aggregate has been deleted; the dispatcher then removes
    /// the record instead of swapping it.
    fn exists(&self) -> bool;

    fn audit_id(&self) -> AggregateId;

    /// Who caused `event`; `None` for system-initiated changes.
    fn actor_of(event: &Self::Event) -> Option<UserId>;
}

impl StoredAggregate for Allocation {
    const AGGREGATE_TYPE: &'static str = "allocation";

    fn exists(&self) -> bool {
        self.is_created()
    }

    fn audit_id(&self) -> AggregateId {
        self.id_typed().into()
    }

    fn actor_of(event: &AllocationEvent) -> Option<UserId> {
        Some(match event {
            AllocationEvent::Created(e) => e.created_by,
            AllocationEvent::Updated(e) => e.updated_by,
            AllocationEvent::StatusChanged(e) => e.actor,
            AllocationEvent::Deleted(e) => e.deleted_by,
        })
    }
}

impl StoredAggregate for Transfer {
    const AGGREGATE_TYPE: &'static str = "transfer";

    fn exists(&self) -> bool {
        self.is_created()
    }

    fn audit_id(&self) -> AggregateId {
        self.id_typed().into()
    }

    fn actor_of(event: &TransferEvent) -> Option<UserId> {
        match event {
            TransferEvent::Requested(e) => Some(e.requested_by),
            TransferEvent::Updated(e) => Some(e.updated_by),
            TransferEvent::StatusChanged(e) => Some(e.actor),
            TransferEvent::Escalated(e) => e.actor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// The decision was empty.
    Unchanged,
    Inserted,
    Swapped,
    Removed,
}

/// Outcome of a dispatched command.
#[derive(Debug, Clone)]
pub struct Dispatched<A>
where
    A: Aggregate,
{
    pub tenant_id: TenantId,
    /// State after the command, as stored (or as it was, when unchanged).
    pub aggregate: A,
    pub events: Vec<A::Event>,
    pub write: WriteKind,
}

impl<A> Dispatched<A>
where
    A: Aggregate,
{
    pub fn changed(&self) -> bool {
        self.write != WriteKind::Unchanged
    }
}

/// Reusable command execution engine for stored aggregates.
///
/// Every write is conditioned on the revision that was loaded, so concurrent
/// commands against the same record surface as
/// [`DomainError::ConcurrentModification`] and are never retried here. An
/// optional [`Guard`] runs inside the same critical section as the write.
pub struct CommandDispatcher<A>
where
    A: StoredAggregate,
{
    store: Arc<dyn RecordStore<A>>,
    audit: Arc<dyn AuditSink>,
}

impl<A> Clone for CommandDispatcher<A>
where
    A: StoredAggregate,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<A> CommandDispatcher<A>
where
    A: StoredAggregate,
    A::Event: Event + Serialize,
{
    pub fn new(store: Arc<dyn RecordStore<A>>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    /// Load an existing record; unknown and foreign-tenant ids are `NotFound`.
    pub fn load(&self, tenant_id: TenantId, id: &A::Id) -> ServiceResult<A> {
        self.store
            .get(tenant_id, id)?
            .ok_or(ServiceError::Domain(DomainError::not_found()))
    }

    /// Persist, then publish.
    pub fn dispatch(
        &self,
        tenant_id: TenantId,
        id: &A::Id,
        command: &A::Command,
        make_aggregate: impl FnOnce() -> A,
        guard: Option<&Guard<'_, A>>,
    ) -> ServiceResult<Dispatched<A>> {
        let dispatched = self.persist(tenant_id, id, command, make_aggregate, guard)?;
        self.publish(&dispatched);
        Ok(dispatched)
    }

    /// Steps 1 to 4 of the pipeline; nothing is published.
    #[instrument(
        skip(self, tenant_id, command, make_aggregate, guard),
        fields(tenant = %tenant_id, aggregate_type = A::AGGREGATE_TYPE)
    )]
    pub fn persist(
        &self,
        tenant_id: TenantId,
        id: &A::Id,
        command: &A::Command,
        make_aggregate: impl FnOnce() -> A,
        guard: Option<&Guard<'_, A>>,
    ) -> ServiceResult<Dispatched<A>> {
        // 1) Load (tenant-scoped)
        let loaded = self.store.get(tenant_id, id)?;
        let expected = loaded.as_ref().map(|a| ExpectedVersion::Exact(a.version()));
        let mut aggregate = loaded.unwrap_or_else(make_aggregate);

        // 2) Decide events (no mutation)
        let events = aggregate.handle(command)?;
        if events.is_empty() {
            debug!("command produced no events");
            return Ok(Dispatched {
                tenant_id,
                aggregate,
                events,
                write: WriteKind::Unchanged,
            });
        }

        // 3) Evolve
        for ev in &events {
            aggregate.apply(ev);
        }

        // 4) Persist, conditioned on the loaded revision
        let (aggregate, write) = match expected {
            None => (
                self.store.insert(tenant_id, aggregate, guard)?,
                WriteKind::Inserted,
            ),
            Some(expected) if !aggregate.exists() => {
                let removed = self.store.remove(tenant_id, id, expected)?;
                aggregate.set_version(removed.version() + 1);
                (aggregate, WriteKind::Removed)
            }
            Some(expected) => (
                self.store
                    .compare_and_swap(tenant_id, aggregate, expected, guard)?,
                WriteKind::Swapped,
            ),
        };
        debug!(revision = aggregate.version(), events = events.len(), ?write, "record written");

        Ok(Dispatched {
            tenant_id,
            aggregate,
            events,
            write,
        })
    }

    /// Step 5: one audit envelope per event, best-effort.
    pub fn publish(&self, dispatched: &Dispatched<A>) {
        for ev in &dispatched.events {
            AuditEntry {
                tenant_id: dispatched.tenant_id,
                aggregate_id: dispatched.aggregate.audit_id(),
                aggregate_type: A::AGGREGATE_TYPE,
                revision: dispatched.aggregate.version(),
                event_type: ev.event_type(),
                occurred_at: ev.occurred_at(),
                actor: A::actor_of(ev),
            }
            .emit(self.audit.as_ref(), ev);
        }
    }

    /// Undo an insert that has not been published yet.
    pub fn discard(&self, dispatched: &Dispatched<A>) -> ServiceResult<()> {
        if dispatched.write != WriteKind::Inserted {
            return Err(ServiceError::Domain(DomainError::invariant(
                "only an unpublished insert can be discarded",
            )));
        }
        self.store.remove(
            dispatched.tenant_id,
            dispatched.aggregate.id(),
            ExpectedVersion::Exact(dispatched.aggregate.version()),
        )?;
        Ok(())
    }
}
