//! Allocation ledger service: manual allocation commands and ledger queries.
//!
//! Every write that can raise a line item's allocated quantity carries the
//! ledger guard, so the over-allocation check and the write share one critical
//! section.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockroute_allocation::{
    Allocation, AllocationCommand, AllocationId, AllocationStatus, CreateAllocation,
    DeleteAllocation, LineItemPosition, TransitionAllocation, UpdateAllocation, guard_allocation,
    line_position, valid_transitions,
};
use stockroute_core::{ActorContext, DomainError, LocationId, TenantId, Versioned};
use stockroute_events::execute;
use stockroute_purchasing::{LineItemId, PurchaseOrder, PurchaseOrderId, PurchaseOrderLineItem};

use crate::audit::AuditEntry;
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::services::ServiceContext;
use crate::services::linker::allocation_claims;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAllocation {
    pub purchase_order_id: PurchaseOrderId,
    pub line_item_id: LineItemId,
    pub target_location_id: LocationId,
    pub quantity: i64,
    pub notes: Option<String>,
}

/// Edits to a PENDING allocation; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationChanges {
    pub quantity: Option<i64>,
    pub target_location_id: Option<LocationId>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct AllocationService {
    ctx: ServiceContext,
    dispatcher: CommandDispatcher<Allocation>,
}

impl AllocationService {
    pub fn new(ctx: ServiceContext) -> Self {
        let dispatcher = CommandDispatcher::new(ctx.stores.allocations.clone(), ctx.audit.clone());
        Self { ctx, dispatcher }
    }

    /// Make a purchase order known to the ledger.
    pub fn register_purchase_order(
        &self,
        actor: &ActorContext,
        order: PurchaseOrder,
    ) -> ServiceResult<PurchaseOrder> {
        if order.tenant_id() != actor.tenant_id {
            return Err(DomainError::not_found().into());
        }
        if order.lines().is_empty() {
            return Err(DomainError::validation("purchase order has no line items").into());
        }
        let stored = self
            .ctx
            .stores
            .purchase_orders
            .insert(actor.tenant_id, order, None)?;
        AuditEntry {
            tenant_id: actor.tenant_id,
            aggregate_id: stored.id_typed().into(),
            aggregate_type: "purchase_order",
            revision: stored.version(),
            event_type: "purchase_order.registered",
            occurred_at: Utc::now(),
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &stored);
        Ok(stored)
    }

    pub fn purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> ServiceResult<PurchaseOrder> {
        self.ctx
            .stores
            .purchase_orders
            .get(tenant_id, &purchase_order_id)?
            .ok_or(ServiceError::Domain(DomainError::not_found()))
    }

    pub(crate) fn line_item(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        line_item_id: LineItemId,
    ) -> ServiceResult<PurchaseOrderLineItem> {
        self.purchase_order(tenant_id, purchase_order_id)?
            .line(line_item_id)
            .cloned()
            .ok_or(ServiceError::Domain(DomainError::not_found()))
    }

    fn create_command(
        actor: &ActorContext,
        allocation_id: AllocationId,
        line: &PurchaseOrderLineItem,
        input: &NewAllocation,
    ) -> AllocationCommand {
        AllocationCommand::Create(CreateAllocation {
            tenant_id: actor.tenant_id,
            allocation_id,
            purchase_order_id: input.purchase_order_id,
            line_item_id: line.id,
            product_id: line.product_id,
            target_location_id: input.target_location_id,
            quantity: input.quantity,
            notes: input.notes.clone(),
            created_by: actor.user_id,
            occurred_at: Utc::now(),
        })
    }

    /// Create a PENDING allocation; fails with `OverAllocation` when the line
    /// has less than `quantity` left.
    #[instrument(
        skip(self, actor, input),
        fields(tenant = %actor.tenant_id, line_item_id = %input.line_item_id, quantity = input.quantity)
    )]
    pub fn create(&self, actor: &ActorContext, input: NewAllocation) -> ServiceResult<Allocation> {
        let allocation_id = AllocationId::generate();
        let line = self.line_item(actor.tenant_id, input.purchase_order_id, input.line_item_id)?;
        let command = Self::create_command(actor, allocation_id, &line, &input);
        let guard = |candidate: &Allocation, existing: &[Allocation]| {
            guard_allocation(&line, candidate, existing)
        };

        let dispatched = self.dispatcher.dispatch(
            actor.tenant_id,
            &allocation_id,
            &command,
            || Allocation::empty(allocation_id),
            Some(&guard),
        )?;
        info!(allocation_id = %allocation_id, "allocation created");
        Ok(dispatched.aggregate)
    }

    /// Run every check `create` runs, against the ledger plus `pending`
    /// (allocations this batch would already have made), without writing.
    pub(crate) fn preview_create(
        &self,
        actor: &ActorContext,
        input: &NewAllocation,
        pending: &[Allocation],
    ) -> ServiceResult<Allocation> {
        let allocation_id = AllocationId::generate();
        let line = self.line_item(actor.tenant_id, input.purchase_order_id, input.line_item_id)?;
        let mut candidate = Allocation::empty(allocation_id);
        execute(
            &mut candidate,
            &Self::create_command(actor, allocation_id, &line, input),
        )?;

        let mut existing = self.ctx.stores.allocations.list(actor.tenant_id)?;
        existing.extend_from_slice(pending);
        guard_allocation(&line, &candidate, &existing)?;
        Ok(candidate)
    }

    /// Edit a PENDING allocation, re-checking the line cap without counting
    /// the allocation's own previous quantity. The quantity cannot drop below
    /// what is already linked to live transfers.
    #[instrument(skip(self, actor, changes), fields(tenant = %actor.tenant_id))]
    pub fn update(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        changes: AllocationChanges,
    ) -> ServiceResult<Allocation> {
        let current = self.get(actor.tenant_id, allocation_id)?;
        if let Some(quantity) = changes.quantity {
            let linked = allocation_claims(&self.ctx, actor.tenant_id, allocation_id)?;
            if quantity < linked {
                return Err(DomainError::invariant(format!(
                    "allocation quantity {quantity} is below the {linked} units linked to transfers"
                ))
                .into());
            }
        }
        let line = self.line_item(
            actor.tenant_id,
            current.purchase_order_id(),
            current.line_item_id(),
        )?;
        let command = AllocationCommand::Update(UpdateAllocation {
            tenant_id: actor.tenant_id,
            allocation_id,
            quantity: changes.quantity,
            target_location_id: changes.target_location_id,
            notes: changes.notes,
            updated_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let guard = |candidate: &Allocation, existing: &[Allocation]| {
            guard_allocation(&line, candidate, existing)
        };

        let dispatched = self.dispatcher.dispatch(
            actor.tenant_id,
            &allocation_id,
            &command,
            || Allocation::empty(allocation_id),
            Some(&guard),
        )?;
        Ok(dispatched.aggregate)
    }

    /// Hard-delete a PENDING allocation. Shipped or received allocations must
    /// be cancelled instead.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub fn delete(&self, actor: &ActorContext, allocation_id: AllocationId) -> ServiceResult<()> {
        let command = AllocationCommand::Delete(DeleteAllocation {
            tenant_id: actor.tenant_id,
            allocation_id,
            deleted_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.dispatcher.dispatch(
            actor.tenant_id,
            &allocation_id,
            &command,
            || Allocation::empty(allocation_id),
            None,
        )?;
        info!(allocation_id = %allocation_id, "allocation deleted");
        Ok(())
    }

    /// Move an allocation along its status machine.
    ///
    /// The write is conditioned on the revision read, so a concurrent
    /// transition fails with `ConcurrentModification`.
    #[instrument(skip(self, actor, reason), fields(tenant = %actor.tenant_id))]
    pub fn transition(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        target: AllocationStatus,
        quantity_received: Option<i64>,
        reason: Option<String>,
    ) -> ServiceResult<Allocation> {
        let command = AllocationCommand::Transition(TransitionAllocation {
            tenant_id: actor.tenant_id,
            allocation_id,
            target,
            quantity_received,
            reason,
            actor: actor.user_id,
            occurred_at: Utc::now(),
        });
        let dispatched = self.dispatcher.dispatch(
            actor.tenant_id,
            &allocation_id,
            &command,
            || Allocation::empty(allocation_id),
            None,
        )?;
        info!(allocation_id = %allocation_id, status = %target, "allocation transitioned");
        Ok(dispatched.aggregate)
    }

    pub fn ship(&self, actor: &ActorContext, allocation_id: AllocationId) -> ServiceResult<Allocation> {
        self.transition(actor, allocation_id, AllocationStatus::Shipped, None, None)
    }

    /// `quantity_received` defaults to the allocated quantity.
    pub fn receive(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        quantity_received: Option<i64>,
    ) -> ServiceResult<Allocation> {
        self.transition(
            actor,
            allocation_id,
            AllocationStatus::Received,
            quantity_received,
            None,
        )
    }

    pub fn cancel(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        reason: Option<String>,
    ) -> ServiceResult<Allocation> {
        self.transition(actor, allocation_id, AllocationStatus::Cancelled, None, reason)
    }

    pub fn valid_transitions(status: AllocationStatus) -> Vec<AllocationStatus> {
        valid_transitions(status)
    }

    pub fn get(&self, tenant_id: TenantId, allocation_id: AllocationId) -> ServiceResult<Allocation> {
        self.dispatcher.load(tenant_id, &allocation_id)
    }

    /// All allocations of the tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> ServiceResult<Vec<Allocation>> {
        let mut all = self.ctx.stores.allocations.list(tenant_id)?;
        all.sort_by_key(|a| (a.created_at(), a.id_typed()));
        Ok(all)
    }

    pub fn by_status(
        &self,
        tenant_id: TenantId,
        status: AllocationStatus,
    ) -> ServiceResult<Vec<Allocation>> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|a| a.status() == status)
            .collect())
    }

    pub fn for_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
    ) -> ServiceResult<Vec<Allocation>> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|a| a.target_location_id() == location_id)
            .collect())
    }

    pub fn for_purchase_order(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> ServiceResult<Vec<Allocation>> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|a| a.purchase_order_id() == purchase_order_id)
            .collect())
    }

    /// Ordered, allocated and remaining quantity of one line.
    pub fn line_position(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        line_item_id: LineItemId,
    ) -> ServiceResult<LineItemPosition> {
        let line = self.line_item(tenant_id, purchase_order_id, line_item_id)?;
        let allocations = self.for_purchase_order(tenant_id, purchase_order_id)?;
        Ok(line_position(&line, &allocations))
    }
}
