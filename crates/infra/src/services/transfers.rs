//! Transfer service: requests, edits and status transitions.
//!
//! EMERGENCY requests are handed to the emergency coordinator, which adds the
//! frequency gate and auto-approval around the same write path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockroute_core::{ActorContext, DomainError, LocationId, ProductId, TenantId};
use stockroute_transfers::{
    ReasonCode, ReceivingData, RequestTransfer, Transfer, TransferCommand, TransferId,
    TransferPriority, TransferStatus, TransitionContext, TransitionTransfer, UpdateTransfer,
    next_for_destination, valid_transitions,
};

use crate::command_dispatcher::{CommandDispatcher, Dispatched};
use crate::error::ServiceResult;
use crate::services::ServiceContext;
use crate::services::emergency::EmergencyService;
use crate::services::linker::transfer_claims;
use crate::store::Guard;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransfer {
    pub product_id: ProductId,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub quantity: i64,
    pub priority: TransferPriority,
    pub reason_code: ReasonCode,
    pub notes: Option<String>,
    /// Minor currency units per unit; used by the auto-approval value limit.
    pub unit_cost: Option<i64>,
}

/// Edits to a REQUESTED transfer; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferChanges {
    pub quantity: Option<i64>,
    pub reason_code: Option<ReasonCode>,
    pub notes: Option<String>,
}

#[derive(Clone)]
pub struct TransferService {
    ctx: ServiceContext,
    dispatcher: CommandDispatcher<Transfer>,
}

impl TransferService {
    pub fn new(ctx: ServiceContext) -> Self {
        let dispatcher = CommandDispatcher::new(ctx.stores.transfers.clone(), ctx.audit.clone());
        Self { ctx, dispatcher }
    }

    pub(crate) fn dispatcher(&self) -> &CommandDispatcher<Transfer> {
        &self.dispatcher
    }

    /// Request a transfer. EMERGENCY priority goes through the emergency
    /// coordinator (frequency gate, then auto-approval).
    #[instrument(
        skip(self, actor, input),
        fields(tenant = %actor.tenant_id, priority = input.priority.as_str(), quantity = input.quantity)
    )]
    pub fn create(&self, actor: &ActorContext, input: NewTransfer) -> ServiceResult<Transfer> {
        if input.priority == TransferPriority::Emergency {
            return EmergencyService::new(self.ctx.clone())
                .create(actor, input)
                .map(|outcome| outcome.transfer);
        }
        let transfer_id = TransferId::generate();
        let dispatched = self.persist_request(actor, transfer_id, &input, None)?;
        self.dispatcher.publish(&dispatched);
        info!(transfer_id = %transfer_id, "transfer requested");
        Ok(dispatched.aggregate)
    }

    /// Store a new REQUESTED transfer without publishing its audit record.
    pub(crate) fn persist_request(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        input: &NewTransfer,
        guard: Option<&Guard<'_, Transfer>>,
    ) -> ServiceResult<Dispatched<Transfer>> {
        let command = TransferCommand::Request(RequestTransfer {
            tenant_id: actor.tenant_id,
            transfer_id,
            product_id: input.product_id,
            source_location_id: input.source_location_id,
            destination_location_id: input.destination_location_id,
            quantity: input.quantity,
            priority: input.priority,
            reason_code: input.reason_code,
            notes: input.notes.clone(),
            unit_cost: input.unit_cost,
            requested_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        self.dispatcher.persist(
            actor.tenant_id,
            &transfer_id,
            &command,
            || Transfer::empty(transfer_id),
            guard,
        )
    }

    #[instrument(skip(self, actor, changes), fields(tenant = %actor.tenant_id))]
    pub fn update(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        changes: TransferChanges,
    ) -> ServiceResult<Transfer> {
        if let Some(quantity) = changes.quantity {
            self.ensure_covers_links(actor.tenant_id, transfer_id, quantity)?;
        }
        let command = TransferCommand::Update(UpdateTransfer {
            tenant_id: actor.tenant_id,
            transfer_id,
            quantity: changes.quantity,
            reason_code: changes.reason_code,
            notes: changes.notes,
            updated_by: actor.user_id,
            occurred_at: Utc::now(),
        });
        let dispatched = self.dispatcher.dispatch(
            actor.tenant_id,
            &transfer_id,
            &command,
            || Transfer::empty(transfer_id),
            None,
        )?;
        Ok(dispatched.aggregate)
    }

    /// Move a transfer along its status machine. The context names the tenant,
    /// the actor and whatever data the edge consumes.
    #[instrument(skip(self, context), fields(tenant = %context.tenant_id, origin = ?context.origin))]
    pub fn transition(
        &self,
        transfer_id: TransferId,
        target: TransferStatus,
        context: TransitionContext,
    ) -> ServiceResult<Transfer> {
        let tenant_id = context.tenant_id;
        let command = TransferCommand::Transition(TransitionTransfer {
            transfer_id,
            target,
            context,
            tolerance: self.ctx.config.tolerance(),
            occurred_at: Utc::now(),
        });
        let dispatched = self.dispatcher.dispatch(
            tenant_id,
            &transfer_id,
            &command,
            || Transfer::empty(transfer_id),
            None,
        )?;
        info!(transfer_id = %transfer_id, status = %target, "transfer transitioned");
        Ok(dispatched.aggregate)
    }

    /// Approve, optionally for less than was requested.
    pub fn approve(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        approved_quantity: Option<i64>,
    ) -> ServiceResult<Transfer> {
        let mut context = TransitionContext::new(actor.tenant_id, actor.user_id);
        if let Some(q) = approved_quantity {
            self.ensure_covers_links(actor.tenant_id, transfer_id, q)?;
            context = context.with_approved_quantity(q);
        }
        self.transition(transfer_id, TransferStatus::Approved, context)
    }

    pub fn ship(&self, actor: &ActorContext, transfer_id: TransferId) -> ServiceResult<Transfer> {
        self.transition(
            transfer_id,
            TransferStatus::Shipped,
            TransitionContext::new(actor.tenant_id, actor.user_id),
        )
    }

    pub fn receive(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        receiving: ReceivingData,
    ) -> ServiceResult<Transfer> {
        self.transition(
            transfer_id,
            TransferStatus::Received,
            TransitionContext::new(actor.tenant_id, actor.user_id).with_receiving(receiving),
        )
    }

    pub fn cancel(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        reason: Option<String>,
    ) -> ServiceResult<Transfer> {
        let mut context = TransitionContext::new(actor.tenant_id, actor.user_id);
        if let Some(reason) = reason {
            context = context.with_reason(reason);
        }
        self.transition(transfer_id, TransferStatus::Cancelled, context)
    }

    /// A transfer cannot be cut below what allocations already claim on it.
    fn ensure_covers_links(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        quantity: i64,
    ) -> ServiceResult<()> {
        let claimed = transfer_claims(&self.ctx, tenant_id, transfer_id)?;
        if quantity < claimed {
            return Err(DomainError::invariant(format!(
                "transfer quantity {quantity} is below the {claimed} units linked to allocations"
            ))
            .into());
        }
        Ok(())
    }

    pub fn valid_transitions(status: TransferStatus) -> Vec<TransferStatus> {
        valid_transitions(status)
    }

    pub fn get(&self, tenant_id: TenantId, transfer_id: TransferId) -> ServiceResult<Transfer> {
        self.dispatcher.load(tenant_id, &transfer_id)
    }

    /// All transfers of the tenant, oldest first.
    pub fn list(&self, tenant_id: TenantId) -> ServiceResult<Vec<Transfer>> {
        let mut all = self.ctx.stores.transfers.list(tenant_id)?;
        all.sort_by_key(|t| (t.created_at(), t.id_typed()));
        Ok(all)
    }

    pub fn by_status(&self, tenant_id: TenantId, status: TransferStatus) -> ServiceResult<Vec<Transfer>> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|t| t.status() == status)
            .collect())
    }

    /// Transfers leaving or arriving at `location_id`.
    pub fn for_location(&self, tenant_id: TenantId, location_id: LocationId) -> ServiceResult<Vec<Transfer>> {
        Ok(self
            .list(tenant_id)?
            .into_iter()
            .filter(|t| {
                t.source_location_id() == location_id || t.destination_location_id() == location_id
            })
            .collect())
    }

    /// Next open transfer to work for `destination`: EMERGENCY before HIGH
    /// before NORMAL.
    pub fn next_for_destination(
        &self,
        tenant_id: TenantId,
        destination: LocationId,
    ) -> ServiceResult<Option<Transfer>> {
        let all = self.list(tenant_id)?;
        Ok(next_for_destination(&all, destination).cloned())
    }
}
