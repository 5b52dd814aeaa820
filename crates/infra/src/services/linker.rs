//! Allocation-transfer links, traceability and status repair.
//!
//! Links are append-only. The quantity a link claims is checked against both
//! the allocation's unlinked remainder and what its transfer still carries
//! unclaimed, inside the link store's write lock; links whose transfer was
//! cancelled no longer count against the allocation.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockroute_allocation::{Allocation, AllocationId, AllocationStatus};
use stockroute_core::{
    ActorContext, DomainError, Entity, LocationId, TenantId, UserId, Versioned,
};
use stockroute_transfers::{ReasonCode, Transfer, TransferId, TransferPriority, TransferStatus};

use crate::audit::AuditEntry;
use crate::error::{ServiceError, ServiceResult};
use crate::services::ServiceContext;
use crate::services::allocations::AllocationService;
use crate::services::emergency::EmergencyService;
use crate::services::transfers::{NewTransfer, TransferService};

stockroute_core::aggregate_id!(
    /// Allocation-transfer link identifier.
    LinkId
);

/// Records that `quantity` units of an allocation are fulfilled by a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTransferLink {
    pub id: LinkId,
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub transfer_id: TransferId,
    pub quantity: i64,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Entity for AllocationTransferLink {
    type Id = LinkId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for AllocationTransferLink {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFromAllocation {
    pub source_location_id: LocationId,
    /// Defaults to the allocation's whole unlinked remainder.
    pub quantity: Option<i64>,
    pub priority: TransferPriority,
    pub reason_code: ReasonCode,
    pub notes: Option<String>,
    pub unit_cost: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedTransfer {
    pub transfer: Transfer,
    pub link: AllocationTransferLink,
    /// EMERGENCY transfers only: whether auto-approval went through.
    pub auto_approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceLink {
    pub link: AllocationTransferLink,
    pub transfer: Transfer,
}

/// Allocation, the transfers fulfilling it and every location involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceabilityChain {
    pub allocation: Allocation,
    pub links: Vec<TraceLink>,
    /// Allocation target first, then transfer endpoints in link order.
    pub locations: Vec<LocationId>,
    pub quantity_linked: i64,
    pub quantity_unlinked: i64,
    /// Received through linked transfers, pro rata to each link's share.
    pub quantity_received_via_transfers: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SyncAction {
    ShipAllocation,
    ReceiveAllocation { quantity_received: i64 },
    CancelTransfer { transfer_id: TransferId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub allocation_id: AllocationId,
    pub before: AllocationStatus,
    pub after: AllocationStatus,
    pub actions: Vec<SyncAction>,
    /// Per-transfer failures; the rest of the repair still ran.
    pub errors: Vec<String>,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub examined: usize,
    pub changed: Vec<SyncOutcome>,
    pub failed: Vec<(AllocationId, String)>,
}

#[derive(Clone)]
pub struct LinkService {
    ctx: ServiceContext,
    allocations: AllocationService,
    transfers: TransferService,
    emergency: EmergencyService,
}

impl LinkService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            allocations: AllocationService::new(ctx.clone()),
            transfers: TransferService::new(ctx.clone()),
            emergency: EmergencyService::new(ctx.clone()),
            ctx,
        }
    }

    /// Request a transfer into the allocation's target and link it, as one
    /// unit: when the link is refused the new transfer is removed again.
    #[instrument(
        skip(self, actor, input),
        fields(tenant = %actor.tenant_id, allocation_id = %allocation_id)
    )]
    pub fn create_transfer_from_allocation(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        input: TransferFromAllocation,
    ) -> ServiceResult<LinkedTransfer> {
        let tenant_id = actor.tenant_id;
        let allocation = self.allocations.get(tenant_id, allocation_id)?;
        ensure_linkable(&allocation)?;

        let unlinked = self.unlinked_quantity(tenant_id, &allocation)?;
        let quantity = input.quantity.unwrap_or(unlinked);
        if quantity <= 0 {
            return Err(DomainError::validation("transfer quantity must be positive").into());
        }
        if quantity > unlinked {
            return Err(DomainError::over_allocation(quantity, unlinked).into());
        }

        let request = NewTransfer {
            product_id: allocation.product_id(),
            source_location_id: input.source_location_id,
            destination_location_id: allocation.target_location_id(),
            quantity,
            priority: input.priority,
            reason_code: input.reason_code,
            notes: input.notes,
            unit_cost: input.unit_cost,
        };
        let transfer_id = TransferId::generate();
        let dispatched = if request.priority == TransferPriority::Emergency {
            self.emergency
                .persist_emergency(actor, transfer_id, &request, Utc::now())?
                .0
        } else {
            self.transfers
                .persist_request(actor, transfer_id, &request, None)?
        };

        let link = match self.insert_link(actor, &allocation, transfer_id, quantity, quantity) {
            Ok(link) => link,
            Err(err) => {
                if let Err(undo) = self.transfers.dispatcher().discard(&dispatched) {
                    warn!(transfer_id = %transfer_id, error = %undo, "could not remove unlinked transfer");
                }
                return Err(err);
            }
        };
        self.transfers.dispatcher().publish(&dispatched);
        self.audit_link(&link);
        info!(transfer_id = %transfer_id, link_id = %link.id, quantity, "transfer created from allocation");

        let (transfer, auto_approved) = if request.priority == TransferPriority::Emergency {
            let (transfer, _, approved) = self.emergency.try_auto_approve(actor, dispatched.aggregate)?;
            (transfer, approved)
        } else {
            (dispatched.aggregate, false)
        };
        Ok(LinkedTransfer {
            transfer,
            link,
            auto_approved,
        })
    }

    /// Link an existing transfer to an allocation of the same product.
    ///
    /// `quantity` defaults to the smaller of the transfer's unclaimed quantity
    /// and the allocation's unlinked remainder.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub fn link(
        &self,
        actor: &ActorContext,
        allocation_id: AllocationId,
        transfer_id: TransferId,
        quantity: Option<i64>,
    ) -> ServiceResult<AllocationTransferLink> {
        let tenant_id = actor.tenant_id;
        let allocation = self.allocations.get(tenant_id, allocation_id)?;
        let transfer = self.transfers.get(tenant_id, transfer_id)?;
        ensure_linkable(&allocation)?;
        if transfer.status() == TransferStatus::Cancelled {
            return Err(DomainError::invariant("cannot link a CANCELLED transfer").into());
        }
        if transfer.product_id() != allocation.product_id() {
            return Err(DomainError::validation(
                "transfer and allocation are for different products",
            )
            .into());
        }

        let capacity = transfer.expected_quantity();
        let quantity = match quantity {
            Some(q) => q,
            None => (capacity - transfer_claims(&self.ctx, tenant_id, transfer_id)?)
                .min(self.unlinked_quantity(tenant_id, &allocation)?),
        };
        if quantity <= 0 {
            return Err(DomainError::validation("link quantity must be positive").into());
        }

        let link = self.insert_link(actor, &allocation, transfer_id, quantity, capacity)?;
        self.audit_link(&link);
        info!(link_id = %link.id, quantity, "transfer linked to allocation");
        Ok(link)
    }

    fn insert_link(
        &self,
        actor: &ActorContext,
        allocation: &Allocation,
        transfer_id: TransferId,
        quantity: i64,
        transfer_capacity: i64,
    ) -> ServiceResult<AllocationTransferLink> {
        let tenant_id = actor.tenant_id;
        let cancelled = cancelled_transfers(&self.ctx, tenant_id)?;
        let allocated = allocation.quantity_allocated();
        let guard = |candidate: &AllocationTransferLink, existing: &[AllocationTransferLink]| {
            if existing.iter().any(|l| {
                l.allocation_id == candidate.allocation_id && l.transfer_id == candidate.transfer_id
            }) {
                return Err(DomainError::invariant(
                    "transfer is already linked to this allocation",
                ));
            }
            let linked = active_linked(existing, candidate.allocation_id, &cancelled);
            let remaining = (allocated - linked).max(0);
            if candidate.quantity > remaining {
                return Err(DomainError::over_allocation(candidate.quantity, remaining));
            }
            let claimed: i64 = existing
                .iter()
                .filter(|l| l.transfer_id == candidate.transfer_id)
                .map(|l| l.quantity)
                .sum();
            let unclaimed = (transfer_capacity - claimed).max(0);
            if candidate.quantity > unclaimed {
                return Err(DomainError::over_allocation(candidate.quantity, unclaimed));
            }
            Ok(())
        };

        let link = AllocationTransferLink {
            id: LinkId::generate(),
            tenant_id,
            allocation_id: allocation.id_typed(),
            transfer_id,
            quantity,
            created_by: actor.user_id,
            created_at: Utc::now(),
            version: 0,
        };
        Ok(self.ctx.stores.links.insert(tenant_id, link, Some(&guard))?)
    }

    fn audit_link(&self, link: &AllocationTransferLink) {
        AuditEntry {
            tenant_id: link.tenant_id,
            aggregate_id: link.id.into(),
            aggregate_type: "allocation_transfer_link",
            revision: link.version(),
            event_type: "allocation_transfer_link.created",
            occurred_at: link.created_at,
            actor: Some(link.created_by),
        }
        .emit(self.ctx.audit.as_ref(), link);
    }

    fn unlinked_quantity(&self, tenant_id: TenantId, allocation: &Allocation) -> ServiceResult<i64> {
        let linked = allocation_claims(&self.ctx, tenant_id, allocation.id_typed())?;
        Ok((allocation.quantity_allocated() - linked).max(0))
    }

    /// Links of an allocation, oldest first.
    pub fn links_for_allocation(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
    ) -> ServiceResult<Vec<AllocationTransferLink>> {
        self.links_where(tenant_id, |l| l.allocation_id == allocation_id)
    }

    pub fn links_for_transfer(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> ServiceResult<Vec<AllocationTransferLink>> {
        self.links_where(tenant_id, |l| l.transfer_id == transfer_id)
    }

    fn links_where(
        &self,
        tenant_id: TenantId,
        keep: impl Fn(&AllocationTransferLink) -> bool,
    ) -> ServiceResult<Vec<AllocationTransferLink>> {
        let mut links: Vec<_> = self
            .ctx
            .stores
            .links
            .list(tenant_id)?
            .into_iter()
            .filter(|l| keep(l))
            .collect();
        links.sort_by_key(|l| (l.created_at, l.id));
        Ok(links)
    }

    pub fn traceability_chain(
        &self,
        tenant_id: TenantId,
        allocation_id: AllocationId,
    ) -> ServiceResult<TraceabilityChain> {
        let allocation = self.allocations.get(tenant_id, allocation_id)?;
        let mut links = Vec::new();
        for link in self.links_for_allocation(tenant_id, allocation_id)? {
            match self.ctx.stores.transfers.get(tenant_id, &link.transfer_id)? {
                Some(transfer) => links.push(TraceLink { link, transfer }),
                None => warn!(link_id = %link.id, transfer_id = %link.transfer_id, "linked transfer missing"),
            }
        }

        let mut locations = vec![allocation.target_location_id()];
        for trace in &links {
            for location in [
                trace.transfer.source_location_id(),
                trace.transfer.destination_location_id(),
            ] {
                if !locations.contains(&location) {
                    locations.push(location);
                }
            }
        }

        let mut claims: HashMap<TransferId, i64> = HashMap::new();
        for link in self.ctx.stores.links.list(tenant_id)? {
            *claims.entry(link.transfer_id).or_insert(0) += link.quantity;
        }
        let active = links
            .iter()
            .filter(|t| t.transfer.status() != TransferStatus::Cancelled);
        let quantity_linked: i64 = active.clone().map(|t| t.link.quantity).sum();
        let quantity_received_via_transfers = active
            .map(|t| received_share(t, claims.get(&t.link.transfer_id).copied().unwrap_or(0)))
            .sum();

        Ok(TraceabilityChain {
            quantity_unlinked: (allocation.quantity_allocated() - quantity_linked).max(0),
            allocation,
            links,
            locations,
            quantity_linked,
            quantity_received_via_transfers,
        })
    }

    /// Drive whichever side lags behind forward. Running it again right after
    /// changes nothing.
    ///
    /// - PENDING allocation with a linked transfer already SHIPPED or RECEIVED
    ///   is shipped.
    /// - SHIPPED allocation whose active links cover its quantity and whose
    ///   linked transfers are all RECEIVED is received, with the quantity
    ///   received through those transfers.
    /// - CANCELLED allocation cancels its linked transfers that are still
    ///   REQUESTED or APPROVED.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub fn sync(&self, actor: &ActorContext, allocation_id: AllocationId) -> ServiceResult<SyncOutcome> {
        let chain = self.traceability_chain(actor.tenant_id, allocation_id)?;
        let before = chain.allocation.status();
        let mut status = before;
        let mut actions = Vec::new();
        let mut errors = Vec::new();

        let active: Vec<&TraceLink> = chain
            .links
            .iter()
            .filter(|t| t.transfer.status() != TransferStatus::Cancelled)
            .collect();

        if status == AllocationStatus::Pending
            && active.iter().any(|t| {
                matches!(
                    t.transfer.status(),
                    TransferStatus::Shipped | TransferStatus::Received
                )
            })
        {
            status = self.allocations.ship(actor, allocation_id)?.status();
            actions.push(SyncAction::ShipAllocation);
        }

        if status == AllocationStatus::Shipped
            && !active.is_empty()
            && active.iter().all(|t| t.transfer.status() == TransferStatus::Received)
            && chain.quantity_linked >= chain.allocation.quantity_allocated()
        {
            let quantity_received = chain.quantity_received_via_transfers;
            status = self
                .allocations
                .receive(actor, allocation_id, Some(quantity_received))?
                .status();
            actions.push(SyncAction::ReceiveAllocation { quantity_received });
        }

        if status == AllocationStatus::Cancelled {
            for trace in active.iter().filter(|t| t.transfer.status().is_open()) {
                let transfer_id = trace.transfer.id_typed();
                match self.transfers.cancel(
                    actor,
                    transfer_id,
                    Some("allocation cancelled".to_string()),
                ) {
                    Ok(_) => actions.push(SyncAction::CancelTransfer { transfer_id }),
                    Err(err) => {
                        warn!(transfer_id = %transfer_id, error = %err, "could not cancel linked transfer");
                        errors.push(format!("{transfer_id}: {err}"));
                    }
                }
            }
        }

        if !actions.is_empty() {
            info!(allocation_id = %allocation_id, actions = actions.len(), "allocation and transfers synced");
        }
        Ok(SyncOutcome {
            allocation_id,
            before,
            after: status,
            actions,
            errors,
        })
    }

    /// Sync every linked allocation of the tenant. One allocation failing does
    /// not stop the others.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub fn sync_all(&self, actor: &ActorContext) -> ServiceResult<SyncReport> {
        let mut linked: Vec<AllocationId> = Vec::new();
        for link in self.ctx.stores.links.list(actor.tenant_id)? {
            if !linked.contains(&link.allocation_id) {
                linked.push(link.allocation_id);
            }
        }
        linked.sort();

        let mut report = SyncReport::default();
        for allocation_id in linked {
            report.examined += 1;
            match self.sync(actor, allocation_id) {
                Ok(outcome) if outcome.changed() => report.changed.push(outcome),
                Ok(_) => {}
                Err(err) => {
                    warn!(allocation_id = %allocation_id, error = %err, "sync failed");
                    report.failed.push((allocation_id, err.to_string()));
                }
            }
        }
        Ok(report)
    }
}

fn ensure_linkable(allocation: &Allocation) -> ServiceResult<()> {
    match allocation.status() {
        AllocationStatus::Pending | AllocationStatus::Shipped => Ok(()),
        other => Err(ServiceError::Domain(DomainError::invariant(format!(
            "cannot link transfers to a {other} allocation"
        )))),
    }
}

/// Quantity of `allocation_id` claimed by links whose transfer is not cancelled.
fn active_linked(
    links: &[AllocationTransferLink],
    allocation_id: AllocationId,
    cancelled: &HashSet<TransferId>,
) -> i64 {
    links
        .iter()
        .filter(|l| l.allocation_id == allocation_id && !cancelled.contains(&l.transfer_id))
        .map(|l| l.quantity)
        .sum()
}

/// `floor(link × received / base)` for a received transfer, else 0, where the
/// base is the larger of the expected quantity and everything linked to the
/// transfer. The shares of one transfer never sum past what it delivered.
fn received_share(trace: &TraceLink, claimed_on_transfer: i64) -> i64 {
    let transfer = &trace.transfer;
    let base = transfer.expected_quantity().max(claimed_on_transfer);
    match transfer.quantity_received() {
        Some(received) if base > 0 => trace.link.quantity * received / base,
        _ => 0,
    }
}

fn cancelled_transfers(ctx: &ServiceContext, tenant_id: TenantId) -> ServiceResult<HashSet<TransferId>> {
    Ok(ctx
        .stores
        .transfers
        .list(tenant_id)?
        .into_iter()
        .filter(|t| t.status() == TransferStatus::Cancelled)
        .map(|t| t.id_typed())
        .collect())
}

/// Quantity of an allocation claimed by links whose transfer is not cancelled.
pub(crate) fn allocation_claims(
    ctx: &ServiceContext,
    tenant_id: TenantId,
    allocation_id: AllocationId,
) -> ServiceResult<i64> {
    let links = ctx.stores.links.list(tenant_id)?;
    let cancelled = cancelled_transfers(ctx, tenant_id)?;
    Ok(active_linked(&links, allocation_id, &cancelled))
}

/// Quantity of a transfer claimed by its links, across all allocations.
pub(crate) fn transfer_claims(
    ctx: &ServiceContext,
    tenant_id: TenantId,
    transfer_id: TransferId,
) -> ServiceResult<i64> {
    Ok(ctx
        .stores
        .links
        .list(tenant_id)?
        .iter()
        .filter(|l| l.transfer_id == transfer_id)
        .map(|l| l.quantity)
        .sum())
}
