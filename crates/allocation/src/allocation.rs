use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{
    Aggregate, DomainError, Entity, LocationId, ProductId, TenantId, UserId, Versioned,
};
use stockroute_events::Event;
use stockroute_purchasing::{LineItemId, PurchaseOrderId};

use crate::status::{self, AllocationStatus, AllocationTransition};

stockroute_core::aggregate_id!(
    /// Allocation identifier (tenant-scoped via `tenant_id` fields in events/commands).
    AllocationId
);

/// Aggregate root: Allocation.
///
/// A commitment of part of a purchase-order line item to one destination.
/// State only changes through [`AllocationCommand`]s; the status edges are
/// those of [`crate::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    id: AllocationId,
    tenant_id: TenantId,
    purchase_order_id: PurchaseOrderId,
    line_item_id: LineItemId,
    product_id: ProductId,
    target_location_id: LocationId,
    quantity_allocated: i64,
    quantity_received: i64,
    status: AllocationStatus,
    notes: Option<String>,
    created_by: UserId,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    shipped_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    version: u64,
    created: bool,
}

impl Allocation {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: AllocationId) -> Self {
        Self {
            id,
            tenant_id: TenantId::nil(),
            purchase_order_id: PurchaseOrderId::nil(),
            line_item_id: LineItemId::nil(),
            product_id: ProductId::nil(),
            target_location_id: LocationId::nil(),
            quantity_allocated: 0,
            quantity_received: 0,
            status: AllocationStatus::Pending,
            notes: None,
            created_by: UserId::nil(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            shipped_at: None,
            received_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> AllocationId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn purchase_order_id(&self) -> PurchaseOrderId {
        self.purchase_order_id
    }

    pub fn line_item_id(&self) -> LineItemId {
        self.line_item_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn target_location_id(&self) -> LocationId {
        self.target_location_id
    }

    pub fn quantity_allocated(&self) -> i64 {
        self.quantity_allocated
    }

    pub fn quantity_received(&self) -> i64 {
        self.quantity_received
    }

    pub fn status(&self) -> AllocationStatus {
        self.status
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn created_by(&self) -> UserId {
        self.created_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Received minus allocated, once received.
    pub fn variance(&self) -> Option<i64> {
        (self.status == AllocationStatus::Received)
            .then_some(self.quantity_received - self.quantity_allocated)
    }

    pub fn valid_transitions(&self) -> Vec<AllocationStatus> {
        status::valid_transitions(self.status)
    }
}

impl Entity for Allocation {
    type Id = AllocationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for Allocation {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Command: CreateAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAllocation {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub purchase_order_id: PurchaseOrderId,
    pub line_item_id: LineItemId,
    pub product_id: ProductId,
    pub target_location_id: LocationId,
    pub quantity: i64,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateAllocation (PENDING only). `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAllocation {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub quantity: Option<i64>,
    pub target_location_id: Option<LocationId>,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransitionAllocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAllocation {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub target: AllocationStatus,
    /// Only meaningful for RECEIVED; defaults to the allocated quantity.
    pub quantity_received: Option<i64>,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteAllocation (PENDING only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteAllocation {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationCommand {
    Create(CreateAllocation),
    Update(UpdateAllocation),
    Transition(TransitionAllocation),
    Delete(DeleteAllocation),
}

/// Event: AllocationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationCreated {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub purchase_order_id: PurchaseOrderId,
    pub line_item_id: LineItemId,
    pub product_id: ProductId,
    pub target_location_id: LocationId,
    pub quantity: i64,
    pub notes: Option<String>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationUpdated (carries the resulting values, not deltas).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationUpdated {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub quantity: i64,
    pub target_location_id: LocationId,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationStatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStatusChanged {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub from: AllocationStatus,
    pub to: AllocationStatus,
    pub quantity_received: Option<i64>,
    pub reason: Option<String>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AllocationDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDeleted {
    pub tenant_id: TenantId,
    pub allocation_id: AllocationId,
    pub deleted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    Created(AllocationCreated),
    Updated(AllocationUpdated),
    StatusChanged(AllocationStatusChanged),
    Deleted(AllocationDeleted),
}

impl Event for AllocationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocationEvent::Created(_) => "allocation.created",
            AllocationEvent::Updated(_) => "allocation.updated",
            AllocationEvent::StatusChanged(e) => match e.to {
                AllocationStatus::Shipped => "allocation.shipped",
                AllocationStatus::Received => "allocation.received",
                AllocationStatus::Cancelled => "allocation.cancelled",
                AllocationStatus::Pending => "allocation.status_changed",
            },
            AllocationEvent::Deleted(_) => "allocation.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AllocationEvent::Created(e) => e.occurred_at,
            AllocationEvent::Updated(e) => e.occurred_at,
            AllocationEvent::StatusChanged(e) => e.occurred_at,
            AllocationEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Allocation {
    type Command = AllocationCommand;
    type Event = AllocationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AllocationEvent::Created(e) => {
                self.id = e.allocation_id;
                self.tenant_id = e.tenant_id;
                self.purchase_order_id = e.purchase_order_id;
                self.line_item_id = e.line_item_id;
                self.product_id = e.product_id;
                self.target_location_id = e.target_location_id;
                self.quantity_allocated = e.quantity;
                self.quantity_received = 0;
                self.status = AllocationStatus::Pending;
                self.notes = e.notes.clone();
                self.created_by = e.created_by;
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.created = true;
            }
            AllocationEvent::Updated(e) => {
                self.quantity_allocated = e.quantity;
                self.target_location_id = e.target_location_id;
                self.notes = e.notes.clone();
                self.updated_at = e.occurred_at;
            }
            AllocationEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = e.occurred_at;
                match e.to {
                    AllocationStatus::Shipped => self.shipped_at = Some(e.occurred_at),
                    AllocationStatus::Received => {
                        self.received_at = Some(e.occurred_at);
                        self.quantity_received =
                            e.quantity_received.unwrap_or(self.quantity_allocated);
                    }
                    AllocationStatus::Cancelled => {
                        self.cancelled_at = Some(e.occurred_at);
                        self.cancellation_reason = e.reason.clone();
                    }
                    AllocationStatus::Pending => {}
                }
            }
            AllocationEvent::Deleted(e) => {
                self.updated_at = e.occurred_at;
                self.created = false;
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AllocationCommand::Create(cmd) => self.handle_create(cmd),
            AllocationCommand::Update(cmd) => self.handle_update(cmd),
            AllocationCommand::Transition(cmd) => self.handle_transition(cmd),
            AllocationCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Allocation {
    /// Unknown and foreign-tenant allocations look the same to the caller.
    fn ensure_visible(&self, tenant_id: TenantId, allocation_id: AllocationId) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != tenant_id || self.id != allocation_id {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_editable(&self, action: &str) -> Result<(), DomainError> {
        if self.status != AllocationStatus::Pending {
            return Err(DomainError::invariant(format!(
                "only PENDING allocations can be {action} (current: {}); use a status transition instead",
                self.status
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invariant("allocation already exists"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        Ok(vec![AllocationEvent::Created(AllocationCreated {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            purchase_order_id: cmd.purchase_order_id,
            line_item_id: cmd.line_item_id,
            product_id: cmd.product_id,
            target_location_id: cmd.target_location_id,
            quantity: cmd.quantity,
            notes: normalize(cmd.notes.as_deref()),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_visible(cmd.tenant_id, cmd.allocation_id)?;
        self.ensure_editable("edited")?;

        if cmd.quantity.is_none() && cmd.target_location_id.is_none() && cmd.notes.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }
        let quantity = cmd.quantity.unwrap_or(self.quantity_allocated);
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![AllocationEvent::Updated(AllocationUpdated {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            quantity,
            target_location_id: cmd.target_location_id.unwrap_or(self.target_location_id),
            notes: match &cmd.notes {
                Some(n) => normalize(Some(n.as_str())),
                None => self.notes.clone(),
            },
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(
        &self,
        cmd: &TransitionAllocation,
    ) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_visible(cmd.tenant_id, cmd.allocation_id)?;

        let edge = status::transition(self.status, cmd.target)?;
        let quantity_received = match edge {
            AllocationTransition::Receive => {
                let q = cmd.quantity_received.unwrap_or(self.quantity_allocated);
                if q < 0 {
                    return Err(DomainError::validation("quantity_received cannot be negative"));
                }
                Some(q)
            }
            AllocationTransition::Ship | AllocationTransition::Cancel => {
                if cmd.quantity_received.is_some() {
                    return Err(DomainError::validation(
                        "quantity_received only applies when receiving",
                    ));
                }
                None
            }
        };

        Ok(vec![AllocationEvent::StatusChanged(AllocationStatusChanged {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            from: self.status,
            to: cmd.target,
            quantity_received,
            reason: normalize(cmd.reason.as_deref()),
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteAllocation) -> Result<Vec<AllocationEvent>, DomainError> {
        self.ensure_visible(cmd.tenant_id, cmd.allocation_id)?;
        self.ensure_editable("deleted")?;

        Ok(vec![AllocationEvent::Deleted(AllocationDeleted {
            tenant_id: cmd.tenant_id,
            allocation_id: cmd.allocation_id,
            deleted_by: cmd.deleted_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
