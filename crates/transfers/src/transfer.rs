use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{
    Aggregate, DomainError, Entity, LocationId, ProductId, TenantId, UserId, Versioned,
};
use stockroute_events::Event;

use crate::reason::ReasonCode;
use crate::status::{self, TransferPriority, TransferRule, TransferStatus};
use crate::variance::{TransferVariance, VarianceTolerance, compute_variance};

stockroute_core::aggregate_id!(
    /// Transfer identifier (tenant-scoped).
    TransferId
);

/// Who drove an approval: a person, or the emergency auto-approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalOrigin {
    #[default]
    Manual,
    Automatic,
}

/// Aggregate root: Transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    id: TransferId,
    tenant_id: TenantId,
    product_id: ProductId,
    source_location_id: LocationId,
    destination_location_id: LocationId,
    quantity_requested: i64,
    quantity_approved: Option<i64>,
    quantity_received: Option<i64>,
    priority: TransferPriority,
    status: TransferStatus,
    reason_code: ReasonCode,
    notes: Option<String>,
    /// Minor currency units per unit, when known.
    unit_cost: Option<i64>,
    variance: Option<TransferVariance>,
    approval_origin: Option<ApprovalOrigin>,
    escalation_level: u32,
    last_escalated_at: Option<DateTime<Utc>>,
    requested_by: UserId,
    approved_by: Option<UserId>,
    shipped_by: Option<UserId>,
    received_by: Option<UserId>,
    cancelled_by: Option<UserId>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Transfer {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: TransferId) -> Self {
        Self {
            id,
            tenant_id: TenantId::nil(),
            product_id: ProductId::nil(),
            source_location_id: LocationId::nil(),
            destination_location_id: LocationId::nil(),
            quantity_requested: 0,
            quantity_approved: None,
            quantity_received: None,
            priority: TransferPriority::Normal,
            status: TransferStatus::Requested,
            reason_code: ReasonCode::Other,
            notes: None,
            unit_cost: None,
            variance: None,
            approval_origin: None,
            escalation_level: 0,
            last_escalated_at: None,
            requested_by: UserId::nil(),
            approved_by: None,
            shipped_by: None,
            received_by: None,
            cancelled_by: None,
            cancellation_reason: None,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
            approved_at: None,
            shipped_at: None,
            received_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> TransferId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn source_location_id(&self) -> LocationId {
        self.source_location_id
    }

    pub fn destination_location_id(&self) -> LocationId {
        self.destination_location_id
    }

    pub fn quantity_requested(&self) -> i64 {
        self.quantity_requested
    }

    pub fn quantity_approved(&self) -> Option<i64> {
        self.quantity_approved
    }

    pub fn quantity_received(&self) -> Option<i64> {
        self.quantity_received
    }

    /// Quantity the transfer is expected to deliver: approved if set, else requested.
    pub fn expected_quantity(&self) -> i64 {
        self.quantity_approved.unwrap_or(self.quantity_requested)
    }

    pub fn priority(&self) -> TransferPriority {
        self.priority
    }

    pub fn is_emergency(&self) -> bool {
        self.priority == TransferPriority::Emergency
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn reason_code(&self) -> ReasonCode {
        self.reason_code
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn unit_cost(&self) -> Option<i64> {
        self.unit_cost
    }

    pub fn variance(&self) -> Option<&TransferVariance> {
        self.variance.as_ref()
    }

    pub fn approval_origin(&self) -> Option<ApprovalOrigin> {
        self.approval_origin
    }

    pub fn escalation_level(&self) -> u32 {
        self.escalation_level
    }

    pub fn last_escalated_at(&self) -> Option<DateTime<Utc>> {
        self.last_escalated_at
    }

    pub fn requested_by(&self) -> UserId {
        self.requested_by
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn shipped_by(&self) -> Option<UserId> {
        self.shipped_by
    }

    pub fn received_by(&self) -> Option<UserId> {
        self.received_by
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
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

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn valid_transitions(&self) -> Vec<TransferStatus> {
        status::valid_transitions(self.status)
    }
}

impl Entity for Transfer {
    type Id = TransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for Transfer {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

/// Command: RequestTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub product_id: ProductId,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub quantity: i64,
    pub priority: TransferPriority,
    pub reason_code: ReasonCode,
    pub notes: Option<String>,
    pub unit_cost: Option<i64>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateTransfer (REQUESTED only). `None` leaves a field unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub quantity: Option<i64>,
    pub reason_code: Option<ReasonCode>,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Received goods, required for the RECEIVED edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivingData {
    pub quantity_received: i64,
    pub variance_reason: Option<String>,
    pub notes: Option<String>,
}

/// Everything a transition may consume besides the target state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    pub actor: UserId,
    pub tenant_id: TenantId,
    pub reason: Option<String>,
    pub approved_quantity: Option<i64>,
    pub receiving: Option<ReceivingData>,
    pub origin: ApprovalOrigin,
}

impl TransitionContext {
    pub fn new(tenant_id: TenantId, actor: UserId) -> Self {
        Self {
            actor,
            tenant_id,
            reason: None,
            approved_quantity: None,
            receiving: None,
            origin: ApprovalOrigin::Manual,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_approved_quantity(mut self, quantity: i64) -> Self {
        self.approved_quantity = Some(quantity);
        self
    }

    pub fn with_receiving(mut self, receiving: ReceivingData) -> Self {
        self.receiving = Some(receiving);
        self
    }

    pub fn automatic(mut self) -> Self {
        self.origin = ApprovalOrigin::Automatic;
        self
    }
}

/// Command: TransitionTransfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionTransfer {
    pub transfer_id: TransferId,
    pub target: TransferStatus,
    pub context: TransitionContext,
    pub tolerance: VarianceTolerance,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EscalateTransfer (EMERGENCY, REQUESTED only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalateTransfer {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub level: u32,
    pub max_level: u32,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferCommand {
    Request(RequestTransfer),
    Update(UpdateTransfer),
    Transition(TransitionTransfer),
    Escalate(EscalateTransfer),
}

/// Event: TransferRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequested {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub product_id: ProductId,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub quantity: i64,
    pub priority: TransferPriority,
    pub reason_code: ReasonCode,
    pub notes: Option<String>,
    pub unit_cost: Option<i64>,
    pub requested_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferUpdated (resulting values).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferUpdated {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub quantity: i64,
    pub reason_code: ReasonCode,
    pub notes: Option<String>,
    pub updated_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferStatusChanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatusChanged {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub from: TransferStatus,
    pub to: TransferStatus,
    pub actor: UserId,
    pub origin: ApprovalOrigin,
    pub reason: Option<String>,
    pub approved_quantity: Option<i64>,
    pub quantity_received: Option<i64>,
    pub variance: Option<TransferVariance>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: TransferEscalated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEscalated {
    pub tenant_id: TenantId,
    pub transfer_id: TransferId,
    pub from_level: u32,
    pub to_level: u32,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferEvent {
    Requested(TransferRequested),
    Updated(TransferUpdated),
    StatusChanged(TransferStatusChanged),
    Escalated(TransferEscalated),
}

impl Event for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::Requested(_) => "transfer.requested",
            TransferEvent::Updated(_) => "transfer.updated",
            TransferEvent::StatusChanged(e) => match (e.to, e.origin) {
                (TransferStatus::Approved, ApprovalOrigin::Automatic) => "transfer.auto_approved",
                (TransferStatus::Approved, ApprovalOrigin::Manual) => "transfer.approved",
                (TransferStatus::Shipped, _) => "transfer.shipped",
                (TransferStatus::Received, _) => "transfer.received",
                (TransferStatus::Cancelled, _) => "transfer.cancelled",
                (TransferStatus::Requested, _) => "transfer.status_changed",
            },
            TransferEvent::Escalated(_) => "transfer.escalated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TransferEvent::Requested(e) => e.occurred_at,
            TransferEvent::Updated(e) => e.occurred_at,
            TransferEvent::StatusChanged(e) => e.occurred_at,
            TransferEvent::Escalated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Transfer {
    type Command = TransferCommand;
    type Event = TransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TransferEvent::Requested(e) => {
                self.id = e.transfer_id;
                self.tenant_id = e.tenant_id;
                self.product_id = e.product_id;
                self.source_location_id = e.source_location_id;
                self.destination_location_id = e.destination_location_id;
                self.quantity_requested = e.quantity;
                self.priority = e.priority;
                self.status = TransferStatus::Requested;
                self.reason_code = e.reason_code;
                self.notes = e.notes.clone();
                self.unit_cost = e.unit_cost;
                self.requested_by = e.requested_by;
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.created = true;
            }
            TransferEvent::Updated(e) => {
                self.quantity_requested = e.quantity;
                self.reason_code = e.reason_code;
                self.notes = e.notes.clone();
                self.updated_at = e.occurred_at;
            }
            TransferEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = e.occurred_at;
                match e.to {
                    TransferStatus::Approved => {
                        self.quantity_approved = e.approved_quantity;
                        self.approval_origin = Some(e.origin);
                        self.approved_by = Some(e.actor);
                        self.approved_at = Some(e.occurred_at);
                    }
                    TransferStatus::Shipped => {
                        self.shipped_by = Some(e.actor);
                        self.shipped_at = Some(e.occurred_at);
                    }
                    TransferStatus::Received => {
                        self.quantity_received = e.quantity_received;
                        self.variance = e.variance.clone();
                        self.received_by = Some(e.actor);
                        self.received_at = Some(e.occurred_at);
                    }
                    TransferStatus::Cancelled => {
                        self.cancelled_by = Some(e.actor);
                        self.cancellation_reason = e.reason.clone();
                        self.cancelled_at = Some(e.occurred_at);
                    }
                    TransferStatus::Requested => {}
                }
            }
            TransferEvent::Escalated(e) => {
                self.escalation_level = e.to_level;
                self.last_escalated_at = Some(e.occurred_at);
                self.updated_at = e.occurred_at;
            }
        }
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TransferCommand::Request(cmd) => self.handle_request(cmd),
            TransferCommand::Update(cmd) => self.handle_update(cmd),
            TransferCommand::Transition(cmd) => self.handle_transition(cmd),
            TransferCommand::Escalate(cmd) => self.handle_escalate(cmd),
        }
    }
}

impl Transfer {
    fn ensure_visible(&self, tenant_id: TenantId, transfer_id: TransferId) -> Result<(), DomainError> {
        if !self.created || self.tenant_id != tenant_id || self.id != transfer_id {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_request(&self, cmd: &RequestTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::invariant("transfer already exists"));
        }
        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.source_location_id == cmd.destination_location_id {
            return Err(DomainError::validation(
                "source and destination locations must differ",
            ));
        }
        if cmd.unit_cost.is_some_and(|c| c < 0) {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }

        Ok(vec![TransferEvent::Requested(TransferRequested {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            product_id: cmd.product_id,
            source_location_id: cmd.source_location_id,
            destination_location_id: cmd.destination_location_id,
            quantity: cmd.quantity,
            priority: cmd.priority,
            reason_code: cmd.reason_code,
            notes: normalize(cmd.notes.as_deref()),
            unit_cost: cmd.unit_cost,
            requested_by: cmd.requested_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_visible(cmd.tenant_id, cmd.transfer_id)?;
        if self.status != TransferStatus::Requested {
            return Err(DomainError::invariant(format!(
                "only REQUESTED transfers can be edited (current: {})",
                self.status
            )));
        }
        if cmd.quantity.is_none() && cmd.reason_code.is_none() && cmd.notes.is_none() {
            return Err(DomainError::validation("nothing to update"));
        }
        let quantity = cmd.quantity.unwrap_or(self.quantity_requested);
        if quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        Ok(vec![TransferEvent::Updated(TransferUpdated {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            quantity,
            reason_code: cmd.reason_code.unwrap_or(self.reason_code),
            notes: match &cmd.notes {
                Some(n) => normalize(Some(n.as_str())),
                None => self.notes.clone(),
            },
            updated_by: cmd.updated_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_transition(&self, cmd: &TransitionTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        let ctx = &cmd.context;
        self.ensure_visible(ctx.tenant_id, cmd.transfer_id)?;

        let rule = status::transition(self.status, cmd.target)?;
        if rule != TransferRule::Approval && ctx.origin == ApprovalOrigin::Automatic {
            return Err(DomainError::validation(
                "only approvals can be performed automatically",
            ));
        }
        if rule != TransferRule::Approval && ctx.approved_quantity.is_some() {
            return Err(DomainError::validation(
                "approved_quantity only applies when approving",
            ));
        }
        if rule != TransferRule::Receipt && ctx.receiving.is_some() {
            return Err(DomainError::validation(
                "receiving data only applies when receiving",
            ));
        }

        let mut approved_quantity = None;
        let mut quantity_received = None;
        let mut variance = None;

        match rule {
            TransferRule::Approval => {
                if let Some(q) = ctx.approved_quantity {
                    if q <= 0 || q > self.quantity_requested {
                        return Err(DomainError::validation(format!(
                            "approved quantity must be between 1 and {}",
                            self.quantity_requested
                        )));
                    }
                }
                approved_quantity = ctx.approved_quantity;
            }
            TransferRule::Receipt => {
                let receiving = ctx.receiving.as_ref().ok_or_else(|| {
                    DomainError::validation("receiving data is required to receive a transfer")
                })?;
                if receiving.quantity_received < 0 {
                    return Err(DomainError::validation("quantity_received cannot be negative"));
                }
                let mut computed = compute_variance(
                    self.expected_quantity(),
                    receiving.quantity_received,
                    cmd.tolerance,
                );
                computed.reason = normalize(receiving.variance_reason.as_deref());
                if computed.requires_reason() && computed.reason.is_none() {
                    return Err(DomainError::validation(format!(
                        "variance of {} ({:.1}%) exceeds the {:.1}% tolerance; a variance reason is required",
                        computed.variance,
                        computed.percentage,
                        cmd.tolerance.percent()
                    )));
                }
                quantity_received = Some(receiving.quantity_received);
                variance = Some(computed);
            }
            TransferRule::Shipment | TransferRule::Cancellation => {}
        }

        let reason = normalize(ctx.reason.as_deref()).or_else(|| {
            ctx.receiving
                .as_ref()
                .and_then(|r| normalize(r.notes.as_deref()))
        });

        Ok(vec![TransferEvent::StatusChanged(TransferStatusChanged {
            tenant_id: ctx.tenant_id,
            transfer_id: cmd.transfer_id,
            from: self.status,
            to: cmd.target,
            actor: ctx.actor,
            origin: ctx.origin,
            reason,
            approved_quantity,
            quantity_received,
            variance,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_escalate(&self, cmd: &EscalateTransfer) -> Result<Vec<TransferEvent>, DomainError> {
        self.ensure_visible(cmd.tenant_id, cmd.transfer_id)?;
        if !self.is_emergency() {
            return Err(DomainError::invariant("only EMERGENCY transfers escalate"));
        }
        if self.status != TransferStatus::Requested {
            return Err(DomainError::invariant(format!(
                "only REQUESTED transfers escalate (current: {})",
                self.status
            )));
        }
        if cmd.level == 0 || cmd.level > cmd.max_level {
            return Err(DomainError::validation(format!(
                "escalation level must be between 1 and {}",
                cmd.max_level
            )));
        }
        // Re-escalating to a level already reached is a no-op.
        if cmd.level <= self.escalation_level {
            return Ok(Vec::new());
        }

        Ok(vec![TransferEvent::Escalated(TransferEscalated {
            tenant_id: cmd.tenant_id,
            transfer_id: cmd.transfer_id,
            from_level: self.escalation_level,
            to_level: cmd.level,
            actor: cmd.actor,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn normalize(text: Option<&str>) -> Option<String> {
    text.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}
