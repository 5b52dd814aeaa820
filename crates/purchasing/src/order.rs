use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, Entity, ProductId, TenantId, Versioned};

stockroute_core::aggregate_id!(
    /// Purchase order identifier (tenant-scoped).
    PurchaseOrderId
);

stockroute_core::aggregate_id!(
    /// Purchase order line item identifier (tenant-scoped).
    LineItemId
);

/// Purchase order line item.
///
/// `unit_price` is expressed in minor currency units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderLineItem {
    pub id: LineItemId,
    pub purchase_order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub unit_price: i64,
}

/// Purchase order (read by the allocation ledger, never mutated by it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: TenantId,
    reference: String,
    lines: Vec<PurchaseOrderLineItem>,
    created_at: DateTime<Utc>,
    version: u64,
}

impl PurchaseOrder {
    pub fn new(
        tenant_id: TenantId,
        id: PurchaseOrderId,
        reference: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let reference = reference.into();
        if reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            reference,
            lines: Vec::new(),
            created_at,
            version: 0,
        })
    }

    /// Append a line; returns the new line item's id.
    pub fn add_line(
        &mut self,
        line_id: LineItemId,
        product_id: ProductId,
        quantity_ordered: i64,
        unit_price: i64,
    ) -> DomainResult<LineItemId> {
        if quantity_ordered <= 0 {
            return Err(DomainError::validation("quantity_ordered must be positive"));
        }
        if unit_price < 0 {
            return Err(DomainError::validation("unit_price cannot be negative"));
        }
        if self.lines.iter().any(|l| l.id == line_id) {
            return Err(DomainError::validation("duplicate line item id"));
        }
        self.lines.push(PurchaseOrderLineItem {
            id: line_id,
            purchase_order_id: self.id,
            product_id,
            quantity_ordered,
            unit_price,
        });
        Ok(line_id)
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn lines(&self) -> &[PurchaseOrderLineItem] {
        &self.lines
    }

    pub fn line(&self, line_id: LineItemId) -> Option<&PurchaseOrderLineItem> {
        self.lines.iter().find(|l| l.id == line_id)
    }

    pub fn total_quantity(&self) -> i64 {
        self.lines.iter().map(|l| l.quantity_ordered).sum()
    }
}

impl Entity for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for PurchaseOrder {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
