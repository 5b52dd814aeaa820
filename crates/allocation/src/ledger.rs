//! Over-allocation constraint checker.
//!
//! Invariant: for every line item, the quantity of its non-cancelled
//! allocations never exceeds `quantity_ordered`. These functions are pure; the
//! infra layer runs [`guard_allocation`] inside the same conditional write that
//! stores the allocation.

use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, ProductId};
use stockroute_purchasing::{LineItemId, PurchaseOrderId, PurchaseOrderLineItem};

use crate::allocation::{Allocation, AllocationId};
use crate::status::AllocationStatus;

/// Sum of active allocations against `line_item_id`, optionally ignoring one
/// allocation (the one being edited).
pub fn committed_quantity<'a>(
    allocations: impl IntoIterator<Item = &'a Allocation>,
    line_item_id: LineItemId,
    excluding: Option<AllocationId>,
) -> i64 {
    allocations
        .into_iter()
        .filter(|a| a.line_item_id() == line_item_id)
        .filter(|a| a.status().is_active())
        .filter(|a| Some(a.id_typed()) != excluding)
        .map(|a| a.quantity_allocated())
        .sum()
}

/// Fail with `OverAllocation` when `committed + requested > ordered`.
pub fn check_allocatable(quantity_ordered: i64, committed: i64, requested: i64) -> DomainResult<()> {
    let remaining = quantity_ordered - committed;
    if requested > remaining {
        return Err(DomainError::over_allocation(requested, remaining));
    }
    Ok(())
}

/// Check `candidate` (new or edited) against the other allocations of its line.
pub fn guard_allocation(
    line: &PurchaseOrderLineItem,
    candidate: &Allocation,
    existing: &[Allocation],
) -> DomainResult<()> {
    if candidate.line_item_id() != line.id {
        return Err(DomainError::invariant("allocation does not belong to line item"));
    }
    if !candidate.status().is_active() {
        return Ok(());
    }
    let committed = committed_quantity(existing, line.id, Some(candidate.id_typed()));
    check_allocatable(line.quantity_ordered, committed, candidate.quantity_allocated())
}

/// Allocation position of a single line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemPosition {
    pub line_item_id: LineItemId,
    pub purchase_order_id: PurchaseOrderId,
    pub product_id: ProductId,
    pub quantity_ordered: i64,
    pub quantity_allocated: i64,
    pub quantity_remaining: i64,
    pub quantity_received: i64,
    pub active_allocations: usize,
    pub cancelled_allocations: usize,
}

impl LineItemPosition {
    pub fn is_fully_allocated(&self) -> bool {
        self.quantity_remaining == 0
    }
}

pub fn line_position(line: &PurchaseOrderLineItem, allocations: &[Allocation]) -> LineItemPosition {
    let own = allocations.iter().filter(|a| a.line_item_id() == line.id);
    let mut position = LineItemPosition {
        line_item_id: line.id,
        purchase_order_id: line.purchase_order_id,
        product_id: line.product_id,
        quantity_ordered: line.quantity_ordered,
        quantity_allocated: 0,
        quantity_remaining: 0,
        quantity_received: 0,
        active_allocations: 0,
        cancelled_allocations: 0,
    };
    for a in own {
        if a.status().is_active() {
            position.active_allocations += 1;
            position.quantity_allocated += a.quantity_allocated();
        } else {
            position.cancelled_allocations += 1;
        }
        if a.status() == AllocationStatus::Received {
            position.quantity_received += a.quantity_received();
        }
    }
    position.quantity_remaining = (line.quantity_ordered - position.quantity_allocated).max(0);
    position
}
