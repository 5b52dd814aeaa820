//! Allocation domain module.
//!
//! Commitments of purchase-order line item quantities to destination
//! locations: the status machine, the over-allocation constraint checker, bulk
//! and template distribution planning. Pure deterministic logic (no IO, no
//! storage).

pub mod allocation;
pub mod bulk;
pub mod ledger;
pub mod status;
pub mod template;

pub use allocation::{
    Allocation, AllocationCommand, AllocationCreated, AllocationDeleted, AllocationEvent,
    AllocationId, AllocationStatusChanged, AllocationUpdated, CreateAllocation, DeleteAllocation,
    TransitionAllocation, UpdateAllocation,
};
pub use bulk::{
    BulkAllocationItem, BulkAllocationResult, BulkPlan, BulkStrategy, FailedAllocation,
    LineCapacity, LineRemainder, PercentageSplit, plan_bulk,
};
pub use ledger::{
    LineItemPosition, check_allocatable, committed_quantity, guard_allocation, line_position,
};
pub use status::{AllocationStatus, AllocationTransition, valid_transitions};
pub use template::{AllocationTemplate, TemplateId, TemplateRule, TemplateShare};
