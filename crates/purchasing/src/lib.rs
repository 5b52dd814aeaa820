//! Purchasing domain module (purchase orders and their line items).
//!
//! Purchase orders are owned by the purchasing system; the distribution engine
//! only reads them to know how much of each line may be allocated.

pub mod order;

pub use order::{LineItemId, PurchaseOrder, PurchaseOrderId, PurchaseOrderLineItem};
