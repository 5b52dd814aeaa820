//! Application services: one per component, all sharing a [`ServiceContext`].
//!
//! Services turn route-layer calls into commands, run them through the
//! dispatcher or a guarded store write, and emit audit records. They hold no
//! state of their own; constructing one is a couple of `Arc` clones.

use std::sync::Arc;

use stockroute_allocation::{Allocation, AllocationTemplate};
use stockroute_analytics::{TenantAlertPolicy, VarianceAlert};
use stockroute_purchasing::PurchaseOrder;
use stockroute_transfers::{TenantEmergencyConfig, Transfer};

use crate::audit::AuditSink;
use crate::config::EngineConfig;
use crate::directory::LocationDirectory;
use crate::notify::NotificationDispatcher;
use crate::store::{InMemoryRecordStore, RecordStore};

pub mod advisor;
pub mod allocations;
pub mod analytics;
pub mod bulk;
pub mod emergency;
pub mod linker;
pub mod transfers;

pub use advisor::{AcceptedSuggestions, AdvisorService};
pub use allocations::{AllocationChanges, AllocationService, NewAllocation};
pub use analytics::AnalyticsService;
pub use bulk::{BulkAllocationRequest, BulkService, NewTemplate};
pub use emergency::{EmergencyService, EmergencyTransferOutcome, EscalationReport};
pub use linker::{
    AllocationTransferLink, LinkId, LinkService, LinkedTransfer, SyncAction, SyncOutcome,
    SyncReport, TraceLink, TraceabilityChain, TransferFromAllocation,
};
pub use transfers::{NewTransfer, TransferChanges, TransferService};

/// Every record store the engine writes to.
#[derive(Clone)]
pub struct Stores {
    pub purchase_orders: Arc<dyn RecordStore<PurchaseOrder>>,
    pub allocations: Arc<dyn RecordStore<Allocation>>,
    pub templates: Arc<dyn RecordStore<AllocationTemplate>>,
    pub transfers: Arc<dyn RecordStore<Transfer>>,
    pub links: Arc<dyn RecordStore<AllocationTransferLink>>,
    pub emergency_configs: Arc<dyn RecordStore<TenantEmergencyConfig>>,
    pub alert_policies: Arc<dyn RecordStore<TenantAlertPolicy>>,
    pub alerts: Arc<dyn RecordStore<VarianceAlert>>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            purchase_orders: Arc::new(InMemoryRecordStore::new()),
            allocations: Arc::new(InMemoryRecordStore::new()),
            templates: Arc::new(InMemoryRecordStore::new()),
            transfers: Arc::new(InMemoryRecordStore::new()),
            links: Arc::new(InMemoryRecordStore::new()),
            emergency_configs: Arc::new(InMemoryRecordStore::new()),
            alert_policies: Arc::new(InMemoryRecordStore::new()),
            alerts: Arc::new(InMemoryRecordStore::new()),
        }
    }
}

/// Shared collaborators of every service.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<EngineConfig>,
    pub stores: Stores,
    pub directory: Arc<dyn LocationDirectory>,
    pub audit: Arc<dyn AuditSink>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}
