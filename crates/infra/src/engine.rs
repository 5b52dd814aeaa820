//! `Engine`: wires stores, collaborators and configuration into services.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use stockroute_core::TenantId;
use stockroute_events::{EventBus, InMemoryAuditBus, Subscription};

use crate::audit::{AuditEnvelope, AuditSink, BusAuditSink};
use crate::config::EngineConfig;
use crate::directory::{InMemoryLocationDirectory, LocationDirectory};
use crate::notify::{NoopNotifier, NotificationDispatcher};
use crate::services::{
    AdvisorService, AllocationService, AnalyticsService, BulkService, EmergencyService,
    LinkService, ServiceContext, Stores, TransferService,
};

pub struct EngineBuilder {
    config: EngineConfig,
    stores: Option<Stores>,
    directory: Option<Arc<dyn LocationDirectory>>,
    audit: Option<Arc<dyn AuditSink>>,
    notifier: Option<Arc<dyn NotificationDispatcher>>,
}

impl EngineBuilder {
    pub fn with_stores(mut self, stores: Stores) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn LocationDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Missing pieces default to in-memory stores, an empty directory, no
    /// notifications and an in-process audit bus.
    pub fn build(self) -> Engine {
        let audit_bus = Arc::new(InMemoryAuditBus::<JsonValue>::new());
        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(BusAuditSink::new(audit_bus.clone())));
        Engine {
            ctx: ServiceContext {
                config: Arc::new(self.config),
                stores: self.stores.unwrap_or_else(Stores::in_memory),
                directory: self
                    .directory
                    .unwrap_or_else(|| Arc::new(InMemoryLocationDirectory::new())),
                audit,
                notifier: self.notifier.unwrap_or_else(|| Arc::new(NoopNotifier)),
            },
            audit_bus,
        }
    }
}

/// Entry point of the allocation and transfer engine.
///
/// Services are cheap handles over the shared context; ask for one per call.
#[derive(Clone)]
pub struct Engine {
    ctx: ServiceContext,
    audit_bus: Arc<InMemoryAuditBus<JsonValue>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            stores: None,
            directory: None,
            audit: None,
            notifier: None,
        }
    }

    pub fn in_memory(config: EngineConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Audit envelopes published after this call. Empty when a custom audit
    /// sink was installed.
    pub fn subscribe_audit(&self) -> Subscription<AuditEnvelope> {
        self.audit_bus.subscribe()
    }

    /// Like [`Engine::subscribe_audit`], restricted to one tenant.
    pub fn subscribe_tenant_audit(&self, tenant_id: TenantId) -> Subscription<AuditEnvelope> {
        self.audit_bus.subscribe_tenant(tenant_id)
    }

    pub fn allocations(&self) -> AllocationService {
        AllocationService::new(self.ctx.clone())
    }

    pub fn transfers(&self) -> TransferService {
        TransferService::new(self.ctx.clone())
    }

    pub fn emergency(&self) -> EmergencyService {
        EmergencyService::new(self.ctx.clone())
    }

    pub fn bulk(&self) -> BulkService {
        BulkService::new(self.ctx.clone())
    }

    pub fn links(&self) -> LinkService {
        LinkService::new(self.ctx.clone())
    }

    pub fn advisor(&self) -> AdvisorService {
        AdvisorService::new(self.ctx.clone())
    }

    pub fn analytics(&self) -> AnalyticsService {
        AnalyticsService::new(self.ctx.clone())
    }
}
