use stockroute_core::TenantId;

use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Subscribers that serve a single tenant use this to drop anything that
/// belongs to somebody else.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}
