//! Authenticated caller context.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Who is acting, on behalf of which tenant.
///
/// Resolved by the route layer; this crate treats it as opaque input and only
/// uses it for tenant scoping and attribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: String,
}

impl ActorContext {
    pub fn new(tenant_id: TenantId, user_id: UserId, role: impl Into<String>) -> Self {
        Self {
            tenant_id,
            user_id,
            role: role.into(),
        }
    }
}
