//! Location profiles and demand history, as seen by the advisor.
//!
//! Owned by other systems (store master data, sales history); the engine only
//! reads them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockroute_analytics::{DemandRecord, LocationProfile};
use stockroute_core::{LocationId, ProductId, TenantId};

pub trait LocationDirectory: Send + Sync {
    fn locations(&self, tenant_id: TenantId) -> Vec<LocationProfile>;

    /// Historical demand for any of `products`.
    fn demand(&self, tenant_id: TenantId, products: &[ProductId]) -> Vec<DemandRecord>;
}

impl<D> LocationDirectory for Arc<D>
where
    D: LocationDirectory + ?Sized,
{
    fn locations(&self, tenant_id: TenantId) -> Vec<LocationProfile> {
        (**self).locations(tenant_id)
    }

    fn demand(&self, tenant_id: TenantId, products: &[ProductId]) -> Vec<DemandRecord> {
        (**self).demand(tenant_id, products)
    }
}

/// In-memory tenant-isolated directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryLocationDirectory {
    locations: RwLock<HashMap<(TenantId, LocationId), LocationProfile>>,
    demand: RwLock<HashMap<TenantId, Vec<DemandRecord>>>,
}

impl InMemoryLocationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_location(&self, tenant_id: TenantId, profile: LocationProfile) {
        if let Ok(mut map) = self.locations.write() {
            map.insert((tenant_id, profile.location_id), profile);
        }
    }

    pub fn record_demand(&self, tenant_id: TenantId, record: DemandRecord) {
        if let Ok(mut map) = self.demand.write() {
            map.entry(tenant_id).or_default().push(record);
        }
    }
}

impl LocationDirectory for InMemoryLocationDirectory {
    fn locations(&self, tenant_id: TenantId) -> Vec<LocationProfile> {
        let map = match self.locations.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut out: Vec<LocationProfile> = map
            .iter()
            .filter_map(|((t, _), p)| if *t == tenant_id { Some(p.clone()) } else { None })
            .collect();
        out.sort_by_key(|p| p.location_id);
        out
    }

    fn demand(&self, tenant_id: TenantId, products: &[ProductId]) -> Vec<DemandRecord> {
        let map = match self.demand.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        map.get(&tenant_id)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| products.contains(&r.product_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(location_id: LocationId) -> LocationProfile {
        LocationProfile {
            location_id,
            name: "Store".to_string(),
            remaining_capacity: Some(100),
            logistics_cost: 1.0,
            active: true,
        }
    }

    #[test]
    fn directory_is_tenant_isolated() {
        let dir = InMemoryLocationDirectory::new();
        let t = TenantId::new();
        let product = ProductId::new();
        let store = LocationId::new();
        dir.upsert_location(t, profile(store));
        dir.record_demand(
            t,
            DemandRecord {
                location_id: store,
                product_id: product,
                units: 12,
            },
        );

        assert_eq!(dir.locations(t).len(), 1);
        assert!(dir.locations(TenantId::new()).is_empty());
        assert_eq!(dir.demand(t, &[product]).len(), 1);
        assert!(dir.demand(t, &[ProductId::new()]).is_empty());
        assert!(dir.demand(TenantId::new(), &[product]).is_empty());
    }
}
