//! Versioned, tenant-scoped record storage.
//!
//! Every record lives under a `(TenantId, id)` key and carries a revision
//! stamped by the store: 1 on insert, +1 on every conditional write. Writers
//! that read a record and want to write it back pass the revision they read as
//! `ExpectedVersion::Exact`; any intervening write makes the CAS fail with
//! [`StoreError::Concurrency`]. Nothing here retries.
//!
//! A [`Guard`] is a predicate over the candidate record and the tenant's
//! current records, evaluated while the write lock is held. Cross-record
//! invariants (the line item allocation cap, link quantities, frequency
//! limits) run as guards so two concurrent writers cannot both pass a check
//! against the same state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use stockroute_core::{DomainError, DomainResult, ExpectedVersion, TenantId, Versioned};

/// Check run under the write lock: `(candidate, tenant's current records)`.
///
/// For a compare-and-swap the current records still hold the previous revision
/// of the candidate.
pub type Guard<'a, V> = dyn Fn(&V, &[V]) -> DomainResult<()> + 'a;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("concurrency conflict: expected {expected:?}, found revision {actual}")]
    Concurrency { expected: ExpectedVersion, actual: u64 },

    #[error("record not found")]
    NotFound,

    #[error("record already exists")]
    AlreadyExists,

    /// A guard refused the write.
    #[error("write rejected: {0}")]
    Rejected(DomainError),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Tenant-isolated record store with conditional writes.
///
/// Lookups with the wrong tenant behave exactly like lookups of an unknown id.
pub trait RecordStore<V>: Send + Sync
where
    V: Versioned,
{
    fn get(&self, tenant_id: TenantId, id: &V::Id) -> Result<Option<V>, StoreError>;

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError>;

    /// Store a new record at revision 1 and return it as stored.
    fn insert(
        &self,
        tenant_id: TenantId,
        record: V,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError>;

    /// Replace an existing record if its revision matches `expected`.
    fn compare_and_swap(
        &self,
        tenant_id: TenantId,
        record: V,
        expected: ExpectedVersion,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError>;

    /// Hard-delete a record if its revision matches `expected`; returns the
    /// removed record.
    fn remove(
        &self,
        tenant_id: TenantId,
        id: &V::Id,
        expected: ExpectedVersion,
    ) -> Result<V, StoreError>;
}

impl<V, S> RecordStore<V> for Arc<S>
where
    V: Versioned,
    S: RecordStore<V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, id: &V::Id) -> Result<Option<V>, StoreError> {
        (**self).get(tenant_id, id)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError> {
        (**self).list(tenant_id)
    }

    fn insert(
        &self,
        tenant_id: TenantId,
        record: V,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError> {
        (**self).insert(tenant_id, record, guard)
    }

    fn compare_and_swap(
        &self,
        tenant_id: TenantId,
        record: V,
        expected: ExpectedVersion,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError> {
        (**self).compare_and_swap(tenant_id, record, expected, guard)
    }

    fn remove(
        &self,
        tenant_id: TenantId,
        id: &V::Id,
        expected: ExpectedVersion,
    ) -> Result<V, StoreError> {
        (**self).remove(tenant_id, id, expected)
    }
}

/// In-memory record store for tests/dev.
///
/// One `RwLock` guards the whole map, so guards see a consistent view of the
/// tenant. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryRecordStore<V>
where
    V: Versioned,
{
    records: RwLock<HashMap<(TenantId, V::Id), V>>,
}

impl<V> InMemoryRecordStore<V>
where
    V: Versioned,
{
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> Default for InMemoryRecordStore<V>
where
    V: Versioned,
{
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

fn tenant_records<V>(map: &HashMap<(TenantId, V::Id), V>, tenant_id: TenantId) -> Vec<V>
where
    V: Versioned + Clone,
{
    map.iter()
        .filter(|((t, _), _)| *t == tenant_id)
        .map(|(_, v)| v.clone())
        .collect()
}

fn run_guard<V>(
    guard: Option<&Guard<'_, V>>,
    candidate: &V,
    map: &HashMap<(TenantId, V::Id), V>,
    tenant_id: TenantId,
) -> Result<(), StoreError>
where
    V: Versioned + Clone,
{
    match guard {
        Some(check) => check(candidate, &tenant_records(map, tenant_id)).map_err(StoreError::Rejected),
        None => Ok(()),
    }
}

impl<V> RecordStore<V> for InMemoryRecordStore<V>
where
    V: Versioned + Clone + Send + Sync + 'static,
    V::Id: Send + Sync,
{
    fn get(&self, tenant_id: TenantId, id: &V::Id) -> Result<Option<V>, StoreError> {
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(map.get(&(tenant_id, id.clone())).cloned())
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<V>, StoreError> {
        let map = self.records.read().map_err(|_| poisoned())?;
        Ok(tenant_records(&map, tenant_id))
    }

    fn insert(
        &self,
        tenant_id: TenantId,
        mut record: V,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        let key = (tenant_id, record.id().clone());
        if map.contains_key(&key) {
            return Err(StoreError::AlreadyExists);
        }
        run_guard(guard, &record, &map, tenant_id)?;

        record.set_version(1);
        map.insert(key, record.clone());
        Ok(record)
    }

    fn compare_and_swap(
        &self,
        tenant_id: TenantId,
        mut record: V,
        expected: ExpectedVersion,
        guard: Option<&Guard<'_, V>>,
    ) -> Result<V, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        let key = (tenant_id, record.id().clone());
        let actual = map.get(&key).map(Versioned::version).ok_or(StoreError::NotFound)?;
        if !expected.matches(actual) {
            return Err(StoreError::Concurrency { expected, actual });
        }
        run_guard(guard, &record, &map, tenant_id)?;

        record.set_version(actual + 1);
        map.insert(key, record.clone());
        Ok(record)
    }

    fn remove(
        &self,
        tenant_id: TenantId,
        id: &V::Id,
        expected: ExpectedVersion,
    ) -> Result<V, StoreError> {
        let mut map = self.records.write().map_err(|_| poisoned())?;
        let key = (tenant_id, id.clone());
        let actual = map.get(&key).map(Versioned::version).ok_or(StoreError::NotFound)?;
        if !expected.matches(actual) {
            return Err(StoreError::Concurrency { expected, actual });
        }
        map.remove(&key).ok_or(StoreError::NotFound)
    }
}
