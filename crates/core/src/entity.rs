//! Identity and revision of stored records.

/// A record with a stable typed key. Stores index it by
/// `(TenantId, Self::Id)`.
pub trait Entity {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}

/// An entity persisted with a revision counter.
///
/// The revision is stamped by the store on every write (1 on insert, +1 per
/// conditional write) and is what compare-and-swap updates are keyed on.
pub trait Versioned: Entity {
    fn version(&self) -> u64;

    fn set_version(&mut self, version: u64);
}
