//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: tolerances,
/// weight vectors and thresholds rather than records with an id. To "modify"
/// one, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
