//! `stockroute-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy shared by every component, and the traits
//! aggregates and stored records implement.

pub mod aggregate;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, ExpectedVersion};
pub use context::ActorContext;
pub use entity::{Entity, Versioned};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, LocationId, ProductId, TenantId, UserId};
pub use value_object::ValueObject;
