//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Every variant
/// carries enough structure for a precise caller-facing message. Storage and
/// transport failures belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input, rejected before reaching the ledger.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The write would push allocations of a line item past its ordered quantity.
    #[error("over-allocation: requested {requested}, only {remaining} remaining")]
    OverAllocation { requested: i64, remaining: i64 },

    /// Illegal state edge.
    #[error("invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    /// A compare-and-swap failed because the record changed since it was read.
    ///
    /// Callers may reload and retry; it is never retried internally.
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),

    /// Unknown id, or an id belonging to another tenant. The two cases are
    /// deliberately indistinguishable.
    #[error("not found")]
    NotFound,

    /// Emergency policy breach (frequency limit, disabled emergencies, ...).
    #[error("policy violation: {rule}")]
    PolicyViolation {
        rule: String,
        cooldown_minutes: Option<i64>,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn concurrent(msg: impl Into<String>) -> Self {
        Self::ConcurrentModification(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn over_allocation(requested: i64, remaining: i64) -> Self {
        Self::OverAllocation {
            requested,
            remaining: remaining.max(0),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl core::fmt::Display,
        to: impl core::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn policy(rule: impl Into<String>, cooldown_minutes: Option<i64>) -> Self {
        Self::PolicyViolation {
            rule: rule.into(),
            cooldown_minutes,
        }
    }

    /// Whether the caller may reasonably retry after reloading state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification(_))
    }
}
