//! Aggregate trait and optimistic concurrency expectation.

use crate::entity::Versioned;
use crate::error::{DomainError, DomainResult};

/// Optimistic concurrency expectation for a stored record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, repair tooling).
    Any,
    /// Require the record to be at an exact revision.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::concurrent(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Aggregates must not perform IO or side effects. The revision counter from
/// [`Versioned`] is owned by the store: `apply` never touches it.
pub trait Aggregate: Versioned {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event.
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    ///
    /// This must not mutate state. An empty result means "nothing to do".
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_expectation_rejects_other_revisions() {
        assert!(ExpectedVersion::Exact(3).check(3).is_ok());
        let err = ExpectedVersion::Exact(3).check(4).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn any_matches_everything() {
        assert!(ExpectedVersion::Any.matches(0));
        assert!(ExpectedVersion::Any.matches(u64::MAX));
    }
}
