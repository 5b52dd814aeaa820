//! Allocation status machine.
//!
//! ```text
//! PENDING ──▶ SHIPPED ──▶ RECEIVED
//!    │           │
//!    └───────────┴──────▶ CANCELLED
//! ```
//!
//! One table drives both validation and `valid_transitions`, so callers never
//! re-derive legal edges on their own.

use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    Pending,
    Shipped,
    Received,
    Cancelled,
}

impl AllocationStatus {
    pub const ALL: [AllocationStatus; 4] = [
        AllocationStatus::Pending,
        AllocationStatus::Shipped,
        AllocationStatus::Received,
        AllocationStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AllocationStatus::Pending => "PENDING",
            AllocationStatus::Shipped => "SHIPPED",
            AllocationStatus::Received => "RECEIVED",
            AllocationStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AllocationStatus::Received | AllocationStatus::Cancelled)
    }

    /// Counts toward the line item's allocated quantity.
    pub fn is_active(self) -> bool {
        self != AllocationStatus::Cancelled
    }
}

impl core::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What extra data an edge consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationTransition {
    Ship,
    /// Records `quantity_received` (defaults to the allocated quantity).
    Receive,
    /// Accepts an optional reason.
    Cancel,
}

const TRANSITIONS: &[(AllocationStatus, AllocationStatus, AllocationTransition)] = &[
    (AllocationStatus::Pending, AllocationStatus::Shipped, AllocationTransition::Ship),
    (AllocationStatus::Shipped, AllocationStatus::Received, AllocationTransition::Receive),
    (AllocationStatus::Pending, AllocationStatus::Cancelled, AllocationTransition::Cancel),
    (AllocationStatus::Shipped, AllocationStatus::Cancelled, AllocationTransition::Cancel),
];

/// Legal targets from `from`, in table order.
pub fn valid_transitions(from: AllocationStatus) -> Vec<AllocationStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == from)
        .map(|(_, to, _)| *to)
        .collect()
}

/// Look up the edge `from → to`, failing with `InvalidTransition` when absent.
pub fn transition(from: AllocationStatus, to: AllocationStatus) -> DomainResult<AllocationTransition> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, rule)| *rule)
        .ok_or_else(|| DomainError::invalid_transition("allocation", from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_ship_or_cancel() {
        assert_eq!(
            valid_transitions(AllocationStatus::Pending),
            vec![AllocationStatus::Shipped, AllocationStatus::Cancelled]
        );
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in AllocationStatus::ALL {
            if status.is_terminal() {
                assert!(valid_transitions(status).is_empty(), "{status} should be terminal");
            }
        }
    }

    #[test]
    fn receiving_requires_shipment_first() {
        let err = transition(AllocationStatus::Pending, AllocationStatus::Received).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                entity: "allocation",
                from: "PENDING".to_string(),
                to: "RECEIVED".to_string(),
            }
        );
    }

    #[test]
    fn every_listed_edge_resolves() {
        for from in AllocationStatus::ALL {
            for to in valid_transitions(from) {
                assert!(transition(from, to).is_ok());
            }
        }
    }
}
