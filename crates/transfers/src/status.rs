//! Transfer status machine.
//!
//! ```text
//! REQUESTED ──▶ APPROVED ──▶ SHIPPED ──▶ RECEIVED
//!     │            │
//!     └────────────┴──▶ CANCELLED
//! ```

use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Requested,
    Approved,
    Shipped,
    Received,
    Cancelled,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 5] = [
        TransferStatus::Requested,
        TransferStatus::Approved,
        TransferStatus::Shipped,
        TransferStatus::Received,
        TransferStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Requested => "REQUESTED",
            TransferStatus::Approved => "APPROVED",
            TransferStatus::Shipped => "SHIPPED",
            TransferStatus::Received => "RECEIVED",
            TransferStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Received | TransferStatus::Cancelled)
    }

    /// Waiting on someone to approve or dispatch it.
    pub fn is_open(self) -> bool {
        matches!(self, TransferStatus::Requested | TransferStatus::Approved)
    }
}

impl core::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferPriority {
    Normal,
    High,
    Emergency,
}

impl TransferPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferPriority::Normal => "NORMAL",
            TransferPriority::High => "HIGH",
            TransferPriority::Emergency => "EMERGENCY",
        }
    }

    /// Processing rank, lowest first.
    pub fn rank(self) -> u8 {
        match self {
            TransferPriority::Emergency => 0,
            TransferPriority::High => 1,
            TransferPriority::Normal => 2,
        }
    }
}

impl core::fmt::Display for TransferPriority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an edge requires from the transition context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRule {
    /// Optional approved quantity, bounded by the requested quantity.
    Approval,
    Shipment,
    /// Receiving data is mandatory; variance is computed.
    Receipt,
    Cancellation,
}

const TRANSITIONS: &[(TransferStatus, TransferStatus, TransferRule)] = &[
    (TransferStatus::Requested, TransferStatus::Approved, TransferRule::Approval),
    (TransferStatus::Approved, TransferStatus::Shipped, TransferRule::Shipment),
    (TransferStatus::Shipped, TransferStatus::Received, TransferRule::Receipt),
    (TransferStatus::Requested, TransferStatus::Cancelled, TransferRule::Cancellation),
    (TransferStatus::Approved, TransferStatus::Cancelled, TransferRule::Cancellation),
];

pub fn valid_transitions(from: TransferStatus) -> Vec<TransferStatus> {
    TRANSITIONS
        .iter()
        .filter(|(f, _, _)| *f == from)
        .map(|(_, to, _)| *to)
        .collect()
}

pub fn transition(from: TransferStatus, to: TransferStatus) -> DomainResult<TransferRule> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, rule)| *rule)
        .ok_or_else(|| DomainError::invalid_transition("transfer", from, to))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_transfers_cannot_be_cancelled() {
        assert_eq!(valid_transitions(TransferStatus::Shipped), vec![TransferStatus::Received]);
        assert!(transition(TransferStatus::Shipped, TransferStatus::Cancelled).is_err());
    }

    #[test]
    fn approval_cannot_be_skipped() {
        let err = transition(TransferStatus::Requested, TransferStatus::Shipped).unwrap_err();
        assert_eq!(err.to_string(), "invalid transfer transition from REQUESTED to SHIPPED");
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in TransferStatus::ALL {
            assert_eq!(status.is_terminal(), valid_transitions(status).is_empty());
        }
    }

    #[test]
    fn emergency_outranks_everything() {
        assert!(TransferPriority::Emergency.rank() < TransferPriority::High.rank());
        assert!(TransferPriority::High.rank() < TransferPriority::Normal.rank());
    }
}
