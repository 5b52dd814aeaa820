//! Transfer domain module.
//!
//! Movements of product between locations after the fact: the transfer status
//! machine and aggregate, receiving variance, the emergency policy layer
//! (frequency gate, auto-approval, escalation) and expedited queue ordering.
//! Pure deterministic logic; timers are evaluated against a caller-supplied
//! `now`.

pub mod emergency;
pub mod queue;
pub mod reason;
pub mod status;
pub mod transfer;
pub mod variance;

pub use emergency::{
    AutoApprovalDecision, AutoApprovalPolicy, EligibilityReason, EmergencyCandidate,
    EmergencyConfig, EmergencyEligibility, EmergencyValidation, EscalationPolicy,
    FrequencyLimits, FrequencyWindow, TenantEmergencyConfig, evaluate_auto_approval,
    evaluate_frequency, next_escalation_level, recipients_for_level,
    validate_emergency_transfer_rules,
};
pub use queue::{EmergencyQueueStatus, next_for_destination, processing_order, queue_status};
pub use reason::ReasonCode;
pub use status::{TransferPriority, TransferRule, TransferStatus, valid_transitions};
pub use transfer::{
    ApprovalOrigin, EscalateTransfer, ReceivingData, RequestTransfer, Transfer, TransferCommand,
    TransferEscalated, TransferEvent, TransferId, TransferRequested, TransferStatusChanged,
    TransferUpdated, TransitionContext, TransitionTransfer, UpdateTransfer,
};
pub use variance::{TransferVariance, VarianceClassification, VarianceTolerance, compute_variance};
