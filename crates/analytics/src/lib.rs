//! `stockroute-analytics`
//!
//! **Responsibility:** read-only insight over the allocation and transfer
//! ledgers.
//!
//! - Optimization advisor: deterministic multi-factor scoring of candidate
//!   distributions. It proposes, it never writes.
//! - Variance and emergency-frequency analytics, plus the alert model.

pub mod alerts;
pub mod frequency;
pub mod optimization;
pub mod report;
pub mod variance;

pub use alerts::{
    AlertCandidate, AlertId, AlertKind, AlertPolicy, AlertSeverity, TenantAlertPolicy,
    VarianceAlert, evaluate_alerts,
};
pub use frequency::{EmergencyFrequency, FrequencyBucket, FrequencyPoint, Trend, emergency_frequency};
pub use optimization::{
    AllocationConflict, AllocationSuggestion, ConflictKind, DemandRecord, FeasibilityReport,
    LocationProfile, OptimizationSnapshot, OptimizationStrategy, RebalanceDirection,
    RebalancingOpportunity, RejectedSuggestion, SmartSuggestions, SuggestionFactors,
    analyze_rebalancing_opportunities, detect_allocation_conflicts, generate_smart_suggestions,
    validate_optimization_feasibility,
};
pub use report::Insight;
pub use variance::{
    LocationVariance, VarianceFilter, VariancePattern, VarianceRecord, VarianceSource,
    VarianceSummary, detect_patterns, summarize,
};
