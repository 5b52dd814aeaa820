//! Receiving variance.

use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, ValueObject};

/// Maximum tolerated `|variance| / expected`, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarianceTolerance(f64);

impl VarianceTolerance {
    pub const DEFAULT_PERCENT: f64 = 5.0;

    pub fn new(percent: f64) -> DomainResult<Self> {
        if !percent.is_finite() || percent < 0.0 {
            return Err(DomainError::validation(
                "variance tolerance must be a non-negative percentage",
            ));
        }
        Ok(Self(percent))
    }

    pub fn percent(self) -> f64 {
        self.0
    }
}

impl Default for VarianceTolerance {
    fn default() -> Self {
        Self(Self::DEFAULT_PERCENT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarianceClassification {
    Exact,
    Shortage,
    Overage,
}

impl VarianceClassification {
    pub fn of(variance: i64) -> Self {
        match variance.signum() {
            0 => VarianceClassification::Exact,
            -1 => VarianceClassification::Shortage,
            _ => VarianceClassification::Overage,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VarianceClassification::Exact => "EXACT",
            VarianceClassification::Shortage => "SHORTAGE",
            VarianceClassification::Overage => "OVERAGE",
        }
    }
}

/// Received against expected, recorded on the transfer when it is received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferVariance {
    pub expected: i64,
    pub received: i64,
    /// `received - expected`.
    pub variance: i64,
    /// `|variance| / expected × 100`.
    pub percentage: f64,
    pub exceeds_tolerance: bool,
    pub classification: VarianceClassification,
    pub reason: Option<String>,
}

impl TransferVariance {
    pub fn requires_reason(&self) -> bool {
        self.exceeds_tolerance
    }
}

/// Compare `received` with `expected`. The tolerance check is strict.
pub fn compute_variance(expected: i64, received: i64, tolerance: VarianceTolerance) -> TransferVariance {
    let variance = received - expected;
    let percentage = if expected > 0 {
        variance.abs() as f64 * 100.0 / expected as f64
    } else if variance == 0 {
        0.0
    } else {
        100.0
    };
    TransferVariance {
        expected,
        received,
        variance,
        percentage,
        exceeds_tolerance: percentage > tolerance.percent(),
        classification: VarianceClassification::of(variance),
        reason: None,
    }
}

impl ValueObject for VarianceTolerance {}
