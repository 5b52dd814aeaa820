use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Summary attached to an advisor or analytics run.
///
/// This is *not* a domain event. It is an insight that higher layers can log
/// or display without mutating ledger state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Primary score for the run (meaning depends on the producer).
    pub score: f64,

    /// Confidence in \[0, 1\].
    pub confidence: f64,

    pub explanation: Option<String>,

    /// Free-form metadata (strategy weights, counts, thresholds).
    pub metadata: JsonValue,
}

impl Insight {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score,
            confidence: confidence.clamp(0.0, 1.0),
            explanation: None,
            metadata: JsonValue::Null,
        }
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    pub fn with_metadata(mut self, metadata: JsonValue) -> Self {
        self.metadata = metadata;
        self
    }
}
