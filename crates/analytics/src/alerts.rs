//! Variance and emergency-frequency alerts.
//!
//! Alerts are raised from [`AlertCandidate`]s and acknowledged, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{
    AggregateId, DomainError, DomainResult, Entity, LocationId, ProductId, TenantId, UserId,
    ValueObject, Versioned,
};

use crate::frequency::EmergencyFrequency;
use crate::variance::VarianceRecord;

stockroute_core::aggregate_id!(
    /// Variance alert identifier.
    AlertId
);

/// Per-tenant alert thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertPolicy {
    pub enabled: bool,
    /// Fires when a record's variance percentage is strictly above this.
    pub variance_percent_threshold: f64,
    /// Fires when the latest frequency bucket holds at least this many emergencies.
    pub emergency_frequency_threshold: usize,
    pub recipients: Vec<String>,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            variance_percent_threshold: 10.0,
            emergency_frequency_threshold: 5,
            recipients: Vec::new(),
        }
    }
}

impl AlertPolicy {
    pub fn validate(&self) -> DomainResult<()> {
        if !self.variance_percent_threshold.is_finite() || self.variance_percent_threshold < 0.0 {
            return Err(DomainError::validation(
                "variance_percent_threshold must be a non-negative percentage",
            ));
        }
        if self.emergency_frequency_threshold == 0 {
            return Err(DomainError::validation(
                "emergency_frequency_threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

impl ValueObject for AlertPolicy {}

/// Stored per-tenant override of the engine-wide alert defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantAlertPolicy {
    pub tenant_id: TenantId,
    pub policy: AlertPolicy,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Entity for TenantAlertPolicy {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.tenant_id
    }
}

impl Versioned for TenantAlertPolicy {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    VarianceThreshold,
    EmergencyFrequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Warning,
    /// Observed value at least twice the threshold.
    Critical,
}

impl AlertSeverity {
    fn of(observed: f64, threshold: f64) -> Self {
        if threshold > 0.0 && observed >= threshold * 2.0 {
            AlertSeverity::Critical
        } else {
            AlertSeverity::Warning
        }
    }
}

/// An alert that should exist, before it is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Deduplication key: at most one alert per subject, acknowledged or not.
    pub subject: String,
    pub message: String,
    pub observed: f64,
    pub threshold: f64,
    pub location_id: Option<LocationId>,
    pub product_id: Option<ProductId>,
    pub source_id: Option<AggregateId>,
}

pub fn evaluate_alerts(
    policy: &AlertPolicy,
    variance: &[VarianceRecord],
    frequency: Option<&EmergencyFrequency>,
) -> Vec<AlertCandidate> {
    if !policy.enabled {
        return Vec::new();
    }
    let mut out = Vec::new();

    for r in variance
        .iter()
        .filter(|r| r.percentage > policy.variance_percent_threshold)
    {
        out.push(AlertCandidate {
            kind: AlertKind::VarianceThreshold,
            severity: AlertSeverity::of(r.percentage, policy.variance_percent_threshold),
            subject: format!("variance:{}", r.record_id),
            message: format!(
                "{} of {} planned unit(s) received at location {} ({:.1}% variance, threshold {:.1}%)",
                r.received, r.planned, r.location_id, r.percentage, policy.variance_percent_threshold
            ),
            observed: r.percentage,
            threshold: policy.variance_percent_threshold,
            location_id: Some(r.location_id),
            product_id: Some(r.product_id),
            source_id: Some(r.record_id),
        });
    }

    if let Some(latest) = frequency.and_then(|f| f.latest()) {
        if latest.count >= policy.emergency_frequency_threshold {
            let threshold = policy.emergency_frequency_threshold as f64;
            out.push(AlertCandidate {
                kind: AlertKind::EmergencyFrequency,
                severity: AlertSeverity::of(latest.count as f64, threshold),
                subject: format!("emergency:{}", latest.bucket_start),
                message: format!(
                    "{} emergency transfer(s) in the bucket starting {} (threshold {})",
                    latest.count, latest.bucket_start, policy.emergency_frequency_threshold
                ),
                observed: latest.count as f64,
                threshold,
                location_id: None,
                product_id: None,
                source_id: None,
            });
        }
    }

    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceAlert {
    id: AlertId,
    tenant_id: TenantId,
    kind: AlertKind,
    severity: AlertSeverity,
    subject: String,
    message: String,
    observed: f64,
    threshold: f64,
    location_id: Option<LocationId>,
    product_id: Option<ProductId>,
    source_id: Option<AggregateId>,
    raised_at: DateTime<Utc>,
    acknowledged_by: Option<UserId>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledgement_note: Option<String>,
    version: u64,
}

impl VarianceAlert {
    pub fn raise(tenant_id: TenantId, id: AlertId, candidate: AlertCandidate, raised_at: DateTime<Utc>) -> Self {
        Self {
            id,
            tenant_id,
            kind: candidate.kind,
            severity: candidate.severity,
            subject: candidate.subject,
            message: candidate.message,
            observed: candidate.observed,
            threshold: candidate.threshold,
            location_id: candidate.location_id,
            product_id: candidate.product_id,
            source_id: candidate.source_id,
            raised_at,
            acknowledged_by: None,
            acknowledged_at: None,
            acknowledgement_note: None,
            version: 0,
        }
    }

    /// Record who saw the alert. An alert is acknowledged once.
    pub fn acknowledge(&mut self, by: UserId, note: Option<String>, at: DateTime<Utc>) -> DomainResult<()> {
        if self.is_acknowledged() {
            return Err(DomainError::invariant("alert is already acknowledged"));
        }
        self.acknowledged_by = Some(by);
        self.acknowledged_at = Some(at);
        self.acknowledgement_note = note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        Ok(())
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }

    pub fn id_typed(&self) -> AlertId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn kind(&self) -> AlertKind {
        self.kind
    }

    pub fn severity(&self) -> AlertSeverity {
        self.severity
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn observed(&self) -> f64 {
        self.observed
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn source_id(&self) -> Option<AggregateId> {
        self.source_id
    }

    pub fn raised_at(&self) -> DateTime<Utc> {
        self.raised_at
    }

    pub fn acknowledged_by(&self) -> Option<UserId> {
        self.acknowledged_by
    }

    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    pub fn acknowledgement_note(&self) -> Option<&str> {
        self.acknowledgement_note.as_deref()
    }
}

impl Entity for VarianceAlert {
    type Id = AlertId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Versioned for VarianceAlert {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}
