//! Emergency transfer policy.
//!
//! Pure functions over an [`EmergencyConfig`] and the caller's view of recent
//! history. Nothing here reads a clock: `now` is always passed in, so escalation
//! timers are evaluated lazily whenever a poller asks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::{
    DomainError, Entity, LocationId, ProductId, TenantId, UserId, ValueObject, Versioned,
};

use crate::status::TransferStatus;
use crate::transfer::Transfer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApprovalPolicy {
    pub enabled: bool,
    pub max_quantity: i64,
    /// Upper bound on `quantity × unit_cost`, in minor currency units.
    pub max_value: Option<i64>,
    /// Empty means any location.
    pub allowed_source_locations: Vec<LocationId>,
    pub allowed_destination_locations: Vec<LocationId>,
    /// Empty means any product.
    pub allowed_products: Vec<ProductId>,
}

impl Default for AutoApprovalPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_quantity: 50,
            max_value: Some(100_000),
            allowed_source_locations: Vec::new(),
            allowed_destination_locations: Vec::new(),
            allowed_products: Vec::new(),
        }
    }
}

/// Rolling-window caps on emergency transfers per source/destination pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrequencyLimits {
    pub max_per_day: u32,
    pub max_per_week: u32,
}

impl Default for FrequencyLimits {
    fn default() -> Self {
        Self {
            max_per_day: 5,
            max_per_week: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    pub enabled: bool,
    pub escalate_after_minutes: i64,
    pub max_level: u32,
    /// `recipients_by_level[n - 1]` is notified on reaching level `n`.
    pub recipients_by_level: Vec<Vec<String>>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            escalate_after_minutes: 60,
            max_level: 3,
            recipients_by_level: Vec::new(),
        }
    }
}

/// Emergency settings for one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    pub enabled: bool,
    pub auto_approval: AutoApprovalPolicy,
    pub frequency: FrequencyLimits,
    pub escalation: EscalationPolicy,
    /// Fallback recipients for escalations and alerts.
    pub recipients: Vec<String>,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_approval: AutoApprovalPolicy::default(),
            frequency: FrequencyLimits::default(),
            escalation: EscalationPolicy::default(),
            recipients: Vec::new(),
        }
    }
}

impl EmergencyConfig {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.auto_approval.max_quantity < 0 {
            return Err(DomainError::validation("auto-approval max_quantity cannot be negative"));
        }
        if self.auto_approval.max_value.is_some_and(|v| v < 0) {
            return Err(DomainError::validation("auto-approval max_value cannot be negative"));
        }
        if self.frequency.max_per_week < self.frequency.max_per_day {
            return Err(DomainError::validation(
                "weekly emergency limit cannot be below the daily limit",
            ));
        }
        if self.escalation.escalate_after_minutes <= 0 {
            return Err(DomainError::validation("escalate_after_minutes must be positive"));
        }
        if self.escalation.max_level == 0 {
            return Err(DomainError::validation("escalation max_level must be at least 1"));
        }
        Ok(())
    }
}

/// Stored per-tenant override of the engine-wide emergency defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantEmergencyConfig {
    pub tenant_id: TenantId,
    pub config: EmergencyConfig,
    pub updated_by: UserId,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Entity for TenantEmergencyConfig {
    type Id = TenantId;

    fn id(&self) -> &Self::Id {
        &self.tenant_id
    }
}

impl Versioned for TenantEmergencyConfig {
    fn version(&self) -> u64 {
        self.version
    }

    fn set_version(&mut self, version: u64) {
        self.version = version;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EligibilityReason {
    FrequencyLimit,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrequencyWindow {
    Daily,
    Weekly,
}

impl FrequencyWindow {
    pub fn span(self) -> Duration {
        match self {
            FrequencyWindow::Daily => Duration::hours(24),
            FrequencyWindow::Weekly => Duration::days(7),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrequencyWindow::Daily => "DAILY",
            FrequencyWindow::Weekly => "WEEKLY",
        }
    }
}

/// Answer to "may another emergency transfer be created right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyEligibility {
    pub can_create: bool,
    pub reason: Option<EligibilityReason>,
    /// The window that is exhausted, when `reason` is a frequency limit.
    pub window: Option<FrequencyWindow>,
    pub current_count: u32,
    pub limit: Option<u32>,
    /// Minutes until the limiting window has room again.
    pub cooldown_minutes: Option<i64>,
    pub daily_count: u32,
    pub weekly_count: u32,
}

impl EmergencyEligibility {
    /// The refusal as a `PolicyViolation`, for callers that must fail.
    pub fn to_error(&self) -> Option<DomainError> {
        if self.can_create {
            return None;
        }
        let rule = match (self.reason, self.window) {
            (Some(EligibilityReason::Disabled), _) => "EMERGENCY_DISABLED".to_string(),
            (_, Some(window)) => format!("FREQUENCY_LIMIT:{}", window.as_str()),
            _ => "FREQUENCY_LIMIT".to_string(),
        };
        Some(DomainError::policy(rule, self.cooldown_minutes))
    }
}

/// Apply the frequency gate to the creation times of the pair's recent
/// emergency transfers.
pub fn evaluate_frequency(
    config: &EmergencyConfig,
    recent: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> EmergencyEligibility {
    let daily = in_window(recent, now, FrequencyWindow::Daily);
    let weekly = in_window(recent, now, FrequencyWindow::Weekly);
    let daily_count = daily.len() as u32;
    let weekly_count = weekly.len() as u32;

    let mut result = EmergencyEligibility {
        can_create: true,
        reason: None,
        window: None,
        current_count: daily_count,
        limit: Some(config.frequency.max_per_day),
        cooldown_minutes: None,
        daily_count,
        weekly_count,
    };

    if !config.enabled {
        result.can_create = false;
        result.reason = Some(EligibilityReason::Disabled);
        result.limit = None;
        return result;
    }

    let checks = [
        (FrequencyWindow::Daily, daily, config.frequency.max_per_day),
        (FrequencyWindow::Weekly, weekly, config.frequency.max_per_week),
    ];
    for (window, stamps, limit) in checks {
        let count = stamps.len() as u32;
        if count >= limit {
            result.can_create = false;
            result.reason = Some(EligibilityReason::FrequencyLimit);
            result.window = Some(window);
            result.current_count = count;
            result.limit = Some(limit);
            result.cooldown_minutes = cooldown(&stamps, limit, window, now);
            return result;
        }
    }
    result
}

/// Timestamps inside `(now - span, now]`, oldest first.
fn in_window(recent: &[DateTime<Utc>], now: DateTime<Utc>, window: FrequencyWindow) -> Vec<DateTime<Utc>> {
    let start = now - window.span();
    let mut stamps: Vec<DateTime<Utc>> = recent
        .iter()
        .copied()
        .filter(|t| *t > start && *t <= now)
        .collect();
    stamps.sort();
    stamps
}

/// Minutes until enough entries age out for the count to drop below `limit`.
fn cooldown(
    stamps: &[DateTime<Utc>],
    limit: u32,
    window: FrequencyWindow,
    now: DateTime<Utc>,
) -> Option<i64> {
    if limit == 0 {
        return None;
    }
    let idx = stamps.len().checked_sub(limit as usize)?;
    let frees_at = *stamps.get(idx)? + window.span();
    let seconds = (frees_at - now).num_seconds().max(0);
    Some((seconds + 59) / 60)
}

/// What the auto-approval gate looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyCandidate {
    pub product_id: ProductId,
    pub source_location_id: LocationId,
    pub destination_location_id: LocationId,
    pub quantity: i64,
    pub unit_cost: Option<i64>,
}

impl EmergencyCandidate {
    pub fn from_transfer(transfer: &Transfer) -> Self {
        Self {
            product_id: transfer.product_id(),
            source_location_id: transfer.source_location_id(),
            destination_location_id: transfer.destination_location_id(),
            quantity: transfer.quantity_requested(),
            unit_cost: transfer.unit_cost(),
        }
    }

    pub fn value(&self) -> Option<i64> {
        self.unit_cost.map(|c| c.saturating_mul(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoApprovalDecision {
    pub approve: bool,
    /// Thresholds the candidate failed; empty when approved.
    pub blocked_by: Vec<String>,
}

pub fn evaluate_auto_approval(
    config: &EmergencyConfig,
    candidate: &EmergencyCandidate,
) -> AutoApprovalDecision {
    let policy = &config.auto_approval;
    let mut blocked_by = Vec::new();

    if !config.enabled || !policy.enabled {
        blocked_by.push("auto-approval is disabled".to_string());
        return AutoApprovalDecision {
            approve: false,
            blocked_by,
        };
    }
    if candidate.quantity > policy.max_quantity {
        blocked_by.push(format!(
            "quantity {} exceeds auto-approval limit {}",
            candidate.quantity, policy.max_quantity
        ));
    }
    if let Some(max_value) = policy.max_value {
        match candidate.value() {
            Some(value) if value > max_value => blocked_by.push(format!(
                "value {value} exceeds auto-approval limit {max_value}"
            )),
            Some(_) => {}
            None => blocked_by.push("unit cost unknown; value limit cannot be checked".to_string()),
        }
    }
    if !allowed(&policy.allowed_source_locations, &candidate.source_location_id) {
        blocked_by.push("source location is not eligible for auto-approval".to_string());
    }
    if !allowed(&policy.allowed_destination_locations, &candidate.destination_location_id) {
        blocked_by.push("destination location is not eligible for auto-approval".to_string());
    }
    if !allowed(&policy.allowed_products, &candidate.product_id) {
        blocked_by.push("product is not eligible for auto-approval".to_string());
    }

    AutoApprovalDecision {
        approve: blocked_by.is_empty(),
        blocked_by,
    }
}

fn allowed<T: PartialEq>(list: &[T], value: &T) -> bool {
    list.is_empty() || list.contains(value)
}

/// Dry-run result of every emergency rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub eligibility: EmergencyEligibility,
    pub auto_approval: AutoApprovalDecision,
}

pub fn validate_emergency_transfer_rules(
    config: &EmergencyConfig,
    candidate: &EmergencyCandidate,
    recent: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> EmergencyValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if candidate.quantity <= 0 {
        errors.push("quantity must be positive".to_string());
    }
    if candidate.source_location_id == candidate.destination_location_id {
        errors.push("source and destination locations must differ".to_string());
    }

    let eligibility = evaluate_frequency(config, recent, now);
    match eligibility.reason {
        Some(EligibilityReason::Disabled) => {
            errors.push("emergency transfers are disabled for this tenant".to_string());
        }
        Some(EligibilityReason::FrequencyLimit) => errors.push(format!(
            "{} emergency limit of {} reached",
            eligibility.window.map(FrequencyWindow::as_str).unwrap_or("DAILY"),
            eligibility.limit.unwrap_or(0)
        )),
        None => {
            if eligibility.daily_count + 1 == config.frequency.max_per_day {
                warnings.push("this transfer reaches the daily emergency limit".to_string());
            }
            if eligibility.weekly_count + 1 == config.frequency.max_per_week {
                warnings.push("this transfer reaches the weekly emergency limit".to_string());
            }
        }
    }

    let auto_approval = evaluate_auto_approval(config, candidate);
    if !auto_approval.approve && config.auto_approval.enabled {
        warnings.push("transfer will need manual approval".to_string());
    }

    EmergencyValidation {
        valid: errors.is_empty(),
        errors,
        warnings,
        eligibility,
        auto_approval,
    }
}

/// Level an idle emergency transfer should be escalated to at `now`, if any.
///
/// Each level waits `escalate_after_minutes` from the previous escalation (or
/// from creation for the first).
pub fn next_escalation_level(
    policy: &EscalationPolicy,
    transfer: &Transfer,
    now: DateTime<Utc>,
) -> Option<u32> {
    if !policy.enabled
        || !transfer.is_emergency()
        || transfer.status() != TransferStatus::Requested
        || transfer.escalation_level() >= policy.max_level
    {
        return None;
    }
    let since = transfer.last_escalated_at().unwrap_or(transfer.created_at());
    (now - since >= Duration::minutes(policy.escalate_after_minutes))
        .then_some(transfer.escalation_level() + 1)
}

/// Recipients for `level`, falling back to the tenant-wide list.
pub fn recipients_for_level(config: &EmergencyConfig, level: u32) -> Vec<String> {
    level
        .checked_sub(1)
        .and_then(|i| config.escalation.recipients_by_level.get(i as usize))
        .filter(|r| !r.is_empty())
        .cloned()
        .unwrap_or_else(|| config.recipients.clone())
}

impl ValueObject for EmergencyConfig {}
