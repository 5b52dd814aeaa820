//! Variance and emergency-frequency reporting, plus the alert lifecycle.
//!
//! Variance records are derived from the allocation and transfer ledgers on
//! every call; only alerts and alert policies are stored.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};

use stockroute_analytics::{
    AlertId, AlertPolicy, EmergencyFrequency, FrequencyBucket, TenantAlertPolicy, VarianceAlert,
    VarianceFilter, VariancePattern, VarianceRecord, VarianceSummary, detect_patterns,
    emergency_frequency, evaluate_alerts, summarize,
};
use stockroute_core::{
    ActorContext, AggregateId, DomainError, ExpectedVersion, TenantId, Versioned,
};

use crate::audit::AuditEntry;
use crate::error::{ServiceError, ServiceResult};
use crate::notify::{Notification, NotificationKind, notify_best_effort};
use crate::services::ServiceContext;
use crate::store::StoreError;

/// Window the alert sweep looks at for emergency frequency.
const FREQUENCY_LOOKBACK_DAYS: i64 = 7;

#[derive(Clone)]
pub struct AnalyticsService {
    ctx: ServiceContext,
}

impl AnalyticsService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Variance of every received allocation and transfer matching `filter`,
    /// oldest first.
    pub fn variance_records(
        &self,
        tenant_id: TenantId,
        filter: &VarianceFilter,
    ) -> ServiceResult<Vec<VarianceRecord>> {
        let allocations = self.ctx.stores.allocations.list(tenant_id)?;
        let transfers = self.ctx.stores.transfers.list(tenant_id)?;
        let mut records: Vec<VarianceRecord> = allocations
            .iter()
            .filter_map(VarianceRecord::from_allocation)
            .chain(transfers.iter().filter_map(VarianceRecord::from_transfer))
            .filter(|r| filter.matches(r))
            .collect();
        records.sort_by_key(|r| (r.recorded_at, r.record_id));
        Ok(records)
    }

    pub fn variance_summary(
        &self,
        tenant_id: TenantId,
        filter: &VarianceFilter,
    ) -> ServiceResult<VarianceSummary> {
        let records = self.variance_records(tenant_id, filter)?;
        Ok(summarize(&records, filter))
    }

    /// Recurring same-direction variance per location and product. `None`
    /// uses the configured minimum number of occurrences.
    pub fn variance_patterns(
        &self,
        tenant_id: TenantId,
        filter: &VarianceFilter,
        min_occurrences: Option<usize>,
    ) -> ServiceResult<Vec<VariancePattern>> {
        let min = min_occurrences.unwrap_or(self.ctx.config.optimization.pattern_min_occurrences);
        let records = self.variance_records(tenant_id, filter)?;
        Ok(detect_patterns(&records, min))
    }

    pub fn emergency_frequency(
        &self,
        tenant_id: TenantId,
        bucket: FrequencyBucket,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> ServiceResult<EmergencyFrequency> {
        let transfers = self.ctx.stores.transfers.list(tenant_id)?;
        Ok(emergency_frequency(&transfers, bucket, from, to)?)
    }

    /// The tenant's stored policy, or the engine default.
    pub fn alert_policy(&self, tenant_id: TenantId) -> ServiceResult<AlertPolicy> {
        Ok(self
            .ctx
            .stores
            .alert_policies
            .get(tenant_id, &tenant_id)?
            .map(|stored| stored.policy)
            .unwrap_or_else(|| self.ctx.config.alerts.clone()))
    }

    #[instrument(skip(self, actor, policy), fields(tenant = %actor.tenant_id))]
    pub fn set_alert_policy(
        &self,
        actor: &ActorContext,
        policy: AlertPolicy,
    ) -> ServiceResult<TenantAlertPolicy> {
        policy.validate()?;
        let tenant_id = actor.tenant_id;
        let now = Utc::now();
        let record = TenantAlertPolicy {
            tenant_id,
            policy,
            updated_by: actor.user_id,
            updated_at: now,
            version: 0,
        };
        let store = &self.ctx.stores.alert_policies;
        let stored = match store.get(tenant_id, &tenant_id)? {
            None => store.insert(tenant_id, record, None)?,
            Some(current) => store.compare_and_swap(
                tenant_id,
                record,
                ExpectedVersion::Exact(current.version()),
                None,
            )?,
        };
        AuditEntry {
            tenant_id,
            aggregate_id: AggregateId::from_uuid(*tenant_id.as_uuid()),
            aggregate_type: "alert_policy",
            revision: stored.version(),
            event_type: "alert_policy.updated",
            occurred_at: now,
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &stored.policy);
        Ok(stored)
    }

    /// Raise an alert for every threshold crossed at `now` whose subject has
    /// no alert yet, and notify the policy's recipients. Returns the alerts
    /// raised by this call.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn evaluate_alerts(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<VarianceAlert>> {
        let policy = self.alert_policy(tenant_id)?;
        if !policy.enabled {
            return Ok(Vec::new());
        }
        let records = self.variance_records(tenant_id, &VarianceFilter::default())?;
        let frequency = self.emergency_frequency(
            tenant_id,
            FrequencyBucket::Daily,
            now - Duration::days(FREQUENCY_LOOKBACK_DAYS),
            now,
        )?;

        let unique_subject = |candidate: &VarianceAlert, existing: &[VarianceAlert]| {
            if existing.iter().any(|a| a.subject() == candidate.subject()) {
                return Err(DomainError::invariant("an alert for this subject exists"));
            }
            Ok(())
        };

        let mut raised = Vec::new();
        for candidate in evaluate_alerts(&policy, &records, Some(&frequency)) {
            let alert = VarianceAlert::raise(tenant_id, AlertId::generate(), candidate, now);
            let stored = match self
                .ctx
                .stores
                .alerts
                .insert(tenant_id, alert, Some(&unique_subject))
            {
                Ok(stored) => stored,
                Err(StoreError::Rejected(_)) => continue,
                Err(err) => return Err(err.into()),
            };

            AuditEntry {
                tenant_id,
                aggregate_id: stored.id_typed().into(),
                aggregate_type: "variance_alert",
                revision: stored.version(),
                event_type: "variance_alert.raised",
                occurred_at: now,
                actor: None,
            }
            .emit(self.ctx.audit.as_ref(), &stored);
            notify_best_effort(
                self.ctx.notifier.as_ref(),
                Notification {
                    tenant_id,
                    kind: NotificationKind::Alert,
                    recipients: policy.recipients.clone(),
                    subject: format!("{:?} alert: {}", stored.severity(), stored.subject()),
                    body: stored.message().to_string(),
                    reference: Some(stored.id_typed().into()),
                    created_at: now,
                },
            );
            raised.push(stored);
        }

        if raised.is_empty() {
            debug!("no new alerts");
        } else {
            info!(raised = raised.len(), "alerts raised");
        }
        Ok(raised)
    }

    /// Alerts of the tenant, newest first.
    pub fn list_alerts(
        &self,
        tenant_id: TenantId,
        include_acknowledged: bool,
    ) -> ServiceResult<Vec<VarianceAlert>> {
        let mut alerts: Vec<VarianceAlert> = self
            .ctx
            .stores
            .alerts
            .list(tenant_id)?
            .into_iter()
            .filter(|a| include_acknowledged || !a.is_acknowledged())
            .collect();
        alerts.sort_by(|a, b| b.raised_at().cmp(&a.raised_at()).then(a.id_typed().cmp(&b.id_typed())));
        Ok(alerts)
    }

    pub fn get_alert(&self, tenant_id: TenantId, alert_id: AlertId) -> ServiceResult<VarianceAlert> {
        self.ctx
            .stores
            .alerts
            .get(tenant_id, &alert_id)?
            .ok_or(ServiceError::Domain(DomainError::not_found()))
    }

    /// Mark an alert as seen. Acknowledging twice fails.
    #[instrument(skip(self, actor, note), fields(tenant = %actor.tenant_id, alert_id = %alert_id))]
    pub fn acknowledge(
        &self,
        actor: &ActorContext,
        alert_id: AlertId,
        note: Option<String>,
    ) -> ServiceResult<VarianceAlert> {
        let mut alert = self.get_alert(actor.tenant_id, alert_id)?;
        let expected = ExpectedVersion::Exact(alert.version());
        let now = Utc::now();
        alert.acknowledge(actor.user_id, note, now)?;
        let stored = self
            .ctx
            .stores
            .alerts
            .compare_and_swap(actor.tenant_id, alert, expected, None)?;

        AuditEntry {
            tenant_id: actor.tenant_id,
            aggregate_id: alert_id.into(),
            aggregate_type: "variance_alert",
            revision: stored.version(),
            event_type: "variance_alert.acknowledged",
            occurred_at: now,
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &stored);
        info!("alert acknowledged");
        Ok(stored)
    }
}
