//! Emergency coordinator: per-tenant policy, the frequency gate, auto-approval
//! and timed escalation of idle EMERGENCY transfers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use stockroute_core::{
    ActorContext, AggregateId, DomainError, ExpectedVersion, LocationId, TenantId, Versioned,
};
use stockroute_transfers::{
    AutoApprovalDecision, EmergencyCandidate, EmergencyConfig, EmergencyEligibility,
    EmergencyQueueStatus, EmergencyValidation, EscalateTransfer, TenantEmergencyConfig, Transfer,
    TransferCommand, TransferId, TransferPriority, TransferStatus, TransitionContext,
    evaluate_auto_approval, evaluate_frequency, next_escalation_level, queue_status,
    recipients_for_level, validate_emergency_transfer_rules,
};

use crate::audit::AuditEntry;
use crate::command_dispatcher::Dispatched;
use crate::error::ServiceResult;
use crate::notify::{Notification, NotificationKind, notify_best_effort};
use crate::services::ServiceContext;
use crate::services::transfers::{NewTransfer, TransferService};

/// What `create` did with an emergency request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyTransferOutcome {
    /// As stored after the call: APPROVED when auto-approval went through.
    pub transfer: Transfer,
    pub eligibility: EmergencyEligibility,
    pub auto_approval: AutoApprovalDecision,
    pub auto_approved: bool,
}

/// Result of one escalation sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub examined: usize,
    /// Transfer and the level it was raised to.
    pub escalated: Vec<(TransferId, u32)>,
    pub failed: Vec<(TransferId, String)>,
    pub notified: usize,
}

#[derive(Clone)]
pub struct EmergencyService {
    ctx: ServiceContext,
    transfers: TransferService,
}

impl EmergencyService {
    pub fn new(ctx: ServiceContext) -> Self {
        let transfers = TransferService::new(ctx.clone());
        Self { ctx, transfers }
    }

    /// The tenant's stored policy, or the engine default.
    pub fn config(&self, tenant_id: TenantId) -> ServiceResult<EmergencyConfig> {
        Ok(self
            .ctx
            .stores
            .emergency_configs
            .get(tenant_id, &tenant_id)?
            .map(|stored| stored.config)
            .unwrap_or_else(|| self.ctx.config.emergency.clone()))
    }

    #[instrument(skip(self, actor, config), fields(tenant = %actor.tenant_id))]
    pub fn set_config(
        &self,
        actor: &ActorContext,
        config: EmergencyConfig,
    ) -> ServiceResult<TenantEmergencyConfig> {
        config.validate()?;
        let tenant_id = actor.tenant_id;
        let now = Utc::now();
        let record = TenantEmergencyConfig {
            tenant_id,
            config,
            updated_by: actor.user_id,
            updated_at: now,
            version: 0,
        };
        let store = &self.ctx.stores.emergency_configs;
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
            aggregate_type: "emergency_config",
            revision: stored.version(),
            event_type: "emergency_config.updated",
            occurred_at: now,
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &stored.config);
        info!(revision = stored.version(), "emergency policy updated");
        Ok(stored)
    }

    /// Whether another EMERGENCY transfer may be created for the pair at `now`.
    pub fn can_create(
        &self,
        tenant_id: TenantId,
        source_location_id: LocationId,
        destination_location_id: LocationId,
        now: DateTime<Utc>,
    ) -> ServiceResult<EmergencyEligibility> {
        let config = self.config(tenant_id)?;
        let all = self.ctx.stores.transfers.list(tenant_id)?;
        let recent = emergency_stamps(&all, source_location_id, destination_location_id);
        Ok(evaluate_frequency(&config, &recent, now))
    }

    /// Dry run of every emergency rule for `candidate`.
    pub fn validate_rules(
        &self,
        tenant_id: TenantId,
        candidate: &EmergencyCandidate,
        now: DateTime<Utc>,
    ) -> ServiceResult<EmergencyValidation> {
        let config = self.config(tenant_id)?;
        let all = self.ctx.stores.transfers.list(tenant_id)?;
        let recent = emergency_stamps(
            &all,
            candidate.source_location_id,
            candidate.destination_location_id,
        );
        Ok(validate_emergency_transfer_rules(&config, candidate, &recent, now))
    }

    /// Store a new EMERGENCY transfer behind the frequency gate, unpublished.
    ///
    /// The gate runs as an insert guard, so two racing requests for the last
    /// slot cannot both pass.
    pub(crate) fn persist_emergency(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        input: &NewTransfer,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Dispatched<Transfer>, EmergencyEligibility)> {
        if input.priority != TransferPriority::Emergency {
            return Err(DomainError::validation("priority must be EMERGENCY").into());
        }
        let config = self.config(actor.tenant_id)?;
        let eligibility = self.can_create(
            actor.tenant_id,
            input.source_location_id,
            input.destination_location_id,
            now,
        )?;
        if let Some(refusal) = eligibility.to_error() {
            return Err(refusal.into());
        }

        let (source, destination) = (input.source_location_id, input.destination_location_id);
        let gate = |_: &Transfer, existing: &[Transfer]| {
            let recent = emergency_stamps(existing, source, destination);
            match evaluate_frequency(&config, &recent, now).to_error() {
                Some(refusal) => Err(refusal),
                None => Ok(()),
            }
        };
        let dispatched = self
            .transfers
            .persist_request(actor, transfer_id, input, Some(&gate))?;
        Ok((dispatched, eligibility))
    }

    /// Request an EMERGENCY transfer, then try auto-approval.
    #[instrument(
        skip(self, actor, input),
        fields(tenant = %actor.tenant_id, quantity = input.quantity)
    )]
    pub fn create(
        &self,
        actor: &ActorContext,
        input: NewTransfer,
    ) -> ServiceResult<EmergencyTransferOutcome> {
        let transfer_id = TransferId::generate();
        let (dispatched, eligibility) =
            self.persist_emergency(actor, transfer_id, &input, Utc::now())?;
        self.transfers.dispatcher().publish(&dispatched);
        info!(transfer_id = %transfer_id, "emergency transfer requested");

        let (transfer, auto_approval, auto_approved) =
            self.try_auto_approve(actor, dispatched.aggregate)?;
        Ok(EmergencyTransferOutcome {
            transfer,
            eligibility,
            auto_approval,
            auto_approved,
        })
    }

    /// Approve `transfer` automatically when the tenant's thresholds allow.
    ///
    /// A failed approval leaves the transfer REQUESTED for a person to handle.
    pub(crate) fn try_auto_approve(
        &self,
        actor: &ActorContext,
        transfer: Transfer,
    ) -> ServiceResult<(Transfer, AutoApprovalDecision, bool)> {
        let config = self.config(actor.tenant_id)?;
        let decision = evaluate_auto_approval(&config, &EmergencyCandidate::from_transfer(&transfer));
        if !decision.approve {
            return Ok((transfer, decision, false));
        }
        let context = TransitionContext::new(actor.tenant_id, actor.user_id)
            .automatic()
            .with_reason("auto-approved by emergency policy");
        match self
            .transfers
            .transition(transfer.id_typed(), TransferStatus::Approved, context)
        {
            Ok(approved) => {
                info!(transfer_id = %approved.id_typed(), "emergency transfer auto-approved");
                Ok((approved, decision, true))
            }
            Err(err) => {
                warn!(transfer_id = %transfer.id_typed(), error = %err, "auto-approval failed; left for manual approval");
                Ok((transfer, decision, false))
            }
        }
    }

    /// Raise an EMERGENCY transfer to `level` (next level when `None`) and
    /// notify that level's recipients.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub fn escalate(
        &self,
        actor: &ActorContext,
        transfer_id: TransferId,
        level: Option<u32>,
    ) -> ServiceResult<Transfer> {
        let config = self.config(actor.tenant_id)?;
        let current = self.transfers.get(actor.tenant_id, transfer_id)?;
        let level = level.unwrap_or(current.escalation_level() + 1);
        let (transfer, _) = self.escalate_to(
            actor.tenant_id,
            transfer_id,
            level,
            Some(actor),
            &config,
            Utc::now(),
        )?;
        Ok(transfer)
    }

    fn escalate_to(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
        level: u32,
        actor: Option<&ActorContext>,
        config: &EmergencyConfig,
        now: DateTime<Utc>,
    ) -> ServiceResult<(Transfer, bool)> {
        let command = TransferCommand::Escalate(EscalateTransfer {
            tenant_id,
            transfer_id,
            level,
            max_level: config.escalation.max_level,
            actor: actor.map(|a| a.user_id),
            occurred_at: now,
        });
        let dispatched = self.transfers.dispatcher().dispatch(
            tenant_id,
            &transfer_id,
            &command,
            || Transfer::empty(transfer_id),
            None,
        )?;
        if !dispatched.changed() {
            return Ok((dispatched.aggregate, false));
        }

        let transfer = dispatched.aggregate;
        info!(transfer_id = %transfer_id, level, "emergency transfer escalated");
        let notified = notify_best_effort(
            self.ctx.notifier.as_ref(),
            Notification {
                tenant_id,
                kind: NotificationKind::Escalation,
                recipients: recipients_for_level(config, level),
                subject: format!("Emergency transfer escalated to level {level}"),
                body: format!(
                    "Transfer {} of {} units from {} to {} is still awaiting approval.",
                    transfer_id,
                    transfer.quantity_requested(),
                    transfer.source_location_id(),
                    transfer.destination_location_id()
                ),
                reference: Some(transfer_id.into()),
                created_at: now,
            },
        );
        Ok((transfer, notified))
    }

    /// Escalate every idle EMERGENCY transfer whose timer has run out at `now`.
    ///
    /// Failures are collected per transfer; the sweep continues.
    #[instrument(skip(self), fields(tenant = %tenant_id))]
    pub fn process_escalations(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> ServiceResult<EscalationReport> {
        let config = self.config(tenant_id)?;
        let mut report = EscalationReport::default();
        if !config.escalation.enabled {
            return Ok(report);
        }

        for transfer in self.transfers.list(tenant_id)? {
            if !transfer.is_emergency() || transfer.status() != TransferStatus::Requested {
                continue;
            }
            report.examined += 1;
            let Some(level) = next_escalation_level(&config.escalation, &transfer, now) else {
                continue;
            };
            let transfer_id = transfer.id_typed();
            match self.escalate_to(tenant_id, transfer_id, level, None, &config, now) {
                Ok((_, notified)) => {
                    report.escalated.push((transfer_id, level));
                    if notified {
                        report.notified += 1;
                    }
                }
                Err(err) => {
                    warn!(transfer_id = %transfer_id, error = %err, "escalation failed");
                    report.failed.push((transfer_id, err.to_string()));
                }
            }
        }
        info!(
            examined = report.examined,
            escalated = report.escalated.len(),
            failed = report.failed.len(),
            "escalation sweep finished"
        );
        Ok(report)
    }

    pub fn queue_status(
        &self,
        tenant_id: TenantId,
        now: DateTime<Utc>,
    ) -> ServiceResult<EmergencyQueueStatus> {
        let config = self.config(tenant_id)?;
        let all = self.transfers.list(tenant_id)?;
        Ok(queue_status(&all, &config.escalation, now))
    }

    /// Every EMERGENCY transfer that is still REQUESTED or APPROVED.
    pub fn open_emergencies(&self, tenant_id: TenantId) -> ServiceResult<Vec<Transfer>> {
        Ok(self
            .transfers
            .list(tenant_id)?
            .into_iter()
            .filter(|t| t.is_emergency() && t.status().is_open())
            .collect())
    }
}

/// Creation times of the pair's EMERGENCY transfers, whatever their status.
fn emergency_stamps(
    transfers: &[Transfer],
    source: LocationId,
    destination: LocationId,
) -> Vec<DateTime<Utc>> {
    transfers
        .iter()
        .filter(|t| {
            t.is_emergency()
                && t.source_location_id() == source
                && t.destination_location_id() == destination
        })
        .map(Transfer::created_at)
        .collect()
}
