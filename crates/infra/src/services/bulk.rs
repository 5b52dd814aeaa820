//! Bulk allocation and saved templates.
//!
//! A bulk request is planned once against the line positions at the start,
//! then applied item by item through the same guarded write path as a manual
//! create. Items fail independently; nothing is rolled back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockroute_allocation::{
    AllocationTemplate, BulkAllocationResult, BulkStrategy, LineCapacity, TemplateId,
    TemplateRule, line_position, plan_bulk,
};
use stockroute_core::{ActorContext, DomainError, ExpectedVersion, TenantId, Versioned};
use stockroute_purchasing::{LineItemId, PurchaseOrderId};

use crate::audit::AuditEntry;
use crate::error::{ServiceError, ServiceResult};
use crate::services::ServiceContext;
use crate::services::allocations::{AllocationService, NewAllocation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAllocationRequest {
    pub purchase_order_id: PurchaseOrderId,
    /// Lines to distribute; empty means every line of the order.
    #[serde(default)]
    pub line_item_ids: Vec<LineItemId>,
    pub strategy: BulkStrategy,
    /// Run every check without writing anything.
    #[serde(default)]
    pub validate_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub description: Option<String>,
    pub rules: Vec<TemplateRule>,
}

#[derive(Clone)]
pub struct BulkService {
    ctx: ServiceContext,
    allocations: AllocationService,
}

impl BulkService {
    pub fn new(ctx: ServiceContext) -> Self {
        let allocations = AllocationService::new(ctx.clone());
        Self { ctx, allocations }
    }

    /// Plan and apply a bulk distribution.
    ///
    /// With `validate_only`, each item is checked against the ledger plus the
    /// items before it in the same batch, so the dry run predicts the real run.
    #[instrument(
        skip(self, actor, request),
        fields(
            tenant = %actor.tenant_id,
            purchase_order_id = %request.purchase_order_id,
            strategy = request.strategy.name(),
            validate_only = request.validate_only
        )
    )]
    pub fn bulk_allocate(
        &self,
        actor: &ActorContext,
        request: BulkAllocationRequest,
    ) -> ServiceResult<BulkAllocationResult> {
        let tenant_id = actor.tenant_id;
        let order = self
            .allocations
            .purchase_order(tenant_id, request.purchase_order_id)?;
        let selected: Vec<_> = if request.line_item_ids.is_empty() {
            order.lines().to_vec()
        } else {
            request
                .line_item_ids
                .iter()
                .map(|id| {
                    order
                        .line(*id)
                        .cloned()
                        .ok_or(ServiceError::Domain(DomainError::not_found()))
                })
                .collect::<ServiceResult<_>>()?
        };

        let existing = self
            .allocations
            .for_purchase_order(tenant_id, request.purchase_order_id)?;
        let capacities: Vec<LineCapacity> = selected
            .iter()
            .map(|line| LineCapacity {
                line_item_id: line.id,
                product_id: line.product_id,
                unallocated: line_position(line, &existing).quantity_remaining,
            })
            .collect();
        let plan = plan_bulk(&request.strategy, &capacities)?;

        let mut result = BulkAllocationResult::new(request.validate_only, plan.remainders);
        let mut pending = Vec::new();
        for item in plan.items {
            let input = NewAllocation {
                purchase_order_id: request.purchase_order_id,
                line_item_id: item.line_item_id,
                target_location_id: item.target_location_id,
                quantity: item.quantity,
                notes: item.notes.clone(),
            };
            let outcome = if request.validate_only {
                self.allocations.preview_create(actor, &input, &pending)
            } else {
                self.allocations.create(actor, input)
            };
            match outcome {
                Ok(allocation) => {
                    if request.validate_only {
                        pending.push(allocation.clone());
                    }
                    result.record_success(allocation);
                }
                Err(err) => result.record_failure(item, vec![err.to_string()]),
            }
        }

        info!(
            succeeded = result.success_count,
            failed = result.failure_count,
            allocated = result.total_allocated(),
            "bulk allocation finished"
        );
        Ok(result)
    }

    /// Save a template. Names are unique per tenant, ignoring case.
    #[instrument(skip(self, actor, input), fields(tenant = %actor.tenant_id))]
    pub fn create_template(
        &self,
        actor: &ActorContext,
        input: NewTemplate,
    ) -> ServiceResult<AllocationTemplate> {
        let now = Utc::now();
        let template = AllocationTemplate::new(
            actor.tenant_id,
            TemplateId::generate(),
            input.name,
            input.description,
            input.rules,
            actor.user_id,
            now,
        )?;
        let unique_name = |candidate: &AllocationTemplate, existing: &[AllocationTemplate]| {
            if existing
                .iter()
                .any(|t| t.name().eq_ignore_ascii_case(candidate.name()))
            {
                return Err(DomainError::invariant(format!(
                    "template name '{}' is already in use",
                    candidate.name()
                )));
            }
            Ok(())
        };
        let stored = self
            .ctx
            .stores
            .templates
            .insert(actor.tenant_id, template, Some(&unique_name))?;

        AuditEntry {
            tenant_id: actor.tenant_id,
            aggregate_id: stored.id_typed().into(),
            aggregate_type: "allocation_template",
            revision: stored.version(),
            event_type: "allocation_template.created",
            occurred_at: now,
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &stored);
        info!(template_id = %stored.id_typed(), "allocation template created");
        Ok(stored)
    }

    pub fn get_template(
        &self,
        tenant_id: TenantId,
        template_id: TemplateId,
    ) -> ServiceResult<AllocationTemplate> {
        self.ctx
            .stores
            .templates
            .get(tenant_id, &template_id)?
            .ok_or(ServiceError::Domain(DomainError::not_found()))
    }

    /// Templates of the tenant by name.
    pub fn list_templates(&self, tenant_id: TenantId) -> ServiceResult<Vec<AllocationTemplate>> {
        let mut all = self.ctx.stores.templates.list(tenant_id)?;
        all.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(all)
    }

    pub fn delete_template(&self, actor: &ActorContext, template_id: TemplateId) -> ServiceResult<()> {
        let removed = self.ctx.stores.templates.remove(
            actor.tenant_id,
            &template_id,
            ExpectedVersion::Any,
        )?;
        AuditEntry {
            tenant_id: actor.tenant_id,
            aggregate_id: template_id.into(),
            aggregate_type: "allocation_template",
            revision: removed.version() + 1,
            event_type: "allocation_template.deleted",
            occurred_at: Utc::now(),
            actor: Some(actor.user_id),
        }
        .emit(self.ctx.audit.as_ref(), &removed);
        Ok(())
    }

    /// Bulk-allocate with a saved template as the strategy.
    pub fn apply_template(
        &self,
        actor: &ActorContext,
        template_id: TemplateId,
        purchase_order_id: PurchaseOrderId,
        line_item_ids: Vec<LineItemId>,
        validate_only: bool,
    ) -> ServiceResult<BulkAllocationResult> {
        let template = self.get_template(actor.tenant_id, template_id)?;
        self.bulk_allocate(
            actor,
            BulkAllocationRequest {
                purchase_order_id,
                line_item_ids,
                strategy: BulkStrategy::Template { template },
                validate_only,
            },
        )
    }
}
