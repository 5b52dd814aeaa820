//! Optimization advisor service: snapshots the ledger, scores, re-checks.
//!
//! Suggestions are computed on a snapshot and never written directly;
//! `accept` re-validates against live state and then goes through the bulk
//! path, one guarded create per suggestion.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use stockroute_allocation::{BulkAllocationItem, BulkAllocationResult, BulkStrategy};
use stockroute_analytics::{
    AllocationConflict, AllocationSuggestion, FeasibilityReport, OptimizationSnapshot,
    OptimizationStrategy, RebalancingOpportunity, SmartSuggestions,
    analyze_rebalancing_opportunities, detect_allocation_conflicts, generate_smart_suggestions,
    validate_optimization_feasibility,
};
use stockroute_core::{ActorContext, ProductId, TenantId};
use stockroute_purchasing::PurchaseOrderId;

use crate::error::ServiceResult;
use crate::services::ServiceContext;
use crate::services::allocations::AllocationService;
use crate::services::bulk::{BulkAllocationRequest, BulkService};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedSuggestions {
    pub feasibility: FeasibilityReport,
    /// Outcome of creating the feasible suggestions.
    pub result: BulkAllocationResult,
}

#[derive(Clone)]
pub struct AdvisorService {
    ctx: ServiceContext,
    allocations: AllocationService,
    bulk: BulkService,
}

impl AdvisorService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self {
            allocations: AllocationService::new(ctx.clone()),
            bulk: BulkService::new(ctx.clone()),
            ctx,
        }
    }

    /// Current view of a purchase order, its allocations, the tenant's
    /// locations and demand for the order's products.
    pub fn snapshot(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> ServiceResult<OptimizationSnapshot> {
        let order = self.allocations.purchase_order(tenant_id, purchase_order_id)?;
        let allocations = self
            .allocations
            .for_purchase_order(tenant_id, purchase_order_id)?;
        let mut products: Vec<ProductId> = order.lines().iter().map(|l| l.product_id).collect();
        products.sort();
        products.dedup();

        Ok(OptimizationSnapshot::new(
            &order,
            allocations,
            self.ctx.directory.locations(tenant_id),
            self.ctx.directory.demand(tenant_id, &products),
            Utc::now(),
        ))
    }

    /// Ranked suggestions for every under-allocated line. `None` uses the
    /// configured default strategy.
    #[instrument(skip(self, strategy), fields(tenant = %tenant_id, purchase_order_id = %purchase_order_id))]
    pub fn suggest(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        strategy: Option<OptimizationStrategy>,
    ) -> ServiceResult<SmartSuggestions> {
        let strategy = strategy.unwrap_or_else(|| self.ctx.config.default_strategy());
        let snapshot = self.snapshot(tenant_id, purchase_order_id)?;
        let suggestions = generate_smart_suggestions(&snapshot, &strategy)?;
        info!(count = suggestions.suggestions.len(), "suggestions generated");
        Ok(suggestions)
    }

    /// Locations outside the tolerance band around the demand-weighted ideal.
    pub fn rebalancing(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        tolerance_percent: Option<f64>,
    ) -> ServiceResult<Vec<RebalancingOpportunity>> {
        let tolerance = tolerance_percent
            .unwrap_or(self.ctx.config.optimization.rebalance_tolerance_percent);
        let snapshot = self.snapshot(tenant_id, purchase_order_id)?;
        Ok(analyze_rebalancing_opportunities(&snapshot, tolerance))
    }

    pub fn conflicts(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
    ) -> ServiceResult<Vec<AllocationConflict>> {
        let snapshot = self.snapshot(tenant_id, purchase_order_id)?;
        Ok(detect_allocation_conflicts(&snapshot))
    }

    /// Re-check suggestions against the ledger as it is now.
    pub fn feasibility(
        &self,
        tenant_id: TenantId,
        purchase_order_id: PurchaseOrderId,
        suggestions: &[AllocationSuggestion],
    ) -> ServiceResult<FeasibilityReport> {
        let live = self.snapshot(tenant_id, purchase_order_id)?;
        Ok(validate_optimization_feasibility(suggestions, &live))
    }

    /// Create allocations for the suggestions that are still feasible.
    #[instrument(
        skip(self, actor, suggestions),
        fields(tenant = %actor.tenant_id, purchase_order_id = %purchase_order_id, count = suggestions.len())
    )]
    pub fn accept(
        &self,
        actor: &ActorContext,
        purchase_order_id: PurchaseOrderId,
        suggestions: &[AllocationSuggestion],
    ) -> ServiceResult<AcceptedSuggestions> {
        let feasibility = self.feasibility(actor.tenant_id, purchase_order_id, suggestions)?;
        if feasibility.accepted.is_empty() {
            return Ok(AcceptedSuggestions {
                feasibility,
                result: BulkAllocationResult::new(false, Vec::new()),
            });
        }

        let items = feasibility
            .accepted
            .iter()
            .map(|s| BulkAllocationItem {
                line_item_id: s.line_item_id,
                target_location_id: s.location_id,
                quantity: s.quantity,
                notes: Some(s.rationale.clone()),
            })
            .collect();
        let result = self.bulk.bulk_allocate(
            actor,
            BulkAllocationRequest {
                purchase_order_id,
                line_item_ids: Vec::new(),
                strategy: BulkStrategy::Explicit { items },
                validate_only: false,
            },
        )?;
        info!(
            accepted = result.success_count,
            rejected = feasibility.rejected.len() + result.failure_count,
            "suggestions accepted"
        );
        Ok(AcceptedSuggestions {
            feasibility,
            result,
        })
    }
}
