//! Optimization advisor.
//!
//! Deterministic scoring, no learned model:
//! - Each factor is normalised to \[0, 1\] across the candidate locations.
//! - A location's score is the strategy-weighted sum of its factors.
//! - A line's unallocated quantity is split in proportion to score, floored,
//!   and capped by remaining location capacity.
//!
//! Everything here works on an [`OptimizationSnapshot`]; suggestions can go
//! stale, so [`validate_optimization_feasibility`] re-checks them against a
//! fresh snapshot before anything is written.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use stockroute_allocation::{
    Allocation, AllocationId, AllocationStatus, LineItemPosition, line_position,
};
use stockroute_core::{DomainError, DomainResult, LocationId, ProductId, TenantId, ValueObject};
use stockroute_purchasing::{LineItemId, PurchaseOrder, PurchaseOrderId};

use crate::report::Insight;

const WEIGHT_EPSILON: f64 = 1e-9;

/// Named weight vector consumed by the advisor. Never stored on allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub name: String,
    pub demand_weight: f64,
    pub capacity_weight: f64,
    pub cost_weight: f64,
    /// Never suggest more than a location's remaining capacity.
    pub respect_capacity: bool,
    /// Suggestions below this quantity are dropped.
    pub min_allocation: i64,
}

impl OptimizationStrategy {
    pub fn new(
        name: impl Into<String>,
        demand_weight: f64,
        capacity_weight: f64,
        cost_weight: f64,
    ) -> DomainResult<Self> {
        let strategy = Self {
            name: name.into(),
            demand_weight,
            capacity_weight,
            cost_weight,
            respect_capacity: true,
            min_allocation: 1,
        };
        strategy.validate()?;
        Ok(strategy)
    }

    pub fn balanced() -> Self {
        Self::preset("balanced", 0.4, 0.3, 0.3)
    }

    pub fn demand_driven() -> Self {
        Self::preset("demand_driven", 0.7, 0.2, 0.1)
    }

    pub fn cost_minimizing() -> Self {
        Self::preset("cost_minimizing", 0.2, 0.2, 0.6)
    }

    /// Built-in strategy by name.
    pub fn named(name: &str) -> Option<Self> {
        match name {
            "balanced" => Some(Self::balanced()),
            "demand_driven" => Some(Self::demand_driven()),
            "cost_minimizing" => Some(Self::cost_minimizing()),
            _ => None,
        }
    }

    fn preset(name: &str, demand: f64, capacity: f64, cost: f64) -> Self {
        Self {
            name: name.to_string(),
            demand_weight: demand,
            capacity_weight: capacity,
            cost_weight: cost,
            respect_capacity: true,
            min_allocation: 1,
        }
    }

    pub fn with_respect_capacity(mut self, respect_capacity: bool) -> Self {
        self.respect_capacity = respect_capacity;
        self
    }

    pub fn with_min_allocation(mut self, min_allocation: i64) -> Self {
        self.min_allocation = min_allocation;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        let weights = [self.demand_weight, self.capacity_weight, self.cost_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DomainError::validation(
                "strategy weights must be finite and non-negative",
            ));
        }
        let total: f64 = weights.iter().sum();
        if total > 1.0 + WEIGHT_EPSILON {
            return Err(DomainError::validation(format!(
                "strategy weights sum to {total:.3}, must be at most 1.0"
            )));
        }
        if self.min_allocation < 0 {
            return Err(DomainError::validation("min_allocation cannot be negative"));
        }
        Ok(())
    }
}

/// Candidate destination as seen by the advisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationProfile {
    pub location_id: LocationId,
    pub name: String,
    /// Units the location can still take; `None` means unconstrained.
    pub remaining_capacity: Option<i64>,
    /// Estimated logistics cost per unit (lower is better).
    pub logistics_cost: f64,
    pub active: bool,
}

/// Historical demand of one product at one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandRecord {
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub units: i64,
}

/// Point-in-time view of a purchase order and its surroundings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSnapshot {
    pub tenant_id: TenantId,
    pub purchase_order_id: PurchaseOrderId,
    pub lines: Vec<LineItemPosition>,
    pub locations: Vec<LocationProfile>,
    pub demand: Vec<DemandRecord>,
    pub allocations: Vec<Allocation>,
    pub taken_at: DateTime<Utc>,
}

impl OptimizationSnapshot {
    pub fn new(
        order: &PurchaseOrder,
        allocations: Vec<Allocation>,
        locations: Vec<LocationProfile>,
        demand: Vec<DemandRecord>,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let allocations: Vec<Allocation> = allocations
            .into_iter()
            .filter(|a| a.purchase_order_id() == order.id_typed())
            .collect();
        let lines = order
            .lines()
            .iter()
            .map(|line| line_position(line, &allocations))
            .collect();
        Self {
            tenant_id: order.tenant_id(),
            purchase_order_id: order.id_typed(),
            lines,
            locations,
            demand,
            allocations,
            taken_at,
        }
    }

    fn demand_for(&self, location_id: LocationId, product_id: ProductId) -> i64 {
        self.demand
            .iter()
            .filter(|d| d.location_id == location_id && d.product_id == product_id)
            .map(|d| d.units.max(0))
            .sum()
    }

    fn profile(&self, location_id: LocationId) -> Option<&LocationProfile> {
        self.locations.iter().find(|l| l.location_id == location_id)
    }

    fn line(&self, line_item_id: LineItemId) -> Option<&LineItemPosition> {
        self.lines.iter().find(|l| l.line_item_id == line_item_id)
    }
}

/// Normalised factor values behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestionFactors {
    pub demand: f64,
    pub capacity: f64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSuggestion {
    pub line_item_id: LineItemId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub quantity: i64,
    pub score: f64,
    /// 1-based rank within the line.
    pub rank: usize,
    pub factors: SuggestionFactors,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmartSuggestions {
    pub purchase_order_id: PurchaseOrderId,
    pub strategy: OptimizationStrategy,
    pub suggestions: Vec<AllocationSuggestion>,
    /// Per-line quantity the advisor could not place.
    pub unplaced: Vec<(LineItemId, i64)>,
    pub insight: Insight,
}

/// Rank candidate locations for every under-allocated line of the snapshot.
pub fn generate_smart_suggestions(
    snapshot: &OptimizationSnapshot,
    strategy: &OptimizationStrategy,
) -> DomainResult<SmartSuggestions> {
    strategy.validate()?;

    let candidates: Vec<&LocationProfile> = snapshot.locations.iter().filter(|l| l.active).collect();
    let mut capacity_left: BTreeMap<LocationId, Option<i64>> = candidates
        .iter()
        .map(|l| (l.location_id, l.remaining_capacity))
        .collect();

    let mut suggestions = Vec::new();
    let mut unplaced = Vec::new();
    let mut total_remaining = 0i64;
    let mut total_placed = 0i64;

    for line in snapshot.lines.iter().filter(|l| l.quantity_remaining > 0) {
        total_remaining += line.quantity_remaining;
        let mut scored = score_candidates(snapshot, strategy, line.product_id, &candidates, &capacity_left);
        scored.retain(|(_, score, _)| *score > 0.0);
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });

        let total_score: f64 = scored.iter().map(|(_, s, _)| s).sum();
        let mut left = line.quantity_remaining;
        let mut rank = 0;
        for (location_id, score, factors) in scored {
            let mut quantity = if total_score > 0.0 {
                ((line.quantity_remaining as f64) * score / total_score).floor() as i64
            } else {
                0
            };
            quantity = quantity.min(left);
            if strategy.respect_capacity {
                if let Some(Some(cap)) = capacity_left.get(&location_id) {
                    quantity = quantity.min((*cap).max(0));
                }
            }
            if quantity <= 0 || quantity < strategy.min_allocation {
                continue;
            }
            if let Some(Some(cap)) = capacity_left.get_mut(&location_id) {
                *cap -= quantity;
            }
            left -= quantity;
            rank += 1;
            suggestions.push(AllocationSuggestion {
                line_item_id: line.line_item_id,
                product_id: line.product_id,
                location_id,
                quantity,
                score,
                rank,
                factors,
                rationale: format!(
                    "score {score:.3} = {:.2}×demand {:.2} + {:.2}×capacity {:.2} + {:.2}×cost {:.2}",
                    strategy.demand_weight,
                    factors.demand,
                    strategy.capacity_weight,
                    factors.capacity,
                    strategy.cost_weight,
                    factors.cost
                ),
            });
        }
        total_placed += line.quantity_remaining - left;
        if left > 0 {
            unplaced.push((line.line_item_id, left));
        }
    }

    let with_demand = candidates
        .iter()
        .filter(|l| snapshot.demand.iter().any(|d| d.location_id == l.location_id && d.units > 0))
        .count();
    let confidence = if candidates.is_empty() {
        0.0
    } else {
        with_demand as f64 / candidates.len() as f64
    };
    let coverage = if total_remaining > 0 {
        total_placed as f64 / total_remaining as f64
    } else {
        1.0
    };

    let insight = Insight::new(coverage, confidence)
        .with_explanation(format!(
            "{} suggestion(s) placing {total_placed} of {total_remaining} unallocated unit(s) using strategy '{}'",
            suggestions.len(),
            strategy.name
        ))
        .with_metadata(json!({
            "kind": "allocation.smart_suggestions",
            "tenant_id": snapshot.tenant_id.to_string(),
            "purchase_order_id": snapshot.purchase_order_id.to_string(),
            "weights": {
                "demand": strategy.demand_weight,
                "capacity": strategy.capacity_weight,
                "cost": strategy.cost_weight,
            },
            "candidates": candidates.len(),
        }));

    Ok(SmartSuggestions {
        purchase_order_id: snapshot.purchase_order_id,
        strategy: strategy.clone(),
        suggestions,
        unplaced,
        insight,
    })
}

fn score_candidates(
    snapshot: &OptimizationSnapshot,
    strategy: &OptimizationStrategy,
    product_id: ProductId,
    candidates: &[&LocationProfile],
    capacity_left: &BTreeMap<LocationId, Option<i64>>,
) -> Vec<(LocationId, f64, SuggestionFactors)> {
    let demand: Vec<f64> = candidates
        .iter()
        .map(|l| snapshot.demand_for(l.location_id, product_id) as f64)
        .collect();
    let capacity: Vec<Option<f64>> = candidates
        .iter()
        .map(|l| {
            capacity_left
                .get(&l.location_id)
                .copied()
                .flatten()
                .map(|c| c.max(0) as f64)
        })
        .collect();

    let max_demand = demand.iter().copied().fold(0.0, f64::max);
    let max_capacity = capacity.iter().flatten().copied().fold(0.0, f64::max);
    let min_cost = candidates.iter().map(|l| l.logistics_cost).fold(f64::INFINITY, f64::min);
    let max_cost = candidates.iter().map(|l| l.logistics_cost).fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .enumerate()
        .filter(|(i, _)| !(strategy.respect_capacity && capacity[*i] == Some(0.0)))
        .map(|(i, l)| {
            let factors = SuggestionFactors {
                demand: if max_demand > 0.0 { demand[i] / max_demand } else { 0.0 },
                capacity: match capacity[i] {
                    None => 1.0,
                    Some(c) if max_capacity > 0.0 => c / max_capacity,
                    Some(_) => 0.0,
                },
                cost: if max_cost > min_cost {
                    1.0 - (l.logistics_cost - min_cost) / (max_cost - min_cost)
                } else {
                    1.0
                },
            };
            let score = strategy.demand_weight * factors.demand
                + strategy.capacity_weight * factors.capacity
                + strategy.cost_weight * factors.cost;
            (l.location_id, score, factors)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceDirection {
    OverServed,
    UnderServed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalancingOpportunity {
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub current: i64,
    pub ideal: f64,
    pub deviation_percent: f64,
    pub direction: RebalanceDirection,
    /// Units to add (positive) or remove (negative) to reach the ideal.
    pub suggested_adjustment: i64,
}

/// Compare the current distribution of each product with its demand-weighted
/// ideal and flag locations outside `tolerance_percent`.
pub fn analyze_rebalancing_opportunities(
    snapshot: &OptimizationSnapshot,
    tolerance_percent: f64,
) -> Vec<RebalancingOpportunity> {
    let products: BTreeSet<ProductId> = snapshot.lines.iter().map(|l| l.product_id).collect();
    let mut out = Vec::new();

    for product_id in products {
        let mut current: BTreeMap<LocationId, i64> = BTreeMap::new();
        for a in snapshot
            .allocations
            .iter()
            .filter(|a| a.product_id() == product_id && a.status().is_active())
        {
            *current.entry(a.target_location_id()).or_insert(0) += a.quantity_allocated();
        }
        let total: i64 = current.values().sum();
        if total == 0 {
            continue;
        }

        let mut demand: BTreeMap<LocationId, i64> = BTreeMap::new();
        for l in snapshot.locations.iter().filter(|l| l.active) {
            let d = snapshot.demand_for(l.location_id, product_id);
            if d > 0 {
                demand.insert(l.location_id, d);
            }
        }
        let total_demand: i64 = demand.values().sum();
        if total_demand == 0 {
            continue;
        }

        let locations: BTreeSet<LocationId> = current.keys().chain(demand.keys()).copied().collect();
        for location_id in locations {
            let c = current.get(&location_id).copied().unwrap_or(0);
            let d = demand.get(&location_id).copied().unwrap_or(0);
            let ideal = total as f64 * d as f64 / total_demand as f64;
            let deviation_percent = if ideal > 0.0 {
                (c as f64 - ideal) / ideal * 100.0
            } else {
                100.0
            };
            if deviation_percent.abs() <= tolerance_percent {
                continue;
            }
            out.push(RebalancingOpportunity {
                product_id,
                location_id,
                current: c,
                ideal,
                deviation_percent,
                direction: if (c as f64) > ideal {
                    RebalanceDirection::OverServed
                } else {
                    RebalanceDirection::UnderServed
                },
                suggested_adjustment: ideal.round() as i64 - c,
            });
        }
    }

    out.sort_by(|a, b| {
        b.deviation_percent
            .abs()
            .partial_cmp(&a.deviation_percent.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    OverAllocation,
    DuplicatePending,
    ZeroCapacityTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationConflict {
    pub kind: ConflictKind,
    pub line_item_id: Option<LineItemId>,
    pub location_id: Option<LocationId>,
    pub allocation_ids: Vec<AllocationId>,
    pub message: String,
}

pub fn detect_allocation_conflicts(snapshot: &OptimizationSnapshot) -> Vec<AllocationConflict> {
    let mut conflicts = Vec::new();

    for line in &snapshot.lines {
        if line.quantity_allocated > line.quantity_ordered {
            conflicts.push(AllocationConflict {
                kind: ConflictKind::OverAllocation,
                line_item_id: Some(line.line_item_id),
                location_id: None,
                allocation_ids: snapshot
                    .allocations
                    .iter()
                    .filter(|a| a.line_item_id() == line.line_item_id && a.status().is_active())
                    .map(|a| a.id_typed())
                    .collect(),
                message: format!(
                    "line {} has {} allocated against {} ordered",
                    line.line_item_id, line.quantity_allocated, line.quantity_ordered
                ),
            });
        }
    }

    let mut pending: BTreeMap<(LineItemId, LocationId), Vec<AllocationId>> = BTreeMap::new();
    for a in snapshot
        .allocations
        .iter()
        .filter(|a| a.status() == AllocationStatus::Pending)
    {
        pending
            .entry((a.line_item_id(), a.target_location_id()))
            .or_default()
            .push(a.id_typed());
    }
    for ((line_item_id, location_id), ids) in &pending {
        if ids.len() > 1 {
            conflicts.push(AllocationConflict {
                kind: ConflictKind::DuplicatePending,
                line_item_id: Some(*line_item_id),
                location_id: Some(*location_id),
                allocation_ids: ids.clone(),
                message: format!(
                    "{} pending allocations of line {line_item_id} target location {location_id}",
                    ids.len()
                ),
            });
        }
    }

    let mut by_target: BTreeMap<LocationId, Vec<AllocationId>> = BTreeMap::new();
    for ((_, location_id), ids) in pending {
        by_target.entry(location_id).or_default().extend(ids);
    }
    for (location_id, ids) in by_target {
        let full = snapshot
            .profile(location_id)
            .is_some_and(|p| !p.active || p.remaining_capacity.is_some_and(|c| c <= 0));
        if full {
            conflicts.push(AllocationConflict {
                kind: ConflictKind::ZeroCapacityTarget,
                line_item_id: None,
                location_id: Some(location_id),
                allocation_ids: ids,
                message: format!("location {location_id} has no remaining capacity"),
            });
        }
    }

    conflicts
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedSuggestion {
    pub suggestion: AllocationSuggestion,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibilityReport {
    pub feasible: bool,
    pub accepted: Vec<AllocationSuggestion>,
    pub rejected: Vec<RejectedSuggestion>,
}

/// Re-check `suggestions` against live ledger state, in order, consuming line
/// and location headroom as each one is accepted.
pub fn validate_optimization_feasibility(
    suggestions: &[AllocationSuggestion],
    live: &OptimizationSnapshot,
) -> FeasibilityReport {
    let mut line_left: BTreeMap<LineItemId, i64> = live
        .lines
        .iter()
        .map(|l| (l.line_item_id, l.quantity_remaining))
        .collect();
    let mut capacity_left: BTreeMap<LocationId, Option<i64>> = live
        .locations
        .iter()
        .map(|l| (l.location_id, l.remaining_capacity))
        .collect();

    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for s in suggestions {
        let reason = check_suggestion(s, live, &line_left, &capacity_left);
        match reason {
            Some(reason) => rejected.push(RejectedSuggestion {
                suggestion: s.clone(),
                reason,
            }),
            None => {
                if let Some(left) = line_left.get_mut(&s.line_item_id) {
                    *left -= s.quantity;
                }
                if let Some(Some(cap)) = capacity_left.get_mut(&s.location_id) {
                    *cap -= s.quantity;
                }
                accepted.push(s.clone());
            }
        }
    }

    FeasibilityReport {
        feasible: rejected.is_empty(),
        accepted,
        rejected,
    }
}

fn check_suggestion(
    s: &AllocationSuggestion,
    live: &OptimizationSnapshot,
    line_left: &BTreeMap<LineItemId, i64>,
    capacity_left: &BTreeMap<LocationId, Option<i64>>,
) -> Option<String> {
    if s.quantity <= 0 {
        return Some("quantity must be positive".to_string());
    }
    let Some(line) = live.line(s.line_item_id) else {
        return Some(format!("line {} is not part of the purchase order", s.line_item_id));
    };
    if line.product_id != s.product_id {
        return Some("product does not match the line item".to_string());
    }
    let left = line_left.get(&s.line_item_id).copied().unwrap_or(0);
    if s.quantity > left {
        return Some(format!("only {left} unit(s) of the line remain unallocated"));
    }
    match live.profile(s.location_id) {
        None => return Some(format!("location {} is unknown", s.location_id)),
        Some(p) if !p.active => return Some(format!("location {} is inactive", s.location_id)),
        Some(_) => {}
    }
    if let Some(Some(cap)) = capacity_left.get(&s.location_id) {
        if s.quantity > *cap {
            return Some(format!("location {} can only take {cap} more unit(s)", s.location_id));
        }
    }
    None
}

impl ValueObject for OptimizationStrategy {}
