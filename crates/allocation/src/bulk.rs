//! Bulk and template distribution planning.
//!
//! Planning is pure: a strategy plus the current unallocated quantity of each
//! line yields a list of items. The infra layer then applies every item in its
//! own constraint-checked write, so one failure never blocks its siblings.
//! Rounding always floors; the leftover is reported per line.

use serde::{Deserialize, Serialize};

use stockroute_core::{DomainError, DomainResult, LocationId, ProductId};
use stockroute_purchasing::LineItemId;

use crate::allocation::Allocation;
use crate::template::AllocationTemplate;

/// One allocation to attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAllocationItem {
    pub line_item_id: LineItemId,
    pub target_location_id: LocationId,
    pub quantity: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PercentageSplit {
    pub location_id: LocationId,
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BulkStrategy {
    /// Caller-supplied tuples, applied as-is.
    Explicit { items: Vec<BulkAllocationItem> },
    /// `floor(unallocated × pct / 100)` per target; percentages sum to ≤ 100.
    Percentage { splits: Vec<PercentageSplit> },
    /// `floor(unallocated / N)` per target; `unallocated mod N` stays behind.
    Equal { locations: Vec<LocationId> },
    /// A saved template.
    Template { template: AllocationTemplate },
}

impl BulkStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            BulkStrategy::Explicit { .. } => "explicit",
            BulkStrategy::Percentage { .. } => "percentage",
            BulkStrategy::Equal { .. } => "equal",
            BulkStrategy::Template { .. } => "template",
        }
    }
}

/// Unallocated quantity of one line at planning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineCapacity {
    pub line_item_id: LineItemId,
    pub product_id: ProductId,
    pub unallocated: i64,
}

/// What a plan leaves behind on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRemainder {
    pub line_item_id: LineItemId,
    pub planned: i64,
    pub unallocated: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPlan {
    pub items: Vec<BulkAllocationItem>,
    pub remainders: Vec<LineRemainder>,
}

/// Expand `strategy` over `lines`.
///
/// Fails only when the strategy itself is malformed; per-item problems are
/// left for the apply step to report.
pub fn plan_bulk(strategy: &BulkStrategy, lines: &[LineCapacity]) -> DomainResult<BulkPlan> {
    let items = match strategy {
        BulkStrategy::Explicit { items } => {
            if items.is_empty() {
                return Err(DomainError::validation("no allocation items supplied"));
            }
            items.clone()
        }
        BulkStrategy::Percentage { splits } => {
            validate_splits(splits)?;
            lines
                .iter()
                .flat_map(|line| {
                    splits.iter().map(move |s| BulkAllocationItem {
                        line_item_id: line.line_item_id,
                        target_location_id: s.location_id,
                        quantity: line.unallocated.max(0) * i64::from(s.percent) / 100,
                        notes: None,
                    })
                })
                .filter(|item| item.quantity > 0)
                .collect()
        }
        BulkStrategy::Equal { locations } => {
            validate_locations(locations)?;
            let n = locations.len() as i64;
            lines
                .iter()
                .flat_map(|line| {
                    let each = line.unallocated.max(0) / n;
                    locations.iter().map(move |l| BulkAllocationItem {
                        line_item_id: line.line_item_id,
                        target_location_id: *l,
                        quantity: each,
                        notes: None,
                    })
                })
                .filter(|item| item.quantity > 0)
                .collect()
        }
        BulkStrategy::Template { template } => lines
            .iter()
            .flat_map(|line| {
                template
                    .distribute(line.unallocated)
                    .into_iter()
                    .map(move |(location, quantity)| BulkAllocationItem {
                        line_item_id: line.line_item_id,
                        target_location_id: location,
                        quantity,
                        notes: Some(format!("template: {}", template.name())),
                    })
            })
            .collect(),
    };

    let remainders = lines
        .iter()
        .map(|line| {
            let planned: i64 = items
                .iter()
                .filter(|i| i.line_item_id == line.line_item_id)
                .map(|i| i.quantity)
                .sum();
            LineRemainder {
                line_item_id: line.line_item_id,
                planned,
                unallocated: (line.unallocated - planned).max(0),
            }
        })
        .collect();

    Ok(BulkPlan { items, remainders })
}

fn validate_splits(splits: &[PercentageSplit]) -> DomainResult<()> {
    if splits.is_empty() {
        return Err(DomainError::validation("percentage strategy needs at least one split"));
    }
    let locations: Vec<LocationId> = splits.iter().map(|s| s.location_id).collect();
    validate_locations(&locations)?;
    let total: u32 = splits.iter().map(|s| s.percent).fold(0, u32::saturating_add);
    if total > 100 {
        return Err(DomainError::validation(format!(
            "percentages sum to {total}, must be at most 100"
        )));
    }
    Ok(())
}

fn validate_locations(locations: &[LocationId]) -> DomainResult<()> {
    if locations.is_empty() {
        return Err(DomainError::validation("at least one target location is required"));
    }
    for (i, l) in locations.iter().enumerate() {
        if locations[..i].contains(l) {
            return Err(DomainError::validation(format!("location {l} appears more than once")));
        }
    }
    Ok(())
}

/// An item that could not be applied, with every reason found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAllocation {
    pub item: BulkAllocationItem,
    pub errors: Vec<String>,
}

/// Outcome of a bulk run. Partial success is normal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkAllocationResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Created allocations; in validate-only mode, the ones that would be.
    pub created: Vec<Allocation>,
    pub failed: Vec<FailedAllocation>,
    pub remainders: Vec<LineRemainder>,
    pub validate_only: bool,
}

impl BulkAllocationResult {
    pub fn new(validate_only: bool, remainders: Vec<LineRemainder>) -> Self {
        Self {
            success_count: 0,
            failure_count: 0,
            created: Vec::new(),
            failed: Vec::new(),
            remainders,
            validate_only,
        }
    }

    pub fn record_success(&mut self, allocation: Allocation) {
        self.success_count += 1;
        self.created.push(allocation);
    }

    pub fn record_failure(&mut self, item: BulkAllocationItem, errors: Vec<String>) {
        self.failure_count += 1;
        self.failed.push(FailedAllocation { item, errors });
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count == 0
    }

    pub fn total_allocated(&self) -> i64 {
        self.created.iter().map(|a| a.quantity_allocated()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use stockroute_core::{TenantId, UserId};

    use crate::template::{TemplateId, TemplateRule, TemplateShare};

    fn line(unallocated: i64) -> LineCapacity {
        LineCapacity {
            line_item_id: LineItemId::generate(),
            product_id: ProductId::new(),
            unallocated,
        }
    }

    fn quantity_for(plan: &BulkPlan, location: LocationId) -> i64 {
        plan.items
            .iter()
            .filter(|i| i.target_location_id == location)
            .map(|i| i.quantity)
            .sum()
    }

    #[test]
    fn percentage_split_floors_and_reports_remainder() {
        let a = LocationId::new();
        let b = LocationId::new();
        let strategy = BulkStrategy::Percentage {
            splits: vec![
                PercentageSplit { location_id: a, percent: 60 },
                PercentageSplit { location_id: b, percent: 40 },
            ],
        };
        let plan = plan_bulk(&strategy, &[line(33)]).unwrap();

        assert_eq!(quantity_for(&plan, a), 19);
        assert_eq!(quantity_for(&plan, b), 13);
        assert_eq!(plan.remainders[0].planned, 32);
        assert_eq!(plan.remainders[0].unallocated, 1);
    }

    #[test]
    fn percentage_over_one_hundred_is_rejected() {
        let strategy = BulkStrategy::Percentage {
            splits: vec![
                PercentageSplit { location_id: LocationId::new(), percent: 80 },
                PercentageSplit { location_id: LocationId::new(), percent: 30 },
            ],
        };
        assert!(matches!(
            plan_bulk(&strategy, &[line(10)]),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn equal_split_skips_zero_shares() {
        let locations: Vec<LocationId> = (0..5).map(|_| LocationId::new()).collect();
        let strategy = BulkStrategy::Equal { locations };
        let plan = plan_bulk(&strategy, &[line(3)]).unwrap();
        assert!(plan.items.is_empty());
        assert_eq!(plan.remainders[0].unallocated, 3);
    }

    #[test]
    fn duplicate_equal_targets_are_rejected() {
        let l = LocationId::new();
        let strategy = BulkStrategy::Equal { locations: vec![l, l] };
        assert!(plan_bulk(&strategy, &[line(10)]).is_err());
    }

    #[test]
    fn template_strategy_labels_items() {
        let store = LocationId::new();
        let template = AllocationTemplate::new(
            TenantId::new(),
            TemplateId::generate(),
            "Weekly restock",
            None,
            vec![TemplateRule {
                location_id: store,
                share: TemplateShare::Percentage(50),
            }],
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        let plan = plan_bulk(&BulkStrategy::Template { template }, &[line(9)]).unwrap();

        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].quantity, 4);
        assert_eq!(plan.items[0].notes.as_deref(), Some("template: Weekly restock"));
        assert_eq!(plan.remainders[0].unallocated, 5);
    }

    #[test]
    fn explicit_items_pass_through() {
        let capacity = line(10);
        let item = BulkAllocationItem {
            line_item_id: capacity.line_item_id,
            target_location_id: LocationId::new(),
            quantity: 4,
            notes: None,
        };
        let plan = plan_bulk(&BulkStrategy::Explicit { items: vec![item.clone()] }, &[capacity]).unwrap();
        assert_eq!(plan.items, vec![item]);
        assert_eq!(plan.remainders[0].unallocated, 6);

        assert!(plan_bulk(&BulkStrategy::Explicit { items: Vec::new() }, &[capacity]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: equal distribution gives each of N targets floor(Q/N) and
        /// leaves Q mod N unallocated.
        #[test]
        fn equal_distribution_rounding_law(q in 0i64..10_000, n in 1usize..20) {
            let locations: Vec<LocationId> = (0..n).map(|_| LocationId::new()).collect();
            let plan = plan_bulk(&BulkStrategy::Equal { locations: locations.clone() }, &[line(q)]).unwrap();

            let each = q / n as i64;
            for l in &locations {
                prop_assert_eq!(quantity_for(&plan, *l), each);
            }
            prop_assert_eq!(plan.remainders[0].unallocated, q % n as i64);
        }

        /// Property: a percentage plan never exceeds what is unallocated.
        #[test]
        fn percentage_plan_never_over_commits(
            q in 0i64..10_000,
            percents in prop::collection::vec(0u32..=50, 1..3)
        ) {
            let splits: Vec<PercentageSplit> = percents
                .iter()
                .map(|p| PercentageSplit { location_id: LocationId::new(), percent: *p })
                .collect();
            let plan = plan_bulk(&BulkStrategy::Percentage { splits }, &[line(q)]).unwrap();
            prop_assert!(plan.remainders[0].planned <= q);
        }
    }
}
