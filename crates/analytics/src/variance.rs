//! Received-versus-planned variance records and their aggregates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_allocation::{Allocation, AllocationStatus};
use stockroute_core::{AggregateId, LocationId, ProductId, TenantId};
use stockroute_transfers::{ReasonCode, Transfer, TransferStatus, VarianceClassification};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarianceSource {
    Allocation,
    Transfer,
}

/// Derived record; never stored, rebuilt from the ledgers on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceRecord {
    pub source: VarianceSource,
    pub record_id: AggregateId,
    pub tenant_id: TenantId,
    /// Receiving location.
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub planned: i64,
    pub received: i64,
    pub variance: i64,
    pub percentage: f64,
    pub classification: VarianceClassification,
    pub reason: Option<String>,
    pub reason_code: Option<ReasonCode>,
    pub recorded_at: DateTime<Utc>,
}

impl VarianceRecord {
    /// Allocated versus received, once the allocation is RECEIVED.
    pub fn from_allocation(allocation: &Allocation) -> Option<Self> {
        if allocation.status() != AllocationStatus::Received {
            return None;
        }
        let planned = allocation.quantity_allocated();
        let received = allocation.quantity_received();
        Some(Self {
            source: VarianceSource::Allocation,
            record_id: allocation.id_typed().into(),
            tenant_id: allocation.tenant_id(),
            location_id: allocation.target_location_id(),
            product_id: allocation.product_id(),
            planned,
            received,
            variance: received - planned,
            percentage: percent_of(received - planned, planned),
            classification: VarianceClassification::of(received - planned),
            reason: None,
            reason_code: None,
            recorded_at: allocation.received_at().unwrap_or(allocation.updated_at()),
        })
    }

    /// Requested (or approved) versus received, once the transfer is RECEIVED.
    pub fn from_transfer(transfer: &Transfer) -> Option<Self> {
        if transfer.status() != TransferStatus::Received {
            return None;
        }
        let v = transfer.variance()?;
        Some(Self {
            source: VarianceSource::Transfer,
            record_id: transfer.id_typed().into(),
            tenant_id: transfer.tenant_id(),
            location_id: transfer.destination_location_id(),
            product_id: transfer.product_id(),
            planned: v.expected,
            received: v.received,
            variance: v.variance,
            percentage: v.percentage,
            classification: v.classification,
            reason: v.reason.clone(),
            reason_code: Some(transfer.reason_code()),
            recorded_at: transfer.received_at().unwrap_or(transfer.updated_at()),
        })
    }
}

fn percent_of(variance: i64, base: i64) -> f64 {
    if base > 0 {
        variance.abs() as f64 * 100.0 / base as f64
    } else if variance == 0 {
        0.0
    } else {
        100.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub location_id: Option<LocationId>,
    pub product_id: Option<ProductId>,
    pub source: Option<VarianceSource>,
}

impl VarianceFilter {
    pub fn matches(&self, record: &VarianceRecord) -> bool {
        self.from.is_none_or(|from| record.recorded_at >= from)
            && self.to.is_none_or(|to| record.recorded_at <= to)
            && self.location_id.is_none_or(|l| record.location_id == l)
            && self.product_id.is_none_or(|p| record.product_id == p)
            && self.source.is_none_or(|s| record.source == s)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationVariance {
    pub records: usize,
    pub net_variance: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceSummary {
    pub record_count: usize,
    pub total_planned: i64,
    pub total_received: i64,
    pub net_variance: i64,
    pub exact_count: usize,
    pub shortage_count: usize,
    pub overage_count: usize,
    pub average_percentage: f64,
    pub max_percentage: f64,
    pub by_reason_code: BTreeMap<String, usize>,
    pub by_location: BTreeMap<LocationId, LocationVariance>,
}

pub fn summarize(records: &[VarianceRecord], filter: &VarianceFilter) -> VarianceSummary {
    let mut summary = VarianceSummary::default();
    let mut percentage_sum = 0.0;

    for r in records.iter().filter(|r| filter.matches(r)) {
        summary.record_count += 1;
        summary.total_planned += r.planned;
        summary.total_received += r.received;
        summary.net_variance += r.variance;
        match r.classification {
            VarianceClassification::Exact => summary.exact_count += 1,
            VarianceClassification::Shortage => summary.shortage_count += 1,
            VarianceClassification::Overage => summary.overage_count += 1,
        }
        percentage_sum += r.percentage;
        summary.max_percentage = summary.max_percentage.max(r.percentage);
        if let Some(code) = r.reason_code {
            *summary.by_reason_code.entry(code.as_str().to_string()).or_insert(0) += 1;
        }
        let location = summary.by_location.entry(r.location_id).or_default();
        location.records += 1;
        location.net_variance += r.variance;
    }

    if summary.record_count > 0 {
        summary.average_percentage = percentage_sum / summary.record_count as f64;
    }
    summary
}

/// Recurring same-direction variance at one location for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariancePattern {
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub direction: VarianceClassification,
    pub occurrences: usize,
    pub total_variance: i64,
    pub average_percentage: f64,
}

/// Groups records by (location, product) and reports the groups whose
/// dominant direction repeats at least `min_occurrences` times and outnumbers
/// the opposite direction.
pub fn detect_patterns(records: &[VarianceRecord], min_occurrences: usize) -> Vec<VariancePattern> {
    let mut groups: BTreeMap<(LocationId, ProductId), Vec<&VarianceRecord>> = BTreeMap::new();
    for r in records
        .iter()
        .filter(|r| r.classification != VarianceClassification::Exact)
    {
        groups.entry((r.location_id, r.product_id)).or_default().push(r);
    }

    let mut patterns = Vec::new();
    for ((location_id, product_id), group) in groups {
        let (short, over): (Vec<&VarianceRecord>, Vec<&VarianceRecord>) = group
            .into_iter()
            .partition(|r| r.classification == VarianceClassification::Shortage);
        let (direction, dominant, other) = if short.len() >= over.len() {
            (VarianceClassification::Shortage, short, over)
        } else {
            (VarianceClassification::Overage, over, short)
        };
        if dominant.len() < min_occurrences.max(1) || dominant.len() <= other.len() {
            continue;
        }
        patterns.push(VariancePattern {
            location_id,
            product_id,
            direction,
            occurrences: dominant.len(),
            total_variance: dominant.iter().map(|r| r.variance).sum(),
            average_percentage: dominant.iter().map(|r| r.percentage).sum::<f64>() / dominant.len() as f64,
        });
    }
    patterns.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(location: LocationId, product: ProductId, planned: i64, received: i64) -> VarianceRecord {
        let variance = received - planned;
        VarianceRecord {
            source: VarianceSource::Transfer,
            record_id: AggregateId::new(),
            tenant_id: TenantId::new(),
            location_id: location,
            product_id: product,
            planned,
            received,
            variance,
            percentage: percent_of(variance, planned),
            classification: VarianceClassification::of(variance),
            reason: None,
            reason_code: Some(ReasonCode::Stockout),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn summary_counts_directions_and_reasons() {
        let l = LocationId::new();
        let p = ProductId::new();
        let records = vec![record(l, p, 20, 18), record(l, p, 10, 10), record(l, p, 10, 12)];
        let s = summarize(&records, &VarianceFilter::default());

        assert_eq!(s.record_count, 3);
        assert_eq!(s.net_variance, 0);
        assert_eq!((s.shortage_count, s.exact_count, s.overage_count), (1, 1, 1));
        assert_eq!(s.by_reason_code.get("STOCKOUT"), Some(&3));
        assert!((s.max_percentage - 20.0).abs() < 1e-9);
        assert_eq!(s.by_location[&l].records, 3);
    }

    #[test]
    fn filter_limits_by_date_and_location() {
        let l = LocationId::new();
        let p = ProductId::new();
        let mut old = record(l, p, 10, 9);
        old.recorded_at = Utc::now() - Duration::days(30);
        let records = vec![old, record(l, p, 10, 8), record(LocationId::new(), p, 5, 1)];

        let filter = VarianceFilter {
            from: Some(Utc::now() - Duration::days(1)),
            location_id: Some(l),
            ..VarianceFilter::default()
        };
        assert_eq!(summarize(&records, &filter).record_count, 1);
    }

    #[test]
    fn recurring_shortages_form_a_pattern() {
        let l = LocationId::new();
        let p = ProductId::new();
        let records = vec![
            record(l, p, 10, 8),
            record(l, p, 10, 9),
            record(l, p, 10, 7),
            record(l, p, 10, 11),
            record(LocationId::new(), p, 10, 5),
        ];
        let patterns = detect_patterns(&records, 3);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].location_id, l);
        assert_eq!(patterns[0].direction, VarianceClassification::Shortage);
        assert_eq!(patterns[0].occurrences, 3);
        assert_eq!(patterns[0].total_variance, -6);
    }
}
