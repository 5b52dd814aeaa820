//! Expedited processing order.
//!
//! Open transfers are worked EMERGENCY first, then HIGH, then NORMAL; within a
//! priority, higher escalation levels first, then oldest first.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroute_core::LocationId;

use crate::emergency::{EscalationPolicy, next_escalation_level};
use crate::status::TransferStatus;
use crate::transfer::{Transfer, TransferId};

/// Open transfers in the order they should be processed.
pub fn processing_order<'a>(transfers: impl IntoIterator<Item = &'a Transfer>) -> Vec<&'a Transfer> {
    let mut open: Vec<&Transfer> = transfers
        .into_iter()
        .filter(|t| t.status().is_open())
        .collect();
    open.sort_by_key(|t| {
        (
            t.priority().rank(),
            Reverse(t.escalation_level()),
            t.created_at(),
            t.id_typed(),
        )
    });
    open
}

/// Next transfer to work for `destination`.
pub fn next_for_destination<'a>(
    transfers: impl IntoIterator<Item = &'a Transfer>,
    destination: LocationId,
) -> Option<&'a Transfer> {
    processing_order(
        transfers
            .into_iter()
            .filter(|t| t.destination_location_id() == destination),
    )
    .into_iter()
    .next()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyQueueStatus {
    pub total_open: usize,
    pub by_status: BTreeMap<TransferStatus, usize>,
    pub by_escalation_level: BTreeMap<u32, usize>,
    /// Requested transfers whose escalation is due.
    pub overdue: usize,
    pub oldest_age_minutes: Option<i64>,
    pub processing_order: Vec<TransferId>,
}

/// Snapshot of the emergency queue. Non-emergency transfers are ignored.
pub fn queue_status<'a>(
    transfers: impl IntoIterator<Item = &'a Transfer>,
    escalation: &EscalationPolicy,
    now: DateTime<Utc>,
) -> EmergencyQueueStatus {
    let emergencies: Vec<&Transfer> = transfers
        .into_iter()
        .filter(|t| t.is_emergency())
        .collect();

    let mut by_status = BTreeMap::new();
    for t in &emergencies {
        *by_status.entry(t.status()).or_insert(0) += 1;
    }

    let ordered = processing_order(emergencies.iter().copied());
    let mut by_escalation_level = BTreeMap::new();
    for t in &ordered {
        *by_escalation_level.entry(t.escalation_level()).or_insert(0) += 1;
    }

    EmergencyQueueStatus {
        total_open: ordered.len(),
        by_status,
        by_escalation_level,
        overdue: ordered
            .iter()
            .filter(|t| next_escalation_level(escalation, t, now).is_some())
            .count(),
        oldest_age_minutes: ordered
            .iter()
            .map(|t| t.created_at())
            .min()
            .map(|oldest| (now - oldest).num_minutes()),
        processing_order: ordered.iter().map(|t| t.id_typed()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockroute_core::{ProductId, TenantId, UserId};
    use stockroute_events::execute;

    use crate::reason::ReasonCode;
    use crate::status::TransferPriority;
    use crate::transfer::{RequestTransfer, TransferCommand};

    fn transfer(priority: TransferPriority, destination: LocationId, created_at: DateTime<Utc>) -> Transfer {
        let id = TransferId::generate();
        let mut t = Transfer::empty(id);
        execute(
            &mut t,
            &TransferCommand::Request(RequestTransfer {
                tenant_id: TenantId::new(),
                transfer_id: id,
                product_id: ProductId::new(),
                source_location_id: LocationId::new(),
                destination_location_id: destination,
                quantity: 1,
                priority,
                reason_code: ReasonCode::Rebalance,
                notes: None,
                unit_cost: None,
                requested_by: UserId::new(),
                occurred_at: created_at,
            }),
        )
        .unwrap();
        t
    }

    #[test]
    fn emergency_is_dequeued_before_older_normal_items() {
        let now = Utc::now();
        let store = LocationId::new();
        let normal = transfer(TransferPriority::Normal, store, now - Duration::hours(5));
        let high = transfer(TransferPriority::High, store, now - Duration::hours(3));
        let emergency = transfer(TransferPriority::Emergency, store, now);
        let elsewhere = transfer(TransferPriority::Emergency, LocationId::new(), now - Duration::hours(9));

        let all = [normal.clone(), high.clone(), emergency.clone(), elsewhere];
        let next = next_for_destination(&all, store).unwrap();
        assert_eq!(next.id_typed(), emergency.id_typed());

        let order: Vec<TransferId> = processing_order(&all[..3]).iter().map(|t| t.id_typed()).collect();
        assert_eq!(order, vec![emergency.id_typed(), high.id_typed(), normal.id_typed()]);
    }

    #[test]
    fn status_counts_only_emergencies() {
        let now = Utc::now();
        let store = LocationId::new();
        let overdue = transfer(TransferPriority::Emergency, store, now - Duration::minutes(90));
        let fresh = transfer(TransferPriority::Emergency, store, now - Duration::minutes(5));
        let normal = transfer(TransferPriority::Normal, store, now - Duration::days(2));

        let status = queue_status([&overdue, &fresh, &normal], &EscalationPolicy::default(), now);
        assert_eq!(status.total_open, 2);
        assert_eq!(status.by_status.get(&TransferStatus::Requested), Some(&2));
        assert_eq!(status.by_escalation_level.get(&0), Some(&2));
        assert_eq!(status.overdue, 1);
        assert_eq!(status.oldest_age_minutes, Some(90));
        assert_eq!(status.processing_order, vec![overdue.id_typed(), fresh.id_typed()]);
    }
}
