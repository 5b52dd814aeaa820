//! End-to-end tests of the engine over in-memory stores.
//!
//! Services → dispatcher → guarded record store → audit bus.
//!
//! Verifies:
//! - The over-allocation invariant holds, including under concurrent creates
//! - Both status machines reject illegal edges
//! - Emergency gating, auto-approval and escalation
//! - Bulk partial success and floor rounding
//! - Linking, traceability and idempotent sync
//! - Variance analytics and the alert lifecycle
//! - Tenant isolation

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    use stockroute_allocation::{
        AllocationStatus, BulkStrategy, PercentageSplit, TemplateRule, TemplateShare,
    };
    use stockroute_analytics::{
        DemandRecord, FrequencyBucket, LocationProfile, VarianceFilter, VarianceSource,
    };
    use stockroute_core::{
        ActorContext, DomainError, ExpectedVersion, LocationId, ProductId, TenantId, UserId,
        Versioned,
    };
    use stockroute_events::TenantScoped;
    use stockroute_purchasing::{LineItemId, PurchaseOrder, PurchaseOrderId};
    use stockroute_transfers::{
        ApprovalOrigin, EligibilityReason, EmergencyConfig, FrequencyWindow, ReasonCode,
        ReceivingData, TransferPriority, TransferStatus, VarianceClassification,
    };

    use crate::config::EngineConfig;
    use crate::directory::InMemoryLocationDirectory;
    use crate::engine::Engine;
    use crate::error::ServiceError;
    use crate::notify::{InMemoryNotifier, NotificationKind};
    use crate::services::{
        AllocationChanges, BulkAllocationRequest, NewAllocation, NewTemplate, NewTransfer,
        SyncAction, TransferChanges, TransferFromAllocation,
    };
    use crate::store::RecordStore;

    fn actor(tenant_id: TenantId) -> ActorContext {
        EngineConfig::default().init_telemetry();
        ActorContext::new(tenant_id, UserId::new(), "planner")
    }

    fn domain(err: ServiceError) -> DomainError {
        match err {
            ServiceError::Domain(e) => e,
            other => panic!("expected a domain error, got {other:?}"),
        }
    }

    /// Registers a purchase order with one line per entry of `ordered`.
    fn order_with_lines(
        engine: &Engine,
        actor: &ActorContext,
        ordered: &[i64],
    ) -> (PurchaseOrderId, Vec<LineItemId>, ProductId) {
        let product = ProductId::new();
        let mut order = PurchaseOrder::new(
            actor.tenant_id,
            PurchaseOrderId::generate(),
            "PO-1001",
            Utc::now(),
        )
        .unwrap();
        let lines = ordered
            .iter()
            .map(|q| order.add_line(LineItemId::generate(), product, *q, 250).unwrap())
            .collect();
        let order = engine
            .allocations()
            .register_purchase_order(actor, order)
            .unwrap();
        (order.id_typed(), lines, product)
    }

    fn allocate(
        engine: &Engine,
        actor: &ActorContext,
        po: PurchaseOrderId,
        line: LineItemId,
        location: LocationId,
        quantity: i64,
    ) -> Result<stockroute_allocation::Allocation, ServiceError> {
        engine.allocations().create(
            actor,
            NewAllocation {
                purchase_order_id: po,
                line_item_id: line,
                target_location_id: location,
                quantity,
                notes: None,
            },
        )
    }

    fn new_transfer(
        product_id: ProductId,
        source: LocationId,
        destination: LocationId,
        quantity: i64,
        priority: TransferPriority,
    ) -> NewTransfer {
        NewTransfer {
            product_id,
            source_location_id: source,
            destination_location_id: destination,
            quantity,
            priority,
            reason_code: ReasonCode::Stockout,
            notes: None,
            unit_cost: Some(100),
        }
    }

    // ---------------------------------------------------------------------
    // Allocation ledger
    // ---------------------------------------------------------------------

    #[test]
    fn over_allocation_reports_the_remaining_quantity() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);

        let first = allocate(&engine, &actor, po, lines[0], LocationId::new(), 60).unwrap();
        assert_eq!(first.status(), AllocationStatus::Pending);

        let err = domain(allocate(&engine, &actor, po, lines[0], LocationId::new(), 50).unwrap_err());
        assert_eq!(
            err,
            DomainError::OverAllocation {
                requested: 50,
                remaining: 40
            }
        );

        let position = engine
            .allocations()
            .line_position(actor.tenant_id, po, lines[0])
            .unwrap();
        assert_eq!(position.quantity_allocated, 60);
        assert_eq!(position.quantity_remaining, 40);
    }

    #[test]
    fn concurrent_creates_cannot_jointly_over_allocate() {
        for _ in 0..20 {
            let engine = Engine::in_memory(EngineConfig::default());
            let actor = actor(TenantId::new());
            let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
            let line = lines[0];

            let results: Vec<_> = std::thread::scope(|s| {
                let handles: Vec<_> = [60, 50]
                    .into_iter()
                    .map(|quantity| {
                        let engine = engine.clone();
                        let actor = actor.clone();
                        s.spawn(move || {
                            allocate(&engine, &actor, po, line, LocationId::new(), quantity)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            let ok = results.iter().filter(|r| r.is_ok()).count();
            let over = results
                .iter()
                .filter(|r| {
                    matches!(
                        r,
                        Err(ServiceError::Domain(DomainError::OverAllocation { .. }))
                    )
                })
                .count();
            assert_eq!((ok, over), (1, 1));

            let position = engine
                .allocations()
                .line_position(actor.tenant_id, po, line)
                .unwrap();
            assert!(position.quantity_allocated <= 100);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Sequential creates accept exactly the requests that still fit.
        #[test]
        fn sequential_creates_never_exceed_the_ordered_quantity(
            ordered in 1i64..500,
            requests in prop::collection::vec(1i64..200, 1..12),
        ) {
            let engine = Engine::in_memory(EngineConfig::default());
            let actor = actor(TenantId::new());
            let (po, lines, _) = order_with_lines(&engine, &actor, &[ordered]);

            let mut expected_total = 0;
            for quantity in requests {
                let outcome = allocate(&engine, &actor, po, lines[0], LocationId::new(), quantity);
                if expected_total + quantity <= ordered {
                    prop_assert!(outcome.is_ok());
                    expected_total += quantity;
                } else {
                    let is_over_allocation = matches!(
                        outcome,
                        Err(ServiceError::Domain(DomainError::OverAllocation { .. }))
                    );
                    prop_assert!(is_over_allocation);
                }
            }

            let position = engine
                .allocations()
                .line_position(actor.tenant_id, po, lines[0])
                .unwrap();
            prop_assert_eq!(position.quantity_allocated, expected_total);
            prop_assert_eq!(position.quantity_remaining, ordered - expected_total);
        }
    }

    #[test]
    fn update_rechecks_the_line_without_counting_itself() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 60).unwrap();
        allocate(&engine, &actor, po, lines[0], LocationId::new(), 30).unwrap();

        let grown = engine
            .allocations()
            .update(
                &actor,
                a.id_typed(),
                AllocationChanges {
                    quantity: Some(70),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(grown.quantity_allocated(), 70);

        let err = domain(
            engine
                .allocations()
                .update(
                    &actor,
                    a.id_typed(),
                    AllocationChanges {
                        quantity: Some(71),
                        ..Default::default()
                    },
                )
                .unwrap_err(),
        );
        assert_eq!(
            err,
            DomainError::OverAllocation {
                requested: 71,
                remaining: 70
            }
        );
    }

    #[test]
    fn shipping_twice_is_an_invalid_transition() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[10]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 10).unwrap();

        let shipped = engine.allocations().ship(&actor, a.id_typed()).unwrap();
        assert_eq!(shipped.status(), AllocationStatus::Shipped);

        let err = domain(engine.allocations().ship(&actor, a.id_typed()).unwrap_err());
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        // Shipped allocations are cancelled, never deleted.
        let err = domain(engine.allocations().delete(&actor, a.id_typed()).unwrap_err());
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn receiving_requires_shipping_first() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[10]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 10).unwrap();

        let err = domain(engine.allocations().receive(&actor, a.id_typed(), None).unwrap_err());
        assert!(matches!(err, DomainError::InvalidTransition { .. }));

        engine.allocations().ship(&actor, a.id_typed()).unwrap();
        let received = engine.allocations().receive(&actor, a.id_typed(), None).unwrap();
        assert_eq!(received.status(), AllocationStatus::Received);
        assert_eq!(received.quantity_received(), 10);
    }

    #[test]
    fn cancelling_frees_line_quantity() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 100).unwrap();

        engine
            .allocations()
            .cancel(&actor, a.id_typed(), Some("store closed".to_string()))
            .unwrap();
        allocate(&engine, &actor, po, lines[0], LocationId::new(), 100).unwrap();
    }

    #[test]
    fn deleted_allocations_are_gone() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();

        engine.allocations().delete(&actor, a.id_typed()).unwrap();
        let err = domain(engine.allocations().get(actor.tenant_id, a.id_typed()).unwrap_err());
        assert_eq!(err, DomainError::NotFound);
        allocate(&engine, &actor, po, lines[0], LocationId::new(), 100).unwrap();
    }

    #[test]
    fn other_tenants_get_not_found() {
        let engine = Engine::in_memory(EngineConfig::default());
        let owner = actor(TenantId::new());
        let stranger = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &owner, &[10]);
        let a = allocate(&engine, &owner, po, lines[0], LocationId::new(), 5).unwrap();

        let lookup = domain(
            engine
                .allocations()
                .get(stranger.tenant_id, a.id_typed())
                .unwrap_err(),
        );
        assert_eq!(lookup, DomainError::NotFound);

        let ship = domain(engine.allocations().ship(&stranger, a.id_typed()).unwrap_err());
        assert_eq!(ship, DomainError::NotFound);

        let create = domain(
            allocate(&engine, &stranger, po, lines[0], LocationId::new(), 1).unwrap_err(),
        );
        assert_eq!(create, DomainError::NotFound);
        assert!(engine.allocations().list(stranger.tenant_id).unwrap().is_empty());
    }

    #[test]
    fn committed_changes_are_audited() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let everything = engine.subscribe_audit();
        let audit = engine.subscribe_tenant_audit(actor.tenant_id);
        let stranger = ActorContext::new(TenantId::new(), UserId::new(), "stranger");
        order_with_lines(&engine, &stranger, &[5]);
        let (po, lines, _) = order_with_lines(&engine, &actor, &[10]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 10).unwrap();
        engine.allocations().ship(&actor, a.id_typed()).unwrap();

        assert!(everything
            .drain()
            .iter()
            .any(|e| TenantScoped::tenant_id(e) == stranger.tenant_id));
        let types: Vec<String> = audit
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(
            types,
            vec![
                "purchase_order.registered",
                "allocation.created",
                "allocation.shipped"
            ]
        );
    }

    #[test]
    fn stale_writes_fail_with_a_retryable_conflict() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[10]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 10).unwrap();
        let stale = engine.allocations().get(actor.tenant_id, a.id_typed()).unwrap();

        engine.allocations().ship(&actor, a.id_typed()).unwrap();

        let store = &engine.context().stores.allocations;
        let err = ServiceError::from(
            store
                .compare_and_swap(
                    actor.tenant_id,
                    stale.clone(),
                    ExpectedVersion::Exact(stale.version()),
                    None,
                )
                .unwrap_err(),
        );
        assert!(matches!(
            err.domain(),
            Some(DomainError::ConcurrentModification(_))
        ));
        assert!(err.is_retryable());

        // The shipped state survives the rejected write.
        let current = engine.allocations().get(actor.tenant_id, a.id_typed()).unwrap();
        assert_eq!(current.status(), AllocationStatus::Shipped);
        assert_eq!(current.version(), stale.version() + 1);

        // Non-conflict failures are not retryable.
        let err = engine.allocations().ship(&actor, a.id_typed()).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn concurrent_transitions_conflict_or_see_the_new_state() {
        for _ in 0..20 {
            let engine = Engine::in_memory(EngineConfig::default());
            let actor = actor(TenantId::new());
            let (po, lines, _) = order_with_lines(&engine, &actor, &[10]);
            let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 10).unwrap();
            let id = a.id_typed();

            let results: Vec<_> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..4)
                    .map(|_| {
                        let engine = engine.clone();
                        let actor = actor.clone();
                        s.spawn(move || engine.allocations().ship(&actor, id))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });

            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
            for err in results.iter().filter_map(|r| r.as_ref().err()) {
                let conflict = matches!(
                    err.domain(),
                    Some(DomainError::ConcurrentModification(_))
                );
                let late = matches!(err.domain(), Some(DomainError::InvalidTransition { .. }));
                assert!(conflict || late, "unexpected error {err:?}");
                assert_eq!(err.is_retryable(), conflict);
            }
            let current = engine.allocations().get(actor.tenant_id, id).unwrap();
            assert_eq!(current.version(), 2);
        }
    }

    // ---------------------------------------------------------------------
    // Transfers and the emergency coordinator
    // ---------------------------------------------------------------------

    #[test]
    fn short_receipt_past_tolerance_needs_a_reason() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let transfers = engine.transfers();
        let t = transfers
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 20, TransferPriority::Normal),
            )
            .unwrap();
        transfers.approve(&actor, t.id_typed(), None).unwrap();
        transfers.ship(&actor, t.id_typed()).unwrap();

        let err = domain(
            transfers
                .receive(
                    &actor,
                    t.id_typed(),
                    ReceivingData {
                        quantity_received: 18,
                        variance_reason: None,
                        notes: None,
                    },
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation(_)));

        let received = transfers
            .receive(
                &actor,
                t.id_typed(),
                ReceivingData {
                    quantity_received: 18,
                    variance_reason: Some("two cartons crushed".to_string()),
                    notes: None,
                },
            )
            .unwrap();
        let variance = received.variance().unwrap();
        assert_eq!(variance.variance, -2);
        assert_eq!(variance.classification, VarianceClassification::Shortage);
        assert!(variance.exceeds_tolerance);
    }

    #[test]
    fn transfer_cannot_be_cancelled_once_shipped() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let transfers = engine.transfers();
        let t = transfers
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 5, TransferPriority::High),
            )
            .unwrap();
        transfers.approve(&actor, t.id_typed(), None).unwrap();
        transfers.ship(&actor, t.id_typed()).unwrap();

        let err = domain(transfers.cancel(&actor, t.id_typed(), None).unwrap_err());
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn frequency_gate_closes_after_the_daily_maximum() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (source, destination) = (LocationId::new(), LocationId::new());
        let product = ProductId::new();

        for _ in 0..5 {
            engine
                .emergency()
                .create(
                    &actor,
                    new_transfer(product, source, destination, 3, TransferPriority::Emergency),
                )
                .unwrap();
        }

        let eligibility = engine
            .emergency()
            .can_create(actor.tenant_id, source, destination, Utc::now())
            .unwrap();
        assert!(!eligibility.can_create);
        assert_eq!(eligibility.reason, Some(EligibilityReason::FrequencyLimit));
        assert_eq!(eligibility.window, Some(FrequencyWindow::Daily));
        assert_eq!(eligibility.current_count, 5);
        assert!(eligibility.cooldown_minutes.is_some());

        let err = domain(
            engine
                .transfers()
                .create(
                    &actor,
                    new_transfer(product, source, destination, 3, TransferPriority::Emergency),
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::PolicyViolation { .. }));

        // Another pair is unaffected.
        assert!(
            engine
                .emergency()
                .can_create(actor.tenant_id, source, LocationId::new(), Utc::now())
                .unwrap()
                .can_create
        );
    }

    #[test]
    fn small_emergencies_are_auto_approved() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let audit = engine.subscribe_audit();
        let mut config = EmergencyConfig::default();
        config.auto_approval.enabled = true;
        engine.emergency().set_config(&actor, config).unwrap();

        let small = engine
            .emergency()
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 10, TransferPriority::Emergency),
            )
            .unwrap();
        assert!(small.auto_approved);
        assert_eq!(small.transfer.status(), TransferStatus::Approved);
        assert_eq!(small.transfer.approval_origin(), Some(ApprovalOrigin::Automatic));

        let large = engine
            .emergency()
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 500, TransferPriority::Emergency),
            )
            .unwrap();
        assert!(!large.auto_approved);
        assert!(!large.auto_approval.blocked_by.is_empty());
        assert_eq!(large.transfer.status(), TransferStatus::Requested);

        let types: Vec<String> = audit
            .drain()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert!(types.iter().any(|t| t == "transfer.auto_approved"));
        assert!(!types.iter().any(|t| t == "transfer.approved"));
    }

    #[test]
    fn idle_emergencies_escalate_once_per_interval() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let engine = Engine::builder(EngineConfig::default())
            .with_notifier(notifier.clone())
            .build();
        let actor = actor(TenantId::new());
        let mut config = EmergencyConfig::default();
        config.escalation.recipients_by_level = vec![vec!["duty-manager@example.com".to_string()]];
        engine.emergency().set_config(&actor, config).unwrap();

        let t = engine
            .emergency()
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 4, TransferPriority::Emergency),
            )
            .unwrap()
            .transfer;

        let early = engine
            .emergency()
            .process_escalations(actor.tenant_id, Utc::now() + Duration::minutes(10))
            .unwrap();
        assert!(early.escalated.is_empty());

        let later = Utc::now() + Duration::minutes(61);
        let report = engine
            .emergency()
            .process_escalations(actor.tenant_id, later)
            .unwrap();
        assert_eq!(report.escalated, vec![(t.id_typed(), 1)]);
        assert_eq!(report.notified, 1);

        let again = engine
            .emergency()
            .process_escalations(actor.tenant_id, later)
            .unwrap();
        assert!(again.escalated.is_empty());

        // Re-escalating to a level already reached changes nothing.
        let same = engine
            .emergency()
            .escalate(&actor, t.id_typed(), Some(1))
            .unwrap();
        assert_eq!(same.escalation_level(), 1);

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Escalation);
        assert_eq!(sent[0].recipients, vec!["duty-manager@example.com".to_string()]);

        let status = engine
            .emergency()
            .queue_status(actor.tenant_id, later)
            .unwrap();
        assert_eq!(status.total_open, 1);
        assert_eq!(status.processing_order, vec![t.id_typed()]);
    }

    #[test]
    fn emergencies_are_worked_first_for_a_destination() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let destination = LocationId::new();
        let product = ProductId::new();

        engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), destination, 5, TransferPriority::Normal))
            .unwrap();
        engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), destination, 5, TransferPriority::High))
            .unwrap();
        let urgent = engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), destination, 5, TransferPriority::Emergency))
            .unwrap();

        let next = engine
            .transfers()
            .next_for_destination(actor.tenant_id, destination)
            .unwrap()
            .unwrap();
        assert_eq!(next.id_typed(), urgent.id_typed());
    }

    // ---------------------------------------------------------------------
    // Bulk and templates
    // ---------------------------------------------------------------------

    #[test]
    fn percentage_split_floors_and_reports_the_remainder() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[33]);
        let (a, b) = (LocationId::new(), LocationId::new());

        let result = engine
            .bulk()
            .bulk_allocate(
                &actor,
                BulkAllocationRequest {
                    purchase_order_id: po,
                    line_item_ids: vec![lines[0]],
                    strategy: BulkStrategy::Percentage {
                        splits: vec![
                            PercentageSplit { location_id: a, percent: 60 },
                            PercentageSplit { location_id: b, percent: 40 },
                        ],
                    },
                    validate_only: false,
                },
            )
            .unwrap();

        assert_eq!(result.success_count, 2);
        let quantity_at = |l: LocationId| {
            result
                .created
                .iter()
                .find(|x| x.target_location_id() == l)
                .map(|x| x.quantity_allocated())
        };
        assert_eq!(quantity_at(a), Some(19));
        assert_eq!(quantity_at(b), Some(13));
        assert_eq!(result.remainders[0].unallocated, 1);
    }

    #[test]
    fn equal_split_leaves_the_modulo_unallocated() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, _, _) = order_with_lines(&engine, &actor, &[100, 7]);
        let locations = vec![LocationId::new(), LocationId::new(), LocationId::new()];

        let result = engine
            .bulk()
            .bulk_allocate(
                &actor,
                BulkAllocationRequest {
                    purchase_order_id: po,
                    line_item_ids: Vec::new(),
                    strategy: BulkStrategy::Equal { locations },
                    validate_only: false,
                },
            )
            .unwrap();

        assert_eq!(result.success_count, 6);
        assert_eq!(result.total_allocated(), 99 + 6);
        let left: Vec<i64> = result.remainders.iter().map(|r| r.unallocated).collect();
        assert_eq!(left, vec![1, 1]);
    }

    #[test]
    fn bulk_items_fail_independently_and_validate_only_writes_nothing() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[50]);
        let items = vec![
            stockroute_allocation::BulkAllocationItem {
                line_item_id: lines[0],
                target_location_id: LocationId::new(),
                quantity: 30,
                notes: None,
            },
            stockroute_allocation::BulkAllocationItem {
                line_item_id: lines[0],
                target_location_id: LocationId::new(),
                quantity: 30,
                notes: None,
            },
            stockroute_allocation::BulkAllocationItem {
                line_item_id: lines[0],
                target_location_id: LocationId::new(),
                quantity: 20,
                notes: None,
            },
        ];
        let request = |validate_only| BulkAllocationRequest {
            purchase_order_id: po,
            line_item_ids: Vec::new(),
            strategy: BulkStrategy::Explicit { items: items.clone() },
            validate_only,
        };

        let dry = engine.bulk().bulk_allocate(&actor, request(true)).unwrap();
        assert_eq!((dry.success_count, dry.failure_count), (2, 1));
        assert!(engine.allocations().list(actor.tenant_id).unwrap().is_empty());

        let real = engine.bulk().bulk_allocate(&actor, request(false)).unwrap();
        assert_eq!((real.success_count, real.failure_count), (2, 1));
        assert_eq!(real.failed[0].item.quantity, 30);
        assert_eq!(engine.allocations().list(actor.tenant_id).unwrap().len(), 2);
    }

    #[test]
    fn templates_apply_fixed_shares_before_percentages() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, _, _) = order_with_lines(&engine, &actor, &[100]);
        let (flagship, outlet) = (LocationId::new(), LocationId::new());

        let template = engine
            .bulk()
            .create_template(
                &actor,
                NewTemplate {
                    name: "Spring launch".to_string(),
                    description: None,
                    rules: vec![
                        TemplateRule {
                            location_id: outlet,
                            share: TemplateShare::Percentage(50),
                        },
                        TemplateRule {
                            location_id: flagship,
                            share: TemplateShare::Fixed(10),
                        },
                    ],
                },
            )
            .unwrap();

        let duplicate = engine.bulk().create_template(
            &actor,
            NewTemplate {
                name: "spring LAUNCH".to_string(),
                description: None,
                rules: vec![TemplateRule {
                    location_id: outlet,
                    share: TemplateShare::Fixed(1),
                }],
            },
        );
        assert!(matches!(
            duplicate,
            Err(ServiceError::Domain(DomainError::InvariantViolation(_)))
        ));

        let result = engine
            .bulk()
            .apply_template(&actor, template.id_typed(), po, Vec::new(), false)
            .unwrap();
        assert_eq!(result.total_allocated(), 10 + 45);
        assert_eq!(result.remainders[0].unallocated, 45);

        engine.bulk().delete_template(&actor, template.id_typed()).unwrap();
        assert!(engine.bulk().list_templates(actor.tenant_id).unwrap().is_empty());
    }

    // ---------------------------------------------------------------------
    // Linker
    // ---------------------------------------------------------------------

    #[test]
    fn transfer_from_allocation_is_bounded_by_the_unlinked_remainder() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, product) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();
        let input = |quantity| TransferFromAllocation {
            source_location_id: LocationId::new(),
            quantity,
            priority: TransferPriority::Normal,
            reason_code: ReasonCode::Rebalance,
            notes: None,
            unit_cost: None,
        };

        let err = domain(
            engine
                .links()
                .create_transfer_from_allocation(&actor, a.id_typed(), input(Some(41)))
                .unwrap_err(),
        );
        assert_eq!(
            err,
            DomainError::OverAllocation {
                requested: 41,
                remaining: 40
            }
        );

        let first = engine
            .links()
            .create_transfer_from_allocation(&actor, a.id_typed(), input(Some(25)))
            .unwrap();
        assert_eq!(first.transfer.product_id(), product);
        assert_eq!(first.transfer.destination_location_id(), a.target_location_id());
        assert_eq!(first.link.quantity, 25);

        let rest = engine
            .links()
            .create_transfer_from_allocation(&actor, a.id_typed(), input(None))
            .unwrap();
        assert_eq!(rest.link.quantity, 15);

        // A cancelled transfer gives its quantity back.
        engine
            .transfers()
            .cancel(&actor, first.transfer.id_typed(), None)
            .unwrap();
        let chain = engine
            .links()
            .traceability_chain(actor.tenant_id, a.id_typed())
            .unwrap();
        assert_eq!(chain.links.len(), 2);
        assert_eq!(chain.quantity_linked, 15);
        assert_eq!(chain.quantity_unlinked, 25);
        assert_eq!(chain.locations[0], a.target_location_id());
    }

    #[test]
    fn linking_checks_product_and_duplicates() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, product) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();

        let other_product = engine
            .transfers()
            .create(&actor, new_transfer(ProductId::new(), LocationId::new(), a.target_location_id(), 10, TransferPriority::Normal))
            .unwrap();
        let err = domain(
            engine
                .links()
                .link(&actor, a.id_typed(), other_product.id_typed(), None)
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::Validation(_)));

        let t = engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), a.target_location_id(), 10, TransferPriority::Normal))
            .unwrap();
        let link = engine.links().link(&actor, a.id_typed(), t.id_typed(), None).unwrap();
        assert_eq!(link.quantity, 10);

        let again = domain(
            engine
                .links()
                .link(&actor, a.id_typed(), t.id_typed(), Some(1))
                .unwrap_err(),
        );
        assert!(matches!(again, DomainError::InvariantViolation(_)));
        assert_eq!(
            engine
                .links()
                .links_for_transfer(actor.tenant_id, t.id_typed())
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn sync_catches_the_allocation_up_and_is_idempotent() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();
        let linked = engine
            .links()
            .create_transfer_from_allocation(
                &actor,
                a.id_typed(),
                TransferFromAllocation {
                    source_location_id: LocationId::new(),
                    quantity: None,
                    priority: TransferPriority::Normal,
                    reason_code: ReasonCode::Rebalance,
                    notes: None,
                    unit_cost: None,
                },
            )
            .unwrap();
        let transfer_id = linked.transfer.id_typed();
        let transfers = engine.transfers();
        transfers.approve(&actor, transfer_id, None).unwrap();
        transfers.ship(&actor, transfer_id).unwrap();
        transfers
            .receive(
                &actor,
                transfer_id,
                ReceivingData {
                    quantity_received: 38,
                    variance_reason: Some("pallet short".to_string()),
                    notes: None,
                },
            )
            .unwrap();

        let first = engine.links().sync(&actor, a.id_typed()).unwrap();
        assert_eq!(first.before, AllocationStatus::Pending);
        assert_eq!(first.after, AllocationStatus::Received);
        assert_eq!(
            first.actions,
            vec![
                SyncAction::ShipAllocation,
                SyncAction::ReceiveAllocation {
                    quantity_received: 38
                }
            ]
        );

        let second = engine.links().sync(&actor, a.id_typed()).unwrap();
        assert!(!second.changed());
        assert_eq!(second.after, AllocationStatus::Received);

        let allocation = engine.allocations().get(actor.tenant_id, a.id_typed()).unwrap();
        assert_eq!(allocation.quantity_received(), 38);
    }

    #[test]
    fn sync_cancels_open_transfers_of_a_cancelled_allocation() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();
        let linked = engine
            .links()
            .create_transfer_from_allocation(
                &actor,
                a.id_typed(),
                TransferFromAllocation {
                    source_location_id: LocationId::new(),
                    quantity: Some(20),
                    priority: TransferPriority::High,
                    reason_code: ReasonCode::CustomerDemand,
                    notes: None,
                    unit_cost: None,
                },
            )
            .unwrap();
        engine.allocations().cancel(&actor, a.id_typed(), None).unwrap();

        let report = engine.links().sync_all(&actor).unwrap();
        assert_eq!(report.examined, 1);
        assert!(report.failed.is_empty());
        assert_eq!(
            report.changed[0].actions,
            vec![SyncAction::CancelTransfer {
                transfer_id: linked.transfer.id_typed()
            }]
        );
        let transfer = engine
            .transfers()
            .get(actor.tenant_id, linked.transfer.id_typed())
            .unwrap();
        assert_eq!(transfer.status(), TransferStatus::Cancelled);
        assert_eq!(transfer.cancellation_reason(), Some("allocation cancelled"));

        assert!(engine.links().sync_all(&actor).unwrap().changed.is_empty());
    }

    #[test]
    fn links_cannot_claim_more_than_the_transfer_carries() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, product) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();
        let t = engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), a.target_location_id(), 5, TransferPriority::Normal))
            .unwrap();

        let err = domain(
            engine
                .links()
                .link(&actor, a.id_typed(), t.id_typed(), Some(40))
                .unwrap_err(),
        );
        assert_eq!(
            err,
            DomainError::OverAllocation {
                requested: 40,
                remaining: 5
            }
        );
        assert!(engine
            .links()
            .links_for_transfer(actor.tenant_id, t.id_typed())
            .unwrap()
            .is_empty());

        let link = engine.links().link(&actor, a.id_typed(), t.id_typed(), None).unwrap();
        assert_eq!(link.quantity, 5);

        let transfers = engine.transfers();
        transfers.approve(&actor, t.id_typed(), None).unwrap();
        transfers.ship(&actor, t.id_typed()).unwrap();
        transfers
            .receive(
                &actor,
                t.id_typed(),
                ReceivingData {
                    quantity_received: 5,
                    variance_reason: None,
                    notes: None,
                },
            )
            .unwrap();

        // Five of forty units linked: the allocation ships but is not received.
        let outcome = engine.links().sync(&actor, a.id_typed()).unwrap();
        assert_eq!(outcome.actions, vec![SyncAction::ShipAllocation]);
        let chain = engine
            .links()
            .traceability_chain(actor.tenant_id, a.id_typed())
            .unwrap();
        assert_eq!(chain.quantity_linked, 5);
        assert_eq!(chain.quantity_unlinked, 35);
        assert_eq!(chain.quantity_received_via_transfers, 5);
        assert_eq!(chain.allocation.quantity_received(), 0);
    }

    #[test]
    fn one_transfer_can_serve_several_allocations() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, product) = order_with_lines(&engine, &actor, &[100]);
        let destination = LocationId::new();
        let a = allocate(&engine, &actor, po, lines[0], destination, 6).unwrap();
        let b = allocate(&engine, &actor, po, lines[0], destination, 4).unwrap();
        let c = allocate(&engine, &actor, po, lines[0], destination, 5).unwrap();
        let t = engine
            .transfers()
            .create(&actor, new_transfer(product, LocationId::new(), destination, 10, TransferPriority::Normal))
            .unwrap();
        let links = engine.links();

        assert_eq!(links.link(&actor, a.id_typed(), t.id_typed(), Some(6)).unwrap().quantity, 6);
        assert_eq!(links.link(&actor, b.id_typed(), t.id_typed(), None).unwrap().quantity, 4);
        let err = domain(links.link(&actor, c.id_typed(), t.id_typed(), Some(1)).unwrap_err());
        assert_eq!(
            err,
            DomainError::OverAllocation {
                requested: 1,
                remaining: 0
            }
        );
        assert_eq!(links.links_for_transfer(actor.tenant_id, t.id_typed()).unwrap().len(), 2);

        // Approving for less than the allocations already claim is refused.
        let transfers = engine.transfers();
        let err = domain(transfers.approve(&actor, t.id_typed(), Some(8)).unwrap_err());
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(
            transfers.get(actor.tenant_id, t.id_typed()).unwrap().status(),
            TransferStatus::Requested
        );

        transfers.approve(&actor, t.id_typed(), None).unwrap();
        transfers.ship(&actor, t.id_typed()).unwrap();
        transfers
            .receive(
                &actor,
                t.id_typed(),
                ReceivingData {
                    quantity_received: 5,
                    variance_reason: Some("half the pallet damaged".to_string()),
                    notes: None,
                },
            )
            .unwrap();

        // Receipts are shared pro rata and never exceed what arrived.
        let first = links.sync(&actor, a.id_typed()).unwrap();
        let second = links.sync(&actor, b.id_typed()).unwrap();
        assert_eq!(first.after, AllocationStatus::Received);
        assert_eq!(second.after, AllocationStatus::Received);
        let received_a = engine.allocations().get(actor.tenant_id, a.id_typed()).unwrap().quantity_received();
        let received_b = engine.allocations().get(actor.tenant_id, b.id_typed()).unwrap().quantity_received();
        assert_eq!((received_a, received_b), (3, 2));
        assert!(received_a + received_b <= 5);
    }

    #[test]
    fn linked_quantities_pin_both_sides() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let a = allocate(&engine, &actor, po, lines[0], LocationId::new(), 40).unwrap();
        let linked = engine
            .links()
            .create_transfer_from_allocation(
                &actor,
                a.id_typed(),
                TransferFromAllocation {
                    source_location_id: LocationId::new(),
                    quantity: None,
                    priority: TransferPriority::Normal,
                    reason_code: ReasonCode::Rebalance,
                    notes: None,
                    unit_cost: None,
                },
            )
            .unwrap();
        let transfer_id = linked.transfer.id_typed();
        let shrink = |quantity| AllocationChanges {
            quantity: Some(quantity),
            ..Default::default()
        };

        let err = domain(
            engine
                .allocations()
                .update(&actor, a.id_typed(), shrink(10))
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert_eq!(
            engine
                .allocations()
                .get(actor.tenant_id, a.id_typed())
                .unwrap()
                .quantity_allocated(),
            40
        );

        let err = domain(
            engine
                .transfers()
                .update(
                    &actor,
                    transfer_id,
                    TransferChanges {
                        quantity: Some(30),
                        ..Default::default()
                    },
                )
                .unwrap_err(),
        );
        assert!(matches!(err, DomainError::InvariantViolation(_)));

        // Growing stays allowed.
        let grown = engine.allocations().update(&actor, a.id_typed(), shrink(50)).unwrap();
        assert_eq!(grown.quantity_allocated(), 50);
        let chain = engine
            .links()
            .traceability_chain(actor.tenant_id, a.id_typed())
            .unwrap();
        assert_eq!(chain.quantity_unlinked, 10);

        // Cancelling the transfer releases its claim on the allocation.
        engine.transfers().cancel(&actor, transfer_id, None).unwrap();
        let shrunk = engine.allocations().update(&actor, a.id_typed(), shrink(10)).unwrap();
        assert_eq!(shrunk.quantity_allocated(), 10);
    }

    // ---------------------------------------------------------------------
    // Advisor
    // ---------------------------------------------------------------------

    #[test]
    fn accepted_suggestions_go_through_the_ledger() {
        let directory = Arc::new(InMemoryLocationDirectory::new());
        let engine = Engine::builder(EngineConfig::default())
            .with_directory(directory.clone())
            .build();
        let actor = actor(TenantId::new());
        let (po, lines, product) = order_with_lines(&engine, &actor, &[90]);
        let (busy, quiet) = (LocationId::new(), LocationId::new());
        for (location, units) in [(busy, 300), (quiet, 30)] {
            directory.upsert_location(
                actor.tenant_id,
                LocationProfile {
                    location_id: location,
                    name: format!("store-{units}"),
                    remaining_capacity: Some(200),
                    logistics_cost: 1.0,
                    active: true,
                },
            );
            directory.record_demand(
                actor.tenant_id,
                DemandRecord {
                    location_id: location,
                    product_id: product,
                    units,
                },
            );
        }

        let suggestions = engine.advisor().suggest(actor.tenant_id, po, None).unwrap();
        assert!(!suggestions.suggestions.is_empty());
        assert!(suggestions.suggestions.iter().all(|s| s.line_item_id == lines[0]));

        let accepted = engine
            .advisor()
            .accept(&actor, po, &suggestions.suggestions)
            .unwrap();
        assert_eq!(accepted.result.success_count, accepted.feasibility.accepted.len());

        // The same suggestions are stale now.
        let stale = engine
            .advisor()
            .feasibility(actor.tenant_id, po, &suggestions.suggestions)
            .unwrap();
        assert!(!stale.feasible);

        let position = engine
            .allocations()
            .line_position(actor.tenant_id, po, lines[0])
            .unwrap();
        assert!(position.quantity_allocated <= 90);
    }

    #[test]
    fn duplicate_pending_allocations_are_flagged() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        let (po, lines, _) = order_with_lines(&engine, &actor, &[100]);
        let store = LocationId::new();
        allocate(&engine, &actor, po, lines[0], store, 10).unwrap();
        allocate(&engine, &actor, po, lines[0], store, 10).unwrap();

        let conflicts = engine.advisor().conflicts(actor.tenant_id, po).unwrap();
        assert!(!conflicts.is_empty());
    }

    // ---------------------------------------------------------------------
    // Analytics and alerts
    // ---------------------------------------------------------------------

    #[test]
    fn variance_alerts_are_raised_once_and_acknowledged_once() {
        let notifier = Arc::new(InMemoryNotifier::new());
        let mut config = EngineConfig::default();
        config.alerts.recipients = vec!["inventory@example.com".to_string()];
        let engine = Engine::builder(config).with_notifier(notifier.clone()).build();
        let actor = actor(TenantId::new());
        let transfers = engine.transfers();
        let t = transfers
            .create(
                &actor,
                new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 20, TransferPriority::Normal),
            )
            .unwrap();
        transfers.approve(&actor, t.id_typed(), None).unwrap();
        transfers.ship(&actor, t.id_typed()).unwrap();
        transfers
            .receive(
                &actor,
                t.id_typed(),
                ReceivingData {
                    quantity_received: 15,
                    variance_reason: Some("short shipped".to_string()),
                    notes: None,
                },
            )
            .unwrap();

        let summary = engine
            .analytics()
            .variance_summary(
                actor.tenant_id,
                &VarianceFilter {
                    source: Some(VarianceSource::Transfer),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(summary.record_count, 1);
        assert_eq!(summary.net_variance, -5);

        let now = Utc::now();
        let raised = engine.analytics().evaluate_alerts(actor.tenant_id, now).unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(notifier.sent().len(), 1);
        assert!(engine.analytics().evaluate_alerts(actor.tenant_id, now).unwrap().is_empty());

        let alert_id = raised[0].id_typed();
        let acked = engine
            .analytics()
            .acknowledge(&actor, alert_id, Some("carrier claim filed".to_string()))
            .unwrap();
        assert_eq!(acked.acknowledged_by(), Some(actor.user_id));
        let twice = domain(engine.analytics().acknowledge(&actor, alert_id, None).unwrap_err());
        assert!(matches!(twice, DomainError::InvariantViolation(_)));

        assert!(engine.analytics().list_alerts(actor.tenant_id, false).unwrap().is_empty());
        assert_eq!(engine.analytics().list_alerts(actor.tenant_id, true).unwrap().len(), 1);
        assert!(engine.analytics().evaluate_alerts(actor.tenant_id, now).unwrap().is_empty());
    }

    #[test]
    fn emergency_frequency_counts_per_day() {
        let engine = Engine::in_memory(EngineConfig::default());
        let actor = actor(TenantId::new());
        for _ in 0..3 {
            engine
                .emergency()
                .create(
                    &actor,
                    new_transfer(ProductId::new(), LocationId::new(), LocationId::new(), 2, TransferPriority::Emergency),
                )
                .unwrap();
        }

        let now = Utc::now();
        let frequency = engine
            .analytics()
            .emergency_frequency(actor.tenant_id, FrequencyBucket::Daily, now - Duration::days(6), now)
            .unwrap();
        assert_eq!(frequency.total, 3);
        assert_eq!(frequency.points.len(), 7);
        assert_eq!(frequency.latest().map(|p| p.count), Some(3));
    }
}
