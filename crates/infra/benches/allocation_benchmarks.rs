use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use stockroute_allocation::{BulkStrategy, LineCapacity, plan_bulk};
use stockroute_core::{ActorContext, LocationId, ProductId, TenantId, UserId};
use stockroute_infra::services::{BulkAllocationRequest, NewAllocation};
use stockroute_infra::{Engine, EngineConfig};
use stockroute_purchasing::{LineItemId, PurchaseOrder, PurchaseOrderId};

fn setup(ordered: &[i64]) -> (Engine, ActorContext, PurchaseOrderId, Vec<LineItemId>) {
    let engine = Engine::in_memory(EngineConfig::default());
    let actor = ActorContext::new(TenantId::new(), UserId::new(), "bench");
    let product = ProductId::new();
    let mut order = PurchaseOrder::new(actor.tenant_id, PurchaseOrderId::generate(), "PO-BENCH", Utc::now())
        .unwrap();
    let lines = ordered
        .iter()
        .map(|q| order.add_line(LineItemId::generate(), product, *q, 100).unwrap())
        .collect();
    let order = engine
        .allocations()
        .register_purchase_order(&actor, order)
        .unwrap();
    (engine, actor, order.id_typed(), lines)
}

/// Guarded create latency as the line's allocation history grows.
fn bench_constraint_checked_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("constraint_checked_create");

    for existing in [0usize, 100, 1_000].iter() {
        group.bench_with_input(
            BenchmarkId::new("existing_allocations", existing),
            existing,
            |b, &existing| {
                let (engine, actor, po, lines) = setup(&[100_000_000]);
                let service = engine.allocations();
                for _ in 0..existing {
                    service
                        .create(
                            &actor,
                            NewAllocation {
                                purchase_order_id: po,
                                line_item_id: lines[0],
                                target_location_id: LocationId::new(),
                                quantity: 1,
                                notes: None,
                            },
                        )
                        .unwrap();
                }

                b.iter(|| {
                    let allocation = service
                        .create(
                            &actor,
                            NewAllocation {
                                purchase_order_id: po,
                                line_item_id: lines[0],
                                target_location_id: LocationId::new(),
                                quantity: 1,
                                notes: None,
                            },
                        )
                        .unwrap();
                    black_box(allocation);
                });
            },
        );
    }

    group.finish();
}

/// Equal distribution of a multi-line order, planned and written.
fn bench_bulk_equal_distribution(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_equal_distribution");
    group.sample_size(50);

    for locations in [4usize, 16, 64].iter() {
        group.throughput(Throughput::Elements((*locations * 8) as u64));
        group.bench_with_input(
            BenchmarkId::new("locations", locations),
            locations,
            |b, &locations| {
                let targets: Vec<LocationId> = (0..locations).map(|_| LocationId::new()).collect();
                b.iter(|| {
                    let (engine, actor, po, _) = setup(&[1_000; 8]);
                    let result = engine
                        .bulk()
                        .bulk_allocate(
                            &actor,
                            BulkAllocationRequest {
                                purchase_order_id: po,
                                line_item_ids: Vec::new(),
                                strategy: BulkStrategy::Equal {
                                    locations: targets.clone(),
                                },
                                validate_only: false,
                            },
                        )
                        .unwrap();
                    black_box(result);
                });
            },
        );
    }

    group.finish();
}

/// Planning alone, no store writes.
fn bench_plan_only(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_bulk");
    let locations: Vec<LocationId> = (0..32).map(|_| LocationId::new()).collect();
    let lines: Vec<LineCapacity> = (0..100)
        .map(|i| LineCapacity {
            line_item_id: LineItemId::generate(),
            product_id: ProductId::new(),
            unallocated: 1_000 + i,
        })
        .collect();
    let strategy = BulkStrategy::Equal { locations };

    group.throughput(Throughput::Elements(lines.len() as u64));
    group.bench_function("equal_100_lines_32_locations", |b| {
        b.iter(|| black_box(plan_bulk(&strategy, &lines).unwrap()));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_constraint_checked_create,
    bench_bulk_equal_distribution,
    bench_plan_only
);
criterion_main!(benches);
