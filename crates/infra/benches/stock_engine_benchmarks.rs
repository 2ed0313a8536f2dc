use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;
use std::thread;

use stockledger_core::{BranchId, ProductId, StockKey, TenantContext, TenantId, UserId};
use stockledger_infra::projections::{StockLevel, StockLevelProjection};
use stockledger_infra::read_model::InMemoryTenantStore;
use stockledger_infra::{
    EngineConfig, InMemoryCatalog, InMemoryStockStore, MovementRequest, StockEngine, TransferRequest,
};
use stockledger_inventory::{Branch, MovementType, Product};

type Engine = StockEngine<Arc<InMemoryStockStore>, Arc<InMemoryCatalog>>;

struct Setup {
    engine: Engine,
    ctx: TenantContext,
    products: Vec<ProductId>,
    branches: Vec<BranchId>,
}

/// Engine over in-memory storage with `products` products at `branches` branches,
/// each key opened with `opening` units.
fn setup(products: usize, branches: usize, opening: i64) -> Setup {
    let store = Arc::new(InMemoryStockStore::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let ctx = TenantContext::new(TenantId::new(), UserId::new());

    let product_ids: Vec<ProductId> = (0..products)
        .map(|i| {
            let id = ProductId::new();
            let product = Product::new(id, ctx.tenant_id, format!("SKU-{i}"), "Bench item", "pcs")
                .unwrap()
                .with_unit_price((i as u64 % 50) + 1)
                .with_reorder_threshold(opening / 2)
                .unwrap();
            catalog.upsert_product(product);
            id
        })
        .collect();
    let branch_ids: Vec<BranchId> = (0..branches)
        .map(|i| {
            let id = BranchId::new();
            catalog.upsert_branch(Branch::new(id, ctx.tenant_id, format!("Branch {i}")).unwrap());
            id
        })
        .collect();

    let engine = StockEngine::new(store, catalog, EngineConfig::default());
    if opening > 0 {
        for p in &product_ids {
            for b in &branch_ids {
                engine
                    .apply_movement(&ctx, &MovementRequest::new(*p, *b, MovementType::Initial, opening))
                    .unwrap();
            }
        }
    }

    Setup {
        engine,
        ctx,
        products: product_ids,
        branches: branch_ids,
    }
}

fn bench_movement_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("movement_latency");
    group.sample_size(1000);

    group.bench_function("purchase_then_sale", |b| {
        let s = setup(1, 1, 0);
        let (p, br) = (s.products[0], s.branches[0]);
        let purchase = MovementRequest::new(p, br, MovementType::Purchase, 5);
        let sale = MovementRequest::new(p, br, MovementType::Sale, 5);
        b.iter(|| {
            s.engine.apply_movement(&s.ctx, black_box(&purchase)).unwrap();
            s.engine.apply_movement(&s.ctx, black_box(&sale)).unwrap();
        });
    });

    group.bench_function("refused_oversell", |b| {
        let s = setup(1, 1, 3);
        let oversell = MovementRequest::new(s.products[0], s.branches[0], MovementType::Sale, 4);
        b.iter(|| {
            let _ = black_box(s.engine.apply_movement(&s.ctx, &oversell));
        });
    });

    group.bench_function("transfer_round_trip", |b| {
        let s = setup(1, 2, 1_000);
        let p = s.products[0];
        let there = TransferRequest::new(p, s.branches[0], s.branches[1], 1);
        let back = TransferRequest::new(p, s.branches[1], s.branches[0], 1);
        b.iter(|| {
            s.engine.transfer(&s.ctx, black_box(&there)).unwrap();
            s.engine.transfer(&s.ctx, black_box(&back)).unwrap();
        });
    });

    group.finish();
}

fn bench_contended_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_key");
    let per_thread = 200u64;

    for threads in [1usize, 2, 4, 8].iter() {
        group.throughput(Throughput::Elements(per_thread * *threads as u64));
        group.bench_with_input(BenchmarkId::new("purchases", threads), threads, |b, &threads| {
            let s = setup(1, 1, 0);
            let engine = Arc::new(s.engine);
            let ctx = s.ctx;
            let request = MovementRequest::new(s.products[0], s.branches[0], MovementType::Purchase, 1);

            b.iter(|| {
                let handles: Vec<_> = (0..threads)
                    .map(|_| {
                        let engine = engine.clone();
                        let request = request.clone();
                        thread::spawn(move || {
                            for _ in 0..per_thread {
                                loop {
                                    match engine.apply_movement(&ctx, &request) {
                                        Ok(_) => break,
                                        Err(e) if e.is_retryable() => continue,
                                        Err(e) => panic!("{e}"),
                                    }
                                }
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_low_stock_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("low_stock_evaluation");

    for products in [10usize, 100, 1000].iter() {
        let s = setup(*products, 4, 10);
        group.bench_with_input(BenchmarkId::new("list_low_stock", products), products, |b, _| {
            b.iter(|| black_box(s.engine.list_low_stock(s.ctx.tenant_id).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("top_products_by_value", products), products, |b, _| {
            b.iter(|| black_box(s.engine.top_products_by_value(s.ctx.tenant_id, 10).unwrap()));
        });
    }

    group.finish();
}

fn bench_projection_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("projection_rebuild");

    for movements in [10usize, 100, 1000, 10000].iter() {
        group.bench_with_input(
            BenchmarkId::new("rebuild_from_ledger", movements),
            movements,
            |b, &count| {
                let s = setup(1, 1, 0);
                let (p, br) = (s.products[0], s.branches[0]);
                for i in 0..count {
                    let movement_type = if i % 3 == 2 { MovementType::Sale } else { MovementType::Purchase };
                    s.engine
                        .apply_movement(&s.ctx, &MovementRequest::new(p, br, movement_type, 1))
                        .unwrap();
                }

                let projection: StockLevelProjection<InMemoryTenantStore<StockKey, StockLevel>> =
                    StockLevelProjection::new(InMemoryTenantStore::new());
                b.iter(|| {
                    projection
                        .rebuild_from_ledger(s.engine.store(), black_box(s.ctx.tenant_id))
                        .unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_movement_latency,
    bench_contended_key,
    bench_low_stock_evaluation,
    bench_projection_rebuild
);
criterion_main!(benches);
