//! Concurrent sales/transfer workload against an in-memory engine.
//!
//! Each worker thread walks a fixed, per-worker order sequence, so two runs with the
//! same configuration issue the same requests (only the interleaving differs).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use anyhow::{Context, anyhow};
use serde::Serialize;

use stockledger_core::{BranchId, ProductId, StockKey, TenantContext, TenantId, UserId};
use stockledger_events::InMemoryEventBus;
use stockledger_infra::projections::{StockLevel, StockLevelProjection};
use stockledger_infra::read_model::InMemoryTenantStore;
use stockledger_infra::workers::ProjectionWorker;
use stockledger_infra::{
    AggregateStore, EngineConfig, InMemoryCatalog, InMemoryStockStore, MovementEnvelope,
    MovementRequest, PublishingStockStore, ReconciliationReport, StockEngine, StockError,
    TransferRequest,
};
use stockledger_inventory::{Branch, LowStockEntry, MovementType, Product, ValuedProduct};

type Bus = Arc<InMemoryEventBus<MovementEnvelope>>;
type Store = Arc<PublishingStockStore<InMemoryStockStore, Bus>>;
type Engine = StockEngine<Store, Arc<InMemoryCatalog>>;

/// Retries of a retryable failure before an order is counted as abandoned.
const CALLER_RETRIES: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    pub workers: usize,
    pub orders_per_worker: usize,
    pub products: usize,
    pub branches: usize,
    pub opening_stock: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            orders_per_worker: 200,
            products: 20,
            branches: 4,
            opening_stock: 50,
        }
    }
}

impl SimulationConfig {
    /// Defaults with `STOCKLEDGER_SIM_WORKERS` / `STOCKLEDGER_SIM_ORDERS` applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |name: &str| -> Option<usize> {
            let raw = lookup(name)?;
            match raw.trim().parse::<usize>() {
                Ok(v) if v > 0 => Some(v),
                _ => {
                    tracing::warn!(var = name, value = %raw, "ignoring invalid simulation setting");
                    None
                }
            }
        };
        if let Some(v) = read("STOCKLEDGER_SIM_WORKERS") {
            config.workers = v;
        }
        if let Some(v) = read("STOCKLEDGER_SIM_ORDERS") {
            config.orders_per_worker = v;
        }
        config
    }
}

#[derive(Debug, Default)]
struct Counters {
    sales: AtomicU64,
    purchases: AtomicU64,
    transfers: AtomicU64,
    refused: AtomicU64,
    abandoned: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub sales: u64,
    pub purchases: u64,
    pub transfers: u64,
    /// Orders refused for insufficient stock.
    pub refused: u64,
    /// Orders given up after repeated conflicts or deadlines.
    pub abandoned: u64,
    pub total_on_hand: i64,
    pub low_stock: Vec<LowStockEntry>,
    pub top_by_value: Vec<ValuedProduct>,
    pub reconciliation: ReconciliationReport,
    /// Whether the event-fed projection agrees with the aggregate store.
    pub projection_consistent: bool,
}

enum Order {
    Movement(MovementRequest),
    Transfer(TransferRequest),
}

struct World {
    engine: Engine,
    ctx: TenantContext,
    products: Vec<ProductId>,
    branches: Vec<BranchId>,
}

impl World {
    fn seed(config: &SimulationConfig, engine: Engine) -> anyhow::Result<Self> {
        if config.products == 0 || config.branches < 2 {
            return Err(anyhow!("simulation needs at least one product and two branches"));
        }
        let ctx = TenantContext::new(TenantId::new(), UserId::new());
        let catalog = engine.catalog();

        let mut products = Vec::with_capacity(config.products);
        for i in 0..config.products {
            let id = ProductId::new();
            let product = Product::new(id, ctx.tenant_id, format!("SIM-{i:04}"), format!("Item {i}"), "pcs")?
                .with_unit_price(100 + (i as u64 * 37) % 900)
                .with_reorder_threshold(config.opening_stock / 5)?;
            catalog.upsert_product(product);
            products.push(id);
        }

        let mut branches = Vec::with_capacity(config.branches);
        for i in 0..config.branches {
            let id = BranchId::new();
            catalog.upsert_branch(Branch::new(id, ctx.tenant_id, format!("Branch {i}"))?);
            branches.push(id);
        }

        for p in &products {
            for b in &branches {
                engine.apply_movement(
                    &ctx,
                    &MovementRequest::new(*p, *b, MovementType::Initial, config.opening_stock),
                )?;
            }
        }

        Ok(Self {
            engine,
            ctx,
            products,
            branches,
        })
    }

    /// The `n`th order of `worker`: mostly sales, some restocking, every fifth a transfer.
    fn order(&self, worker: usize, n: usize) -> Order {
        let spread = worker.wrapping_mul(7_919).wrapping_add(n.wrapping_mul(31));
        let product = self.products[spread % self.products.len()];
        let from = (spread / self.products.len()) % self.branches.len();
        let branch = self.branches[from];

        if n % 5 == 4 {
            let to = self.branches[(from + 1) % self.branches.len()];
            Order::Transfer(TransferRequest::new(product, branch, to, (spread % 3) as i64 + 1))
        } else if n % 7 == 0 {
            Order::Movement(MovementRequest::new(product, branch, MovementType::Purchase, 10))
        } else {
            Order::Movement(MovementRequest::new(product, branch, MovementType::Sale, (spread % 4) as i64 + 1))
        }
    }

    fn place(&self, order: &Order, counters: &Counters) -> anyhow::Result<()> {
        for _ in 0..CALLER_RETRIES {
            let result = match order {
                Order::Movement(request) => self.engine.apply_movement(&self.ctx, request).map(|_| {
                    match request.movement_type {
                        MovementType::Sale => &counters.sales,
                        _ => &counters.purchases,
                    }
                }),
                Order::Transfer(request) => self
                    .engine
                    .transfer(&self.ctx, request)
                    .map(|_| &counters.transfers),
            };
            match result {
                Ok(counter) => {
                    counter.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(StockError::InsufficientStock { .. }) => {
                    counters.refused.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) if err.is_retryable() => thread::yield_now(),
                Err(err) => return Err(err.into()),
            }
        }
        counters.abandoned.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Run the workload to completion and collect the final report.
pub fn run(config: &SimulationConfig, engine_config: EngineConfig) -> anyhow::Result<SimulationReport> {
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let store: Store = Arc::new(PublishingStockStore::new(InMemoryStockStore::new(), bus.clone()));
    let engine = StockEngine::new(store, Arc::new(InMemoryCatalog::new()), engine_config);

    let projection = Arc::new(StockLevelProjection::new(
        InMemoryTenantStore::<StockKey, StockLevel>::new(),
    ));
    let sink = projection.clone();
    let worker = ProjectionWorker::spawn("stock-levels", &bus, None, move |env: MovementEnvelope| {
        sink.apply_envelope(&env)
    })
    .context("failed to start projection worker")?;

    let world = Arc::new(World::seed(config, engine)?);
    let counters = Arc::new(Counters::default());
    tracing::info!(
        tenant_id = %world.ctx.tenant_id,
        workers = config.workers,
        orders_per_worker = config.orders_per_worker,
        "simulation started"
    );

    let handles = (0..config.workers)
        .map(|w| {
            let world = world.clone();
            let counters = counters.clone();
            let orders = config.orders_per_worker;
            thread::Builder::new()
                .name(format!("sim-worker-{w}"))
                .spawn(move || -> anyhow::Result<()> {
                    for n in 0..orders {
                        world.place(&world.order(w, n), &counters)?;
                    }
                    Ok(())
                })
        })
        .collect::<std::io::Result<Vec<_>>>()
        .context("failed to spawn simulation worker")?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("simulation worker panicked"))??;
    }
    worker.shutdown();

    let tenant_id = world.ctx.tenant_id;
    let records = world.engine.store().list(tenant_id)?;
    let projection_consistent = records.iter().all(|r| {
        projection
            .get(r.key())
            .map_or(r.quantity() == 0, |level| level.quantity == r.quantity())
    });

    let report = SimulationReport {
        sales: counters.sales.load(Ordering::Relaxed),
        purchases: counters.purchases.load(Ordering::Relaxed),
        transfers: counters.transfers.load(Ordering::Relaxed),
        refused: counters.refused.load(Ordering::Relaxed),
        abandoned: counters.abandoned.load(Ordering::Relaxed),
        total_on_hand: records.iter().map(|r| r.quantity()).sum(),
        low_stock: world.engine.list_low_stock(tenant_id)?,
        top_by_value: world.engine.top_products_by_value(tenant_id, 5)?,
        reconciliation: world.engine.reconcile(tenant_id)?,
        projection_consistent,
    };
    tracing::info!(
        sales = report.sales,
        transfers = report.transfers,
        refused = report.refused,
        consistent = report.reconciliation.is_consistent(),
        "simulation finished"
    );
    Ok(report)
}
