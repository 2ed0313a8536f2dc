//! Stock ledger engine: storage, consistency services and read models.
//!
//! ```text
//! StockEngine ─┬─ AdjustmentService ── StockStore (ledger + aggregate, CAS)
//!              ├─ TransferCoordinator ─ AdjustmentService (+ key locks, compensation)
//!              └─ low-stock evaluator ─ Catalog + AggregateStore snapshot
//!
//! PublishingStockStore ── EventBus ── ProjectionWorker ── StockLevelProjection
//! ```

pub mod adjustment;
pub mod catalog;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod projections;
pub mod read_model;
pub mod reconcile;
pub mod store;
pub mod transfer;
pub mod workers;


pub use adjustment::{AdjustmentService, AppliedMovement, MovementRequest};
pub use catalog::{Catalog, InMemoryCatalog};
pub use config::EngineConfig;
pub use deadline::Deadline;
pub use engine::StockEngine;
pub use error::StockError;
pub use reconcile::{Discrepancy, ReconciliationReport};
pub use store::{
    AggregateStore, InMemoryStockStore, MovementEnvelope, MovementLedger, PostgresStockStore,
    PublishingStockStore, StockStore, StoreError,
};
pub use transfer::{TransferCoordinator, TransferOutcome, TransferRequest};
