//! Read models built from the movement feed.
//!
//! Projections are disposable: they can always be rebuilt from the ledger. They are
//! tenant-isolated and idempotent under at-least-once delivery.

pub mod stock_levels;

pub use stock_levels::{StockLevel, StockLevelProjection, StockProjectionError};
