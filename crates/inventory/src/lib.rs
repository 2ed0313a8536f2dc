//! Inventory domain module.
//!
//! Business rules for stock movements, on-hand records and low-stock evaluation,
//! implemented purely as deterministic domain logic (no IO, no storage, no clocks
//! other than the timestamps callers hand in).

pub mod catalog;
pub mod low_stock;
pub mod movement;
pub mod record;

pub use catalog::{Branch, Product};
pub use low_stock::{
    LowStockEntry, StockStatus, ValuedProduct, classify, low_stock_report, product_totals,
    top_by_value,
};
pub use movement::{
    Direction, LedgerEvent, MovementReference, MovementType, NewMovement, ReferenceType,
    StockMovement,
};
pub use record::InventoryRecord;
