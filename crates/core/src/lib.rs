//! `stockledger-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod context;
pub mod entity;
pub mod error;
pub mod id;
pub mod key;

pub use aggregate::AggregateRoot;
pub use context::TenantContext;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{BranchId, MovementId, ProductId, TenantId, TransferId, UserId};
pub use key::StockKey;
