//! Engine-facing error taxonomy.
//!
//! | variant | retryable | typical cause |
//! |---|---|---|
//! | `Validation` | no | zero/negative magnitude, same-branch transfer, malformed movement |
//! | `NotFound` | no | product or branch not in the tenant's catalog |
//! | `InsufficientStock` | no | outbound movement would go below zero |
//! | `ConcurrencyConflict` | yes | compare-and-set kept losing to other writers |
//! | `DeadlineExceeded` | yes | caller deadline passed before commit |
//! | `Internal` | no | storage failure, lock poisoning |

use thiserror::Error;

use stockledger_core::{DomainError, StockKey};

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("insufficient stock: available {available}, requested {requested}")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("concurrency conflict on {key} after {attempts} attempt(s)")]
    ConcurrencyConflict { key: StockKey, attempts: u32 },

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

impl StockError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Transient failures the caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StockError::ConcurrencyConflict { .. } | StockError::DeadlineExceeded
        )
    }
}

impl From<DomainError> for StockError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => StockError::Validation(msg),
            DomainError::InvalidId(msg) => StockError::Validation(msg),
            DomainError::NotFound(what) => StockError::NotFound(what),
            DomainError::InsufficientStock {
                available,
                requested,
            } => StockError::InsufficientStock {
                available,
                requested,
            },
            DomainError::InvariantViolation(msg) => StockError::Internal(msg),
        }
    }
}

impl From<StoreError> for StockError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency { key, .. } => StockError::ConcurrencyConflict { key, attempts: 1 },
            StoreError::InvalidAppend(msg) => StockError::Validation(msg),
            other => {
                tracing::error!(error = %other, "stock store failure");
                StockError::Internal(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{BranchId, ProductId, TenantId};

    #[test]
    fn only_transient_errors_are_retryable() {
        let key = StockKey::new(TenantId::new(), ProductId::new(), BranchId::new());
        assert!(StockError::ConcurrencyConflict { key, attempts: 5 }.is_retryable());
        assert!(StockError::DeadlineExceeded.is_retryable());
        assert!(!StockError::InsufficientStock { available: 1, requested: 2 }.is_retryable());
        assert!(!StockError::validation("x").is_retryable());
        assert!(!StockError::not_found("product").is_retryable());
        assert!(!StockError::internal("disk").is_retryable());
    }

    #[test]
    fn domain_errors_map_to_taxonomy() {
        assert_eq!(
            StockError::from(DomainError::insufficient_stock(70, 100)),
            StockError::InsufficientStock { available: 70, requested: 100 }
        );
        assert!(matches!(
            StockError::from(DomainError::invariant("broken")),
            StockError::Internal(_)
        ));
    }

    #[test]
    fn store_errors_map_to_taxonomy() {
        let key = StockKey::new(TenantId::new(), ProductId::new(), BranchId::new());
        assert_eq!(
            StockError::from(StoreError::Concurrency { key, expected: 1, actual: 2 }),
            StockError::ConcurrencyConflict { key, attempts: 1 }
        );
        assert!(matches!(
            StockError::from(StoreError::InvalidAppend("zero".into())),
            StockError::Validation(_)
        ));
        assert!(matches!(
            StockError::from(StoreError::Poisoned),
            StockError::Internal(_)
        ));
    }
}
