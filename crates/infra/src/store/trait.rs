use std::sync::Arc;

use thiserror::Error;

use stockledger_core::{AggregateRoot, StockKey, TenantId, TransferId};
use stockledger_inventory::{InventoryRecord, NewMovement, StockMovement};

/// Storage-level failure.
///
/// These are **infrastructure errors** (contention, isolation, backend) as opposed to
/// the business rules enforced by the adjustment service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("version conflict on {key}: expected {expected}, found {actual}")]
    Concurrency {
        key: StockKey,
        expected: u64,
        actual: u64,
    },

    #[error("refusing to store negative quantity {quantity} for {key}")]
    NegativeQuantity { key: StockKey, quantity: i64 },

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("aggregate rollback failed, ledger and aggregate diverged: {0}")]
    Inconsistent(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Append-only, tenant-scoped movement ledger.
///
/// The ledger is the source of truth: every on-hand quantity must equal the sum of
/// its key's deltas. Entries are never updated or deleted.
pub trait MovementLedger: Send + Sync {
    /// Append one movement, assigning its id and per-key sequence.
    ///
    /// Implementations must run [`NewMovement::validate`] and reject with
    /// `InvalidAppend`; they never look at stock levels.
    fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError>;

    /// Movements for one key, in append order.
    fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError>;

    /// Every movement of a tenant, in global append order.
    fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError>;

    /// Both legs (and any compensation) of a transfer.
    fn transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self
            .tenant_movements(tenant_id)?
            .into_iter()
            .filter(|m| m.transfer_id == Some(transfer_id))
            .collect())
    }
}

/// Current on-hand quantity per key, mutated only through compare-and-set.
pub trait AggregateStore: Send + Sync {
    /// Missing keys read as quantity 0, version 0.
    fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError>;

    /// Set `new_quantity` iff the stored version equals `expected_version`, bumping
    /// the version by one. Negative quantities are refused.
    fn compare_and_set(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError>;

    /// Every record of a tenant.
    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError>;
}

/// Ledger + aggregate with an explicit transaction boundary.
pub trait StockStore: MovementLedger + AggregateStore {
    /// Apply `movement` on top of the `expected` snapshot: compare-and-set the
    /// aggregate to `expected.quantity() + delta` and append the movement, as one unit.
    ///
    /// The default runs the two steps separately and rolls the aggregate back with a
    /// second compare-and-set if the append fails. Backends with real transactions
    /// should override it.
    fn commit_movement(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        let key = check_commit(expected, &movement)?;
        let previous = expected.quantity();
        let updated = self.compare_and_set(key, expected.version(), previous + movement.delta)?;

        match self.append(movement) {
            Ok(recorded) => Ok((updated, recorded)),
            Err(append_err) => {
                if let Err(rollback_err) = self.compare_and_set(key, updated.version(), previous) {
                    tracing::error!(
                        %key,
                        error = %rollback_err,
                        "aggregate rollback failed after ledger append error"
                    );
                    return Err(StoreError::Inconsistent(format!(
                        "{key}: append failed ({append_err}), rollback failed ({rollback_err})"
                    )));
                }
                tracing::warn!(%key, error = %append_err, "ledger append failed; aggregate rolled back");
                Err(append_err)
            }
        }
    }
}

/// Shared pre-commit checks; returns the key being written.
pub(crate) fn check_commit(
    expected: &InventoryRecord,
    movement: &NewMovement,
) -> Result<StockKey, StoreError> {
    movement
        .validate()
        .map_err(|e| StoreError::InvalidAppend(e.to_string()))?;

    let key = expected.key();
    if movement.key.tenant_id != key.tenant_id {
        return Err(StoreError::TenantIsolation(format!(
            "movement for tenant {} committed against {}",
            movement.key.tenant_id, key.tenant_id
        )));
    }
    if movement.key != key {
        return Err(StoreError::InvalidAppend(format!(
            "movement key {} does not match record key {key}",
            movement.key
        )));
    }

    // Negative results are refused by the compare-and-set, after the version check: a
    // stale snapshot is a conflict whatever quantity it would produce.
    expected
        .quantity()
        .checked_add(movement.delta)
        .ok_or_else(|| StoreError::InvalidAppend("quantity overflow".to_string()))?;
    Ok(key)
}

impl<S> MovementLedger for Arc<S>
where
    S: MovementLedger + ?Sized,
{
    fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        (**self).append(movement)
    }

    fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        (**self).movements(key)
    }

    fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        (**self).tenant_movements(tenant_id)
    }

    fn transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        (**self).transfer_movements(tenant_id, transfer_id)
    }
}

impl<S> AggregateStore for Arc<S>
where
    S: AggregateStore + ?Sized,
{
    fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
        (**self).read(key)
    }

    fn compare_and_set(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError> {
        (**self).compare_and_set(key, expected_version, new_quantity)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
        (**self).list(tenant_id)
    }
}

impl<S> StockStore for Arc<S>
where
    S: StockStore + ?Sized,
{
    fn commit_movement(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        (**self).commit_movement(expected, movement)
    }
}
