use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateRoot, DomainError, DomainResult, StockKey};

use crate::movement::{MovementType, StockMovement};

/// On-hand quantity for one stock key (the aggregate).
///
/// The record is a cache of the ledger: `quantity` equals the sum of every recorded
/// delta for `key`, and `version` counts successful writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    key: StockKey,
    quantity: i64,
    version: u64,
}

impl InventoryRecord {
    /// A key nothing has touched yet.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            quantity: 0,
            version: 0,
        }
    }

    /// Rebuild a record from storage.
    pub fn from_parts(key: StockKey, quantity: i64, version: u64) -> Self {
        Self {
            key,
            quantity,
            version,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    /// Quantity that would result from a movement of `magnitude` units.
    ///
    /// Rejects non-positive magnitudes and any outbound movement that would take the
    /// quantity below zero. Performs no mutation.
    pub fn plan(&self, movement_type: MovementType, magnitude: i64) -> DomainResult<i64> {
        if magnitude <= 0 {
            return Err(DomainError::validation(format!(
                "magnitude must be positive (got {magnitude})"
            )));
        }

        let candidate = self
            .quantity
            .checked_add(movement_type.signed_delta(magnitude))
            .ok_or_else(|| DomainError::validation("quantity overflow"))?;

        if movement_type.is_outbound() && candidate < 0 {
            return Err(DomainError::insufficient_stock(self.quantity, magnitude));
        }

        Ok(candidate)
    }

    /// Fold a recorded movement into the record (replay).
    pub fn apply(&mut self, movement: &StockMovement) -> DomainResult<()> {
        if movement.key != self.key {
            return Err(DomainError::invariant(format!(
                "movement {} belongs to {} not {}",
                movement.id, movement.key, self.key
            )));
        }
        self.quantity += movement.delta;
        self.version += 1;
        Ok(())
    }

    /// Rebuild a record purely from its ledger.
    pub fn replay<'a>(
        key: StockKey,
        movements: impl IntoIterator<Item = &'a StockMovement>,
    ) -> DomainResult<Self> {
        let mut record = Self::empty(key);
        for m in movements {
            record.apply(m)?;
        }
        Ok(record)
    }
}

impl AggregateRoot for InventoryRecord {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}
