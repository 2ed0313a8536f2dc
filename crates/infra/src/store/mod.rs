//! Movement ledger + aggregate store boundary.
//!
//! The ledger is the durable source of truth; the aggregate record is a cache of its
//! running sum per key, written only through compare-and-set.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use r#trait::{AggregateStore, MovementLedger, StockStore, StoreError};

use stockledger_core::{StockKey, TenantId, TransferId};
use stockledger_events::{EventBus, EventEnvelope};
use stockledger_inventory::{InventoryRecord, LedgerEvent, NewMovement, StockMovement};

/// What the bus carries: one committed movement, addressed to its stock key stream.
pub type MovementEnvelope = EventEnvelope<LedgerEvent>;

pub fn movement_envelope(movement: &StockMovement) -> MovementEnvelope {
    EventEnvelope::new(
        *movement.id.as_uuid(),
        movement.key,
        LedgerEvent::STREAM_TYPE,
        movement.sequence,
        LedgerEvent::MovementRecorded(movement.clone()),
    )
}

/// Adapter that publishes committed movements to an `EventBus`.
///
/// Ordering invariant: **publish happens only after the commit succeeds**. A failed
/// publish is logged; the movement stays committed and the call still succeeds.
///
/// Concurrent commits on one key publish from different threads after their commits
/// return, so a key's envelopes can reach the bus out of sequence order. Consumers
/// order by `sequence_number` (see `StockLevelProjection`).
pub struct PublishingStockStore<S, B> {
    store: S,
    bus: B,
}

impl<S, B> PublishingStockStore<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn into_parts(self) -> (S, B) {
        (self.store, self.bus)
    }
}

impl<S, B> PublishingStockStore<S, B>
where
    B: EventBus<MovementEnvelope>,
{
    fn publish(&self, movement: &StockMovement) {
        if let Err(err) = self.bus.publish(movement_envelope(movement)) {
            tracing::warn!(
                movement_id = %movement.id,
                key = %movement.key,
                error = ?err,
                "failed to publish committed movement"
            );
        }
    }
}

impl<S, B> MovementLedger for PublishingStockStore<S, B>
where
    S: MovementLedger,
    B: EventBus<MovementEnvelope>,
{
    fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        let recorded = self.store.append(movement)?;
        self.publish(&recorded);
        Ok(recorded)
    }

    fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        self.store.movements(key)
    }

    fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        self.store.tenant_movements(tenant_id)
    }

    fn transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StoreError> {
        self.store.transfer_movements(tenant_id, transfer_id)
    }
}

impl<S, B> AggregateStore for PublishingStockStore<S, B>
where
    S: AggregateStore,
    B: EventBus<MovementEnvelope>,
{
    fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
        self.store.read(key)
    }

    fn compare_and_set(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError> {
        self.store.compare_and_set(key, expected_version, new_quantity)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
        self.store.list(tenant_id)
    }
}

impl<S, B> StockStore for PublishingStockStore<S, B>
where
    S: StockStore,
    B: EventBus<MovementEnvelope>,
{
    fn commit_movement(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        let (record, recorded) = self.store.commit_movement(expected, movement)?;
        self.publish(&recorded);
        Ok((record, recorded))
    }
}
