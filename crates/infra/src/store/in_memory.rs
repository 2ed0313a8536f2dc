use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;

use stockledger_core::{AggregateRoot, MovementId, StockKey, TenantId};
use stockledger_inventory::{InventoryRecord, NewMovement, StockMovement};

use super::r#trait::{AggregateStore, MovementLedger, StockStore, StoreError, check_commit};

/// State of one stock key. Guarded by its own mutex so unrelated keys never contend.
#[derive(Debug)]
struct KeySlot {
    record: InventoryRecord,
    /// `(global position, movement)` in append order.
    stream: Vec<(u64, StockMovement)>,
}

impl KeySlot {
    fn new(key: StockKey) -> Self {
        Self {
            record: InventoryRecord::empty(key),
            stream: Vec::new(),
        }
    }

    fn cas(&mut self, expected_version: u64, new_quantity: i64) -> Result<InventoryRecord, StoreError> {
        let key = self.record.key();
        let actual = self.record.version();
        if actual != expected_version {
            return Err(StoreError::Concurrency {
                key,
                expected: expected_version,
                actual,
            });
        }
        if new_quantity < 0 {
            return Err(StoreError::NegativeQuantity {
                key,
                quantity: new_quantity,
            });
        }
        self.record = InventoryRecord::from_parts(key, new_quantity, actual + 1);
        Ok(self.record)
    }

    fn push(&mut self, position: u64, movement: NewMovement) -> StockMovement {
        let sequence = self.stream.len() as u64 + 1;
        let recorded = movement.into_recorded(MovementId::new(), sequence);
        self.stream.push((position, recorded.clone()));
        recorded
    }
}

/// In-memory ledger + aggregate store.
///
/// Intended for tests/dev and for embedding in a single process. Each key has its own
/// mutex; `commit_movement` holds it across the compare-and-set and the append, so the
/// pair is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    slots: RwLock<HashMap<StockKey, Arc<Mutex<KeySlot>>>>,
    position: AtomicU64,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn existing(&self, key: &StockKey) -> Result<Option<Arc<Mutex<KeySlot>>>, StoreError> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(slots.get(key).cloned())
    }

    /// Lazily create the slot the first time a key is written.
    fn slot(&self, key: StockKey) -> Result<Arc<Mutex<KeySlot>>, StoreError> {
        if let Some(slot) = self.existing(&key)? {
            return Ok(slot);
        }
        let mut slots = self.slots.write().map_err(|_| StoreError::Poisoned)?;
        Ok(slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(KeySlot::new(key))))
            .clone())
    }

    fn tenant_slots(&self, tenant_id: TenantId) -> Result<Vec<Arc<Mutex<KeySlot>>>, StoreError> {
        let slots = self.slots.read().map_err(|_| StoreError::Poisoned)?;
        Ok(slots
            .iter()
            .filter(|(k, _)| k.tenant_id == tenant_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    fn next_position(&self) -> u64 {
        self.position.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl MovementLedger for InMemoryStockStore {
    fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
        movement
            .validate()
            .map_err(|e| StoreError::InvalidAppend(e.to_string()))?;

        let slot = self.slot(movement.key)?;
        let mut slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
        let position = self.next_position();
        Ok(slot.push(position, movement))
    }

    fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
        let Some(slot) = self.existing(&key)? else {
            return Ok(vec![]);
        };
        let slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(slot.stream.iter().map(|(_, m)| m.clone()).collect())
    }

    fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
        let mut all = Vec::new();
        for slot in self.tenant_slots(tenant_id)? {
            let slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
            all.extend(slot.stream.iter().cloned());
        }
        all.sort_by_key(|(position, _)| *position);

        // Enforce tenant isolation even if keys were mis-filed.
        if let Some((_, foreign)) = all.iter().find(|(_, m)| m.key.tenant_id != tenant_id) {
            return Err(StoreError::TenantIsolation(format!(
                "movement {} of tenant {} found under tenant {tenant_id}",
                foreign.id, foreign.key.tenant_id
            )));
        }
        Ok(all.into_iter().map(|(_, m)| m).collect())
    }
}

impl AggregateStore for InMemoryStockStore {
    fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
        match self.existing(&key)? {
            Some(slot) => {
                let slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
                Ok(slot.record)
            }
            None => Ok(InventoryRecord::empty(key)),
        }
    }

    fn compare_and_set(
        &self,
        key: StockKey,
        expected_version: u64,
        new_quantity: i64,
    ) -> Result<InventoryRecord, StoreError> {
        let slot = self.slot(key)?;
        let mut slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
        slot.cas(expected_version, new_quantity)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
        let mut records = Vec::new();
        for slot in self.tenant_slots(tenant_id)? {
            let slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
            records.push(slot.record);
        }
        records.sort_by_key(|r| r.key());
        Ok(records)
    }
}

impl StockStore for InMemoryStockStore {
    fn commit_movement(
        &self,
        expected: &InventoryRecord,
        movement: NewMovement,
    ) -> Result<(InventoryRecord, StockMovement), StoreError> {
        let key = check_commit(expected, &movement)?;

        let slot = self.slot(key)?;
        let mut slot = slot.lock().map_err(|_| StoreError::Poisoned)?;
        let updated = slot.cas(expected.version(), expected.quantity() + movement.delta)?;
        let position = self.next_position();
        let recorded = slot.push(position, movement);

        tracing::trace!(
            %key,
            version = updated.version(),
            quantity = updated.quantity(),
            at = %Utc::now(),
            "movement committed"
        );
        Ok((updated, recorded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use stockledger_core::{BranchId, ProductId, TransferId, UserId};
    use stockledger_inventory::MovementType;

    fn test_key() -> StockKey {
        StockKey::new(TenantId::new(), ProductId::new(), BranchId::new())
    }

    fn movement(key: StockKey, movement_type: MovementType, magnitude: i64) -> NewMovement {
        NewMovement {
            key,
            movement_type,
            delta: movement_type.signed_delta(magnitude),
            transfer_id: None,
            reference: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn missing_key_reads_as_zero() {
        let store = InMemoryStockStore::new();
        let key = test_key();
        let record = store.read(key).unwrap();
        assert_eq!(record.quantity(), 0);
        assert_eq!(record.version(), 0);
        assert!(store.movements(key).unwrap().is_empty());
    }

    #[test]
    fn compare_and_set_requires_matching_version() {
        let store = InMemoryStockStore::new();
        let key = test_key();

        let r1 = store.compare_and_set(key, 0, 10).unwrap();
        assert_eq!((r1.quantity(), r1.version()), (10, 1));

        let err = store.compare_and_set(key, 0, 99).unwrap_err();
        assert_eq!(err, StoreError::Concurrency { key, expected: 0, actual: 1 });
        assert_eq!(store.read(key).unwrap().quantity(), 10);

        assert!(matches!(
            store.compare_and_set(key, 1, -1),
            Err(StoreError::NegativeQuantity { .. })
        ));
    }

    #[test]
    fn append_assigns_per_key_sequence() {
        let store = InMemoryStockStore::new();
        let a = test_key();
        let b = a.at_branch(BranchId::new());

        let m1 = store.append(movement(a, MovementType::Initial, 5)).unwrap();
        let m2 = store.append(movement(b, MovementType::Initial, 3)).unwrap();
        let m3 = store.append(movement(a, MovementType::Sale, 2)).unwrap();

        assert_eq!((m1.sequence, m2.sequence, m3.sequence), (1, 1, 2));
        let ids: Vec<_> = store.movements(a).unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1.id, m3.id]);

        let tenant: Vec<_> = store
            .tenant_movements(a.tenant_id)
            .unwrap()
            .iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(tenant, vec![m1.id, m2.id, m3.id]);
    }

    #[test]
    fn append_rejects_malformed_movements() {
        let store = InMemoryStockStore::new();
        let key = test_key();
        let mut zero = movement(key, MovementType::Purchase, 1);
        zero.delta = 0;
        assert!(matches!(store.append(zero), Err(StoreError::InvalidAppend(_))));

        let mut unpaired = movement(key, MovementType::Sale, 1);
        unpaired.movement_type = MovementType::TransferOut;
        assert!(matches!(store.append(unpaired), Err(StoreError::InvalidAppend(_))));
        assert!(store.movements(key).unwrap().is_empty());
    }

    #[test]
    fn commit_updates_record_and_ledger_together() {
        let store = InMemoryStockStore::new();
        let key = test_key();

        let (record, m) = store
            .commit_movement(&store.read(key).unwrap(), movement(key, MovementType::Initial, 100))
            .unwrap();
        assert_eq!((record.quantity(), record.version()), (100, 1));
        assert_eq!(m.sequence, 1);

        let stale = InventoryRecord::empty(key);
        let err = store
            .commit_movement(&stale, movement(key, MovementType::Sale, 1))
            .unwrap_err();
        assert!(matches!(err, StoreError::Concurrency { .. }));
        assert_eq!(store.movements(key).unwrap().len(), 1);
    }

    #[test]
    fn commit_refuses_negative_result_and_wrong_key() {
        let store = InMemoryStockStore::new();
        let key = test_key();
        let record = InventoryRecord::empty(key);

        assert!(matches!(
            store.commit_movement(&record, movement(key, MovementType::Sale, 1)),
            Err(StoreError::NegativeQuantity { .. })
        ));
        assert!(matches!(
            store.commit_movement(&record, movement(key.at_branch(BranchId::new()), MovementType::Purchase, 1)),
            Err(StoreError::InvalidAppend(_))
        ));
        assert!(matches!(
            store.commit_movement(&record, movement(test_key(), MovementType::Purchase, 1)),
            Err(StoreError::TenantIsolation(_))
        ));
        assert_eq!(store.read(key).unwrap().version(), 0);
    }

    #[test]
    fn list_is_tenant_scoped() {
        let store = InMemoryStockStore::new();
        let a = test_key();
        let b = test_key();
        store.commit_movement(&InventoryRecord::empty(a), movement(a, MovementType::Initial, 4)).unwrap();
        store.commit_movement(&InventoryRecord::empty(b), movement(b, MovementType::Initial, 9)).unwrap();

        let records = store.list(a.tenant_id).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key(), a);
        assert!(store.tenant_movements(a.tenant_id).unwrap().iter().all(|m| m.key.tenant_id == a.tenant_id));
    }

    #[test]
    fn transfer_movements_are_found_by_id() {
        let store = InMemoryStockStore::new();
        let out_key = test_key();
        let in_key = out_key.at_branch(BranchId::new());
        let transfer_id = TransferId::new();

        let mut out = movement(out_key, MovementType::TransferOut, 2);
        out.transfer_id = Some(transfer_id);
        let mut inbound = movement(in_key, MovementType::TransferIn, 2);
        inbound.transfer_id = Some(transfer_id);
        store.append(out).unwrap();
        store.append(inbound).unwrap();
        store.append(movement(out_key, MovementType::Purchase, 9)).unwrap();

        let legs = store.transfer_movements(out_key.tenant_id, transfer_id).unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].delta + legs[1].delta, 0);
    }

    /// Ledger whose append can be made to fail; exercises the default
    /// (non-transactional) commit path with rollback.
    struct FlakyLedger {
        inner: InMemoryStockStore,
        fail_append: AtomicBool,
    }

    impl MovementLedger for FlakyLedger {
        fn append(&self, movement: NewMovement) -> Result<StockMovement, StoreError> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk full".to_string()));
            }
            self.inner.append(movement)
        }

        fn movements(&self, key: StockKey) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.movements(key)
        }

        fn tenant_movements(&self, tenant_id: TenantId) -> Result<Vec<StockMovement>, StoreError> {
            self.inner.tenant_movements(tenant_id)
        }
    }

    impl AggregateStore for FlakyLedger {
        fn read(&self, key: StockKey) -> Result<InventoryRecord, StoreError> {
            self.inner.read(key)
        }

        fn compare_and_set(
            &self,
            key: StockKey,
            expected_version: u64,
            new_quantity: i64,
        ) -> Result<InventoryRecord, StoreError> {
            self.inner.compare_and_set(key, expected_version, new_quantity)
        }

        fn list(&self, tenant_id: TenantId) -> Result<Vec<InventoryRecord>, StoreError> {
            self.inner.list(tenant_id)
        }
    }

    impl StockStore for FlakyLedger {}

    #[test]
    fn default_commit_rolls_back_aggregate_when_append_fails() {
        let store = FlakyLedger {
            inner: InMemoryStockStore::new(),
            fail_append: AtomicBool::new(false),
        };
        let key = test_key();
        let (record, _) = store
            .commit_movement(&InventoryRecord::empty(key), movement(key, MovementType::Initial, 50))
            .unwrap();

        store.fail_append.store(true, Ordering::SeqCst);
        let err = store
            .commit_movement(&record, movement(key, MovementType::Sale, 20))
            .unwrap_err();
        assert_eq!(err, StoreError::Backend("disk full".to_string()));

        let after = store.read(key).unwrap();
        assert_eq!(after.quantity(), 50);
        let ledger_sum: i64 = store.movements(key).unwrap().iter().map(|m| m.delta).sum();
        assert_eq!(ledger_sum, after.quantity());
    }

    #[test]
    fn stale_snapshot_is_a_conflict_even_if_it_would_go_negative() {
        let atomic = InMemoryStockStore::new();
        let fallback = FlakyLedger {
            inner: InMemoryStockStore::new(),
            fail_append: AtomicBool::new(false),
        };
        let key = test_key();
        let stale = InventoryRecord::empty(key);
        let sale = || movement(key, MovementType::Sale, 5);

        atomic.commit_movement(&stale, movement(key, MovementType::Initial, 10)).unwrap();
        fallback.commit_movement(&stale, movement(key, MovementType::Initial, 10)).unwrap();

        let expected = StoreError::Concurrency { key, expected: 0, actual: 1 };
        assert_eq!(atomic.commit_movement(&stale, sale()).unwrap_err(), expected);
        assert_eq!(fallback.commit_movement(&stale, sale()).unwrap_err(), expected);
        assert_eq!(atomic.read(key).unwrap().quantity(), 10);
        assert_eq!(fallback.read(key).unwrap().quantity(), 10);
    }
}
