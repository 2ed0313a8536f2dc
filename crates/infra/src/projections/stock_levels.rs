use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockledger_core::{ProductId, StockKey, TenantId};
use stockledger_inventory::StockMovement;

use crate::read_model::TenantStore;
use crate::store::{MovementEnvelope, MovementLedger, StoreError, movement_envelope};

/// Projected on-hand quantity for one stock key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub key: StockKey,
    pub quantity: i64,
    /// Ledger sequence of the last movement folded in.
    pub last_sequence: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StockProjectionError {
    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number on {key} (last={last}, found={found})")]
    NonMonotonicSequence { key: StockKey, last: u64, found: u64 },

    #[error("projection cursor lock poisoned")]
    Poisoned,

    #[error("failed to read ledger: {0}")]
    Ledger(#[from] StoreError),
}

/// Per-stream progress: last folded sequence, plus envelopes that arrived early.
#[derive(Debug, Default)]
struct Streams {
    cursors: HashMap<StockKey, u64>,
    pending: HashMap<StockKey, BTreeMap<u64, MovementEnvelope>>,
}

/// Stock level read model fed by the movement feed.
///
/// - Idempotent: envelopes at or below a stream's cursor are ignored
/// - Ordered: every stream is folded strictly from sequence 1 upwards; an envelope
///   ahead of a gap is held until the missing sequences arrive
/// - Rebuildable from the ledger at any time (which also seeds the cursors, so a
///   projection attached to a live feed should rebuild first)
#[derive(Debug)]
pub struct StockLevelProjection<S>
where
    S: TenantStore<StockKey, StockLevel>,
{
    store: S,
    streams: Mutex<Streams>,
}

impl<S> StockLevelProjection<S>
where
    S: TenantStore<StockKey, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            streams: Mutex::new(Streams::default()),
        }
    }

    pub fn get(&self, key: StockKey) -> Option<StockLevel> {
        self.store.get(key.tenant_id, &key)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<StockLevel> {
        let mut levels = self.store.list(tenant_id);
        levels.sort_by_key(|l| l.key);
        levels
    }

    /// Sum of projected quantities over every branch of a product.
    pub fn product_total(&self, tenant_id: TenantId, product_id: ProductId) -> i64 {
        self.store
            .list(tenant_id)
            .iter()
            .filter(|l| l.key.product_id == product_id)
            .map(|l| l.quantity)
            .sum()
    }

    /// Envelopes of `key` received but not yet folded in.
    pub fn pending(&self, key: StockKey) -> usize {
        self.streams
            .lock()
            .map(|s| s.pending.get(&key).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn apply_envelope(&self, envelope: &MovementEnvelope) -> Result<(), StockProjectionError> {
        let key = envelope.stream();
        let seq = envelope.sequence_number();
        let movement = envelope.payload().movement();

        if movement.key != key {
            return Err(StockProjectionError::TenantIsolation(format!(
                "movement {} for {} published on stream {key}",
                movement.id, movement.key
            )));
        }

        let mut streams = self
            .streams
            .lock()
            .map_err(|_| StockProjectionError::Poisoned)?;
        let last = streams.cursors.get(&key).copied().unwrap_or(0);

        if seq == 0 {
            return Err(StockProjectionError::NonMonotonicSequence { key, last, found: seq });
        }
        if seq <= last {
            // Redelivery.
            return Ok(());
        }
        if seq > last + 1 {
            tracing::debug!(%key, last, found = seq, "movement ahead of its predecessor, holding");
            streams
                .pending
                .entry(key)
                .or_default()
                .insert(seq, envelope.clone());
            return Ok(());
        }

        self.fold(key, seq, movement.delta);
        let mut cursor = seq;
        if let Some(held) = streams.pending.get_mut(&key) {
            while let Some(next) = held.remove(&(cursor + 1)) {
                cursor += 1;
                self.fold(key, cursor, next.payload().movement().delta);
            }
            held.retain(|s, _| *s > cursor);
            if held.is_empty() {
                streams.pending.remove(&key);
            }
        }
        streams.cursors.insert(key, cursor);
        Ok(())
    }

    fn fold(&self, key: StockKey, seq: u64, delta: i64) {
        let mut level = self.store.get(key.tenant_id, &key).unwrap_or(StockLevel {
            key,
            quantity: 0,
            last_sequence: 0,
        });
        level.quantity += delta;
        level.last_sequence = seq;
        self.store.upsert(key.tenant_id, key, level);
    }

    /// Drop the tenant's read model and replay the given envelopes in stream order.
    pub fn rebuild_from_scratch(
        &self,
        tenant_id: TenantId,
        envelopes: impl IntoIterator<Item = MovementEnvelope>,
    ) -> Result<(), StockProjectionError> {
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        if let Some(foreign) = envs.iter().find(|e| e.tenant_id() != tenant_id) {
            return Err(StockProjectionError::TenantIsolation(format!(
                "envelope for tenant {} in rebuild of {tenant_id}",
                foreign.tenant_id()
            )));
        }
        envs.sort_by_key(|e| (e.stream(), e.sequence_number()));

        {
            let mut streams = self
                .streams
                .lock()
                .map_err(|_| StockProjectionError::Poisoned)?;
            streams.cursors.retain(|k, _| k.tenant_id != tenant_id);
            streams.pending.retain(|k, _| k.tenant_id != tenant_id);
        }
        self.store.clear_tenant(tenant_id);

        for env in &envs {
            self.apply_envelope(env)?;
        }
        tracing::info!(%tenant_id, replayed = envs.len(), "stock level projection rebuilt");
        Ok(())
    }

    /// Rebuild a tenant's levels straight from the ledger.
    pub fn rebuild_from_ledger<L>(&self, ledger: &L, tenant_id: TenantId) -> Result<(), StockProjectionError>
    where
        L: MovementLedger + ?Sized,
    {
        let movements: Vec<StockMovement> = ledger.tenant_movements(tenant_id)?;
        self.rebuild_from_scratch(tenant_id, movements.iter().map(movement_envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockledger_core::{BranchId, MovementId, UserId};
    use stockledger_inventory::{MovementType, NewMovement};

    use crate::read_model::InMemoryTenantStore;
    use crate::store::{AggregateStore, InMemoryStockStore, StockStore};

    fn key() -> StockKey {
        StockKey::new(TenantId::new(), ProductId::new(), BranchId::new())
    }

    fn envelope(key: StockKey, seq: u64, movement_type: MovementType, magnitude: i64) -> MovementEnvelope {
        let movement = NewMovement {
            key,
            movement_type,
            delta: movement_type.signed_delta(magnitude),
            transfer_id: None,
            reference: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        }
        .into_recorded(MovementId::new(), seq);
        movement_envelope(&movement)
    }

    fn projection() -> StockLevelProjection<InMemoryTenantStore<StockKey, StockLevel>> {
        StockLevelProjection::new(InMemoryTenantStore::new())
    }

    #[test]
    fn folds_deltas_and_ignores_redelivery() {
        let p = projection();
        let k = key();
        let first = envelope(k, 1, MovementType::Initial, 100);
        let second = envelope(k, 2, MovementType::Sale, 30);

        p.apply_envelope(&first).unwrap();
        p.apply_envelope(&second).unwrap();
        p.apply_envelope(&second).unwrap();
        p.apply_envelope(&first).unwrap();

        let level = p.get(k).unwrap();
        assert_eq!(level.quantity, 70);
        assert_eq!(level.last_sequence, 2);
    }

    #[test]
    fn early_envelopes_wait_for_the_gap_to_fill() {
        let p = projection();
        let k = key();
        let first = envelope(k, 1, MovementType::Initial, 5);
        let second = envelope(k, 2, MovementType::Purchase, 5);
        let third = envelope(k, 3, MovementType::Sale, 2);

        p.apply_envelope(&first).unwrap();
        p.apply_envelope(&third).unwrap();
        assert_eq!(p.get(k).unwrap().quantity, 5);
        assert_eq!(p.pending(k), 1);

        p.apply_envelope(&third).unwrap();
        p.apply_envelope(&second).unwrap();
        let level = p.get(k).unwrap();
        assert_eq!((level.quantity, level.last_sequence), (8, 3));
        assert_eq!(p.pending(k), 0);
    }

    #[test]
    fn stream_is_folded_from_its_first_sequence() {
        let p = projection();
        let k = key();
        p.apply_envelope(&envelope(k, 2, MovementType::Sale, 4)).unwrap();
        assert_eq!(p.get(k), None);

        p.apply_envelope(&envelope(k, 1, MovementType::Initial, 10)).unwrap();
        assert_eq!(p.get(k).unwrap().quantity, 6);
        assert_eq!(
            p.apply_envelope(&envelope(k, 0, MovementType::Purchase, 1)),
            Err(StockProjectionError::NonMonotonicSequence { key: k, last: 2, found: 0 })
        );
    }

    #[test]
    fn mismatched_stream_is_rejected() {
        let p = projection();
        let good = envelope(key(), 1, MovementType::Initial, 5);
        let forged = MovementEnvelope::new(
            good.event_id(),
            key(),
            good.stream_type(),
            1,
            good.payload().clone(),
        );
        assert!(matches!(
            p.apply_envelope(&forged),
            Err(StockProjectionError::TenantIsolation(_))
        ));
    }

    #[test]
    fn rebuild_from_ledger_matches_aggregate() {
        let store = InMemoryStockStore::new();
        let k = key();
        let other = k.at_branch(BranchId::new());
        let mut record = store.read(k).unwrap();
        for (t, m) in [(MovementType::Initial, 50), (MovementType::Sale, 20), (MovementType::ReturnIn, 3)] {
            let movement = NewMovement {
                key: k,
                movement_type: t,
                delta: t.signed_delta(m),
                transfer_id: None,
                reference: None,
                actor: UserId::new(),
                occurred_at: Utc::now(),
            };
            record = store.commit_movement(&record, movement).unwrap().0;
        }
        let movement = NewMovement {
            key: other,
            movement_type: MovementType::Purchase,
            delta: 7,
            transfer_id: None,
            reference: None,
            actor: UserId::new(),
            occurred_at: Utc::now(),
        };
        store.commit_movement(&store.read(other).unwrap(), movement).unwrap();

        let p = projection();
        p.apply_envelope(&envelope(k, 1, MovementType::Initial, 999)).unwrap();
        p.rebuild_from_ledger(&store, k.tenant_id).unwrap();

        assert_eq!(p.get(k).unwrap().quantity, record.quantity());
        assert_eq!(p.product_total(k.tenant_id, k.product_id), 33 + 7);
        assert_eq!(p.list(k.tenant_id).len(), 2);
    }
}
