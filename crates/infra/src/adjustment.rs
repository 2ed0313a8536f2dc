//! Single-key stock adjustment with an optimistic retry loop.
//!
//! ```text
//! Reading → Validating → (Reject | Commit) → (Committed | Retry | ConflictExhausted)
//! ```
//!
//! Every attempt reads a fresh snapshot, checks the business rule against it, and
//! commits through the store's compare-and-set. A lost race re-reads and tries again
//! after a short backoff; the rule is re-evaluated on every attempt.

use std::thread;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::{
    AggregateRoot, BranchId, MovementId, ProductId, StockKey, TenantContext, TransferId,
};
use stockledger_inventory::{MovementReference, MovementType, NewMovement, StockMovement};

use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::StockError;
use crate::store::{StockStore, StoreError};

/// Caller input for one movement. `magnitude` is always positive; the sign comes from
/// `movement_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub branch_id: BranchId,
    pub movement_type: MovementType,
    pub magnitude: i64,
    pub reference: Option<MovementReference>,
}

impl MovementRequest {
    pub fn new(
        product_id: ProductId,
        branch_id: BranchId,
        movement_type: MovementType,
        magnitude: i64,
    ) -> Self {
        Self {
            product_id,
            branch_id,
            movement_type,
            magnitude,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: MovementReference) -> Self {
        self.reference = Some(reference);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMovement {
    pub new_quantity: i64,
    pub movement_id: MovementId,
    pub movement: StockMovement,
}

#[derive(Debug, Clone)]
pub struct AdjustmentService<S> {
    store: S,
    config: EngineConfig,
}

impl<S> AdjustmentService<S>
where
    S: StockStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply one movement, retrying on version conflicts.
    ///
    /// `transfer_id` must be present exactly for transfer legs.
    #[instrument(
        skip(self, ctx, request, deadline),
        fields(
            tenant_id = %ctx.tenant_id,
            product_id = %request.product_id,
            branch_id = %request.branch_id,
            movement_type = %request.movement_type,
            magnitude = request.magnitude
        ),
        err
    )]
    pub fn apply(
        &self,
        ctx: &TenantContext,
        request: &MovementRequest,
        transfer_id: Option<TransferId>,
        deadline: Deadline,
    ) -> Result<AppliedMovement, StockError> {
        if request.magnitude <= 0 {
            return Err(StockError::validation(format!(
                "magnitude must be positive (got {})",
                request.magnitude
            )));
        }

        let key = StockKey::new(ctx.tenant_id, request.product_id, request.branch_id);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            deadline.check()?;

            let current = self.store.read(key)?;
            current.plan(request.movement_type, request.magnitude)?;

            let movement = NewMovement {
                key,
                movement_type: request.movement_type,
                delta: request.movement_type.signed_delta(request.magnitude),
                transfer_id,
                reference: request.reference.clone(),
                actor: ctx.actor,
                occurred_at: Utc::now(),
            };

            match self.store.commit_movement(&current, movement) {
                Ok((record, recorded)) => {
                    tracing::debug!(
                        %key,
                        attempt,
                        quantity = record.quantity(),
                        version = record.version(),
                        "movement applied"
                    );
                    return Ok(AppliedMovement {
                        new_quantity: record.quantity(),
                        movement_id: recorded.id,
                        movement: recorded,
                    });
                }
                Err(StoreError::Concurrency { expected, actual, .. }) => {
                    tracing::debug!(%key, attempt, expected, actual, "version conflict, retrying");
                    if attempt < max_attempts {
                        thread::sleep(deadline.clamp(self.config.backoff(attempt)));
                    }
                }
                // The snapshot said the movement fits; the store disagreed.
                Err(StoreError::NegativeQuantity { .. }) => {
                    return Err(StockError::InsufficientStock {
                        available: current.quantity(),
                        requested: request.magnitude,
                    });
                }
                Err(other) => return Err(other.into()),
            }
        }

        tracing::warn!(%key, attempts = max_attempts, "retries exhausted");
        Err(StockError::ConcurrencyConflict {
            key,
            attempts: max_attempts,
        })
    }
}
