//! Branch-to-branch transfers.
//!
//! A transfer is two movements sharing one `TransferId`: `transfer_out` at the source
//! and `transfer_in` at the destination. The legs are separate commits, so:
//!
//! - keys are locked in canonical order (ascending `StockKey`, i.e. by branch id) so
//!   two transfers crossing the same pair of branches cannot deadlock
//! - if the inbound leg fails after the outbound leg committed, the outbound leg is
//!   reversed with a compensating `transfer_in` at the source, tagged with the same
//!   transfer id, and the original error is returned
//!
//! Locks only serialize transfers against each other. Plain movements on the same
//! keys still go through the optimistic path.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use stockledger_core::{BranchId, MovementId, ProductId, StockKey, TenantContext, TransferId};
use stockledger_inventory::{MovementReference, MovementType, ReferenceType};

use crate::adjustment::{AdjustmentService, MovementRequest};
use crate::deadline::Deadline;
use crate::error::StockError;
use crate::store::StockStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub product_id: ProductId,
    pub from_branch: BranchId,
    pub to_branch: BranchId,
    pub magnitude: i64,
    /// Defaults to a transfer challan numbered by the transfer id.
    pub reference: Option<MovementReference>,
}

impl TransferRequest {
    pub fn new(product_id: ProductId, from_branch: BranchId, to_branch: BranchId, magnitude: i64) -> Self {
        Self {
            product_id,
            from_branch,
            to_branch,
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
pub struct TransferOutcome {
    pub transfer_id: TransferId,
    pub from_quantity: i64,
    pub to_quantity: i64,
    pub out_movement_id: MovementId,
    pub in_movement_id: MovementId,
}

/// Table of stock keys currently held by in-flight transfers.
#[derive(Debug, Default)]
pub struct KeyLocks {
    held: Mutex<HashSet<StockKey>>,
    released: Condvar,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key in ascending order, waiting at most until `deadline`.
    ///
    /// On failure, keys already taken are released before returning.
    pub fn acquire(&self, mut keys: Vec<StockKey>, deadline: Deadline) -> Result<KeyGuard<'_>, StockError> {
        keys.sort();
        keys.dedup();

        let mut guard = KeyGuard {
            locks: self,
            keys: Vec::with_capacity(keys.len()),
        };
        for key in keys {
            self.lock_one(key, deadline)?;
            guard.keys.push(key);
        }
        Ok(guard)
    }

    fn lock_one(&self, key: StockKey, deadline: Deadline) -> Result<(), StockError> {
        let mut held = self.held.lock().map_err(poisoned)?;

        while held.contains(&key) {
            held = match deadline.remaining() {
                None => self.released.wait(held).map_err(poisoned)?,
                Some(left) if left.is_zero() => return Err(StockError::DeadlineExceeded),
                Some(left) => self.released.wait_timeout(held, left).map_err(poisoned)?.0,
            };
        }
        held.insert(key);
        Ok(())
    }

    pub fn is_held(&self, key: &StockKey) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

fn poisoned<T>(_: PoisonError<T>) -> StockError {
    StockError::internal("transfer lock table poisoned")
}

/// Releases its keys on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    keys: Vec<StockKey>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

#[derive(Debug, Clone)]
pub struct TransferCoordinator<S> {
    adjustments: AdjustmentService<S>,
    locks: Arc<KeyLocks>,
}

impl<S> TransferCoordinator<S>
where
    S: StockStore,
{
    pub fn new(adjustments: AdjustmentService<S>) -> Self {
        Self {
            adjustments,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    #[instrument(
        skip(self, ctx, request, deadline),
        fields(
            tenant_id = %ctx.tenant_id,
            product_id = %request.product_id,
            from_branch = %request.from_branch,
            to_branch = %request.to_branch,
            magnitude = request.magnitude
        ),
        err
    )]
    pub fn transfer(
        &self,
        ctx: &TenantContext,
        request: &TransferRequest,
        deadline: Deadline,
    ) -> Result<TransferOutcome, StockError> {
        if request.from_branch == request.to_branch {
            return Err(StockError::validation("cannot transfer to the same branch"));
        }
        if request.magnitude <= 0 {
            return Err(StockError::validation(format!(
                "magnitude must be positive (got {})",
                request.magnitude
            )));
        }

        let transfer_id = TransferId::new();
        let from_key = StockKey::new(ctx.tenant_id, request.product_id, request.from_branch);
        let to_key = from_key.at_branch(request.to_branch);
        let _guard = self.locks.acquire(vec![from_key, to_key], deadline)?;

        let reference = request
            .reference
            .clone()
            .unwrap_or_else(|| MovementReference::new(ReferenceType::TransferChallan, transfer_id.to_string()));
        let leg = |branch_id, movement_type| MovementRequest {
            product_id: request.product_id,
            branch_id,
            movement_type,
            magnitude: request.magnitude,
            reference: Some(reference.clone()),
        };

        // Nothing has been written yet if this fails.
        let outbound = self.adjustments.apply(
            ctx,
            &leg(request.from_branch, MovementType::TransferOut),
            Some(transfer_id),
            deadline,
        )?;

        match self.adjustments.apply(
            ctx,
            &leg(request.to_branch, MovementType::TransferIn),
            Some(transfer_id),
            deadline,
        ) {
            Ok(inbound) => {
                tracing::info!(%transfer_id, "transfer committed");
                Ok(TransferOutcome {
                    transfer_id,
                    from_quantity: outbound.new_quantity,
                    to_quantity: inbound.new_quantity,
                    out_movement_id: outbound.movement_id,
                    in_movement_id: inbound.movement_id,
                })
            }
            Err(cause) => {
                self.compensate(ctx, request, transfer_id, &cause)?;
                Err(cause)
            }
        }
    }

    /// Put the outbound magnitude back at the source branch.
    ///
    /// Runs without a deadline: an abandoned half-transfer is worse than a slow one.
    fn compensate(
        &self,
        ctx: &TenantContext,
        request: &TransferRequest,
        transfer_id: TransferId,
        cause: &StockError,
    ) -> Result<(), StockError> {
        let reversal = MovementRequest {
            product_id: request.product_id,
            branch_id: request.from_branch,
            movement_type: MovementType::TransferIn,
            magnitude: request.magnitude,
            reference: Some(MovementReference::new(
                ReferenceType::TransferCompensation,
                transfer_id.to_string(),
            )),
        };

        let config = self.adjustments.config();
        let attempts = config.compensation_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self
                .adjustments
                .apply(ctx, &reversal, Some(transfer_id), Deadline::none())
            {
                Ok(applied) => {
                    tracing::warn!(
                        %transfer_id,
                        error = %cause,
                        restored_quantity = applied.new_quantity,
                        "transfer inbound leg failed; outbound leg reversed"
                    );
                    return Ok(());
                }
                Err(err) if err.is_retryable() && attempt < attempts => {
                    tracing::debug!(%transfer_id, attempt, error = %err, "compensation contended, retrying");
                    thread::sleep(config.backoff(attempt));
                    last_error = Some(err);
                }
                Err(err) => {
                    last_error = Some(err);
                    break;
                }
            }
        }

        let failure = last_error.map(|e| e.to_string()).unwrap_or_default();
        tracing::error!(
            %transfer_id,
            cause = %cause,
            compensation_error = %failure,
            "transfer compensation failed; transfer left unpaired"
        );
        Err(StockError::internal(format!(
            "transfer {transfer_id} failed ({cause}) and could not be compensated ({failure})"
        )))
    }
}
