//! Entry point used by the surrounding application.
//!
//! The engine checks catalog membership (product and branch must belong to the
//! caller's tenant), applies the configured default deadline, and delegates to the
//! adjustment service, the transfer coordinator, or the low-stock evaluator.

use std::time::Duration;

use tracing::instrument;

use stockledger_core::{BranchId, ProductId, StockKey, TenantContext, TenantId, TransferId};
use stockledger_inventory::{
    LowStockEntry, Product, StockMovement, ValuedProduct, low_stock_report, product_totals,
    top_by_value,
};

use crate::adjustment::{AdjustmentService, AppliedMovement, MovementRequest};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::error::StockError;
use crate::reconcile::{ReconciliationReport, reconcile};
use crate::store::StockStore;
use crate::transfer::{TransferCoordinator, TransferOutcome, TransferRequest};

#[derive(Debug, Clone)]
pub struct StockEngine<S, C> {
    store: S,
    catalog: C,
    adjustments: AdjustmentService<S>,
    transfers: TransferCoordinator<S>,
    default_timeout: Duration,
}

impl<S, C> StockEngine<S, C>
where
    S: StockStore + Clone,
    C: Catalog,
{
    pub fn new(store: S, catalog: C, config: EngineConfig) -> Self {
        let default_timeout = config.default_timeout;
        let adjustments = AdjustmentService::new(store.clone(), config);
        let transfers = TransferCoordinator::new(adjustments.clone());
        Self {
            store,
            catalog,
            adjustments,
            transfers,
            default_timeout,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    fn default_deadline(&self) -> Deadline {
        Deadline::after(self.default_timeout)
    }

    fn require_product(&self, tenant_id: TenantId, product_id: ProductId) -> Result<Product, StockError> {
        self.catalog
            .product(tenant_id, product_id)
            .ok_or_else(|| StockError::not_found(format!("product {product_id}")))
    }

    fn require_branch(&self, tenant_id: TenantId, branch_id: BranchId) -> Result<(), StockError> {
        self.catalog
            .branch(tenant_id, branch_id)
            .map(|_| ())
            .ok_or_else(|| StockError::not_found(format!("branch {branch_id}")))
    }

    /// Record one non-transfer movement.
    pub fn apply_movement(
        &self,
        ctx: &TenantContext,
        request: &MovementRequest,
    ) -> Result<AppliedMovement, StockError> {
        self.apply_movement_with_deadline(ctx, request, self.default_deadline())
    }

    #[instrument(
        skip(self, ctx, request, deadline),
        fields(
            tenant_id = %ctx.tenant_id,
            product_id = %request.product_id,
            branch_id = %request.branch_id,
            movement_type = %request.movement_type
        ),
        err
    )]
    pub fn apply_movement_with_deadline(
        &self,
        ctx: &TenantContext,
        request: &MovementRequest,
        deadline: Deadline,
    ) -> Result<AppliedMovement, StockError> {
        if request.movement_type.is_transfer() {
            return Err(StockError::validation(format!(
                "'{}' movements are created by transfer, not applied directly",
                request.movement_type
            )));
        }
        if request.magnitude <= 0 {
            return Err(StockError::validation(format!(
                "magnitude must be positive (got {})",
                request.magnitude
            )));
        }
        self.require_product(ctx.tenant_id, request.product_id)?;
        self.require_branch(ctx.tenant_id, request.branch_id)?;

        self.adjustments.apply(ctx, request, None, deadline)
    }

    /// Move stock between two branches of the caller's tenant.
    pub fn transfer(
        &self,
        ctx: &TenantContext,
        request: &TransferRequest,
    ) -> Result<TransferOutcome, StockError> {
        self.transfer_with_deadline(ctx, request, self.default_deadline())
    }

    pub fn transfer_with_deadline(
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
        self.require_product(ctx.tenant_id, request.product_id)?;
        self.require_branch(ctx.tenant_id, request.from_branch)?;
        self.require_branch(ctx.tenant_id, request.to_branch)?;

        self.transfers.transfer(ctx, request, deadline)
    }

    /// On-hand quantity at one branch; untouched keys read as zero.
    pub fn get_quantity(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        branch_id: BranchId,
    ) -> Result<i64, StockError> {
        self.require_product(tenant_id, product_id)?;
        self.require_branch(tenant_id, branch_id)?;
        let record = self.store.read(StockKey::new(tenant_id, product_id, branch_id))?;
        Ok(record.quantity())
    }

    /// On-hand quantity summed over every branch.
    pub fn get_product_quantity(&self, tenant_id: TenantId, product_id: ProductId) -> Result<i64, StockError> {
        self.require_product(tenant_id, product_id)?;
        let records = self.store.list(tenant_id)?;
        Ok(product_totals(tenant_id, &records)
            .get(&product_id)
            .copied()
            .unwrap_or(0))
    }

    /// Ledger entries of one key, oldest first.
    pub fn movement_history(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        branch_id: BranchId,
    ) -> Result<Vec<StockMovement>, StockError> {
        self.require_product(tenant_id, product_id)?;
        self.require_branch(tenant_id, branch_id)?;
        Ok(self.store.movements(StockKey::new(tenant_id, product_id, branch_id))?)
    }

    /// Both legs of a transfer, plus its compensation if one was recorded.
    pub fn transfer_movements(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<Vec<StockMovement>, StockError> {
        let legs = self.store.transfer_movements(tenant_id, transfer_id)?;
        if legs.is_empty() {
            return Err(StockError::not_found(format!("transfer {transfer_id}")));
        }
        Ok(legs)
    }

    /// Out-of-stock and low products across all branches, most urgent first.
    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn list_low_stock(&self, tenant_id: TenantId) -> Result<Vec<LowStockEntry>, StockError> {
        let records = self.store.list(tenant_id)?;
        let totals = product_totals(tenant_id, &records);
        Ok(low_stock_report(tenant_id, &self.catalog.products(tenant_id), &totals))
    }

    /// Same as [`Self::list_low_stock`], judged on one branch's quantities only.
    pub fn list_low_stock_at_branch(
        &self,
        tenant_id: TenantId,
        branch_id: BranchId,
    ) -> Result<Vec<LowStockEntry>, StockError> {
        self.require_branch(tenant_id, branch_id)?;
        let records: Vec<_> = self
            .store
            .list(tenant_id)?
            .into_iter()
            .filter(|r| r.key().branch_id == branch_id)
            .collect();
        let totals = product_totals(tenant_id, &records);
        Ok(low_stock_report(tenant_id, &self.catalog.products(tenant_id), &totals))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    pub fn top_products_by_value(
        &self,
        tenant_id: TenantId,
        limit: usize,
    ) -> Result<Vec<ValuedProduct>, StockError> {
        let records = self.store.list(tenant_id)?;
        let totals = product_totals(tenant_id, &records);
        Ok(top_by_value(tenant_id, &self.catalog.products(tenant_id), &totals, limit))
    }

    pub fn reconcile(&self, tenant_id: TenantId) -> Result<ReconciliationReport, StockError> {
        Ok(reconcile(&self.store, tenant_id)?)
    }
}
