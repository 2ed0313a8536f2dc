//! Composite key of the stock aggregate.

use serde::{Deserialize, Serialize};

use crate::id::{BranchId, ProductId, TenantId};

/// `(tenant, product, branch)`: the unit of stock consistency.
///
/// Every ledger entry and every on-hand quantity belongs to exactly one key. Keys of
/// different tenants never compare equal, so tenant isolation falls out of keying.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub branch_id: BranchId,
}

impl StockKey {
    pub fn new(tenant_id: TenantId, product_id: ProductId, branch_id: BranchId) -> Self {
        Self {
            tenant_id,
            product_id,
            branch_id,
        }
    }

    /// Same tenant and product, different branch.
    pub fn at_branch(&self, branch_id: BranchId) -> Self {
        Self {
            branch_id,
            ..*self
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.tenant_id, self.product_id, self.branch_id
        )
    }
}
