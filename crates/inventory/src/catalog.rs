//! Catalog entities the stock engine reads but does not own.
//!
//! Products and branches are maintained by the surrounding application; the engine
//! only needs their identity, tenant, pricing and reorder threshold.

use serde::{Deserialize, Serialize};

use stockledger_core::{BranchId, DomainError, DomainResult, Entity, ProductId, TenantId};

/// Catalog item under a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    id: ProductId,
    tenant_id: TenantId,
    sku: String,
    name: String,
    /// Unit of measure label ("pcs", "kg", "box").
    unit: String,
    /// Price in smallest currency unit (e.g. paise).
    unit_price: u64,
    /// At or below this quantity the product needs attention.
    reorder_threshold: i64,
}

impl Product {
    pub fn new(
        id: ProductId,
        tenant_id: TenantId,
        sku: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> DomainResult<Self> {
        let sku = sku.into();
        let name = name.into();
        let unit = unit.into();
        if sku.trim().is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        if unit.trim().is_empty() {
            return Err(DomainError::validation("unit of measure cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            sku,
            name,
            unit,
            unit_price: 0,
            reorder_threshold: 0,
        })
    }

    pub fn with_unit_price(mut self, unit_price: u64) -> Self {
        self.unit_price = unit_price;
        self
    }

    pub fn with_reorder_threshold(mut self, threshold: i64) -> DomainResult<Self> {
        self.set_reorder_threshold(threshold)?;
        Ok(self)
    }

    pub fn set_unit_price(&mut self, unit_price: u64) {
        self.unit_price = unit_price;
    }

    pub fn set_reorder_threshold(&mut self, threshold: i64) -> DomainResult<()> {
        if threshold < 0 {
            return Err(DomainError::validation(format!(
                "reorder threshold cannot be negative (got {threshold})"
            )));
        }
        self.reorder_threshold = threshold;
        Ok(())
    }

    pub fn sku(&self) -> &str {
        &self.sku
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn unit_price(&self) -> u64 {
        self.unit_price
    }

    pub fn reorder_threshold(&self) -> i64 {
        self.reorder_threshold
    }
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Stock location under a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    id: BranchId,
    tenant_id: TenantId,
    name: String,
}

impl Branch {
    pub fn new(id: BranchId, tenant_id: TenantId, name: impl Into<String>) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("branch name cannot be empty"));
        }
        Ok(Self {
            id,
            tenant_id,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Entity for Branch {
    type Id = BranchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}
