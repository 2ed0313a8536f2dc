//! Read-only view of the product and branch catalog.
//!
//! The stock engine never creates catalog entries itself; it only needs to know that a
//! product or branch exists under the caller's tenant, plus pricing and thresholds.

use std::sync::Arc;

use stockledger_core::{BranchId, Entity, ProductId, TenantId};
use stockledger_inventory::{Branch, Product};

use crate::read_model::{InMemoryTenantStore, TenantStore};

pub trait Catalog: Send + Sync {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product>;
    fn branch(&self, tenant_id: TenantId, branch_id: BranchId) -> Option<Branch>;
    fn products(&self, tenant_id: TenantId) -> Vec<Product>;
    fn branches(&self, tenant_id: TenantId) -> Vec<Branch>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product> {
        (**self).product(tenant_id, product_id)
    }

    fn branch(&self, tenant_id: TenantId, branch_id: BranchId) -> Option<Branch> {
        (**self).branch(tenant_id, branch_id)
    }

    fn products(&self, tenant_id: TenantId) -> Vec<Product> {
        (**self).products(tenant_id)
    }

    fn branches(&self, tenant_id: TenantId) -> Vec<Branch> {
        (**self).branches(tenant_id)
    }
}

/// Catalog snapshot held in tenant-partitioned read models.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: InMemoryTenantStore<ProductId, Product>,
    branches: InMemoryTenantStore<BranchId, Branch>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a product under its own tenant.
    pub fn upsert_product(&self, product: Product) {
        self.products.upsert(product.tenant_id(), *product.id(), product);
    }

    pub fn upsert_branch(&self, branch: Branch) {
        self.branches.upsert(branch.tenant_id(), *branch.id(), branch);
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Product> {
        self.products.get(tenant_id, &product_id)
    }

    fn branch(&self, tenant_id: TenantId, branch_id: BranchId) -> Option<Branch> {
        self.branches.get(tenant_id, &branch_id)
    }

    fn products(&self, tenant_id: TenantId) -> Vec<Product> {
        let mut products = self.products.list(tenant_id);
        products.sort_by_key(|p| *p.id());
        products
    }

    fn branches(&self, tenant_id: TenantId) -> Vec<Branch> {
        let mut branches = self.branches.list(tenant_id);
        branches.sort_by_key(|b| *b.id());
        branches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_tenant_scoped() {
        let catalog = InMemoryCatalog::new();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let product = Product::new(ProductId::new(), tenant, "SKU-1", "Widget", "pcs").unwrap();
        let branch = Branch::new(BranchId::new(), tenant, "Main").unwrap();
        let product_id = *product.id();
        let branch_id = *branch.id();

        catalog.upsert_product(product);
        catalog.upsert_branch(branch);

        assert!(catalog.product(tenant, product_id).is_some());
        assert!(catalog.product(other, product_id).is_none());
        assert!(catalog.branch(other, branch_id).is_none());
        assert_eq!(catalog.products(tenant).len(), 1);
        assert!(catalog.products(other).is_empty());
        assert_eq!(catalog.branches(tenant)[0].name(), "Main");
    }

    #[test]
    fn upsert_replaces_existing_product() {
        let catalog = InMemoryCatalog::new();
        let tenant = TenantId::new();
        let id = ProductId::new();
        catalog.upsert_product(Product::new(id, tenant, "SKU-1", "Widget", "pcs").unwrap());
        catalog.upsert_product(
            Product::new(id, tenant, "SKU-1", "Widget", "pcs")
                .unwrap()
                .with_reorder_threshold(25)
                .unwrap(),
        );

        assert_eq!(catalog.products(tenant).len(), 1);
        assert_eq!(catalog.product(tenant, id).unwrap().reorder_threshold(), 25);
    }
}
