//! Low-stock classification and value ranking.
//!
//! Everything here is a pure function over a snapshot of records and catalog
//! entries. Foreign-tenant inputs are ignored rather than trusted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{Entity, ProductId, TenantId};

use crate::catalog::Product;
use crate::record::InventoryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    OutOfStock,
    Low,
    Healthy,
}

/// `quantity <= 0` is out of stock; `0 < quantity <= threshold` is low (the threshold
/// itself needs attention); anything above is healthy.
pub fn classify(quantity: i64, reorder_threshold: i64) -> StockStatus {
    if quantity <= 0 {
        StockStatus::OutOfStock
    } else if quantity <= reorder_threshold {
        StockStatus::Low
    } else {
        StockStatus::Healthy
    }
}

/// Sum on-hand quantities per product across all branches of `tenant_id`.
pub fn product_totals<'a>(
    tenant_id: TenantId,
    records: impl IntoIterator<Item = &'a InventoryRecord>,
) -> BTreeMap<ProductId, i64> {
    let mut totals = BTreeMap::new();
    for r in records {
        let key = r.key();
        if key.tenant_id != tenant_id {
            continue;
        }
        let total = totals.entry(key.product_id).or_insert(0i64);
        *total = total.saturating_add(r.quantity());
    }
    totals
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockEntry {
    pub product_id: ProductId,
    pub quantity: i64,
    pub threshold: i64,
    pub status: StockStatus,
}

/// Products that are out of stock or low, most urgent first.
///
/// Ordering: out-of-stock before low, then ascending quantity, then ascending
/// product id. Products with no record count as quantity 0.
pub fn low_stock_report<'a>(
    tenant_id: TenantId,
    products: impl IntoIterator<Item = &'a Product>,
    totals: &BTreeMap<ProductId, i64>,
) -> Vec<LowStockEntry> {
    let mut entries: Vec<LowStockEntry> = products
        .into_iter()
        .filter(|p| p.tenant_id() == tenant_id)
        .filter_map(|p| {
            let quantity = totals.get(p.id()).copied().unwrap_or(0);
            let threshold = p.reorder_threshold();
            match classify(quantity, threshold) {
                StockStatus::Healthy => None,
                status => Some(LowStockEntry {
                    product_id: *p.id(),
                    quantity,
                    threshold,
                    status,
                }),
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        a.status
            .cmp(&b.status)
            .then(a.quantity.cmp(&b.quantity))
            .then(a.product_id.cmp(&b.product_id))
    });
    entries
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuedProduct {
    pub product_id: ProductId,
    pub quantity: i64,
    /// `quantity * unit_price` in smallest currency unit.
    pub value: u64,
}

/// Top `limit` products by on-hand value, descending; ties by ascending product id.
pub fn top_by_value<'a>(
    tenant_id: TenantId,
    products: impl IntoIterator<Item = &'a Product>,
    totals: &BTreeMap<ProductId, i64>,
    limit: usize,
) -> Vec<ValuedProduct> {
    let mut ranked: Vec<ValuedProduct> = products
        .into_iter()
        .filter(|p| p.tenant_id() == tenant_id)
        .map(|p| {
            let quantity = totals.get(p.id()).copied().unwrap_or(0);
            let value = u64::try_from(quantity)
                .unwrap_or(0)
                .saturating_mul(p.unit_price());
            ValuedProduct {
                product_id: *p.id(),
                quantity,
                value,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.value.cmp(&a.value).then(a.product_id.cmp(&b.product_id)));
    ranked.truncate(limit);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stockledger_core::{BranchId, StockKey};
    use uuid::Uuid;

    fn product(tenant: TenantId, id: ProductId, price: u64, threshold: i64) -> Product {
        Product::new(id, tenant, format!("SKU-{id}"), "Item", "pcs")
            .unwrap()
            .with_unit_price(price)
            .with_reorder_threshold(threshold)
            .unwrap()
    }

    fn ordered_ids(n: u128) -> Vec<ProductId> {
        (1..=n).map(|i| ProductId::from_uuid(Uuid::from_u128(i))).collect()
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(10, 10), StockStatus::Low);
        assert_eq!(classify(11, 10), StockStatus::Healthy);
        assert_eq!(classify(0, 10), StockStatus::OutOfStock);
        assert_eq!(classify(0, 0), StockStatus::OutOfStock);
        assert_eq!(classify(1, 0), StockStatus::Healthy);
    }

    #[test]
    fn totals_saturate_instead_of_overflowing() {
        let tenant = TenantId::new();
        let product_id = ProductId::new();
        let records: Vec<_> = (0..3)
            .map(|_| {
                InventoryRecord::from_parts(
                    StockKey::new(tenant, product_id, BranchId::new()),
                    i64::MAX / 2,
                    1,
                )
            })
            .collect();

        let totals = product_totals(tenant, &records);
        assert_eq!(totals[&product_id], i64::MAX);

        let products = [product(tenant, product_id, 3, 10)];
        let ranked = top_by_value(tenant, &products, &totals, 1);
        assert_eq!(ranked[0].value, u64::MAX);
    }

    #[test]
    fn totals_sum_branches_and_skip_other_tenants() {
        let tenant = TenantId::new();
        let product_id = ProductId::new();
        let records = [
            InventoryRecord::from_parts(StockKey::new(tenant, product_id, BranchId::new()), 5, 1),
            InventoryRecord::from_parts(StockKey::new(tenant, product_id, BranchId::new()), 7, 3),
            InventoryRecord::from_parts(StockKey::new(TenantId::new(), product_id, BranchId::new()), 100, 1),
        ];
        let totals = product_totals(tenant, &records);
        assert_eq!(totals.get(&product_id), Some(&12));
        assert_eq!(totals.len(), 1);
    }

    #[test]
    fn low_stock_report_orders_most_urgent_first() {
        let tenant = TenantId::new();
        let ids = ordered_ids(4);
        let products = vec![
            product(tenant, ids[0], 100, 10),
            product(tenant, ids[1], 100, 10),
            product(tenant, ids[2], 100, 10),
            product(tenant, ids[3], 100, 10),
        ];
        let totals = BTreeMap::from([(ids[0], 8), (ids[1], 50), (ids[2], 3)]);

        let report = low_stock_report(tenant, &products, &totals);
        let order: Vec<_> = report.iter().map(|e| (e.product_id, e.status)).collect();
        assert_eq!(
            order,
            vec![
                (ids[3], StockStatus::OutOfStock),
                (ids[2], StockStatus::Low),
                (ids[0], StockStatus::Low),
            ]
        );
        assert_eq!(report[2].threshold, 10);
    }

    #[test]
    fn top_by_value_breaks_ties_by_product_id() {
        let tenant = TenantId::new();
        let ids = ordered_ids(3);
        let products = vec![
            product(tenant, ids[2], 10, 0),
            product(tenant, ids[1], 20, 0),
            product(tenant, ids[0], 5, 0),
            product(TenantId::new(), ProductId::new(), 1_000_000, 0),
        ];
        let totals = BTreeMap::from([(ids[0], 40), (ids[1], 10), (ids[2], 20)]);

        let top = top_by_value(tenant, &products, &totals, 10);
        assert_eq!(top.len(), 3);
        assert_eq!(
            top.iter().map(|v| v.product_id).collect::<Vec<_>>(),
            vec![ids[0], ids[1], ids[2]]
        );
        assert!(top.iter().all(|v| v.value == 200));

        assert_eq!(top_by_value(tenant, &products, &totals, 1).len(), 1);
        assert!(top_by_value(tenant, &products, &totals, 0).is_empty());
    }

    proptest! {
        #[test]
        fn classify_is_monotonic_in_quantity(threshold in 0i64..1_000, q in -10i64..2_000) {
            prop_assert!(classify(q, threshold) <= classify(q + 1, threshold));
        }

        #[test]
        fn ranking_is_sorted(values in prop::collection::vec((0i64..500, 0u64..1_000), 0..30)) {
            let tenant = TenantId::new();
            let ids = ordered_ids(values.len() as u128);
            let products: Vec<_> = ids
                .iter()
                .zip(&values)
                .map(|(id, (_, price))| product(tenant, *id, *price, 0))
                .collect();
            let totals: BTreeMap<_, _> = ids.iter().zip(&values).map(|(id, (q, _))| (*id, *q)).collect();

            let ranked = top_by_value(tenant, &products, &totals, usize::MAX);
            prop_assert_eq!(ranked.len(), values.len());
            for pair in ranked.windows(2) {
                prop_assert!(
                    pair[0].value > pair[1].value
                        || (pair[0].value == pair[1].value && pair[0].product_id < pair[1].product_id)
                );
            }
        }
    }
}
