use stockledger_core::TenantId;

use crate::EventEnvelope;

/// Helper trait for tenant-scoped messages.
///
/// Consumers pinned to one tenant use this to drop foreign messages before touching
/// any state.
pub trait TenantScoped {
    fn tenant_id(&self) -> TenantId;

    fn belongs_to(&self, tenant_id: TenantId) -> bool {
        self.tenant_id() == tenant_id
    }
}

impl<E> TenantScoped for EventEnvelope<E> {
    fn tenant_id(&self) -> TenantId {
        EventEnvelope::tenant_id(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{BranchId, ProductId, StockKey};

    #[test]
    fn envelope_reports_stream_tenant() {
        let tenant = TenantId::new();
        let key = StockKey::new(tenant, ProductId::new(), BranchId::new());
        let env = EventEnvelope::new(uuid::Uuid::now_v7(), key, "inventory.stock", 1, ());

        assert!(env.belongs_to(tenant));
        assert!(!env.belongs_to(TenantId::new()));
    }
}
