//! Caller-supplied tenant context.

use serde::{Deserialize, Serialize};

use crate::id::{TenantId, UserId};

/// Tenant + actor resolved and authorized by the calling layer.
///
/// The engine trusts the tenant id for scoping but still checks that every product
/// and branch it is handed belongs to that tenant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub actor: UserId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, actor: UserId) -> Self {
        Self { tenant_id, actor }
    }
}
