//! Tenant-isolated read model storage.
//!
//! Read models (catalog snapshots, projected stock levels) are disposable: they can
//! always be rebuilt from the movement ledger or reloaded from the owning service.

pub mod tenant_store;

pub use tenant_store::{InMemoryTenantStore, TenantStore};
