//! Process-wide logging setup shared by the stock ledger binaries.

/// Initialize structured JSON logging, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
