//! Event publication primitives for the stock ledger.
//!
//! The ledger is the durable record; these types only describe how committed
//! movements are handed to downstream consumers (projections, alerting, reporting).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use tenant::TenantScoped;
