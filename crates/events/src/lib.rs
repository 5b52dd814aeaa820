//! Domain events, audit envelopes and the pub/sub bus that carries them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;
pub mod tenant;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{AuditBusError, InMemoryAuditBus};
pub use tenant::TenantScoped;
