//! Notification fan-out (pub/sub)

pub mod event_bus;
pub mod types;

pub use event_bus::{create_event_bus, EventBus, EventFilter, EventSubscriber, SharedEventBus};
pub use types::*;
