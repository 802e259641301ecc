//! Charging core: device links, station state, commands, sessions,
//! tariffs and notifications, wired together by [`ChargingCore`].

pub mod commands;
pub mod core;
pub mod events;
pub mod handlers;
pub mod links;
pub mod services;
pub mod sessions;
pub mod state;
pub mod tariffs;

pub use self::core::{ChargingCore, SharedChargingCore};
pub use commands::{
    Command, CommandDispatcher, CommandReply, ConfigurationChange, ConfigurationReport,
    DiagnosticsWindow, SharedCommandDispatcher,
};
pub use events::{create_event_bus, Event, EventBus, EventSubscriber, SharedEventBus};
pub use handlers::OcppHandlerV16;
pub use links::{DeviceLinkRegistry, LinkHandle, SharedLinkRegistry};
pub use services::{HeartbeatMonitor, StationWorker};
pub use sessions::{AccessGate, MeterSample, SessionManager, SharedSessionManager, TagVerdict};
pub use state::{SharedStateStore, StationStateStore};
pub use tariffs::{compute_cost, TariffCatalog, TariffResolver};
