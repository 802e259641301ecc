//! Background services

mod heartbeat_monitor;
mod station_worker;

pub use heartbeat_monitor::{sweep, ConnectionStats, HeartbeatMonitor};
pub use station_worker::{InboundSender, StationWorker};
