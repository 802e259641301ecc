//! Charging session aggregate

pub mod model;

pub use model::{ChargingSession, EndReason, SessionStatus, StopActor, UsageTracker};
