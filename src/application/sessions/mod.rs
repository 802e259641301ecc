//! Charging session lifecycle

pub mod access;
pub mod manager;

pub use access::{AccessGate, TagVerdict};
pub use manager::{MeterSample, SessionManager, SharedSessionManager, StartDecision};
