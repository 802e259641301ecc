//! Station state store

pub mod store;

pub use store::{SharedStateStore, StationStateStore, StatusTransition, MAINTENANCE_HISTORY_LIMIT};
