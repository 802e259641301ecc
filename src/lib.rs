//! # ChargeGrid CSMS core
//!
//! Charging station management core speaking OCPP 1.6-J to stations.
//!
//! ## Architecture
//!
//! - **domain**: identifiers, stations, sessions, tariffs and the directory port
//! - **application**: device links, station state, command dispatch,
//!   sessions, tariff resolution and notifications, wired by `ChargingCore`
//! - **infrastructure**: in-memory directory and the provisioning file
//! - **interfaces**: the OCPP WebSocket endpoint
//! - **support**: errors, OCPP-J framing, clock, logging, shutdown

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod support;

pub use application::{ChargingCore, SharedChargingCore};
pub use config::{default_config_path, AppConfig};
pub use support::{CoreError, CoreResult};
