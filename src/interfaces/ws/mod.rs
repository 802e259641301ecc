//! WebSocket interfaces
//!
//! - `ocpp_server`: OCPP 1.6-J endpoint for stations

pub mod ocpp_server;

pub use ocpp_server::{extract_station_id, OcppServer};
