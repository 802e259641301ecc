//! Station aggregate
//!
//! Station definitions, their charge points and the status vocabulary
//! shared by the state store and the notification feed.

pub mod model;

pub use model::{
    BootInfo, ChargePoint, ChargePointCapabilities, ChargePointSnapshot, Connector,
    ConnectorFormat, ConnectorType, DeviceStatus, MaintenanceKind, MaintenanceRecord, PowerType,
    ReportedStatus, Station, StationSnapshot,
};
