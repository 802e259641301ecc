//! Station and charge point entities

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ocpp::OcppVersion;
use crate::domain::{ChargePointId, StationGroupId, StationId, TenantId};

/// Status a device can report for itself or one of its charge points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportedStatus {
    Available,
    /// Preparing, charging, suspended or finishing: a vehicle holds the point.
    Occupied,
    Reserved,
    Unavailable,
    OutOfOrder,
    Faulted,
}

impl ReportedStatus {
    /// A station in one of these states makes all its charge points read
    /// as unavailable.
    pub fn blocks_charge_points(&self) -> bool {
        matches!(self, Self::Unavailable | Self::OutOfOrder | Self::Faulted)
    }
}

/// Status as read by collaborators: the reported status with the link
/// state overlaid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceStatus {
    Available,
    Occupied,
    Reserved,
    Unavailable,
    OutOfOrder,
    Faulted,
    Offline,
}

impl DeviceStatus {
    /// An active session cannot continue on a point in this state.
    pub fn ends_sessions(&self) -> bool {
        matches!(
            self,
            Self::Unavailable | Self::OutOfOrder | Self::Faulted | Self::Offline
        )
    }
}

impl From<ReportedStatus> for DeviceStatus {
    fn from(status: ReportedStatus) -> Self {
        match status {
            ReportedStatus::Available => Self::Available,
            ReportedStatus::Occupied => Self::Occupied,
            ReportedStatus::Reserved => Self::Reserved,
            ReportedStatus::Unavailable => Self::Unavailable,
            ReportedStatus::OutOfOrder => Self::OutOfOrder,
            ReportedStatus::Faulted => Self::Faulted,
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Available => "Available",
            Self::Occupied => "Occupied",
            Self::Reserved => "Reserved",
            Self::Unavailable => "Unavailable",
            Self::OutOfOrder => "OutOfOrder",
            Self::Faulted => "Faulted",
            Self::Offline => "Offline",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorType {
    Type1,
    Type2,
    Ccs1,
    Ccs2,
    Chademo,
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorFormat {
    Socket,
    Cable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerType {
    Ac1Phase,
    Ac3Phase,
    Dc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_type: ConnectorType,
    pub format: ConnectorFormat,
    pub power_type: PowerType,
    pub max_power_w: u32,
    pub max_current_a: u32,
    pub max_voltage_v: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargePointCapabilities {
    pub smart_charging: bool,
    pub remote_start_stop: bool,
    pub reservation: bool,
}

impl Default for ChargePointCapabilities {
    fn default() -> Self {
        Self {
            smart_charging: false,
            remote_start_stop: true,
            reservation: false,
        }
    }
}

/// An individually addressable EVSE. `connector_id` is the number the
/// station uses for it on the wire (1-based, OCPP 1.6 convention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePoint {
    pub id: ChargePointId,
    pub connector_id: u32,
    pub connectors: Vec<Connector>,
    pub capabilities: ChargePointCapabilities,
}

impl ChargePoint {
    pub fn new(id: impl Into<ChargePointId>, connector_id: u32) -> Self {
        Self {
            id: id.into(),
            connector_id,
            connectors: Vec::new(),
            capabilities: ChargePointCapabilities::default(),
        }
    }

    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connectors.push(connector);
        self
    }
}

/// Station definition as provisioned by the administration side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub tenant_id: TenantId,
    pub station_group_id: StationGroupId,
    /// Identity the device authenticates with, if different from `id`.
    pub network_identity: Option<String>,
    pub protocol: OcppVersion,
    pub max_power_w: u32,
    pub charge_points: Vec<ChargePoint>,
    /// Deactivated stations keep their history but accept no new sessions.
    pub active: bool,
}

impl Station {
    pub fn new(
        id: impl Into<StationId>,
        tenant_id: impl Into<TenantId>,
        station_group_id: impl Into<StationGroupId>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            station_group_id: station_group_id.into(),
            network_identity: None,
            protocol: OcppVersion::V16,
            max_power_w: 0,
            charge_points: Vec::new(),
            active: true,
        }
    }

    pub fn with_max_power_w(mut self, max_power_w: u32) -> Self {
        self.max_power_w = max_power_w;
        self
    }

    pub fn with_charge_point(mut self, charge_point: ChargePoint) -> Self {
        self.charge_points.push(charge_point);
        self
    }

    pub fn connector_count(&self) -> usize {
        self.charge_points.len()
    }
}

/// Identity reported in BootNotification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootInfo {
    pub vendor: String,
    pub model: String,
    pub serial_number: Option<String>,
    pub firmware_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaintenanceKind {
    Firmware,
    Diagnostics,
}

/// One entry of the firmware / diagnostics history of a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceRecord {
    pub kind: MaintenanceKind,
    pub status: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargePointSnapshot {
    pub id: ChargePointId,
    pub station_id: StationId,
    pub connector_id: u32,
    /// What collaborators should show.
    pub status: DeviceStatus,
    /// Last status the device itself reported for this point.
    pub reported_status: ReportedStatus,
    pub reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub id: StationId,
    pub tenant_id: TenantId,
    pub station_group_id: StationGroupId,
    pub status: DeviceStatus,
    pub reported_status: ReportedStatus,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub protocol: OcppVersion,
    pub max_power_w: u32,
    pub boot: Option<BootInfo>,
    pub active: bool,
    pub charge_points: Vec<ChargePointSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocking_station_statuses() {
        assert!(ReportedStatus::Unavailable.blocks_charge_points());
        assert!(ReportedStatus::OutOfOrder.blocks_charge_points());
        assert!(!ReportedStatus::Occupied.blocks_charge_points());
    }

    #[test]
    fn offline_ends_sessions_but_occupied_does_not() {
        assert!(DeviceStatus::Offline.ends_sessions());
        assert!(!DeviceStatus::Occupied.ends_sessions());
    }

    #[test]
    fn builder_counts_charge_points() {
        let station = Station::new("ST-1", "T1", "SG-1")
            .with_max_power_w(150_000)
            .with_charge_point(ChargePoint::new("CP-1", 1))
            .with_charge_point(ChargePoint::new("CP-2", 2));
        assert_eq!(station.connector_count(), 2);
        assert!(station.active);
    }
}
