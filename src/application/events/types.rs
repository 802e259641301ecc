//! Notification events
//!
//! Everything collaborators can observe about stations, charge points and
//! sessions. Events carry the tenant so subscribers can filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tariff::Money;
use crate::domain::{
    BootInfo, ChargePointId, DeviceStatus, EndReason, MaintenanceRecord, OcppVersion,
    ReportedStatus, SessionId, SessionStatus, StationId, TenantId, UserId,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    StationConnected(StationConnectedEvent),
    StationDisconnected(StationDisconnectedEvent),
    /// Station-level status, including Offline.
    StationStatusChanged(StationStatusChangedEvent),
    ChargePointStatusChanged(ChargePointStatusChangedEvent),
    StationBooted(StationBootedEvent),
    MaintenanceReported(MaintenanceReportedEvent),
    SessionStateChanged(SessionStateChangedEvent),
    /// Running cost while active, final cost on completion.
    SessionCostUpdated(SessionCostUpdatedEvent),
}

impl Event {
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::StationConnected(_) => "station_connected",
            Event::StationDisconnected(_) => "station_disconnected",
            Event::StationStatusChanged(_) => "station_status_changed",
            Event::ChargePointStatusChanged(_) => "charge_point_status_changed",
            Event::StationBooted(_) => "station_booted",
            Event::MaintenanceReported(_) => "maintenance_reported",
            Event::SessionStateChanged(_) => "session_state_changed",
            Event::SessionCostUpdated(_) => "session_cost_updated",
        }
    }

    pub fn station_id(&self) -> &StationId {
        match self {
            Event::StationConnected(e) => &e.station_id,
            Event::StationDisconnected(e) => &e.station_id,
            Event::StationStatusChanged(e) => &e.station_id,
            Event::ChargePointStatusChanged(e) => &e.station_id,
            Event::StationBooted(e) => &e.station_id,
            Event::MaintenanceReported(e) => &e.station_id,
            Event::SessionStateChanged(e) => &e.station_id,
            Event::SessionCostUpdated(e) => &e.station_id,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        match self {
            Event::StationConnected(e) => &e.tenant_id,
            Event::StationDisconnected(e) => &e.tenant_id,
            Event::StationStatusChanged(e) => &e.tenant_id,
            Event::ChargePointStatusChanged(e) => &e.tenant_id,
            Event::StationBooted(e) => &e.tenant_id,
            Event::MaintenanceReported(e) => &e.tenant_id,
            Event::SessionStateChanged(e) => &e.tenant_id,
            Event::SessionCostUpdated(e) => &e.tenant_id,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Event::SessionStateChanged(e) => Some(&e.session_id),
            Event::SessionCostUpdated(e) => Some(&e.session_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConnectedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub protocol: OcppVersion,
    pub remote_addr: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    Closed,
    /// A newer connection for the same station took over.
    Replaced,
    /// No heartbeat within the staleness window.
    Stale,
    Shutdown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationDisconnectedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub reason: DisconnectReason,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationStatusChangedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub status: DeviceStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargePointStatusChangedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub charge_point_id: ChargePointId,
    pub status: DeviceStatus,
    pub reported_status: ReportedStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationBootedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub boot: BootInfo,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceReportedEvent {
    pub station_id: StationId,
    pub tenant_id: TenantId,
    pub record: MaintenanceRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStateChangedEvent {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub station_id: StationId,
    pub charge_point_id: ChargePointId,
    pub status: SessionStatus,
    pub reason: Option<EndReason>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCostUpdatedEvent {
    pub session_id: SessionId,
    pub tenant_id: TenantId,
    pub station_id: StationId,
    pub energy_wh: i64,
    pub total: Money,
    /// Set once the session ended and the cost is frozen.
    pub is_final: bool,
    pub timestamp: DateTime<Utc>,
}

/// Envelope delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventMessage {
    pub fn new(event: Event) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = Event::StationStatusChanged(StationStatusChangedEvent {
            station_id: "ST-1".into(),
            tenant_id: "T1".into(),
            status: DeviceStatus::Offline,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(EventMessage::new(event)).unwrap();
        assert_eq!(json["type"], "StationStatusChanged");
        assert_eq!(json["data"]["station_id"], "ST-1");
        assert_eq!(json["data"]["status"], "Offline");
    }
}
