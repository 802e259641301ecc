//! Station state store
//!
//! In-memory, authoritative status of every provisioned station and its
//! charge points. Only events arriving over the station's current link
//! change reported status; reads overlay link state on top of it.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::application::links::{LinkHandle, SharedLinkRegistry};
use crate::domain::{
    BootInfo, ChargePointId, ChargePointSnapshot, DeviceStatus, MaintenanceKind,
    MaintenanceRecord, ReportedStatus, Station, StationGroupId, StationId, StationSnapshot,
};
use crate::support::{CoreError, CoreResult};

/// Firmware and diagnostics entries kept per station.
pub const MAINTENANCE_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Clone)]
struct PointState {
    id: ChargePointId,
    connector_id: u32,
    reported: ReportedStatus,
    reported_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct StationState {
    station: Station,
    reported: ReportedStatus,
    reported_at: Option<DateTime<Utc>>,
    boot: Option<BootInfo>,
    maintenance: VecDeque<MaintenanceRecord>,
    points: Vec<PointState>,
}

impl StationState {
    fn new(station: Station) -> Self {
        let points = station
            .charge_points
            .iter()
            .map(|cp| PointState {
                id: cp.id.clone(),
                connector_id: cp.connector_id,
                reported: ReportedStatus::Available,
                reported_at: None,
            })
            .collect();
        Self {
            station,
            reported: ReportedStatus::Available,
            reported_at: None,
            boot: None,
            maintenance: VecDeque::new(),
            points,
        }
    }

    fn snapshot(&self, online: bool, last_seen: Option<DateTime<Utc>>) -> StationSnapshot {
        let station_status = if online {
            DeviceStatus::from(self.reported)
        } else {
            DeviceStatus::Offline
        };
        let charge_points = self
            .points
            .iter()
            .map(|p| {
                let status = if !online {
                    DeviceStatus::Offline
                } else if self.reported.blocks_charge_points() {
                    DeviceStatus::Unavailable
                } else {
                    DeviceStatus::from(p.reported)
                };
                ChargePointSnapshot {
                    id: p.id.clone(),
                    station_id: self.station.id.clone(),
                    connector_id: p.connector_id,
                    status,
                    reported_status: p.reported,
                    reported_at: p.reported_at,
                }
            })
            .collect();

        StationSnapshot {
            id: self.station.id.clone(),
            tenant_id: self.station.tenant_id.clone(),
            station_group_id: self.station.station_group_id.clone(),
            status: station_status,
            reported_status: self.reported,
            online,
            last_seen,
            protocol: self.station.protocol,
            max_power_w: self.station.max_power_w,
            boot: self.boot.clone(),
            active: self.station.active,
            charge_points,
        }
    }
}

/// Derived state of one station before and after a change.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub before: StationSnapshot,
    pub after: StationSnapshot,
}

impl StatusTransition {
    pub fn station_changed(&self) -> bool {
        self.before.status != self.after.status
    }

    /// Charge points whose derived status differs.
    pub fn changed_points(&self) -> Vec<&ChargePointSnapshot> {
        self.after
            .charge_points
            .iter()
            .filter(|after| {
                self.before
                    .charge_points
                    .iter()
                    .find(|b| b.id == after.id)
                    .map_or(true, |b| b.status != after.status)
            })
            .collect()
    }
}

pub struct StationStateStore {
    stations: DashMap<StationId, StationState>,
    point_index: DashMap<ChargePointId, StationId>,
    links: SharedLinkRegistry,
}

pub type SharedStateStore = Arc<StationStateStore>;

impl StationStateStore {
    pub fn new(links: SharedLinkRegistry) -> Self {
        Self {
            stations: DashMap::new(),
            point_index: DashMap::new(),
            links,
        }
    }

    /// Add or replace a station definition. Reported statuses of charge
    /// points that survive the update are kept.
    pub fn provision(&self, station: Station) {
        let station_id = station.id.clone();
        let mut fresh = StationState::new(station);

        if let Some(existing) = self.stations.get(&station_id) {
            fresh.reported = existing.reported;
            fresh.reported_at = existing.reported_at;
            fresh.boot = existing.boot.clone();
            fresh.maintenance = existing.maintenance.clone();
            for point in fresh.points.iter_mut() {
                if let Some(old) = existing.points.iter().find(|p| p.id == point.id) {
                    point.reported = old.reported;
                    point.reported_at = old.reported_at;
                }
            }
            for old in existing.points.iter() {
                if !fresh.points.iter().any(|p| p.id == old.id) {
                    self.point_index.remove(&old.id);
                }
            }
        }

        for point in &fresh.points {
            self.point_index.insert(point.id.clone(), station_id.clone());
        }
        info!(station_id = %station_id, charge_points = fresh.points.len(), "Station provisioned");
        self.stations.insert(station_id, fresh);
    }

    /// Keep the station and its history but refuse new sessions on it.
    pub fn deactivate(&self, station_id: &StationId) -> CoreResult<()> {
        let mut state = self
            .stations
            .get_mut(station_id)
            .ok_or_else(|| CoreError::not_found("station", station_id))?;
        state.station.active = false;
        info!(station_id = %station_id, "Station deactivated");
        Ok(())
    }

    pub fn is_provisioned(&self, station_id: &StationId) -> bool {
        self.stations.contains_key(station_id)
    }

    pub fn definition(&self, station_id: &StationId) -> Option<Station> {
        self.stations.get(station_id).map(|s| s.station.clone())
    }

    pub fn station_of(&self, charge_point_id: &ChargePointId) -> Option<StationId> {
        self.point_index.get(charge_point_id).map(|s| s.clone())
    }

    pub fn charge_point_by_connector(
        &self,
        station_id: &StationId,
        connector_id: u32,
    ) -> Option<ChargePointId> {
        self.stations.get(station_id).and_then(|s| {
            s.points
                .iter()
                .find(|p| p.connector_id == connector_id)
                .map(|p| p.id.clone())
        })
    }

    /// Apply a status reported over `link`. `charge_point_id = None`
    /// targets the station itself.
    pub fn apply_status_event(
        &self,
        link: &LinkHandle,
        charge_point_id: Option<&ChargePointId>,
        status: ReportedStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<StatusTransition> {
        if !self.links.is_current(link) {
            return Err(CoreError::LinkNotRegistered(link.station_id.clone()));
        }

        let station_id = &link.station_id;
        let mut state = self
            .stations
            .get_mut(station_id)
            .ok_or_else(|| CoreError::not_found("station", station_id))?;
        let before = self.snapshot_of(&state);

        let stale = || CoreError::StaleEvent {
            station_id: station_id.clone(),
            charge_point_id: charge_point_id.cloned(),
        };

        match charge_point_id {
            None => {
                if state.reported_at.is_some_and(|prev| at < prev) {
                    debug!(station_id = %station_id, "Discarding stale station status");
                    return Err(stale());
                }
                state.reported = status;
                state.reported_at = Some(at);
            }
            Some(cp_id) => {
                let point = state
                    .points
                    .iter_mut()
                    .find(|p| &p.id == cp_id)
                    .ok_or_else(|| CoreError::not_found("charge point", cp_id))?;
                if point.reported_at.is_some_and(|prev| at < prev) {
                    debug!(
                        station_id = %station_id,
                        charge_point_id = %cp_id,
                        "Discarding stale charge point status"
                    );
                    return Err(stale());
                }
                point.reported = status;
                point.reported_at = Some(at);
            }
        }

        let after = self.snapshot_of(&state);
        Ok(StatusTransition { before, after })
    }

    pub fn record_boot(&self, link: &LinkHandle, boot: BootInfo) -> CoreResult<()> {
        if !self.links.is_current(link) {
            return Err(CoreError::LinkNotRegistered(link.station_id.clone()));
        }
        let mut state = self
            .stations
            .get_mut(&link.station_id)
            .ok_or_else(|| CoreError::not_found("station", &link.station_id))?;
        state.boot = Some(boot);
        Ok(())
    }

    pub fn record_maintenance(
        &self,
        link: &LinkHandle,
        kind: MaintenanceKind,
        status: impl Into<String>,
        at: DateTime<Utc>,
    ) -> CoreResult<MaintenanceRecord> {
        if !self.links.is_current(link) {
            return Err(CoreError::LinkNotRegistered(link.station_id.clone()));
        }
        let mut state = self
            .stations
            .get_mut(&link.station_id)
            .ok_or_else(|| CoreError::not_found("station", &link.station_id))?;

        let record = MaintenanceRecord {
            kind,
            status: status.into(),
            recorded_at: at,
        };
        if state.maintenance.len() == MAINTENANCE_HISTORY_LIMIT {
            state.maintenance.pop_front();
        }
        state.maintenance.push_back(record.clone());
        Ok(record)
    }

    /// Oldest first.
    pub fn firmware_history(&self, station_id: &StationId) -> CoreResult<Vec<MaintenanceRecord>> {
        self.stations
            .get(station_id)
            .map(|s| s.maintenance.iter().cloned().collect())
            .ok_or_else(|| CoreError::not_found("station", station_id))
    }

    pub fn station_status(&self, station_id: &StationId) -> CoreResult<StationSnapshot> {
        self.stations
            .get(station_id)
            .map(|s| self.snapshot_of(&s))
            .ok_or_else(|| CoreError::not_found("station", station_id))
    }

    pub fn charge_point_status(
        &self,
        charge_point_id: &ChargePointId,
    ) -> CoreResult<ChargePointSnapshot> {
        let station_id = self
            .station_of(charge_point_id)
            .ok_or_else(|| CoreError::not_found("charge point", charge_point_id))?;
        self.station_status(&station_id)?
            .charge_points
            .into_iter()
            .find(|p| &p.id == charge_point_id)
            .ok_or_else(|| CoreError::not_found("charge point", charge_point_id))
    }

    /// Stations belonging to any of `groups`, ordered by id.
    pub fn snapshot_groups(&self, groups: &[StationGroupId]) -> Vec<StationSnapshot> {
        let mut snapshots: Vec<StationSnapshot> = self
            .stations
            .iter()
            .filter(|s| groups.contains(&s.station.station_group_id))
            .map(|s| self.snapshot_of(&s))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.iter().map(|s| s.key().clone()).collect()
    }

    fn snapshot_of(&self, state: &StationState) -> StationSnapshot {
        let id = &state.station.id;
        state.snapshot(self.links.is_online(id), self.links.last_seen(id))
    }
}
