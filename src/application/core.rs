//! Charging core
//!
//! Wires the registries together and exposes the operations collaborators
//! call. Device-side entry points (`connect_station`, `apply_status`, ...)
//! are used by the station worker; everything else is the public API.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::commands::{
    CommandDispatcher, ConfigurationChange, ConfigurationReport, DiagnosticsWindow,
    SharedCommandDispatcher,
};
use crate::application::events::{
    create_event_bus, ChargePointStatusChangedEvent, DisconnectReason, Event, EventFilter,
    EventSubscriber, MaintenanceReportedEvent, SharedEventBus, StationBootedEvent,
    StationConnectedEvent, StationDisconnectedEvent, StationStatusChangedEvent,
};
use crate::application::links::{DeviceLinkRegistry, LinkHandle, SharedLinkRegistry};
use crate::application::sessions::{AccessGate, SessionManager, SharedSessionManager};
use crate::application::state::{SharedStateStore, StationStateStore, StatusTransition};
use crate::application::tariffs::{SharedTariffCatalog, TariffCatalog, TariffResolver};
use crate::config::AppConfig;
use crate::domain::tariff::LinkTarget;
use crate::domain::{
    BootInfo, ChargePointId, ChargePointSnapshot, ChargingSession, CostBreakdown, DeviceStatus,
    DirectoryPort, EndReason, MaintenanceKind, MaintenanceRecord, Money, OcppVersion,
    ReportedStatus, SessionId, Station, StationId, StationSnapshot, StopActor, Tariff, TariffId,
    TariffLink, TenantId, UserId, VehicleId,
};
use crate::support::{CoreError, CoreResult, SharedClock, SystemClock};

pub struct ChargingCore {
    links: SharedLinkRegistry,
    store: SharedStateStore,
    dispatcher: SharedCommandDispatcher,
    sessions: SharedSessionManager,
    catalog: SharedTariffCatalog,
    access: AccessGate,
    events: SharedEventBus,
    clock: SharedClock,
    advertised_heartbeat_secs: u32,
}

pub type SharedChargingCore = Arc<ChargingCore>;

impl ChargingCore {
    pub fn new(config: &AppConfig, directory: Arc<dyn DirectoryPort>) -> Self {
        Self::with_clock(config, directory, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: &AppConfig,
        directory: Arc<dyn DirectoryPort>,
        clock: SharedClock,
    ) -> Self {
        let links = Arc::new(DeviceLinkRegistry::new(
            config.staleness_window(),
            clock.clone(),
        ));
        let store = Arc::new(StationStateStore::new(links.clone()));
        let dispatcher = Arc::new(CommandDispatcher::new(
            links.clone(),
            config.command_timeout(),
        ));
        let catalog = Arc::new(TariffCatalog::new());
        let resolver = Arc::new(TariffResolver::new(
            catalog.clone(),
            directory.clone(),
            clock.clone(),
        ));
        let access = AccessGate::new(directory);
        let events = create_event_bus(config.notifications.capacity);
        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            dispatcher.clone(),
            resolver,
            access.clone(),
            events.clone(),
            clock.clone(),
            config.sessions.idle_power_threshold_w,
        ));

        Self {
            links,
            store,
            dispatcher,
            sessions,
            catalog,
            access,
            events,
            clock,
            advertised_heartbeat_secs: config.heartbeat.advertised_interval_secs,
        }
    }

    pub fn links(&self) -> &SharedLinkRegistry {
        &self.links
    }

    pub fn store(&self) -> &SharedStateStore {
        &self.store
    }

    pub fn dispatcher(&self) -> &SharedCommandDispatcher {
        &self.dispatcher
    }

    pub fn sessions(&self) -> &SharedSessionManager {
        &self.sessions
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Heartbeat interval told to stations at boot.
    pub fn advertised_heartbeat_secs(&self) -> u32 {
        self.advertised_heartbeat_secs
    }

    // Provisioning

    pub fn provision_station(&self, station: Station) {
        self.store.provision(station);
    }

    pub fn deactivate_station(&self, station_id: &StationId) -> CoreResult<()> {
        self.store.deactivate(station_id)
    }

    pub fn upsert_tariff(&self, tariff: Tariff) {
        self.catalog.upsert(tariff);
    }

    pub fn link_tariff(&self, tenant_id: &TenantId, link: TariffLink) -> CoreResult<()> {
        self.catalog.link(tenant_id, link)
    }

    pub fn unlink_tariff(&self, tenant_id: &TenantId, tariff_id: &TariffId, target: &LinkTarget) {
        self.catalog.unlink(tenant_id, tariff_id, target);
    }

    // Status queries

    pub fn station_status(&self, station_id: &StationId) -> CoreResult<StationSnapshot> {
        self.store.station_status(station_id)
    }

    pub fn charge_point_status(
        &self,
        charge_point_id: &ChargePointId,
    ) -> CoreResult<ChargePointSnapshot> {
        self.store.charge_point_status(charge_point_id)
    }

    /// Stations of the user's tenant that one of the user's groups may use.
    pub async fn visible_stations(&self, user_id: &UserId) -> CoreResult<Vec<StationSnapshot>> {
        let user = self
            .access
            .directory()
            .user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        let groups = self.access.visible_station_groups(user_id).await?;
        Ok(self
            .store
            .snapshot_groups(&groups)
            .into_iter()
            .filter(|s| s.tenant_id == user.tenant_id)
            .collect())
    }

    pub fn firmware_history(&self, station_id: &StationId) -> CoreResult<Vec<MaintenanceRecord>> {
        self.store.firmware_history(station_id)
    }

    // Sessions

    pub async fn start_session(
        &self,
        user_id: &UserId,
        charge_point_id: &ChargePointId,
        vehicle_id: Option<&VehicleId>,
    ) -> CoreResult<ChargingSession> {
        self.sessions
            .start_session(user_id, charge_point_id, vehicle_id)
            .await
    }

    pub async fn stop_session(
        &self,
        session_id: &SessionId,
        actor: StopActor,
    ) -> CoreResult<ChargingSession> {
        self.sessions.stop_session(session_id, actor).await
    }

    pub fn active_sessions(&self, user_id: &UserId) -> Vec<ChargingSession> {
        self.sessions.active_sessions(user_id)
    }

    pub fn session(&self, session_id: &SessionId) -> CoreResult<ChargingSession> {
        self.sessions.session(session_id)
    }

    pub fn session_cost_breakdown(&self, session_id: &SessionId) -> CoreResult<CostBreakdown> {
        self.sessions.session_cost_breakdown(session_id)
    }

    pub fn current_cost(&self, session_id: &SessionId) -> CoreResult<Money> {
        self.sessions.current_cost(session_id)
    }

    // Station commands

    /// All keys when `keys` is empty.
    pub async fn station_configuration(
        &self,
        station_id: &StationId,
        keys: Vec<String>,
    ) -> CoreResult<ConfigurationReport> {
        self.ensure_station(station_id)?;
        self.dispatcher.get_configuration(station_id, keys).await
    }

    pub async fn change_station_configuration(
        &self,
        station_id: &StationId,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> CoreResult<ConfigurationChange> {
        self.ensure_station(station_id)?;
        self.dispatcher
            .change_configuration(station_id, key.into(), value.into())
            .await
    }

    /// Ask the station to upload its logs to `upload_url`. Returns the file
    /// name the station announced, if any.
    pub async fn request_station_diagnostics(
        &self,
        station_id: &StationId,
        upload_url: impl Into<String>,
        window: Option<DiagnosticsWindow>,
    ) -> CoreResult<Option<String>> {
        self.ensure_station(station_id)?;
        self.dispatcher
            .request_diagnostics(station_id, upload_url.into(), window)
            .await
    }

    fn ensure_station(&self, station_id: &StationId) -> CoreResult<()> {
        if self.store.is_provisioned(station_id) {
            Ok(())
        } else {
            Err(CoreError::not_found("station", station_id))
        }
    }

    // Notifications

    pub fn subscribe(&self) -> EventSubscriber {
        self.events.subscribe()
    }

    /// Events of one tenant or one station only.
    pub fn subscribe_filtered(&self, filter: EventFilter) -> EventSubscriber {
        self.events.subscribe_filtered(filter)
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    // Device side

    pub fn is_known_station(&self, station_id: &StationId) -> bool {
        self.store.is_provisioned(station_id)
    }

    /// Register a new connection for a provisioned station.
    pub fn connect_station(
        &self,
        station_id: &StationId,
        protocol: OcppVersion,
        outbound: mpsc::UnboundedSender<String>,
        remote_addr: Option<String>,
    ) -> CoreResult<LinkHandle> {
        let before = self.store.station_status(station_id)?;
        let (handle, evicted) = self.links.register(station_id, protocol, outbound);
        let now = self.clock.now();

        if evicted.is_some() {
            self.dispatcher.cleanup_station(station_id);
            self.events
                .publish(Event::StationDisconnected(StationDisconnectedEvent {
                    station_id: station_id.clone(),
                    tenant_id: before.tenant_id.clone(),
                    reason: DisconnectReason::Replaced,
                    timestamp: now,
                }));
        }
        self.events
            .publish(Event::StationConnected(StationConnectedEvent {
                station_id: station_id.clone(),
                tenant_id: before.tenant_id.clone(),
                protocol,
                remote_addr,
                timestamp: now,
            }));

        let after = self.store.station_status(station_id)?;
        self.publish_transition(&StatusTransition { before, after });
        Ok(handle)
    }

    /// Connection closed. Only the current link takes the station offline.
    pub async fn disconnect_station(&self, handle: &LinkHandle, reason: DisconnectReason) {
        let station_id = &handle.station_id;
        let Ok(before) = self.store.station_status(station_id) else {
            return;
        };
        if !self.links.disconnect(handle) {
            return;
        }
        self.dispatcher.cleanup_station(station_id);
        self.events
            .publish(Event::StationDisconnected(StationDisconnectedEvent {
                station_id: station_id.clone(),
                tenant_id: before.tenant_id.clone(),
                reason,
                timestamp: self.clock.now(),
            }));

        if let Ok(after) = self.store.station_status(station_id) {
            let transition = StatusTransition { before, after };
            self.publish_transition(&transition);
            self.sessions.handle_status_transition(&transition).await;
        }
    }

    /// The heartbeat monitor found the station's link stale.
    pub async fn mark_stale(&self, station_id: &StationId) {
        let Ok(snapshot) = self.store.station_status(station_id) else {
            return;
        };
        warn!(station_id = %station_id, last_seen = ?snapshot.last_seen, "Station went offline");
        self.dispatcher.cleanup_station(station_id);

        let now = self.clock.now();
        self.events
            .publish(Event::StationStatusChanged(StationStatusChangedEvent {
                station_id: station_id.clone(),
                tenant_id: snapshot.tenant_id.clone(),
                status: DeviceStatus::Offline,
                timestamp: now,
            }));
        for point in &snapshot.charge_points {
            self.publish_point(&snapshot, point, now);
        }
        self.sessions
            .cancel_station_sessions(station_id, EndReason::StationOffline)
            .await;
    }

    /// Any inbound traffic counts as a heartbeat.
    pub fn touch(&self, handle: &LinkHandle) -> CoreResult<()> {
        let revived = self.links.heartbeat(handle, self.clock.now())?;
        if revived {
            let snapshot = self.store.station_status(&handle.station_id)?;
            let now = self.clock.now();
            self.events
                .publish(Event::StationStatusChanged(StationStatusChangedEvent {
                    station_id: snapshot.id.clone(),
                    tenant_id: snapshot.tenant_id.clone(),
                    status: snapshot.status,
                    timestamp: now,
                }));
            for point in &snapshot.charge_points {
                self.publish_point(&snapshot, point, now);
            }
        }
        Ok(())
    }

    /// Apply a device status report. Stale reports are dropped here.
    pub async fn apply_status(
        &self,
        handle: &LinkHandle,
        charge_point_id: Option<&ChargePointId>,
        status: ReportedStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let transition = match self
            .store
            .apply_status_event(handle, charge_point_id, status, at)
        {
            Ok(transition) => transition,
            Err(CoreError::StaleEvent { .. }) => {
                debug!(station_id = %handle.station_id, ?charge_point_id, "Stale status report dropped");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.publish_transition(&transition);
        self.sessions.handle_status_transition(&transition).await;
        Ok(())
    }

    pub fn record_boot(&self, handle: &LinkHandle, boot: BootInfo) -> CoreResult<()> {
        self.store.record_boot(handle, boot.clone())?;
        let tenant_id = self.store.station_status(&handle.station_id)?.tenant_id;
        info!(
            station_id = %handle.station_id,
            vendor = boot.vendor.as_str(),
            model = boot.model.as_str(),
            "Station booted"
        );
        self.events.publish(Event::StationBooted(StationBootedEvent {
            station_id: handle.station_id.clone(),
            tenant_id,
            boot,
            timestamp: self.clock.now(),
        }));
        Ok(())
    }

    pub fn record_maintenance(
        &self,
        handle: &LinkHandle,
        kind: MaintenanceKind,
        status: impl Into<String>,
    ) -> CoreResult<()> {
        let record = self
            .store
            .record_maintenance(handle, kind, status, self.clock.now())?;
        let tenant_id = self.store.station_status(&handle.station_id)?.tenant_id;
        self.events
            .publish(Event::MaintenanceReported(MaintenanceReportedEvent {
                station_id: handle.station_id.clone(),
                tenant_id,
                record,
            }));
        Ok(())
    }

    fn publish_transition(&self, transition: &StatusTransition) {
        let now = self.clock.now();
        let after = &transition.after;
        if transition.station_changed() {
            info!(
                station_id = %after.id,
                from = %transition.before.status,
                to = %after.status,
                "Station status changed"
            );
            self.events
                .publish(Event::StationStatusChanged(StationStatusChangedEvent {
                    station_id: after.id.clone(),
                    tenant_id: after.tenant_id.clone(),
                    status: after.status,
                    timestamp: now,
                }));
        }
        for point in transition.changed_points() {
            self.publish_point(after, point, now);
        }
    }

    fn publish_point(&self, station: &StationSnapshot, point: &ChargePointSnapshot, at: DateTime<Utc>) {
        self.events
            .publish(Event::ChargePointStatusChanged(ChargePointStatusChangedEvent {
                station_id: station.id.clone(),
                tenant_id: station.tenant_id.clone(),
                charge_point_id: point.id.clone(),
                status: point.status,
                reported_status: point.reported_status,
                timestamp: at,
            }));
    }
}
