//! Session manager
//!
//! Owns the charging-session state machine of every charge point:
//!
//! ```text
//! Requested -> Active -> Completed
//!     |           \
//!     v            -> Cancelled
//!   Failed
//! ```
//!
//! Start, stop and device-driven transitions for one charge point are
//! serialized by a per-charge-point async lock. The lock is never held while
//! waiting on a device reply; a claim on the charge point is taken instead
//! so racing starts fail fast with `ChargePointBusy`.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use super::access::{AccessGate, TagVerdict};
use crate::application::commands::SharedCommandDispatcher;
use crate::application::events::{
    Event, SessionCostUpdatedEvent, SessionStateChangedEvent, SharedEventBus,
};
use crate::application::state::{SharedStateStore, StatusTransition};
use crate::application::tariffs::{compute_cost, TariffResolver};
use crate::domain::{
    ChargePointId, ChargingSession, CostBreakdown, DeviceStatus, EndReason, Money, SessionId,
    SessionStatus, StationId, StopActor, Tariff, UserId, VehicleId,
};
use crate::support::{CoreError, CoreResult, SharedClock};

/// One meter reading as reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct MeterSample {
    pub at: DateTime<Utc>,
    /// Energy register (Energy.Active.Import.Register) in Wh.
    pub register_wh: Option<i64>,
    pub power_w: Option<f64>,
    pub state_of_charge: Option<f64>,
}

/// Answer to a device-side StartTransaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartDecision {
    pub verdict: TagVerdict,
    /// Zero when the transaction was refused.
    pub transaction_id: i32,
}

impl StartDecision {
    fn accepted(transaction_id: i32) -> Self {
        Self {
            verdict: TagVerdict::Accepted,
            transaction_id,
        }
    }

    fn refused(verdict: TagVerdict) -> Self {
        Self {
            verdict,
            transaction_id: 0,
        }
    }
}

enum Ending {
    Complete,
    Cancel,
}

pub struct SessionManager {
    sessions: DashMap<SessionId, ChargingSession>,
    applied_tariffs: DashMap<SessionId, Tariff>,
    /// Charge point -> its Requested or Active session.
    claims: DashMap<ChargePointId, SessionId>,
    transactions: DashMap<(StationId, i32), SessionId>,
    point_locks: DashMap<ChargePointId, Arc<Mutex<()>>>,
    stopping: DashSet<SessionId>,
    next_transaction_id: AtomicI32,
    store: SharedStateStore,
    dispatcher: SharedCommandDispatcher,
    resolver: Arc<TariffResolver>,
    access: AccessGate,
    events: SharedEventBus,
    clock: SharedClock,
    idle_power_threshold_w: f64,
}

pub type SharedSessionManager = Arc<SessionManager>;

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SharedStateStore,
        dispatcher: SharedCommandDispatcher,
        resolver: Arc<TariffResolver>,
        access: AccessGate,
        events: SharedEventBus,
        clock: SharedClock,
        idle_power_threshold_w: f64,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            applied_tariffs: DashMap::new(),
            claims: DashMap::new(),
            transactions: DashMap::new(),
            point_locks: DashMap::new(),
            stopping: DashSet::new(),
            next_transaction_id: AtomicI32::new(1),
            store,
            dispatcher,
            resolver,
            access,
            events,
            clock,
            idle_power_threshold_w,
        }
    }

    async fn lock_point(&self, charge_point_id: &ChargePointId) -> OwnedMutexGuard<()> {
        let lock = self
            .point_locks
            .entry(charge_point_id.clone())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn allocate_transaction_id(&self) -> i32 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst)
    }

    // Start

    /// Start a session on behalf of `user_id`. Resolves once the device
    /// answered the remote start; the session is Active on success.
    pub async fn start_session(
        &self,
        user_id: &UserId,
        charge_point_id: &ChargePointId,
        vehicle_id: Option<&VehicleId>,
    ) -> CoreResult<ChargingSession> {
        let station_id = self
            .store
            .station_of(charge_point_id)
            .ok_or_else(|| CoreError::not_found("charge point", charge_point_id))?;
        let station = self
            .store
            .definition(&station_id)
            .ok_or_else(|| CoreError::not_found("station", &station_id))?;
        let charge_point = station
            .charge_points
            .iter()
            .find(|cp| &cp.id == charge_point_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("charge point", charge_point_id))?;

        self.access.check_station_access(user_id, &station).await?;
        let method = self.access.authorization_method(user_id).await?;
        if let Some(vehicle_id) = vehicle_id {
            self.access.check_vehicle(user_id, vehicle_id).await?;
        }
        if !station.active {
            return Err(CoreError::ChargePointUnavailable {
                charge_point_id: charge_point_id.clone(),
                status: "StationDeactivated".to_string(),
            });
        }
        if !charge_point.capabilities.remote_start_stop {
            return Err(CoreError::ChargePointUnavailable {
                charge_point_id: charge_point_id.clone(),
                status: "RemoteStartUnsupported".to_string(),
            });
        }
        let tariff = self.resolver.resolve_tariff(user_id, &station.tenant_id).await?;

        let requested = {
            let _guard = self.lock_point(charge_point_id).await;
            self.ensure_point_free(charge_point_id)?;

            let mut session = ChargingSession::requested(
                station.tenant_id.clone(),
                user_id.clone(),
                station_id.clone(),
                charge_point_id.clone(),
                charge_point.connector_id,
                method.id_tag.clone(),
                self.clock.now(),
            );
            session.vehicle_id = vehicle_id.cloned();
            session.authorization_method_id = Some(method.id.clone());
            session.tariff_id = Some(tariff.id.clone());
            session.transaction_id = Some(self.allocate_transaction_id());
            self.track(session.clone(), tariff);
            session
        };
        info!(
            session_id = %requested.id,
            station_id = %station_id,
            charge_point_id = %charge_point_id,
            user_id = %user_id,
            "Session requested"
        );
        self.publish_state(&requested);

        let outcome = self
            .dispatcher
            .remote_start(&station_id, charge_point.connector_id, requested.id_tag.clone())
            .await;

        let _guard = self.lock_point(charge_point_id).await;
        let now = self.clock.now();
        // the point may have faulted while the device was answering
        let outcome = outcome.and_then(|()| self.ensure_point_usable(charge_point_id));
        let (session, changed) = {
            let mut entry = self
                .sessions
                .get_mut(&requested.id)
                .ok_or_else(|| CoreError::not_found("session", &requested.id))?;
            // a StartTransaction may have activated it while we waited
            let changed = entry.status == SessionStatus::Requested;
            if changed {
                match &outcome {
                    Ok(()) => entry.activate(now)?,
                    Err(e) => entry.fail(end_reason_for(e), now)?,
                }
            }
            (entry.clone(), changed)
        };

        if changed {
            if session.status.is_terminal() {
                warn!(
                    session_id = %session.id,
                    charge_point_id = %charge_point_id,
                    reason = ?session.end_reason,
                    "Session failed to start"
                );
                self.release(&session);
            } else {
                info!(session_id = %session.id, charge_point_id = %charge_point_id, "Session active");
            }
            self.publish_state(&session);
        }

        match outcome {
            Err(e) if session.status == SessionStatus::Failed => Err(e),
            _ => Ok(session),
        }
    }

    fn ensure_point_free(&self, charge_point_id: &ChargePointId) -> CoreResult<()> {
        if self.claims.contains_key(charge_point_id) {
            return Err(CoreError::ChargePointBusy(charge_point_id.clone()));
        }
        let point = self.store.charge_point_status(charge_point_id)?;
        match point.status {
            DeviceStatus::Available => Ok(()),
            DeviceStatus::Occupied | DeviceStatus::Reserved => {
                Err(CoreError::ChargePointBusy(charge_point_id.clone()))
            }
            DeviceStatus::Offline => Err(CoreError::DeviceUnreachable(point.station_id)),
            other => Err(CoreError::ChargePointUnavailable {
                charge_point_id: charge_point_id.clone(),
                status: other.to_string(),
            }),
        }
    }

    /// A Requested session may only become Active on a point that still
    /// allows charging.
    fn ensure_point_usable(&self, charge_point_id: &ChargePointId) -> CoreResult<()> {
        let point = self.store.charge_point_status(charge_point_id)?;
        if point.status.ends_sessions() {
            return Err(CoreError::ChargePointUnavailable {
                charge_point_id: charge_point_id.clone(),
                status: point.status.to_string(),
            });
        }
        Ok(())
    }

    fn track(&self, session: ChargingSession, tariff: Tariff) {
        self.claims
            .insert(session.charge_point_id.clone(), session.id.clone());
        if let Some(transaction_id) = session.transaction_id {
            self.transactions
                .insert((session.station_id.clone(), transaction_id), session.id.clone());
        }
        self.applied_tariffs.insert(session.id.clone(), tariff);
        self.sessions.insert(session.id.clone(), session);
    }

    fn release(&self, session: &ChargingSession) {
        self.claims
            .remove_if(&session.charge_point_id, |_, id| id == &session.id);
    }

    // Stop

    /// Stop an Active session through the device. A rejected or timed out
    /// remote stop leaves the session Active.
    pub async fn stop_session(
        &self,
        session_id: &SessionId,
        actor: StopActor,
    ) -> CoreResult<ChargingSession> {
        let charge_point_id = self.session(session_id)?.charge_point_id;

        let (station_id, transaction_id) = {
            let _guard = self.lock_point(&charge_point_id).await;
            let session = self.session(session_id)?;
            if let StopActor::User(user_id) = &actor {
                if user_id != &session.user_id {
                    return Err(CoreError::AccessDenied(format!(
                        "session {} does not belong to user {}",
                        session_id, user_id
                    )));
                }
            }
            let transaction_id = session.transaction_id.filter(|_| {
                session.status == SessionStatus::Active && !self.stopping.contains(session_id)
            });
            let Some(transaction_id) = transaction_id else {
                return Err(CoreError::InvalidSessionState {
                    session_id: session_id.clone(),
                    state: session.status.to_string(),
                });
            };
            self.stopping.insert(session_id.clone());
            (session.station_id, transaction_id)
        };

        info!(session_id = %session_id, station_id = %station_id, ?actor, "Stopping session");
        let outcome = self.dispatcher.remote_stop(&station_id, transaction_id).await;
        if let Err(e) = outcome {
            self.stopping.remove(session_id);
            warn!(session_id = %session_id, error = %e, "Remote stop failed, session stays active");
            return Err(e);
        }

        let _guard = self.lock_point(&charge_point_id).await;
        self.stopping.remove(session_id);
        // the device may have sent StopTransaction before we got the lock back
        let session = self.session(session_id)?;
        if session.status != SessionStatus::Active {
            debug!(session_id = %session_id, status = %session.status, "Session ended by the device first");
            return Ok(session);
        }
        self.end_session(session_id, Ending::Complete, EndReason::Remote)
    }

    /// Freeze the session, price it and release its charge point. The
    /// caller holds the charge point lock.
    fn end_session(
        &self,
        session_id: &SessionId,
        ending: Ending,
        reason: EndReason,
    ) -> CoreResult<ChargingSession> {
        let now = self.clock.now();
        let tariff = self.applied_tariffs.get(session_id).map(|t| t.clone());
        let ended = {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CoreError::not_found("session", session_id))?;
            match ending {
                Ending::Complete => session.complete(reason, now)?,
                Ending::Cancel => session.cancel(reason, now)?,
            }
            if let Some(tariff) = &tariff {
                let cost = compute_cost(&session, tariff, now);
                session.attach_cost(cost)?;
            }
            session.clone()
        };

        info!(
            session_id = %ended.id,
            charge_point_id = %ended.charge_point_id,
            status = %ended.status,
            energy_wh = ended.energy_wh,
            total = ended.cost.as_ref().map(|c| c.total_money().to_string()),
            "Session ended"
        );
        self.release(&ended);
        self.publish_state(&ended);
        if let Some(cost) = &ended.cost {
            self.publish_cost(&ended, cost, true);
        }
        Ok(ended)
    }

    // Device-driven transitions

    /// Cancel Active sessions on every charge point whose derived status
    /// no longer allows charging.
    pub async fn handle_status_transition(&self, transition: &StatusTransition) {
        for point in transition.changed_points() {
            if point.status.ends_sessions() {
                self.cancel_on_point(&point.id, cancel_reason(point.status))
                    .await;
            }
        }
    }

    /// Cancel the Active sessions of a station that went offline.
    pub async fn cancel_station_sessions(&self, station_id: &StationId, reason: EndReason) {
        let points: Vec<ChargePointId> = self
            .claims
            .iter()
            .filter(|claim| {
                self.sessions
                    .get(claim.value())
                    .is_some_and(|s| &s.station_id == station_id)
            })
            .map(|claim| claim.key().clone())
            .collect();
        for charge_point_id in points {
            self.cancel_on_point(&charge_point_id, reason.clone()).await;
        }
    }

    async fn cancel_on_point(&self, charge_point_id: &ChargePointId, reason: EndReason) {
        let _guard = self.lock_point(charge_point_id).await;
        let Some(session_id) = self.claims.get(charge_point_id).map(|c| c.clone()) else {
            return;
        };
        let is_active = self
            .sessions
            .get(&session_id)
            .is_some_and(|s| s.status == SessionStatus::Active);
        if !is_active {
            return;
        }
        warn!(
            session_id = %session_id,
            charge_point_id = %charge_point_id,
            ?reason,
            "Cancelling session"
        );
        if let Err(e) = self.end_session(&session_id, Ending::Cancel, reason) {
            warn!(session_id = %session_id, error = %e, "Failed to cancel session");
        }
    }

    /// Apply MeterValues. Returns the running cost when an Active session
    /// took the samples.
    pub fn record_meter_values(
        &self,
        station_id: &StationId,
        connector_id: u32,
        transaction_id: Option<i32>,
        samples: &[MeterSample],
    ) -> CoreResult<Option<CostBreakdown>> {
        let session_id = match transaction_id {
            Some(tx) => self
                .transactions
                .get(&(station_id.clone(), tx))
                .map(|s| s.clone()),
            None => self
                .store
                .charge_point_by_connector(station_id, connector_id)
                .and_then(|cp| self.claims.get(&cp).map(|s| s.clone())),
        };
        let Some(session_id) = session_id else {
            debug!(station_id = %station_id, connector_id, ?transaction_id, "Meter values without a session");
            return Ok(None);
        };

        let session = {
            let mut session = self
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::not_found("session", &session_id))?;
            if session.status != SessionStatus::Active {
                debug!(session_id = %session_id, status = %session.status, "Telemetry ignored");
                return Ok(None);
            }
            for sample in samples {
                session.record_sample(
                    sample.at,
                    sample.register_wh,
                    sample.power_w,
                    sample.state_of_charge,
                    self.idle_power_threshold_w,
                )?;
            }
            session.clone()
        };

        let Some(tariff) = self.applied_tariffs.get(&session_id).map(|t| t.clone()) else {
            return Ok(None);
        };
        let running = compute_cost(&session, &tariff, self.clock.now());
        self.publish_cost(&session, &running, false);
        Ok(Some(running))
    }

    /// Device-side StartTransaction: confirms a pending remote start or
    /// adopts a locally started one.
    pub async fn on_transaction_started(
        &self,
        station_id: &StationId,
        connector_id: u32,
        id_tag: &str,
        meter_start_wh: i64,
    ) -> CoreResult<StartDecision> {
        let Some(charge_point_id) = self.store.charge_point_by_connector(station_id, connector_id)
        else {
            warn!(station_id = %station_id, connector_id, "StartTransaction on unknown connector");
            return Ok(StartDecision::refused(TagVerdict::Invalid));
        };

        {
            let _guard = self.lock_point(&charge_point_id).await;
            if let Some(claimed) = self.claims.get(&charge_point_id).map(|c| c.clone()) {
                return self.confirm_claimed(&claimed, id_tag, meter_start_wh);
            }
        }

        let station = self
            .store
            .definition(station_id)
            .ok_or_else(|| CoreError::not_found("station", station_id))?;
        if !station.active {
            return Ok(StartDecision::refused(TagVerdict::Invalid));
        }
        let (verdict, holder) = self.access.verify_tag(id_tag, &station).await?;
        let Some((user, method)) = holder else {
            info!(station_id = %station_id, connector_id, ?verdict, "Local start refused");
            return Ok(StartDecision::refused(verdict));
        };
        let tariff = match self.resolver.resolve_tariff(&user.id, &station.tenant_id).await {
            Ok(tariff) => tariff,
            Err(CoreError::NoTariffAvailable { .. }) => {
                warn!(user_id = %user.id, "Local start refused, no tariff");
                return Ok(StartDecision::refused(TagVerdict::Invalid));
            }
            Err(e) => return Err(e),
        };

        let _guard = self.lock_point(&charge_point_id).await;
        if self.claims.contains_key(&charge_point_id) {
            return Ok(StartDecision::refused(TagVerdict::ConcurrentTx));
        }
        let now = self.clock.now();
        let mut session = ChargingSession::requested(
            station.tenant_id.clone(),
            user.id.clone(),
            station_id.clone(),
            charge_point_id.clone(),
            connector_id,
            id_tag.to_string(),
            now,
        );
        let transaction_id = self.allocate_transaction_id();
        session.authorization_method_id = Some(method.id);
        session.tariff_id = Some(tariff.id.clone());
        session.transaction_id = Some(transaction_id);
        session.activate(now)?;
        session.meter_start_wh = Some(meter_start_wh);
        session.meter_last_wh = Some(meter_start_wh);

        info!(
            session_id = %session.id,
            charge_point_id = %charge_point_id,
            user_id = %user.id,
            transaction_id,
            "Adopted locally started session"
        );
        self.track(session.clone(), tariff);
        self.publish_state(&session);
        Ok(StartDecision::accepted(transaction_id))
    }

    fn confirm_claimed(
        &self,
        session_id: &SessionId,
        id_tag: &str,
        meter_start_wh: i64,
    ) -> CoreResult<StartDecision> {
        let (session, activated) = {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CoreError::not_found("session", session_id))?;
            if session.id_tag != id_tag {
                return Ok(StartDecision::refused(TagVerdict::ConcurrentTx));
            }
            let activated = session.status == SessionStatus::Requested;
            if activated {
                if let Err(e) = self.ensure_point_usable(&session.charge_point_id) {
                    session.fail(end_reason_for(&e), self.clock.now())?;
                    let failed = session.clone();
                    drop(session);
                    warn!(session_id = %failed.id, error = %e, "Transaction refused on unusable charge point");
                    self.release(&failed);
                    self.publish_state(&failed);
                    return Ok(StartDecision::refused(TagVerdict::Invalid));
                }
                session.activate(self.clock.now())?;
            }
            if session.meter_last_wh.is_none() {
                session.meter_start_wh = Some(meter_start_wh);
                session.meter_last_wh = Some(meter_start_wh);
            }
            (session.clone(), activated)
        };
        if activated {
            self.publish_state(&session);
        }
        let transaction_id = session
            .transaction_id
            .ok_or_else(|| CoreError::InvalidSessionState {
                session_id: session.id.clone(),
                state: session.status.to_string(),
            })?;
        debug!(session_id = %session.id, transaction_id, "Transaction confirmed by device");
        Ok(StartDecision::accepted(transaction_id))
    }

    /// Device-side StopTransaction. Sessions already ended remotely are
    /// left as they are.
    pub async fn on_transaction_stopped(
        &self,
        station_id: &StationId,
        transaction_id: i32,
        meter_stop_wh: i64,
        reason: Option<String>,
    ) -> CoreResult<Option<ChargingSession>> {
        let Some(session_id) = self
            .transactions
            .get(&(station_id.clone(), transaction_id))
            .map(|s| s.clone())
        else {
            warn!(station_id = %station_id, transaction_id, "StopTransaction for unknown transaction");
            return Ok(None);
        };
        let charge_point_id = self.session(&session_id)?.charge_point_id;

        let _guard = self.lock_point(&charge_point_id).await;
        let status = {
            let mut session = self
                .sessions
                .get_mut(&session_id)
                .ok_or_else(|| CoreError::not_found("session", &session_id))?;
            if session.status == SessionStatus::Active {
                session.record_meter_stop(meter_stop_wh);
            }
            session.status
        };
        match status {
            SessionStatus::Active => {}
            SessionStatus::Completed => {
                debug!(session_id = %session_id, transaction_id, "StopTransaction for completed session");
                return self.settle_meter_stop(&session_id, meter_stop_wh).map(Some);
            }
            _ => {
                debug!(session_id = %session_id, transaction_id, "StopTransaction for ended session");
                return self.session(&session_id).map(Some);
            }
        }
        // a remote stop in flight owns the ending
        let reason = if self.stopping.contains(&session_id) {
            EndReason::Remote
        } else {
            EndReason::Local(reason.unwrap_or_else(|| "Local".to_string()))
        };
        self.end_session(&session_id, Ending::Complete, reason)
            .map(Some)
    }

    /// Apply the device's final register to a session completed remotely
    /// and re-price it when energy moved. The caller holds the charge point
    /// lock.
    fn settle_meter_stop(
        &self,
        session_id: &SessionId,
        meter_stop_wh: i64,
    ) -> CoreResult<ChargingSession> {
        let tariff = self.applied_tariffs.get(session_id).map(|t| t.clone());
        let (session, cost) = {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| CoreError::not_found("session", session_id))?;
            if !session.record_meter_stop(meter_stop_wh) {
                return Ok(session.clone());
            }
            let cost = match (&tariff, session.ended_at) {
                (Some(tariff), Some(ended_at)) => {
                    let cost = compute_cost(&session, tariff, ended_at);
                    session.revise_cost(cost.clone())?;
                    Some(cost)
                }
                _ => None,
            };
            (session.clone(), cost)
        };
        info!(
            session_id = %session.id,
            energy_wh = session.energy_wh,
            total = cost.as_ref().map(|c| c.total_money().to_string()),
            "Final meter reading applied"
        );
        if let Some(cost) = &cost {
            self.publish_cost(&session, cost, true);
        }
        Ok(session)
    }

    /// Authorize.req from a device.
    pub async fn authorize_tag(&self, station_id: &StationId, id_tag: &str) -> CoreResult<TagVerdict> {
        let station = self
            .store
            .definition(station_id)
            .ok_or_else(|| CoreError::not_found("station", station_id))?;
        let (verdict, _) = self.access.verify_tag(id_tag, &station).await?;
        Ok(verdict)
    }

    // Queries

    pub fn session(&self, session_id: &SessionId) -> CoreResult<ChargingSession> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| CoreError::not_found("session", session_id))
    }

    /// Requested and Active sessions of `user_id`, oldest first.
    pub fn active_sessions(&self, user_id: &UserId) -> Vec<ChargingSession> {
        let mut sessions: Vec<ChargingSession> = self
            .sessions
            .iter()
            .filter(|s| &s.user_id == user_id && s.status.holds_charge_point())
            .map(|s| s.clone())
            .collect();
        sessions.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        sessions
    }

    pub fn session_on_charge_point(&self, charge_point_id: &ChargePointId) -> Option<ChargingSession> {
        self.claims
            .get(charge_point_id)
            .and_then(|id| self.sessions.get(id.value()).map(|s| s.clone()))
    }

    /// Final breakdown of an ended session, running breakdown of an
    /// Active one.
    pub fn session_cost_breakdown(&self, session_id: &SessionId) -> CoreResult<CostBreakdown> {
        let session = self.session(session_id)?;
        if let Some(cost) = session.cost {
            return Ok(cost);
        }
        if session.status != SessionStatus::Active {
            return Err(CoreError::InvalidSessionState {
                session_id: session.id,
                state: session.status.to_string(),
            });
        }
        let tariff = self
            .applied_tariffs
            .get(session_id)
            .map(|t| t.clone())
            .ok_or_else(|| CoreError::not_found("tariff", session_id))?;
        Ok(compute_cost(&session, &tariff, self.clock.now()))
    }

    pub fn current_cost(&self, session_id: &SessionId) -> CoreResult<Money> {
        self.session_cost_breakdown(session_id)
            .map(|breakdown| breakdown.total_money())
    }

    // Events

    fn publish_state(&self, session: &ChargingSession) {
        metrics::counter!(
            "chargegrid_session_transitions_total",
            "status" => session.status.to_string()
        )
        .increment(1);
        self.events
            .publish(Event::SessionStateChanged(SessionStateChangedEvent {
                session_id: session.id.clone(),
                tenant_id: session.tenant_id.clone(),
                user_id: session.user_id.clone(),
                station_id: session.station_id.clone(),
                charge_point_id: session.charge_point_id.clone(),
                status: session.status,
                reason: session.end_reason.clone(),
                timestamp: self.clock.now(),
            }));
    }

    fn publish_cost(&self, session: &ChargingSession, cost: &CostBreakdown, is_final: bool) {
        self.events
            .publish(Event::SessionCostUpdated(SessionCostUpdatedEvent {
                session_id: session.id.clone(),
                tenant_id: session.tenant_id.clone(),
                station_id: session.station_id.clone(),
                energy_wh: session.energy_wh,
                total: cost.total_money(),
                is_final,
                timestamp: self.clock.now(),
            }));
    }
}

fn end_reason_for(error: &CoreError) -> EndReason {
    match error {
        CoreError::DeviceRejected { status, .. } => EndReason::DeviceRejected(status.clone()),
        CoreError::DeviceTimeout { .. } => EndReason::DeviceTimeout,
        CoreError::DeviceUnreachable(_) => EndReason::DeviceUnreachable,
        CoreError::ChargePointUnavailable { status, .. } => {
            EndReason::ChargePointUnavailable(status.clone())
        }
        other => EndReason::DeviceRejected(other.to_string()),
    }
}

fn cancel_reason(status: DeviceStatus) -> EndReason {
    match status {
        DeviceStatus::Offline => EndReason::StationOffline,
        other => EndReason::ChargePointUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::commands::CommandDispatcher;
    use crate::application::events::{create_event_bus, EventSubscriber};
    use crate::application::links::{DeviceLinkRegistry, LinkHandle, SharedLinkRegistry};
    use crate::application::state::StationStateStore;
    use crate::application::tariffs::{SharedTariffCatalog, TariffCatalog};
    use crate::domain::tariff::{ComponentKind, Currency, TariffComponent};
    use crate::domain::{
        AuthorizationMethod, ChargePoint, OcppVersion, ReportedStatus, Station, UserAccount,
    };
    use crate::infrastructure::InMemoryDirectory;
    use crate::support::{Clock, Frame, ManualClock};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use std::time::Duration as StdDuration;
    use tokio::sync::mpsc;

    struct Fixture {
        manager: Arc<SessionManager>,
        links: SharedLinkRegistry,
        store: SharedStateStore,
        dispatcher: SharedCommandDispatcher,
        directory: Arc<InMemoryDirectory>,
        catalog: SharedTariffCatalog,
        clock: Arc<ManualClock>,
        events: SharedEventBus,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let links = Arc::new(DeviceLinkRegistry::new(
            chrono::Duration::minutes(10),
            clock.clone(),
        ));
        let store = Arc::new(StationStateStore::new(links.clone()));
        store.provision(
            Station::new("ST-1", "T1", "SG-1")
                .with_charge_point(ChargePoint::new("CP-1", 1))
                .with_charge_point(ChargePoint::new("CP-2", 2)),
        );
        let dispatcher = Arc::new(CommandDispatcher::new(
            links.clone(),
            StdDuration::from_secs(5),
        ));

        let directory = Arc::new(InMemoryDirectory::new());
        directory.add_user(UserAccount::new("U1", "T1"));
        directory.add_user(UserAccount::new("U2", "T1"));
        for user in ["U1", "U2"] {
            directory.add_user_to_group(user, "G1");
        }
        directory.grant_station_group("G1", "SG-1");
        directory.add_authorization_method(AuthorizationMethod::new("AM-1", "U1", "TAG-1"));
        directory.add_authorization_method(AuthorizationMethod::new("AM-2", "U2", "TAG-2"));

        let catalog = Arc::new(TariffCatalog::new());
        catalog.upsert(
            Tariff::new("TF-1", "T1", "Standard", Currency::new("EUR"))
                .with_component(TariffComponent::new(ComponentKind::Energy, Decimal::new(30, 2)))
                .with_component(TariffComponent::new(ComponentKind::SessionFee, Decimal::ONE))
                .as_default(),
        );
        let resolver = Arc::new(TariffResolver::new(
            catalog.clone(),
            directory.clone(),
            clock.clone(),
        ));
        let events = create_event_bus(64);
        let manager = Arc::new(SessionManager::new(
            store.clone(),
            dispatcher.clone(),
            resolver,
            AccessGate::new(directory.clone()),
            events.clone(),
            clock.clone(),
            50.0,
        ));
        Fixture {
            manager,
            links,
            store,
            dispatcher,
            directory,
            catalog,
            clock,
            events,
        }
    }

    /// Connect ST-1 and answer every command with `reply`.
    fn connect_device(f: &Fixture, reply: Value) -> LinkHandle {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (handle, _) = f.links.register(&"ST-1".into(), OcppVersion::V16, tx);
        let dispatcher = f.dispatcher.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Ok(Frame::Call { unique_id, .. }) = Frame::parse(&text) {
                    dispatcher.handle_reply(&"ST-1".into(), &unique_id, reply.clone());
                }
            }
        });
        handle
    }

    fn session_states(subscriber: &mut EventSubscriber) -> Vec<SessionStatus> {
        let mut states = Vec::new();
        while let Some(message) = subscriber.try_recv() {
            if let Event::SessionStateChanged(e) = message.event {
                states.push(e.status);
            }
        }
        states
    }

    #[tokio::test]
    async fn accepted_start_becomes_active() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let mut subscriber = f.events.subscribe();

        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.started_at, Some(f.clock.now()));
        assert_eq!(session.tariff_id.as_ref().map(|t| t.as_str()), Some("TF-1"));
        assert_eq!(f.manager.active_sessions(&"U1".into()).len(), 1);
        assert_eq!(
            session_states(&mut subscriber),
            vec![SessionStatus::Requested, SessionStatus::Active]
        );
    }

    #[tokio::test]
    async fn concurrent_starts_have_one_winner() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));

        let mut tasks = Vec::new();
        for user in ["U1", "U2", "U1", "U2"] {
            let manager = f.manager.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .start_session(&user.into(), &"CP-1".into(), None)
                    .await
            }));
        }

        let mut successes = 0;
        let mut busy = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => successes += 1,
                Err(CoreError::ChargePointBusy(_)) => busy += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(busy, 3);
    }

    #[tokio::test]
    async fn rejected_start_fails_and_frees_the_point() {
        let f = fixture();
        connect_device(&f, json!({"status": "Rejected"}));

        let err = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeviceRejected { .. }));
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
        assert!(f.manager.active_sessions(&"U1".into()).is_empty());
    }

    #[tokio::test]
    async fn start_without_link_is_unreachable_and_leaves_nothing_pending() {
        let f = fixture();
        let err = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::DeviceUnreachable(_)));
        assert_eq!(f.dispatcher.pending_count(), 0);
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
    }

    #[tokio::test]
    async fn start_checks_access_before_anything_else() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        f.directory.add_user(UserAccount::new("U3", "T1"));

        let err = f
            .manager
            .start_session(&"U3".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied(_)));

        f.directory.add_user_to_group("U3", "G1");
        let err = f
            .manager
            .start_session(&"U3".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoAuthorizationMethod(_)));
    }

    #[tokio::test]
    async fn start_requires_a_tariff() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let mut tariff = f.catalog.tariff(&"T1".into(), &"TF-1".into()).unwrap();
        tariff.is_active = false;
        f.catalog.upsert(tariff);

        let err = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NoTariffAvailable { .. }));
    }

    #[tokio::test]
    async fn occupied_or_faulted_points_refuse_starts() {
        let f = fixture();
        let handle = connect_device(&f, json!({"status": "Accepted"}));
        let now = f.clock.now();
        f.store
            .apply_status_event(&handle, Some(&"CP-1".into()), ReportedStatus::Occupied, now)
            .unwrap();
        f.store
            .apply_status_event(&handle, Some(&"CP-2".into()), ReportedStatus::Faulted, now)
            .unwrap();

        assert!(matches!(
            f.manager.start_session(&"U1".into(), &"CP-1".into(), None).await,
            Err(CoreError::ChargePointBusy(_))
        ));
        assert!(matches!(
            f.manager.start_session(&"U1".into(), &"CP-2".into(), None).await,
            Err(CoreError::ChargePointUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn stopping_a_non_active_session_changes_nothing() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();
        let stopped = f
            .manager
            .stop_session(&session.id, StopActor::User("U1".into()))
            .await
            .unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);

        let err = f
            .manager
            .stop_session(&session.id, StopActor::Operator)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSessionState { .. }));
        assert_eq!(f.manager.session(&session.id).unwrap(), stopped);
    }

    #[tokio::test]
    async fn only_the_owner_may_stop() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();

        let err = f
            .manager
            .stop_session(&session.id, StopActor::User("U2".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AccessDenied(_)));
        assert_eq!(
            f.manager.session(&session.id).unwrap().status,
            SessionStatus::Active
        );
    }

    #[tokio::test]
    async fn telemetry_prices_the_session() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();
        let decision = f
            .manager
            .on_transaction_started(&"ST-1".into(), 1, "TAG-1", 1_000)
            .await
            .unwrap();
        assert_eq!(decision.verdict, TagVerdict::Accepted);
        assert_eq!(Some(decision.transaction_id), session.transaction_id);

        let at = f.clock.now() + chrono::Duration::minutes(30);
        let running = f
            .manager
            .record_meter_values(
                &"ST-1".into(),
                1,
                session.transaction_id,
                &[MeterSample {
                    at,
                    register_wh: Some(11_000),
                    power_w: Some(20_000.0),
                    state_of_charge: Some(80.0),
                }],
            )
            .unwrap()
            .unwrap();
        assert_eq!(running.total, Decimal::new(400, 2));

        let stopped = f
            .manager
            .stop_session(&session.id, StopActor::System)
            .await
            .unwrap();
        assert_eq!(stopped.energy_wh, 10_000);
        assert_eq!(
            f.manager.current_cost(&session.id).unwrap().to_string(),
            "4.00 EUR"
        );
    }

    #[tokio::test]
    async fn faulted_point_cancels_the_active_session() {
        let f = fixture();
        let handle = connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();

        let transition = f
            .store
            .apply_status_event(&handle, Some(&"CP-1".into()), ReportedStatus::Faulted, f.clock.now())
            .unwrap();
        f.manager.handle_status_transition(&transition).await;

        let cancelled = f.manager.session(&session.id).unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert_eq!(
            cancelled.end_reason,
            Some(EndReason::ChargePointUnavailable("Faulted".into()))
        );
        assert!(cancelled.cost.is_some());

        // no further telemetry
        let taken = f
            .manager
            .record_meter_values(
                &"ST-1".into(),
                1,
                cancelled.transaction_id,
                &[MeterSample {
                    at: f.clock.now(),
                    register_wh: Some(5_000),
                    power_w: None,
                    state_of_charge: None,
                }],
            )
            .unwrap();
        assert!(taken.is_none());
    }

    #[tokio::test]
    async fn offline_station_cancels_sessions() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();

        f.manager
            .cancel_station_sessions(&"ST-1".into(), EndReason::StationOffline)
            .await;
        let cancelled = f.manager.session(&session.id).unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert_eq!(cancelled.end_reason, Some(EndReason::StationOffline));
    }

    #[tokio::test]
    async fn local_start_is_adopted_and_stopped_by_device() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));

        let decision = f
            .manager
            .on_transaction_started(&"ST-1".into(), 2, "TAG-2", 500)
            .await
            .unwrap();
        assert_eq!(decision.verdict, TagVerdict::Accepted);
        let adopted = f.manager.session_on_charge_point(&"CP-2".into()).unwrap();
        assert_eq!(adopted.user_id.as_str(), "U2");
        assert_eq!(adopted.status, SessionStatus::Active);

        let ended = f
            .manager
            .on_transaction_stopped(&"ST-1".into(), decision.transaction_id, 2_500, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Completed);
        assert_eq!(ended.energy_wh, 2_000);
        assert_eq!(ended.end_reason, Some(EndReason::Local("Local".into())));
    }

    #[tokio::test]
    async fn unknown_tag_is_invalid() {
        let f = fixture();
        let decision = f
            .manager
            .on_transaction_started(&"ST-1".into(), 1, "STRANGER", 0)
            .await
            .unwrap();
        assert_eq!(decision.verdict, TagVerdict::Invalid);
        assert_eq!(decision.transaction_id, 0);
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
    }

    #[tokio::test]
    async fn stop_succeeds_when_the_device_closes_the_transaction_first() {
        let f = fixture();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        f.links.register(&"ST-1".into(), OcppVersion::V16, tx);
        let dispatcher = f.dispatcher.clone();
        let manager = f.manager.clone();
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                let Ok(Frame::Call {
                    unique_id,
                    action,
                    payload,
                }) = Frame::parse(&text)
                else {
                    continue;
                };
                dispatcher.handle_reply(&"ST-1".into(), &unique_id, json!({"status": "Accepted"}));
                // real stations follow RemoteStop.conf with StopTransaction right away
                if action == "RemoteStopTransaction" {
                    let transaction_id = payload["transactionId"].as_i64().unwrap() as i32;
                    manager
                        .on_transaction_stopped(&"ST-1".into(), transaction_id, 4_000, Some("Remote".into()))
                        .await
                        .unwrap();
                }
            }
        });

        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();
        f.manager
            .on_transaction_started(&"ST-1".into(), 1, "TAG-1", 1_000)
            .await
            .unwrap();

        let stopped = f
            .manager
            .stop_session(&session.id, StopActor::User("U1".into()))
            .await
            .unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);
        assert_eq!(stopped.end_reason, Some(EndReason::Remote));
        assert_eq!(stopped.energy_wh, 3_000);
        assert_eq!(stopped.cost.as_ref().unwrap().total, Decimal::new(190, 2));
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
        assert_eq!(f.manager.session(&session.id).unwrap(), stopped);
    }

    /// Connect ST-1, fault CP-1 as soon as a RemoteStart arrives and then
    /// accept it. With `start_on_device` the device also sends its
    /// StartTransaction before the acceptance; its verdict is returned.
    fn connect_faulting_device(
        f: &Fixture,
        start_on_device: bool,
    ) -> tokio::sync::oneshot::Receiver<TagVerdict> {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (handle, _) = f.links.register(&"ST-1".into(), OcppVersion::V16, tx);
        let (verdict_tx, verdict_rx) = tokio::sync::oneshot::channel();
        let dispatcher = f.dispatcher.clone();
        let manager = f.manager.clone();
        let store = f.store.clone();
        let clock = f.clock.clone();
        tokio::spawn(async move {
            let mut verdict_tx = Some(verdict_tx);
            while let Some(text) = rx.recv().await {
                let Ok(Frame::Call { unique_id, .. }) = Frame::parse(&text) else {
                    continue;
                };
                let transition = store
                    .apply_status_event(&handle, Some(&"CP-1".into()), ReportedStatus::Faulted, clock.now())
                    .unwrap();
                manager.handle_status_transition(&transition).await;
                if start_on_device {
                    let decision = manager
                        .on_transaction_started(&"ST-1".into(), 1, "TAG-1", 0)
                        .await
                        .unwrap();
                    if let Some(verdict_tx) = verdict_tx.take() {
                        let _ = verdict_tx.send(decision.verdict);
                    }
                }
                dispatcher.handle_reply(&"ST-1".into(), &unique_id, json!({"status": "Accepted"}));
            }
        });
        verdict_rx
    }

    #[tokio::test]
    async fn point_faulting_during_remote_start_fails_the_session() {
        let f = fixture();
        let _verdict = connect_faulting_device(&f, false);
        let mut subscriber = f.events.subscribe();

        let err = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ChargePointUnavailable { .. }));
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
        assert!(f.manager.active_sessions(&"U1".into()).is_empty());
        assert_eq!(
            session_states(&mut subscriber),
            vec![SessionStatus::Requested, SessionStatus::Failed]
        );
    }

    #[tokio::test]
    async fn device_start_on_a_faulted_point_is_refused() {
        let f = fixture();
        let verdict = connect_faulting_device(&f, true);

        let err = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ChargePointUnavailable { .. }));
        assert_eq!(verdict.await.unwrap(), TagVerdict::Invalid);
        assert!(f.manager.session_on_charge_point(&"CP-1".into()).is_none());
    }

    #[tokio::test]
    async fn late_meter_stop_is_billed() {
        let f = fixture();
        connect_device(&f, json!({"status": "Accepted"}));
        let session = f
            .manager
            .start_session(&"U1".into(), &"CP-1".into(), None)
            .await
            .unwrap();
        let transaction_id = f
            .manager
            .on_transaction_started(&"ST-1".into(), 1, "TAG-1", 1_000)
            .await
            .unwrap()
            .transaction_id;
        f.manager
            .record_meter_values(
                &"ST-1".into(),
                1,
                Some(transaction_id),
                &[MeterSample {
                    at: f.clock.now(),
                    register_wh: Some(11_000),
                    power_w: None,
                    state_of_charge: None,
                }],
            )
            .unwrap();
        let stopped = f
            .manager
            .stop_session(&session.id, StopActor::System)
            .await
            .unwrap();
        assert_eq!(stopped.cost.as_ref().unwrap().total, Decimal::new(400, 2));

        let settled = f
            .manager
            .on_transaction_stopped(&"ST-1".into(), transaction_id, 12_000, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.status, SessionStatus::Completed);
        assert_eq!(settled.end_reason, Some(EndReason::Remote));
        assert_eq!(settled.energy_wh, 11_000);
        assert_eq!(
            f.manager.current_cost(&session.id).unwrap().to_string(),
            "4.30 EUR"
        );
    }
}
