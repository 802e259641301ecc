//! Charging session entity and its state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::tariff::{CostBreakdown, SessionUsage};
use crate::domain::{
    AuthorizationMethodId, ChargePointId, SessionId, StationId, TariffId, TenantId, UserId,
    VehicleId,
};
use crate::support::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Requested,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    /// Requested and Active sessions hold their charge point.
    pub fn holds_charge_point(&self) -> bool {
        matches!(self, Self::Requested | Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requested => "Requested",
            Self::Active => "Active",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Who asked for a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopActor {
    User(UserId),
    Operator,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Stopped through the core API.
    Remote,
    /// The device ended the transaction itself.
    Local(String),
    DeviceRejected(String),
    DeviceTimeout,
    DeviceUnreachable,
    StationOffline,
    ChargePointUnavailable(String),
}

/// Splits active time into drawing and non-drawing periods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTracker {
    drawing: bool,
    since: DateTime<Utc>,
    charging_secs: i64,
    parking_secs: i64,
    last_drawing_ended_at: Option<DateTime<Utc>>,
}

impl UsageTracker {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            drawing: false,
            since: started_at,
            charging_secs: 0,
            parking_secs: 0,
            last_drawing_ended_at: None,
        }
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Switch state from `at` forward. Samples older than the current
    /// period are ignored.
    pub fn record(&mut self, drawing: bool, at: DateTime<Utc>) {
        if at < self.since {
            return;
        }
        self.accumulate(at);
        if self.drawing && !drawing {
            self.last_drawing_ended_at = Some(at);
        }
        self.drawing = drawing;
    }

    fn accumulate(&mut self, at: DateTime<Utc>) {
        let elapsed = (at - self.since).num_seconds().max(0);
        if self.drawing {
            self.charging_secs += elapsed;
        } else {
            self.parking_secs += elapsed;
        }
        self.since = at;
    }

    /// Charging, parking and idle seconds as of `until`, without mutating
    /// the tracker. Parking covers non-drawing time before and between
    /// drawing periods, idle the non-drawing tail after the last one.
    pub fn durations_at(&self, until: DateTime<Utc>) -> (i64, i64, i64) {
        let mut snapshot = self.clone();
        if until > snapshot.since {
            snapshot.accumulate(until);
        }
        let until = until.max(snapshot.since);
        let idle = match (snapshot.drawing, snapshot.last_drawing_ended_at) {
            (false, Some(ended)) => (until - ended).num_seconds().clamp(0, snapshot.parking_secs),
            _ => 0,
        };
        (snapshot.charging_secs, snapshot.parking_secs - idle, idle)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingSession {
    pub id: SessionId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub station_id: StationId,
    pub charge_point_id: ChargePointId,
    pub connector_id: u32,
    pub vehicle_id: Option<VehicleId>,
    pub authorization_method_id: Option<AuthorizationMethodId>,
    pub id_tag: String,
    pub tariff_id: Option<TariffId>,
    pub status: SessionStatus,
    pub transaction_id: Option<i32>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub meter_start_wh: Option<i64>,
    pub meter_last_wh: Option<i64>,
    /// Cumulative energy delivered since start.
    pub energy_wh: i64,
    pub power_w: Option<f64>,
    pub state_of_charge: Option<f64>,
    pub usage: Option<UsageTracker>,
    pub end_reason: Option<EndReason>,
    /// Final cost, attached on completion.
    pub cost: Option<CostBreakdown>,
}

impl ChargingSession {
    #[allow(clippy::too_many_arguments)]
    pub fn requested(
        tenant_id: TenantId,
        user_id: UserId,
        station_id: StationId,
        charge_point_id: ChargePointId,
        connector_id: u32,
        id_tag: String,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            tenant_id,
            user_id,
            station_id,
            charge_point_id,
            connector_id,
            vehicle_id: None,
            authorization_method_id: None,
            id_tag,
            tariff_id: None,
            status: SessionStatus::Requested,
            transaction_id: None,
            requested_at,
            started_at: None,
            ended_at: None,
            meter_start_wh: None,
            meter_last_wh: None,
            energy_wh: 0,
            power_w: None,
            state_of_charge: None,
            usage: None,
            end_reason: None,
            cost: None,
        }
    }

    fn invalid_state(&self) -> CoreError {
        CoreError::InvalidSessionState {
            session_id: self.id.clone(),
            state: self.status.to_string(),
        }
    }

    fn require(&self, status: SessionStatus) -> CoreResult<()> {
        if self.status == status {
            Ok(())
        } else {
            Err(self.invalid_state())
        }
    }

    /// Requested -> Active.
    pub fn activate(&mut self, started_at: DateTime<Utc>) -> CoreResult<()> {
        self.require(SessionStatus::Requested)?;
        self.status = SessionStatus::Active;
        self.started_at = Some(started_at);
        self.usage = Some(UsageTracker::new(started_at));
        Ok(())
    }

    /// Requested -> Failed.
    pub fn fail(&mut self, reason: EndReason, at: DateTime<Utc>) -> CoreResult<()> {
        self.require(SessionStatus::Requested)?;
        self.status = SessionStatus::Failed;
        self.end_reason = Some(reason);
        self.ended_at = Some(at);
        Ok(())
    }

    /// Active -> Cancelled.
    pub fn cancel(&mut self, reason: EndReason, at: DateTime<Utc>) -> CoreResult<()> {
        self.require(SessionStatus::Active)?;
        self.freeze(at);
        self.status = SessionStatus::Cancelled;
        self.end_reason = Some(reason);
        Ok(())
    }

    /// Active -> Completed. The final cost is attached separately.
    pub fn complete(&mut self, reason: EndReason, at: DateTime<Utc>) -> CoreResult<()> {
        self.require(SessionStatus::Active)?;
        self.freeze(at);
        self.status = SessionStatus::Completed;
        self.end_reason = Some(reason);
        Ok(())
    }

    fn freeze(&mut self, at: DateTime<Utc>) {
        let ended_at = self.started_at.map_or(at, |started| at.max(started));
        if let Some(usage) = self.usage.as_mut() {
            usage.accumulate(ended_at);
        }
        self.ended_at = Some(ended_at);
    }

    /// Only a completed session without a cost yet accepts one.
    pub fn attach_cost(&mut self, cost: CostBreakdown) -> CoreResult<()> {
        if self.status != SessionStatus::Completed && self.status != SessionStatus::Cancelled {
            return Err(self.invalid_state());
        }
        if self.cost.is_some() {
            return Err(self.invalid_state());
        }
        self.cost = Some(cost);
        Ok(())
    }

    /// Replace the cost of a session that was already priced. Only a late
    /// final meter reading on a Completed session warrants this.
    pub fn revise_cost(&mut self, cost: CostBreakdown) -> CoreResult<()> {
        if self.status != SessionStatus::Completed || self.cost.is_none() {
            return Err(self.invalid_state());
        }
        self.cost = Some(cost);
        Ok(())
    }

    /// Apply a meter sample. `drawing_threshold_w` decides whether the
    /// vehicle is drawing when a power reading is present.
    pub fn record_sample(
        &mut self,
        at: DateTime<Utc>,
        register_wh: Option<i64>,
        power_w: Option<f64>,
        state_of_charge: Option<f64>,
        drawing_threshold_w: f64,
    ) -> CoreResult<()> {
        self.require(SessionStatus::Active)?;

        let mut advanced = false;
        if let Some(register) = register_wh {
            let start = *self.meter_start_wh.get_or_insert(register);
            if self.meter_last_wh.map_or(true, |last| register > last) {
                advanced = self.meter_last_wh.is_some_and(|last| register > last);
                self.meter_last_wh = Some(register);
                self.energy_wh = (register - start).max(0);
            }
        }
        if power_w.is_some() {
            self.power_w = power_w;
        }
        if state_of_charge.is_some() {
            self.state_of_charge = state_of_charge;
        }

        let drawing = match power_w {
            Some(power) => power > drawing_threshold_w,
            None => advanced,
        };
        if let Some(usage) = self.usage.as_mut() {
            usage.record(drawing, at);
        }
        Ok(())
    }

    /// Final meter reading from the device, if it moves the register
    /// forward. Returns whether the delivered energy changed.
    pub fn record_meter_stop(&mut self, register_wh: i64) -> bool {
        let start = *self.meter_start_wh.get_or_insert(register_wh);
        if self.meter_last_wh.map_or(true, |last| register_wh >= last) {
            let before = self.energy_wh;
            self.meter_last_wh = Some(register_wh);
            self.energy_wh = (register_wh - start).max(0);
            return self.energy_wh != before;
        }
        false
    }

    /// Usage as of `at`, or as frozen at `ended_at`.
    pub fn usage_at(&self, at: DateTime<Utc>) -> SessionUsage {
        let started_at = self.started_at.unwrap_or(self.requested_at);
        let until = self.ended_at.unwrap_or(at);
        let (charging_secs, parking_secs, idle_secs) = self
            .usage
            .as_ref()
            .map(|u| u.durations_at(until))
            .unwrap_or((0, 0, 0));
        SessionUsage {
            started_at,
            energy_wh: self.energy_wh,
            charging_secs,
            parking_secs,
            idle_secs,
        }
    }
}
