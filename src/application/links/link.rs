//! A single device link

use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;

use crate::domain::{OcppVersion, StationId};

/// Proof of registration returned to the connection that owns a link.
/// Stops working once a newer connection for the same station registers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    pub station_id: StationId,
    pub link_id: u64,
}

#[derive(Debug)]
pub struct DeviceLink {
    pub link_id: u64,
    pub station_id: StationId,
    pub protocol: OcppVersion,
    /// Outbound frames, drained by the connection's writer task.
    pub outbound: mpsc::UnboundedSender<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Set once the heartbeat monitor has reported this link stale.
    pub stale_reported: bool,
}

/// What is left of a link replaced by a newer registration.
#[derive(Debug, Clone)]
pub struct EvictedLink {
    pub link_id: u64,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeviceLink {
    pub fn new(
        link_id: u64,
        station_id: StationId,
        protocol: OcppVersion,
        outbound: mpsc::UnboundedSender<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            link_id,
            station_id,
            protocol,
            outbound,
            connected_at: now,
            last_seen: now,
            stale_reported: false,
        }
    }

    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            station_id: self.station_id.clone(),
            link_id: self.link_id,
        }
    }

    pub fn send(&self, frame: String) -> Result<(), String> {
        self.outbound
            .send(frame)
            .map_err(|e| format!("link closed: {}", e))
    }

    /// Most recent timestamp wins; older ones are ignored.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen {
            self.last_seen = at;
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        now - self.last_seen <= staleness
    }
}
