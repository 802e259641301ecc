//! Device link registry
//!
//! One logical connection per station. A station is online while it has a
//! link whose last inbound traffic falls inside the staleness window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::link::{DeviceLink, EvictedLink, LinkHandle};
use crate::domain::{OcppVersion, StationId};
use crate::support::{CoreError, CoreResult, SharedClock};

pub struct DeviceLinkRegistry {
    links: DashMap<StationId, DeviceLink>,
    next_link_id: AtomicU64,
    staleness: Duration,
    clock: SharedClock,
}

pub type SharedLinkRegistry = Arc<DeviceLinkRegistry>;

impl DeviceLinkRegistry {
    pub fn new(staleness: Duration, clock: SharedClock) -> Self {
        Self {
            links: DashMap::new(),
            next_link_id: AtomicU64::new(1),
            staleness,
            clock,
        }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// Register a fresh link, evicting any previous link of the station.
    pub fn register(
        &self,
        station_id: &StationId,
        protocol: OcppVersion,
        outbound: mpsc::UnboundedSender<String>,
    ) -> (LinkHandle, Option<EvictedLink>) {
        let link_id = self.next_link_id.fetch_add(1, Ordering::SeqCst);
        let link = DeviceLink::new(
            link_id,
            station_id.clone(),
            protocol,
            outbound,
            self.clock.now(),
        );
        let handle = link.handle();

        let evicted = self.links.insert(station_id.clone(), link).map(|old| {
            warn!(
                station_id = %station_id,
                old_link_id = old.link_id,
                new_link_id = link_id,
                "Evicting previous device link"
            );
            EvictedLink {
                link_id: old.link_id,
                connected_at: old.connected_at,
                last_seen: old.last_seen,
            }
        });

        info!(station_id = %station_id, link_id, %protocol, "Device link registered");
        (handle, evicted)
    }

    /// Refresh last-seen. Returns `true` when this brings a link the
    /// monitor had reported stale back online.
    pub fn heartbeat(&self, handle: &LinkHandle, at: DateTime<chrono::Utc>) -> CoreResult<bool> {
        let mut link = self
            .links
            .get_mut(&handle.station_id)
            .filter(|l| l.link_id == handle.link_id)
            .ok_or_else(|| CoreError::LinkNotRegistered(handle.station_id.clone()))?;

        link.touch(at);
        let revived = link.stale_reported && link.is_fresh(self.clock.now(), self.staleness);
        if revived {
            link.stale_reported = false;
            info!(station_id = %handle.station_id, "Device link back online");
        }
        Ok(revived)
    }

    /// Drop the link if `handle` still owns it. Returns whether it did.
    pub fn disconnect(&self, handle: &LinkHandle) -> bool {
        let removed = self
            .links
            .remove_if(&handle.station_id, |_, link| link.link_id == handle.link_id)
            .is_some();
        if removed {
            info!(station_id = %handle.station_id, link_id = handle.link_id, "Device link closed");
        } else {
            debug!(
                station_id = %handle.station_id,
                link_id = handle.link_id,
                "Disconnect from a link that is no longer current"
            );
        }
        removed
    }

    pub fn is_current(&self, handle: &LinkHandle) -> bool {
        self.links
            .get(&handle.station_id)
            .is_some_and(|l| l.link_id == handle.link_id)
    }

    pub fn is_online(&self, station_id: &StationId) -> bool {
        let now = self.clock.now();
        self.links
            .get(station_id)
            .is_some_and(|l| l.is_fresh(now, self.staleness))
    }

    pub fn last_seen(&self, station_id: &StationId) -> Option<DateTime<chrono::Utc>> {
        self.links.get(station_id).map(|l| l.last_seen)
    }

    pub fn protocol(&self, station_id: &StationId) -> Option<OcppVersion> {
        self.links.get(station_id).map(|l| l.protocol)
    }

    /// Queue a frame on the station's link. Offline stations are refused.
    pub fn send_to(&self, station_id: &StationId, frame: String) -> CoreResult<()> {
        let now = self.clock.now();
        let link = self
            .links
            .get(station_id)
            .filter(|l| l.is_fresh(now, self.staleness))
            .ok_or_else(|| CoreError::DeviceUnreachable(station_id.clone()))?;

        link.send(frame).map_err(|e| {
            warn!(station_id = %station_id, error = %e, "Failed to queue frame");
            CoreError::DeviceUnreachable(station_id.clone())
        })
    }

    /// Links that went stale since the last sweep; each is reported once.
    pub fn collect_newly_stale(&self) -> Vec<StationId> {
        let now = self.clock.now();
        let mut stale = Vec::new();
        for mut entry in self.links.iter_mut() {
            if !entry.stale_reported && !entry.is_fresh(now, self.staleness) {
                entry.stale_reported = true;
                stale.push(entry.key().clone());
            }
        }
        stale
    }

    pub fn connected_ids(&self) -> Vec<StationId> {
        self.links.iter().map(|r| r.key().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.links.len()
    }
}
