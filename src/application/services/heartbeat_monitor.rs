//! Heartbeat Monitor Service
//!
//! Sweeps the device link registry and takes stations offline once their
//! link has been silent for longer than the staleness window.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::application::core::SharedChargingCore;
use crate::domain::StationId;
use crate::support::ShutdownSignal;

/// Connection statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub provisioned: usize,
    pub online: usize,
    pub offline: usize,
}

/// Runs in the background and reports stale links to the core.
pub struct HeartbeatMonitor {
    core: SharedChargingCore,
    check_interval: Duration,
    running: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(core: SharedChargingCore, check_interval: Duration) -> Self {
        Self {
            core,
            check_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the heartbeat monitor background task
    pub fn start(&self, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        let core = self.core.clone();
        let check_interval = self.check_interval;
        let running = self.running.clone();

        tokio::spawn(async move {
            running.store(true, Ordering::SeqCst);
            info!(
                check_interval_secs = check_interval.as_secs(),
                staleness_secs = core.links().staleness().num_seconds(),
                "Heartbeat monitor started"
            );

            let mut interval = tokio::time::interval(check_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stale = sweep(&core).await;
                        if !stale.is_empty() {
                            warn!(count = stale.len(), "Stations went stale");
                        }
                    }
                    _ = shutdown.notified().wait() => {
                        info!("Heartbeat monitor shutting down");
                        break;
                    }
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("Heartbeat monitor stopped");
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn connection_stats(&self) -> ConnectionStats {
        let provisioned = self.core.store().station_ids().len();
        let online = self
            .core
            .store()
            .station_ids()
            .iter()
            .filter(|id| self.core.links().is_online(id))
            .count();
        ConnectionStats {
            provisioned,
            online,
            offline: provisioned - online,
        }
    }
}

/// One sweep: every newly stale station is taken offline.
pub async fn sweep(core: &SharedChargingCore) -> Vec<StationId> {
    let stale = core.links().collect_newly_stale();
    debug!(
        connected = core.links().count(),
        stale = stale.len(),
        "Heartbeat sweep"
    );
    for station_id in &stale {
        metrics::counter!("chargegrid_stale_links_total").increment(1);
        core.mark_stale(station_id).await;
    }
    metrics::gauge!("chargegrid_connected_stations").set(core.links().count() as f64);
    stale
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::core::ChargingCore;
    use crate::config::AppConfig;
    use crate::domain::{ChargePoint, DeviceStatus, OcppVersion, Station};
    use crate::infrastructure::InMemoryDirectory;
    use crate::support::ManualClock;

    fn core() -> (SharedChargingCore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let core = Arc::new(ChargingCore::with_clock(
            &AppConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            clock.clone(),
        ));
        core.provision_station(
            Station::new("ST-1", "T1", "SG-1").with_charge_point(ChargePoint::new("CP-1", 1)),
        );
        core.provision_station(Station::new("ST-2", "T1", "SG-1"));
        (core, clock)
    }

    #[tokio::test]
    async fn silent_station_goes_offline_once() {
        let (core, clock) = core();
        let (tx, _rx) = mpsc::unbounded_channel();
        core.connect_station(&"ST-1".into(), OcppVersion::V16, tx, None)
            .unwrap();

        assert!(sweep(&core).await.is_empty());

        clock.advance(ChronoDuration::seconds(601));
        let stale = sweep(&core).await;
        assert_eq!(stale, vec![StationId::from("ST-1")]);
        assert_eq!(
            core.station_status(&"ST-1".into()).unwrap().status,
            DeviceStatus::Offline
        );

        assert!(sweep(&core).await.is_empty());
    }

    #[tokio::test]
    async fn stats_count_linked_stations() {
        let (core, _) = core();
        let (tx, _rx) = mpsc::unbounded_channel();
        core.connect_station(&"ST-1".into(), OcppVersion::V16, tx, None)
            .unwrap();

        let monitor = HeartbeatMonitor::new(core, Duration::from_secs(30));
        assert_eq!(
            monitor.connection_stats(),
            ConnectionStats {
                provisioned: 2,
                online: 1,
                offline: 1,
            }
        );
    }

    #[tokio::test]
    async fn monitor_stops_on_shutdown() {
        let (core, _) = core();
        let monitor = HeartbeatMonitor::new(core, Duration::from_millis(10));
        let shutdown = ShutdownSignal::new();
        let task = monitor.start(shutdown.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.is_running());

        shutdown.trigger();
        task.await.unwrap();
        assert!(!monitor.is_running());
    }
}
