//! Per-connection station worker
//!
//! The WebSocket reader only queues text frames. A single worker per
//! connection drains that queue, so the frames of one station reach the
//! core in arrival order while stations are processed in parallel.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::handlers::OcppHandlerV16;

/// Queue feeding a station worker.
pub type InboundSender = mpsc::Sender<String>;

pub struct StationWorker {
    handler: OcppHandlerV16,
    inbound: mpsc::Receiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl StationWorker {
    /// Build a worker and the sender the connection reader pushes into.
    pub fn new(
        handler: OcppHandlerV16,
        outbound: mpsc::UnboundedSender<String>,
        capacity: usize,
    ) -> (Self, InboundSender) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                handler,
                inbound: rx,
                outbound,
            },
            tx,
        )
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the reader drops its sender or the link is replaced.
    pub async fn run(mut self) {
        let station_id = self.handler.station_id.clone();
        debug!(station_id = %station_id, link_id = self.handler.link.link_id, "Station worker started");

        while let Some(text) = self.inbound.recv().await {
            if let Err(e) = self.handler.core.touch(&self.handler.link) {
                info!(station_id = %station_id, error = %e, "Link no longer current, worker exiting");
                break;
            }
            let Some(response) = self.handler.handle(&text).await else {
                continue;
            };
            // replies go to this connection, never to a newer link of the station
            if self.outbound.send(response).is_err() {
                warn!(station_id = %station_id, "Connection writer gone, dropping reply");
                break;
            }
        }

        debug!(station_id = %station_id, "Station worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::application::core::ChargingCore;
    use crate::config::AppConfig;
    use crate::domain::{ChargePoint, OcppVersion, Station};
    use crate::infrastructure::InMemoryDirectory;
    use crate::support::{Frame, ManualClock};

    #[tokio::test]
    async fn replies_follow_arrival_order() {
        let core = Arc::new(ChargingCore::with_clock(
            &AppConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ManualClock::new(Utc::now())),
        ));
        core.provision_station(
            Station::new("ST-1", "T1", "SG-1").with_charge_point(ChargePoint::new("CP-1", 1)),
        );
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let link = core
            .connect_station(&"ST-1".into(), OcppVersion::V16, out_tx.clone(), None)
            .unwrap();

        let (worker, inbound) = StationWorker::new(OcppHandlerV16::new(link, core), out_tx, 8);
        let task = worker.spawn();

        for i in 0..5 {
            inbound
                .send(format!(r#"[2,"hb-{}","Heartbeat",{{}}]"#, i))
                .await
                .unwrap();
        }
        drop(inbound);
        task.await.unwrap();

        let mut ids = Vec::new();
        while let Ok(text) = out_rx.try_recv() {
            ids.push(Frame::parse(&text).unwrap().unique_id().to_string());
        }
        assert_eq!(ids, vec!["hb-0", "hb-1", "hb-2", "hb-3", "hb-4"]);
    }

    #[tokio::test]
    async fn replaced_link_stops_the_worker() {
        let core = Arc::new(ChargingCore::with_clock(
            &AppConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            Arc::new(ManualClock::new(Utc::now())),
        ));
        core.provision_station(Station::new("ST-1", "T1", "SG-1"));
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let old = core
            .connect_station(&"ST-1".into(), OcppVersion::V16, old_tx.clone(), None)
            .unwrap();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();
        core.connect_station(&"ST-1".into(), OcppVersion::V16, new_tx, None)
            .unwrap();

        let (worker, inbound) = StationWorker::new(OcppHandlerV16::new(old, core), old_tx, 8);
        let task = worker.spawn();
        inbound
            .send(r#"[2,"hb","Heartbeat",{}]"#.to_string())
            .await
            .unwrap();
        task.await.unwrap();
        assert!(old_rx.try_recv().is_err());
    }
}
