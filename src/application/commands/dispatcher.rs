//! Command dispatcher
//!
//! Sends [`Command`]s over a station's device link and correlates the
//! asynchronous replies. A pending correlation exists only between a
//! successful send and the reply, timeout or drop of its [`PendingReply`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{info, warn};

use super::{
    Command, CommandReply, ConfigurationChange, ConfigurationReport, DiagnosticsWindow,
    RemoteStatus,
};
use crate::application::links::SharedLinkRegistry;
use crate::domain::StationId;
use crate::support::{CoreError, CoreResult, Frame};

type PendingKey = (StationId, String);
type PendingMap = DashMap<PendingKey, PendingRequest>;

struct PendingRequest {
    action: &'static str,
    responder: oneshot::Sender<CoreResult<Value>>,
}

/// Record command dispatch latency and outcome to Prometheus.
fn record_command(action: &'static str, outcome: &'static str, start: Instant) {
    let duration = start.elapsed().as_secs_f64();
    metrics::histogram!("chargegrid_command_latency_seconds", "action" => action)
        .record(duration);
    metrics::counter!("chargegrid_commands_total", "action" => action, "outcome" => outcome)
        .increment(1);
}

pub struct CommandDispatcher {
    links: SharedLinkRegistry,
    pending: Arc<PendingMap>,
    message_counter: AtomicU64,
    default_timeout: Duration,
}

pub type SharedCommandDispatcher = Arc<CommandDispatcher>;

impl CommandDispatcher {
    pub fn new(links: SharedLinkRegistry, default_timeout: Duration) -> Self {
        Self {
            links,
            pending: Arc::new(DashMap::new()),
            message_counter: AtomicU64::new(1),
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn generate_message_id(&self) -> String {
        let id = self.message_counter.fetch_add(1, Ordering::SeqCst);
        format!("CS-{}", id)
    }

    /// Queue `command` on the station's link and return a handle to await
    /// the reply. Offline stations fail immediately with no pending entry.
    pub fn send(
        &self,
        station_id: &StationId,
        command: Command,
        reply_timeout: Duration,
    ) -> CoreResult<PendingReply> {
        if !self.links.is_online(station_id) {
            return Err(CoreError::DeviceUnreachable(station_id.clone()));
        }

        let action = command.action();
        let payload = command.payload()?;
        let correlation_id = self.generate_message_id();
        let frame = Frame::Call {
            unique_id: correlation_id.clone(),
            action: action.to_string(),
            payload,
        };

        let (tx, rx) = oneshot::channel();
        let key = (station_id.clone(), correlation_id.clone());
        self.pending.insert(
            key.clone(),
            PendingRequest {
                action,
                responder: tx,
            },
        );

        info!(
            station_id = %station_id,
            action,
            correlation_id = correlation_id.as_str(),
            "Sending command"
        );

        if let Err(e) = self.links.send_to(station_id, frame.to_text()) {
            self.pending.remove(&key);
            return Err(e);
        }

        Ok(PendingReply {
            station_id: station_id.clone(),
            correlation_id,
            command,
            receiver: rx,
            timeout: reply_timeout,
            pending: self.pending.clone(),
            started: Instant::now(),
        })
    }

    /// Send and wait with the configured default timeout.
    pub async fn execute(&self, station_id: &StationId, command: Command) -> CoreResult<CommandReply> {
        self.send(station_id, command, self.default_timeout)?.wait().await
    }

    /// Route a CallResult. Returns `false` for unknown or expired ids.
    pub fn handle_reply(&self, station_id: &StationId, correlation_id: &str, payload: Value) -> bool {
        let key = (station_id.clone(), correlation_id.to_string());
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                info!(
                    station_id = %station_id,
                    action = pending.action,
                    correlation_id,
                    "Received reply"
                );
                let _ = pending.responder.send(Ok(payload));
                true
            }
            None => {
                warn!(station_id = %station_id, correlation_id, "Reply for unknown request, discarded");
                false
            }
        }
    }

    /// Route a CallError. The device refused the call outright.
    pub fn handle_error(
        &self,
        station_id: &StationId,
        correlation_id: &str,
        error_code: &str,
        description: &str,
    ) -> bool {
        let key = (station_id.clone(), correlation_id.to_string());
        match self.pending.remove(&key) {
            Some((_, pending)) => {
                warn!(
                    station_id = %station_id,
                    action = pending.action,
                    correlation_id,
                    error_code,
                    description,
                    "Received error"
                );
                let status = if description.is_empty() {
                    error_code.to_string()
                } else {
                    format!("{}: {}", error_code, description)
                };
                let _ = pending.responder.send(Err(CoreError::DeviceRejected {
                    station_id: station_id.clone(),
                    action: pending.action,
                    status,
                }));
                true
            }
            None => {
                warn!(station_id = %station_id, correlation_id, error_code, "Error for unknown request, discarded");
                false
            }
        }
    }

    /// Fail every pending command of a station whose link went away.
    pub fn cleanup_station(&self, station_id: &StationId) {
        self.pending.retain(|key, _| &key.0 != station_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_for(&self, station_id: &StationId) -> usize {
        self.pending.iter().filter(|e| &e.key().0 == station_id).count()
    }

    // Typed helpers

    pub async fn get_configuration(
        &self,
        station_id: &StationId,
        keys: Vec<String>,
    ) -> CoreResult<ConfigurationReport> {
        match self.execute(station_id, Command::GetConfiguration { keys }).await? {
            CommandReply::Configuration(report) => Ok(report),
            other => Err(unexpected(other)),
        }
    }

    pub async fn change_configuration(
        &self,
        station_id: &StationId,
        key: String,
        value: String,
    ) -> CoreResult<ConfigurationChange> {
        let command = Command::ChangeConfiguration { key, value };
        match self.execute(station_id, command).await? {
            CommandReply::ConfigurationChanged(change) => Ok(change),
            other => Err(unexpected(other)),
        }
    }

    pub async fn request_diagnostics(
        &self,
        station_id: &StationId,
        upload_url: String,
        window: Option<DiagnosticsWindow>,
    ) -> CoreResult<Option<String>> {
        let command = Command::RequestDiagnostics { upload_url, window };
        match self.execute(station_id, command).await? {
            CommandReply::DiagnosticsRequested { file_name } => Ok(file_name),
            other => Err(unexpected(other)),
        }
    }

    /// `Ok` only when the station accepted.
    pub async fn remote_start(
        &self,
        station_id: &StationId,
        connector_id: u32,
        id_tag: String,
    ) -> CoreResult<()> {
        let command = Command::RemoteStart {
            connector_id,
            id_tag,
        };
        let action = command.action();
        match self.execute(station_id, command).await? {
            CommandReply::RemoteStart(RemoteStatus::Accepted) => Ok(()),
            CommandReply::RemoteStart(status) => Err(CoreError::DeviceRejected {
                station_id: station_id.clone(),
                action,
                status: status.to_string(),
            }),
            other => Err(unexpected(other)),
        }
    }

    /// `Ok` only when the station accepted.
    pub async fn remote_stop(&self, station_id: &StationId, transaction_id: i32) -> CoreResult<()> {
        let command = Command::RemoteStop { transaction_id };
        let action = command.action();
        match self.execute(station_id, command).await? {
            CommandReply::RemoteStop(RemoteStatus::Accepted) => Ok(()),
            CommandReply::RemoteStop(status) => Err(CoreError::DeviceRejected {
                station_id: station_id.clone(),
                action,
                status: status.to_string(),
            }),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(reply: CommandReply) -> CoreError {
    CoreError::Protocol(format!("Unexpected reply {:?}", reply))
}

/// A command in flight. Dropping it releases the correlation slot.
pub struct PendingReply {
    station_id: StationId,
    correlation_id: String,
    command: Command,
    receiver: oneshot::Receiver<CoreResult<Value>>,
    timeout: Duration,
    pending: Arc<PendingMap>,
    started: Instant,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn station_id(&self) -> &StationId {
        &self.station_id
    }

    /// Wait for the reply. A timeout is reported, never retried.
    pub async fn wait(mut self) -> CoreResult<CommandReply> {
        let action = self.command.action();
        let result = match timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(Ok(payload))) => self.command.decode_reply(payload),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(CoreError::DeviceUnreachable(self.station_id.clone())),
            Err(_) => {
                warn!(
                    station_id = %self.station_id,
                    action,
                    correlation_id = self.correlation_id.as_str(),
                    "Command timed out"
                );
                Err(CoreError::DeviceTimeout {
                    station_id: self.station_id.clone(),
                    action,
                })
            }
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(CoreError::DeviceTimeout { .. }) => "timeout",
            Err(CoreError::DeviceRejected { .. }) => "rejected",
            Err(CoreError::DeviceUnreachable(_)) => "unreachable",
            Err(_) => "error",
        };
        record_command(action, outcome, self.started);
        result
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.pending
            .remove(&(self.station_id.clone(), self.correlation_id.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::links::DeviceLinkRegistry;
    use crate::domain::OcppVersion;
    use crate::support::ManualClock;
    use chrono::Utc;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (
        CommandDispatcher,
        SharedLinkRegistry,
        Arc<ManualClock>,
        StationId,
    ) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let links = Arc::new(DeviceLinkRegistry::new(
            chrono::Duration::minutes(10),
            clock.clone(),
        ));
        let dispatcher = CommandDispatcher::new(links.clone(), Duration::from_secs(5));
        (dispatcher, links, clock, StationId::from("ST-1"))
    }

    fn connect(links: &SharedLinkRegistry, st: &StationId) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        links.register(st, OcppVersion::V16, tx);
        rx
    }

    fn sent_id(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
        let text = rx.try_recv().unwrap();
        Frame::parse(&text).unwrap().unique_id().to_string()
    }

    #[tokio::test]
    async fn offline_station_fails_fast_without_pending() {
        let (dispatcher, _links, _clock, st) = setup();
        let err = dispatcher
            .send(
                &st,
                Command::RemoteStart {
                    connector_id: 1,
                    id_tag: "TAG".into(),
                },
                Duration::from_secs(1),
            )
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::DeviceUnreachable(_)));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_resolves_pending_command() {
        let (dispatcher, links, _clock, st) = setup();
        let mut rx = connect(&links, &st);

        let pending = dispatcher
            .send(&st, Command::RemoteStop { transaction_id: 7 }, Duration::from_secs(5))
            .unwrap();
        let id = sent_id(&mut rx);
        assert_eq!(pending.correlation_id(), id);
        assert_eq!(dispatcher.pending_count(), 1);

        assert!(dispatcher.handle_reply(&st, &id, json!({"status": "Accepted"})));
        assert_eq!(
            pending.wait().await.unwrap(),
            CommandReply::RemoteStop(RemoteStatus::Accepted)
        );
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_reply_is_discarded() {
        let (dispatcher, links, _clock, st) = setup();
        let _rx = connect(&links, &st);
        assert!(!dispatcher.handle_reply(&st, "CS-999", json!({})));
    }

    #[tokio::test]
    async fn reply_from_another_station_does_not_match() {
        let (dispatcher, links, _clock, st) = setup();
        let mut rx = connect(&links, &st);
        let _pending = dispatcher
            .send(&st, Command::GetConfiguration { keys: vec![] }, Duration::from_secs(5))
            .unwrap();
        let id = sent_id(&mut rx);
        assert!(!dispatcher.handle_reply(&StationId::from("ST-2"), &id, json!({})));
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_surfaces_and_releases_slot() {
        let (dispatcher, links, _clock, st) = setup();
        let mut rx = connect(&links, &st);
        let pending = dispatcher
            .send(&st, Command::GetConfiguration { keys: vec![] }, Duration::from_secs(2))
            .unwrap();
        let id = sent_id(&mut rx);

        let err = pending.wait().await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceTimeout { .. }));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(!dispatcher.handle_reply(&st, &id, json!({})));
        // nothing was retried
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_pending_reply_releases_slot() {
        let (dispatcher, links, _clock, st) = setup();
        let _rx = connect(&links, &st);
        let pending = dispatcher
            .send(&st, Command::GetConfiguration { keys: vec![] }, Duration::from_secs(5))
            .unwrap();
        assert_eq!(dispatcher.pending_count(), 1);
        drop(pending);
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn call_error_becomes_device_rejected() {
        let (dispatcher, links, _clock, st) = setup();
        let mut rx = connect(&links, &st);
        let pending = dispatcher
            .send(
                &st,
                Command::ChangeConfiguration {
                    key: "K".into(),
                    value: "V".into(),
                },
                Duration::from_secs(5),
            )
            .unwrap();
        let id = sent_id(&mut rx);
        dispatcher.handle_error(&st, &id, "NotImplemented", "nope");
        assert!(matches!(
            pending.wait().await,
            Err(CoreError::DeviceRejected { .. })
        ));
    }

    #[tokio::test]
    async fn cleanup_fails_waiters_as_unreachable() {
        let (dispatcher, links, _clock, st) = setup();
        let _rx = connect(&links, &st);
        let pending = dispatcher
            .send(&st, Command::GetConfiguration { keys: vec![] }, Duration::from_secs(5))
            .unwrap();
        dispatcher.cleanup_station(&st);
        assert!(matches!(
            pending.wait().await,
            Err(CoreError::DeviceUnreachable(_))
        ));
    }

    #[tokio::test]
    async fn stale_link_counts_as_offline() {
        let (dispatcher, links, clock, st) = setup();
        let _rx = connect(&links, &st);
        clock.advance(chrono::Duration::minutes(11));
        assert!(matches!(
            dispatcher.send(&st, Command::RemoteStop { transaction_id: 1 }, Duration::from_secs(1)),
            Err(CoreError::DeviceUnreachable(_))
        ));
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
