//! OCPP 1.6 WebSocket server
//!
//! Accepts station connections at `ws://<host>:<port>/ocpp/{station_id}`.
//! Stations that are not provisioned, or that offer no supported
//! subprotocol, are refused during the handshake.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::application::events::DisconnectReason;
use crate::application::handlers::OcppHandlerV16;
use crate::application::services::StationWorker;
use crate::application::SharedChargingCore;
use crate::config::ServerConfig;
use crate::domain::{OcppVersion, StationId};
use crate::support::ShutdownSignal;

/// Frames a station may have queued before its reader waits on the worker.
const INBOUND_QUEUE: usize = 64;

pub type ServerResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// OCPP WebSocket Server
pub struct OcppServer {
    config: ServerConfig,
    core: SharedChargingCore,
    shutdown: ShutdownSignal,
}

impl OcppServer {
    pub fn new(config: ServerConfig, core: SharedChargingCore, shutdown: ShutdownSignal) -> Self {
        Self {
            config,
            core,
            shutdown,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> ServerResult<()> {
        let listener = TcpListener::bind(self.config.address()).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> ServerResult<()> {
        let addr = listener.local_addr()?;
        info!(%addr, "OCPP 1.6 endpoint listening on ws://{}/ocpp/{{station_id}}", addr);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => self.spawn_connection(stream, remote),
                        Err(e) => error!(error = %e, "Failed to accept connection"),
                    }
                }
                _ = self.shutdown.notified().wait() => {
                    info!(
                        connected = self.core.links().count(),
                        "WebSocket server received shutdown signal"
                    );
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, remote: SocketAddr) {
        let core = self.core.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, remote, core, shutdown).await {
                warn!(%remote, error = %e, "Connection ended with error");
            }
        });
    }
}

/// Station id from `/ocpp/{id}`.
pub fn extract_station_id(path: &str) -> Option<StationId> {
    let id = path.trim_start_matches('/').strip_prefix("ocpp/")?;
    let id = id.trim_matches('/');
    if id.is_empty() || id.contains('/') {
        return None;
    }
    Some(StationId::from(id))
}

fn refuse(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

/// Outcome of the handshake checks.
struct Accepted {
    station_id: StationId,
    protocol: OcppVersion,
}

fn check_handshake(
    core: &SharedChargingCore,
    path: &str,
    offered: Option<&str>,
) -> Result<Accepted, ErrorResponse> {
    let station_id = extract_station_id(path)
        .ok_or_else(|| refuse(StatusCode::NOT_FOUND, "expected /ocpp/{station_id}"))?;
    if !core.is_known_station(&station_id) {
        return Err(refuse(StatusCode::NOT_FOUND, "unknown station"));
    }
    let protocol = match offered {
        Some(header) => OcppVersion::negotiate(header)
            .ok_or_else(|| refuse(StatusCode::BAD_REQUEST, "no supported OCPP subprotocol"))?,
        // some stations omit the header entirely
        None => OcppVersion::V16,
    };
    Ok(Accepted {
        station_id,
        protocol,
    })
}

async fn handle_connection(
    stream: TcpStream,
    remote: SocketAddr,
    core: SharedChargingCore,
    shutdown: ShutdownSignal,
) -> ServerResult<()> {
    let mut accepted: Option<Accepted> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok());
            debug!(%remote, path, ?offered, "WebSocket handshake");

            match check_handshake(&core, path, offered) {
                Ok(ok) => {
                    if offered.is_some() {
                        response.headers_mut().insert(
                            "Sec-WebSocket-Protocol",
                            HeaderValue::from_static(ok.protocol.subprotocol()),
                        );
                    }
                    accepted = Some(ok);
                    Ok(response)
                }
                Err(refusal) => {
                    warn!(%remote, path, status = %refusal.status(), "Handshake refused");
                    Err(refusal)
                }
            }
        },
    )
    .await?;

    let Some(Accepted {
        station_id,
        protocol,
    }) = accepted
    else {
        return Ok(());
    };

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let link = core.connect_station(&station_id, protocol, out_tx.clone(), Some(remote.to_string()))?;
    info!(station_id = %station_id, %remote, %protocol, "Station connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let handler = OcppHandlerV16::new(link.clone(), core.clone());
    let (worker, inbound) = StationWorker::new(handler, out_tx, INBOUND_QUEUE);
    let worker_task = worker.spawn();

    let writer_station = station_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            debug!(station_id = %writer_station, frame = text.as_str(), "->");
            if let Err(e) = ws_sender.send(Message::Text(text)).await {
                error!(station_id = %writer_station, error = %e, "Send error");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let reader_station = station_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if inbound.send(text).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!(station_id = %reader_station, ?frame, "Close frame received");
                    return DisconnectReason::Closed;
                }
                Ok(Message::Binary(data)) => {
                    warn!(station_id = %reader_station, bytes = data.len(), "Binary frame ignored");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(station_id = %reader_station, error = %e, "WebSocket error");
                    break;
                }
            }
        }
        DisconnectReason::Closed
    });

    let reason = tokio::select! {
        reason = &mut recv_task => reason.unwrap_or(DisconnectReason::Closed),
        _ = &mut send_task => DisconnectReason::Closed,
        _ = shutdown.notified().wait() => {
            info!(station_id = %station_id, "Closing connection for shutdown");
            DisconnectReason::Shutdown
        }
    };
    recv_task.abort();
    send_task.abort();
    worker_task.abort();

    core.disconnect_station(&link, reason).await;
    info!(station_id = %station_id, ?reason, "Station disconnected");
    Ok(())
}
