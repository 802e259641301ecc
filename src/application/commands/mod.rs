//! Outbound commands from the core to a station
//!
//! ```text
//! ChargingCore / SessionManager ──► CommandDispatcher::send(station, Command, timeout)
//!                                          │
//!                                  encode via rust_ocpp 1.6 types
//!                                  record pending (station, correlation id)
//!                                  queue Call frame on the device link
//!                                          │
//! station worker ──► handle_reply / handle_error ──► PendingReply resolves
//! ```
//!
//! Each command lives in its own module with its action name, request
//! builder and reply parser.

pub mod change_configuration;
pub mod dispatcher;
pub mod get_configuration;
pub mod get_diagnostics;
pub mod remote_start;
pub mod remote_stop;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::support::{CoreError, CoreResult};

pub use dispatcher::{CommandDispatcher, PendingReply, SharedCommandDispatcher};

/// Time range of logs requested from a station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsWindow {
    pub from: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

/// One request the core can send to a station.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetConfiguration {
        keys: Vec<String>,
    },
    ChangeConfiguration {
        key: String,
        value: String,
    },
    RequestDiagnostics {
        upload_url: String,
        window: Option<DiagnosticsWindow>,
    },
    RemoteStart {
        connector_id: u32,
        id_tag: String,
    },
    RemoteStop {
        transaction_id: i32,
    },
}

impl Command {
    /// OCPP action name on the wire.
    pub fn action(&self) -> &'static str {
        match self {
            Self::GetConfiguration { .. } => get_configuration::ACTION,
            Self::ChangeConfiguration { .. } => change_configuration::ACTION,
            Self::RequestDiagnostics { .. } => get_diagnostics::ACTION,
            Self::RemoteStart { .. } => remote_start::ACTION,
            Self::RemoteStop { .. } => remote_stop::ACTION,
        }
    }

    pub fn payload(&self) -> CoreResult<Value> {
        match self {
            Self::GetConfiguration { keys } => get_configuration::request(keys),
            Self::ChangeConfiguration { key, value } => change_configuration::request(key, value),
            Self::RequestDiagnostics { upload_url, window } => {
                get_diagnostics::request(upload_url, window.as_ref())
            }
            Self::RemoteStart {
                connector_id,
                id_tag,
            } => remote_start::request(*connector_id, id_tag),
            Self::RemoteStop { transaction_id } => remote_stop::request(*transaction_id),
        }
    }

    /// Decode the CallResult payload answering this command.
    pub fn decode_reply(&self, payload: Value) -> CoreResult<CommandReply> {
        Ok(match self {
            Self::GetConfiguration { .. } => {
                CommandReply::Configuration(get_configuration::parse_reply(payload)?)
            }
            Self::ChangeConfiguration { .. } => {
                CommandReply::ConfigurationChanged(change_configuration::parse_reply(payload)?)
            }
            Self::RequestDiagnostics { .. } => CommandReply::DiagnosticsRequested {
                file_name: get_diagnostics::parse_reply(payload)?,
            },
            Self::RemoteStart { .. } => CommandReply::RemoteStart(remote_start::parse_reply(payload)?),
            Self::RemoteStop { .. } => CommandReply::RemoteStop(remote_stop::parse_reply(payload)?),
        })
    }
}

/// Typed answer to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Configuration(ConfigurationReport),
    ConfigurationChanged(ConfigurationChange),
    DiagnosticsRequested { file_name: Option<String> },
    RemoteStart(RemoteStatus),
    RemoteStop(RemoteStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationEntry {
    pub key: String,
    pub readonly: bool,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationReport {
    pub entries: Vec<ConfigurationEntry>,
    pub unknown_keys: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationChange {
    Accepted,
    RebootRequired,
    Rejected,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStatus {
    Accepted,
    Rejected,
}

impl RemoteStatus {
    fn parse(action: &str, status: &str) -> CoreResult<Self> {
        match status {
            "Accepted" => Ok(Self::Accepted),
            "Rejected" => Ok(Self::Rejected),
            other => Err(CoreError::Protocol(format!(
                "Unexpected {action} status {other}"
            ))),
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("Accepted"),
            Self::Rejected => f.write_str("Rejected"),
        }
    }
}
