//! OCPP 1.6 action handlers
//!
//! One module per station-initiated action. Each handler decodes its
//! `rust_ocpp` request, feeds the charging core and encodes the response.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::application::handlers::OcppHandlerV16;
use crate::support::CoreError;

mod handle_authorize;
mod handle_boot_notification;
mod handle_diagnostics_status_notification;
mod handle_firmware_status_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

pub use handle_authorize::handle_authorize;
pub use handle_boot_notification::handle_boot_notification;
pub use handle_diagnostics_status_notification::handle_diagnostics_status_notification;
pub use handle_firmware_status_notification::handle_firmware_status_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::{handle_meter_values, samples_from};
pub use handle_start_transaction::handle_start_transaction;
pub use handle_status_notification::{handle_status_notification, reported_status};
pub use handle_stop_transaction::handle_stop_transaction;

/// A Call the core could not answer with a CallResult.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub code: &'static str,
    pub description: String,
}

impl CallFailure {
    pub fn not_implemented(action: &str) -> Self {
        Self {
            code: "NotImplemented",
            description: format!("Action {} is not supported", action),
        }
    }

    pub fn formation_violation(error: impl fmt::Display) -> Self {
        Self {
            code: "FormationViolation",
            description: error.to_string(),
        }
    }

    pub fn internal(error: impl fmt::Display) -> Self {
        Self {
            code: "InternalError",
            description: error.to_string(),
        }
    }
}

impl From<CoreError> for CallFailure {
    fn from(error: CoreError) -> Self {
        let code = if error.is_internal() {
            "InternalError"
        } else {
            "GenericError"
        };
        Self {
            code,
            description: error.to_string(),
        }
    }
}

pub type CallOutcome = Result<Value, CallFailure>;

pub(crate) fn decode<T: DeserializeOwned>(
    handler: &OcppHandlerV16,
    action: &str,
    payload: &Value,
) -> Result<T, CallFailure> {
    serde_json::from_value(payload.clone()).map_err(|e| {
        error!(
            station_id = %handler.station_id,
            action,
            error = %e,
            "Failed to decode request"
        );
        CallFailure::formation_violation(e)
    })
}

pub(crate) fn encode<T: Serialize>(response: &T) -> CallOutcome {
    serde_json::to_value(response).map_err(CallFailure::internal)
}

/// Routes station-initiated actions to their handlers.
pub async fn action_matcher(handler: &OcppHandlerV16, action: &str, payload: &Value) -> CallOutcome {
    match action {
        "Authorize" => handle_authorize(handler, payload).await,
        "BootNotification" => handle_boot_notification(handler, payload).await,
        "DiagnosticsStatusNotification" => {
            handle_diagnostics_status_notification(handler, payload).await
        }
        "FirmwareStatusNotification" => handle_firmware_status_notification(handler, payload).await,
        "Heartbeat" => handle_heartbeat(handler, payload).await,
        "MeterValues" => handle_meter_values(handler, payload).await,
        "StartTransaction" => handle_start_transaction(handler, payload).await,
        "StatusNotification" => handle_status_notification(handler, payload).await,
        "StopTransaction" => handle_stop_transaction(handler, payload).await,
        other => {
            warn!(station_id = %handler.station_id, action = other, "Unsupported action");
            Err(CallFailure::not_implemented(other))
        }
    }
}
