//! DiagnosticsStatusNotification handler

use rust_ocpp::v1_6::messages::diagnostics_status_notification::{
    DiagnosticsStatusNotificationRequest, DiagnosticsStatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::MaintenanceKind;

pub async fn handle_diagnostics_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> CallOutcome {
    let req: DiagnosticsStatusNotificationRequest =
        decode(handler, "DiagnosticsStatusNotification", payload)?;

    info!(
        station_id = %handler.station_id,
        status = ?req.status,
        "DiagnosticsStatusNotification"
    );

    handler.core.record_maintenance(
        &handler.link,
        MaintenanceKind::Diagnostics,
        format!("{:?}", req.status),
    )?;

    encode(&DiagnosticsStatusNotificationResponse {})
}
