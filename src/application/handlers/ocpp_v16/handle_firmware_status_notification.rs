//! FirmwareStatusNotification handler

use rust_ocpp::v1_6::messages::firmware_status_notification::{
    FirmwareStatusNotificationRequest, FirmwareStatusNotificationResponse,
};
use serde_json::Value;
use tracing::info;

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::MaintenanceKind;

pub async fn handle_firmware_status_notification(
    handler: &OcppHandlerV16,
    payload: &Value,
) -> CallOutcome {
    let req: FirmwareStatusNotificationRequest =
        decode(handler, "FirmwareStatusNotification", payload)?;

    info!(
        station_id = %handler.station_id,
        status = ?req.status,
        "FirmwareStatusNotification"
    );

    handler.core.record_maintenance(
        &handler.link,
        MaintenanceKind::Firmware,
        format!("{:?}", req.status),
    )?;

    encode(&FirmwareStatusNotificationResponse {})
}
