//! BootNotification handler

use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use serde_json::Value;
use tracing::info;

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::BootInfo;

pub async fn handle_boot_notification(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: BootNotificationRequest = decode(handler, "BootNotification", payload)?;

    info!(
        station_id = %handler.station_id,
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        firmware = ?req.firmware_version,
        "BootNotification"
    );

    handler.core.record_boot(
        &handler.link,
        BootInfo {
            vendor: req.charge_point_vendor,
            model: req.charge_point_model,
            serial_number: req.charge_point_serial_number,
            firmware_version: req.firmware_version,
        },
    )?;

    let interval = handler.core.advertised_heartbeat_secs();
    encode(&BootNotificationResponse {
        current_time: handler.core.clock().now(),
        interval: interval.try_into().unwrap_or(300),
        status: RegistrationStatus::Accepted,
    })
}
