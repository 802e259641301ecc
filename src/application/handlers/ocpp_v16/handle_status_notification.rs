//! StatusNotification handler

use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use rust_ocpp::v1_6::types::ChargePointStatus;
use serde_json::Value;
use tracing::{info, warn};

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::domain::ReportedStatus;

/// Collapse the OCPP 1.6 connector states onto the states the store keeps.
pub fn reported_status(status: &ChargePointStatus) -> ReportedStatus {
    match status {
        ChargePointStatus::Available => ReportedStatus::Available,
        ChargePointStatus::Preparing
        | ChargePointStatus::Charging
        | ChargePointStatus::SuspendedEV
        | ChargePointStatus::SuspendedEVSE
        | ChargePointStatus::Finishing => ReportedStatus::Occupied,
        ChargePointStatus::Reserved => ReportedStatus::Reserved,
        ChargePointStatus::Unavailable => ReportedStatus::Unavailable,
        ChargePointStatus::Faulted => ReportedStatus::Faulted,
    }
}

pub async fn handle_status_notification(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: StatusNotificationRequest = decode(handler, "StatusNotification", payload)?;
    let connector_id = req.connector_id;

    info!(
        station_id = %handler.station_id,
        connector_id,
        status = ?req.status,
        error_code = ?req.error_code,
        "StatusNotification"
    );

    // connector 0 is the station itself
    let charge_point_id = if connector_id == 0 {
        None
    } else {
        match handler
            .core
            .store()
            .charge_point_by_connector(&handler.station_id, connector_id)
        {
            Some(id) => Some(id),
            None => {
                warn!(station_id = %handler.station_id, connector_id, "Status for unknown connector");
                return encode(&StatusNotificationResponse {});
            }
        }
    };

    let at = req.timestamp.unwrap_or_else(|| handler.core.clock().now());
    handler
        .core
        .apply_status(
            &handler.link,
            charge_point_id.as_ref(),
            reported_status(&req.status),
            at,
        )
        .await?;

    encode(&StatusNotificationResponse {})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charging_states_collapse_to_occupied() {
        for status in [
            ChargePointStatus::Preparing,
            ChargePointStatus::Charging,
            ChargePointStatus::SuspendedEV,
            ChargePointStatus::SuspendedEVSE,
            ChargePointStatus::Finishing,
        ] {
            assert_eq!(reported_status(&status), ReportedStatus::Occupied);
        }
        assert_eq!(
            reported_status(&ChargePointStatus::Faulted),
            ReportedStatus::Faulted
        );
    }
}
