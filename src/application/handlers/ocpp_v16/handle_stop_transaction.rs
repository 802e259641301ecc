//! StopTransaction handler

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use super::handle_authorize::id_tag_info;
use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::application::sessions::TagVerdict;

pub async fn handle_stop_transaction(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: StopTransactionRequest = decode(handler, "StopTransaction", payload)?;
    let meter_stop = i64::from(req.meter_stop);
    let reason = req.reason.as_ref().map(|r| format!("{:?}", r));

    info!(
        station_id = %handler.station_id,
        transaction_id = req.transaction_id,
        meter_stop,
        ?reason,
        "StopTransaction"
    );

    let ended = handler
        .core
        .sessions()
        .on_transaction_stopped(&handler.station_id, req.transaction_id, meter_stop, reason)
        .await?;

    if let Some(session) = ended {
        info!(
            station_id = %handler.station_id,
            session_id = %session.id,
            energy_wh = session.energy_wh,
            total = ?session.cost.as_ref().map(|c| c.total_money().to_string()),
            "Transaction closed"
        );
    }

    // the tag is only echoed back when the station sent one
    encode(&StopTransactionResponse {
        id_tag_info: req.id_tag.as_ref().map(|_| id_tag_info(TagVerdict::Accepted)),
    })
}
