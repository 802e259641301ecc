//! StartTransaction handler

use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use serde_json::Value;
use tracing::info;

use super::handle_authorize::id_tag_info;
use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;

pub async fn handle_start_transaction(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: StartTransactionRequest = decode(handler, "StartTransaction", payload)?;
    let connector_id = req.connector_id;
    let meter_start = i64::from(req.meter_start);

    info!(
        station_id = %handler.station_id,
        connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start,
        "StartTransaction"
    );

    let decision = handler
        .core
        .sessions()
        .on_transaction_started(&handler.station_id, connector_id, &req.id_tag, meter_start)
        .await?;

    encode(&StartTransactionResponse {
        transaction_id: decision.transaction_id,
        id_tag_info: id_tag_info(decision.verdict),
    })
}
