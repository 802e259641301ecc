//! RemoteStartTransaction

use rust_ocpp::v1_6::messages::remote_start_transaction::RemoteStartTransactionResponse;
use serde_json::{json, Value};

use super::RemoteStatus;
use crate::support::{CoreError, CoreResult};

pub const ACTION: &str = "RemoteStartTransaction";

pub fn request(connector_id: u32, id_tag: &str) -> CoreResult<Value> {
    Ok(json!({
        "connectorId": connector_id,
        "idTag": id_tag,
    }))
}

pub fn parse_reply(payload: Value) -> CoreResult<RemoteStatus> {
    let response: RemoteStartTransactionResponse = serde_json::from_value(payload)
        .map_err(|e| CoreError::Protocol(format!("Failed to parse {ACTION} reply: {}", e)))?;
    RemoteStatus::parse(ACTION, &format!("{:?}", response.status))
}
