//! RemoteStopTransaction

use rust_ocpp::v1_6::messages::remote_stop_transaction::{
    RemoteStopTransactionRequest, RemoteStopTransactionResponse,
};
use serde_json::Value;

use super::RemoteStatus;
use crate::support::{CoreError, CoreResult};

pub const ACTION: &str = "RemoteStopTransaction";

pub fn request(transaction_id: i32) -> CoreResult<Value> {
    let request = RemoteStopTransactionRequest { transaction_id };
    serde_json::to_value(&request)
        .map_err(|e| CoreError::Protocol(format!("Serialization failed: {}", e)))
}

pub fn parse_reply(payload: Value) -> CoreResult<RemoteStatus> {
    let response: RemoteStopTransactionResponse = serde_json::from_value(payload)
        .map_err(|e| CoreError::Protocol(format!("Failed to parse {ACTION} reply: {}", e)))?;
    RemoteStatus::parse(ACTION, &format!("{:?}", response.status))
}
