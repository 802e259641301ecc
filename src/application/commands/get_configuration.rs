//! GetConfiguration

use rust_ocpp::v1_6::messages::get_configuration::{
    GetConfigurationRequest, GetConfigurationResponse,
};
use serde_json::Value;

use super::{ConfigurationEntry, ConfigurationReport};
use crate::support::{CoreError, CoreResult};

pub const ACTION: &str = "GetConfiguration";

/// An empty key list asks for every key the station knows.
pub fn request(keys: &[String]) -> CoreResult<Value> {
    let request = GetConfigurationRequest {
        key: if keys.is_empty() {
            None
        } else {
            Some(keys.to_vec())
        },
    };
    serde_json::to_value(&request)
        .map_err(|e| CoreError::Protocol(format!("Serialization failed: {}", e)))
}

pub fn parse_reply(payload: Value) -> CoreResult<ConfigurationReport> {
    let response: GetConfigurationResponse = serde_json::from_value(payload)
        .map_err(|e| CoreError::Protocol(format!("Failed to parse {ACTION} reply: {}", e)))?;

    let entries = response
        .configuration_key
        .unwrap_or_default()
        .into_iter()
        .map(|kv| ConfigurationEntry {
            key: kv.key,
            readonly: kv.readonly,
            value: kv.value,
        })
        .collect();

    Ok(ConfigurationReport {
        entries,
        unknown_keys: response.unknown_key.unwrap_or_default(),
    })
}
