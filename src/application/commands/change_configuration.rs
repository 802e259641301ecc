//! ChangeConfiguration

use rust_ocpp::v1_6::messages::change_configuration::{
    ChangeConfigurationRequest, ChangeConfigurationResponse,
};
use serde_json::Value;

use super::ConfigurationChange;
use crate::support::{CoreError, CoreResult};

pub const ACTION: &str = "ChangeConfiguration";

pub fn request(key: &str, value: &str) -> CoreResult<Value> {
    let request = ChangeConfigurationRequest {
        key: key.to_string(),
        value: value.to_string(),
    };
    serde_json::to_value(&request)
        .map_err(|e| CoreError::Protocol(format!("Serialization failed: {}", e)))
}

pub fn parse_reply(payload: Value) -> CoreResult<ConfigurationChange> {
    let response: ChangeConfigurationResponse = serde_json::from_value(payload)
        .map_err(|e| CoreError::Protocol(format!("Failed to parse {ACTION} reply: {}", e)))?;

    match format!("{:?}", response.status).as_str() {
        "Accepted" => Ok(ConfigurationChange::Accepted),
        "RebootRequired" => Ok(ConfigurationChange::RebootRequired),
        "Rejected" => Ok(ConfigurationChange::Rejected),
        "NotSupported" => Ok(ConfigurationChange::NotSupported),
        other => Err(CoreError::Protocol(format!(
            "Unexpected {ACTION} status {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_key_value_payload() {
        assert_eq!(
            request("HeartbeatInterval", "120").unwrap(),
            json!({"key": "HeartbeatInterval", "value": "120"})
        );
    }

    #[test]
    fn maps_every_status() {
        assert_eq!(
            parse_reply(json!({"status": "RebootRequired"})).unwrap(),
            ConfigurationChange::RebootRequired
        );
        assert_eq!(
            parse_reply(json!({"status": "NotSupported"})).unwrap(),
            ConfigurationChange::NotSupported
        );
        assert!(parse_reply(json!({"status": "Maybe"})).is_err());
    }
}
