//! GetDiagnostics

use rust_ocpp::v1_6::messages::get_diagnostics::{GetDiagnosticsRequest, GetDiagnosticsResponse};
use serde_json::Value;

use super::DiagnosticsWindow;
use crate::support::{CoreError, CoreResult};

pub const ACTION: &str = "GetDiagnostics";

pub fn request(upload_url: &str, window: Option<&DiagnosticsWindow>) -> CoreResult<Value> {
    let request = GetDiagnosticsRequest {
        location: upload_url.to_string(),
        retries: None,
        retry_interval: None,
        start_time: window.map(|w| w.from),
        stop_time: window.map(|w| w.until),
    };
    serde_json::to_value(&request)
        .map_err(|e| CoreError::Protocol(format!("Serialization failed: {}", e)))
}

/// Name of the file the station will upload, if it reported one.
pub fn parse_reply(payload: Value) -> CoreResult<Option<String>> {
    let response: GetDiagnosticsResponse = serde_json::from_value(payload)
        .map_err(|e| CoreError::Protocol(format!("Failed to parse {ACTION} reply: {}", e)))?;
    Ok(response.file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn window_becomes_start_and_stop_time() {
        let window = DiagnosticsWindow {
            from: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            until: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        };
        let payload = request("ftp://logs.example/upload", Some(&window)).unwrap();
        assert_eq!(payload["location"], "ftp://logs.example/upload");
        assert!(payload["startTime"].as_str().unwrap().starts_with("2024-05-01"));
        assert!(payload["stopTime"].as_str().unwrap().starts_with("2024-05-02"));
    }

    #[test]
    fn file_name_is_optional() {
        assert_eq!(parse_reply(json!({})).unwrap(), None);
        assert_eq!(
            parse_reply(json!({"fileName": "diag.zip"})).unwrap().as_deref(),
            Some("diag.zip")
        );
    }
}
