//! OCPP 1.6 message handler
//!
//! Parses raw OCPP-J frames from one station, dispatches Calls to the
//! action handlers and routes CallResult / CallError frames back to the
//! command dispatcher.

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::application::core::SharedChargingCore;
use crate::application::handlers::ocpp_v16::action_matcher;
use crate::application::links::LinkHandle;
use crate::domain::StationId;
use crate::support::Frame;

/// Handler for the frames of one OCPP 1.6 connection
pub struct OcppHandlerV16 {
    pub station_id: StationId,
    pub link: LinkHandle,
    pub core: SharedChargingCore,
}

impl OcppHandlerV16 {
    pub fn new(link: LinkHandle, core: SharedChargingCore) -> Self {
        Self {
            station_id: link.station_id.clone(),
            link,
            core,
        }
    }

    /// Handle one inbound text frame. Returns the frame to send back, if any.
    pub async fn handle(&self, text: &str) -> Option<String> {
        debug!(station_id = %self.station_id, raw = text, "Received frame");

        let frame = match Frame::parse(text) {
            Ok(f) => f,
            Err(e) => match Self::sanitize_and_parse(text) {
                Some(f) => {
                    warn!(station_id = %self.station_id, error = %e, "Frame repaired before parsing");
                    f
                }
                None => {
                    error!(
                        station_id = %self.station_id,
                        error = %e,
                        raw = text,
                        "Failed to parse OCPP frame"
                    );
                    return None;
                }
            },
        };

        match frame {
            Frame::Call {
                unique_id,
                action,
                payload,
            } => Some(self.handle_call(&unique_id, &action, &payload).await),
            Frame::CallResult { unique_id, payload } => {
                self.core
                    .dispatcher()
                    .handle_reply(&self.station_id, &unique_id, payload);
                None
            }
            Frame::CallError {
                unique_id,
                error_code,
                description,
                ..
            } => {
                self.core.dispatcher().handle_error(
                    &self.station_id,
                    &unique_id,
                    &error_code,
                    &description,
                );
                None
            }
        }
    }

    /// Some firmwares send CallResult without a payload, CallError without
    /// a description, or null connector ids. Patch those and retry.
    fn sanitize_and_parse(text: &str) -> Option<Frame> {
        let mut value: Value = serde_json::from_str(text).ok()?;
        let arr = value.as_array_mut()?;
        let kind = arr.first()?.as_u64()?;

        match kind {
            3 => {
                if arr.len() < 3 {
                    arr.push(json!({}));
                } else if arr[2].is_null() {
                    arr[2] = json!({});
                }
            }
            4 => {
                if arr.len() == 2 {
                    arr.push(json!("GenericError"));
                }
                if arr.len() == 3 {
                    arr.push(json!(""));
                }
            }
            2 if arr.len() >= 4 => {
                if let Some(obj) = arr[3].as_object_mut() {
                    for key in ["connectorId", "meterStart", "meterStop"] {
                        if obj.get(key).is_some_and(Value::is_null) {
                            obj.insert(key.to_string(), json!(0));
                        }
                    }
                }
            }
            _ => return None,
        }

        let sanitized = serde_json::to_string(&value).ok()?;
        Frame::parse(&sanitized).ok()
    }

    async fn handle_call(&self, unique_id: &str, action: &str, payload: &Value) -> String {
        info!(station_id = %self.station_id, action, unique_id, "Received Call");

        let response = match action_matcher(self, action, payload).await {
            Ok(payload) => Frame::CallResult {
                unique_id: unique_id.to_string(),
                payload,
            },
            Err(failure) => {
                warn!(
                    station_id = %self.station_id,
                    action,
                    code = failure.code,
                    description = failure.description.as_str(),
                    "Call failed"
                );
                Frame::error(unique_id, failure.code, failure.description)
            }
        };
        let outcome = match response {
            Frame::CallResult { .. } => "result",
            _ => "error",
        };
        metrics::counter!(
            "chargegrid_ocpp_calls_total",
            "action" => action.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        response.to_text()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::mpsc;

    use super::*;
    use crate::application::core::ChargingCore;
    use crate::config::AppConfig;
    use crate::domain::{ChargePoint, MaintenanceKind, OcppVersion, ReportedStatus, Station};
    use crate::infrastructure::InMemoryDirectory;
    use crate::support::ManualClock;

    fn handler() -> (OcppHandlerV16, mpsc::UnboundedReceiver<String>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let core = Arc::new(ChargingCore::with_clock(
            &AppConfig::default(),
            Arc::new(InMemoryDirectory::new()),
            clock,
        ));
        core.provision_station(
            Station::new("ST-1", "T1", "SG-1").with_charge_point(ChargePoint::new("CP-1", 1)),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let link = core
            .connect_station(&"ST-1".into(), OcppVersion::V16, tx, None)
            .unwrap();
        (OcppHandlerV16::new(link, core), rx)
    }

    fn reply(text: &str) -> Frame {
        Frame::parse(text).unwrap()
    }

    #[tokio::test]
    async fn boot_notification_is_accepted() {
        let (handler, _rx) = handler();
        let out = handler
            .handle(r#"[2,"b1","BootNotification",{"chargePointVendor":"ACME","chargePointModel":"X1"}]"#)
            .await
            .unwrap();
        match reply(&out) {
            Frame::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "b1");
                assert_eq!(payload["status"], "Accepted");
                assert!(payload["interval"].as_i64().unwrap() > 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_action_gets_not_implemented() {
        let (handler, _rx) = handler();
        let out = handler.handle(r#"[2,"x1","SignCertificate",{}]"#).await.unwrap();
        match reply(&out) {
            Frame::CallError { error_code, .. } => assert_eq!(error_code, "NotImplemented"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_a_formation_violation() {
        let (handler, _rx) = handler();
        let out = handler
            .handle(r#"[2,"s1","StatusNotification",{"connectorId":"one"}]"#)
            .await
            .unwrap();
        match reply(&out) {
            Frame::CallError { error_code, .. } => assert_eq!(error_code, "FormationViolation"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let (handler, _rx) = handler();
        assert!(handler.handle("not json").await.is_none());
        assert!(handler.handle(r#"[9,"z"]"#).await.is_none());
    }

    #[tokio::test]
    async fn status_notification_reaches_the_store() {
        let (handler, _rx) = handler();
        let out = handler
            .handle(r#"[2,"s2","StatusNotification",{"connectorId":1,"errorCode":"NoError","status":"Faulted"}]"#)
            .await
            .unwrap();
        assert!(matches!(reply(&out), Frame::CallResult { .. }));
        let cp = handler.core.charge_point_status(&"CP-1".into()).unwrap();
        assert_eq!(cp.reported_status, ReportedStatus::Faulted);
    }

    #[tokio::test]
    async fn firmware_status_is_recorded() {
        let (handler, _rx) = handler();
        handler
            .handle(r#"[2,"f1","FirmwareStatusNotification",{"status":"Installed"}]"#)
            .await
            .unwrap();
        let history = handler.core.firmware_history(&"ST-1".into()).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MaintenanceKind::Firmware);
        assert_eq!(history[0].status, "Installed");
    }

    #[tokio::test]
    async fn call_result_without_payload_is_repaired() {
        let (handler, _rx) = handler();
        // no pending command, the reply is routed and discarded
        assert!(handler.handle(r#"[3,"r1"]"#).await.is_none());
    }
}
