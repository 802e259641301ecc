//! Heartbeat handler
//!
//! Last-seen is refreshed by the station worker for every inbound frame,
//! so all that is left is telling the station the time.

use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use serde_json::Value;
use tracing::debug;

use super::{encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;

pub async fn handle_heartbeat(handler: &OcppHandlerV16, _payload: &Value) -> CallOutcome {
    debug!(station_id = %handler.station_id, "Heartbeat");
    encode(&HeartbeatResponse {
        current_time: handler.core.clock().now(),
    })
}
