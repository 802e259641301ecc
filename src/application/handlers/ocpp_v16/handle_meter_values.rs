//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Measurand, MeterValue, UnitOfMeasure};
use serde_json::Value;
use tracing::{debug, info};

use super::{decode, encode, CallOutcome};
use crate::application::handlers::OcppHandlerV16;
use crate::application::sessions::MeterSample;

/// One sample per meter value, carrying the register, power and SoC
/// readings found in it. Energy is normalised to Wh, power to W.
pub fn samples_from(meter_values: &[MeterValue]) -> Vec<MeterSample> {
    meter_values
        .iter()
        .map(|meter_value| {
            let mut sample = MeterSample {
                at: meter_value.timestamp,
                register_wh: None,
                power_w: None,
                state_of_charge: None,
            };
            for sampled in &meter_value.sampled_value {
                let Ok(value) = sampled.value.parse::<f64>() else {
                    continue;
                };
                let measurand = sampled
                    .measurand
                    .clone()
                    .unwrap_or(Measurand::EnergyActiveImportRegister);
                match measurand {
                    Measurand::EnergyActiveImportRegister => {
                        let wh = match sampled.unit.as_ref() {
                            Some(UnitOfMeasure::KWh) => value * 1000.0,
                            _ => value,
                        };
                        sample.register_wh = Some(wh.round() as i64);
                    }
                    Measurand::PowerActiveImport => {
                        let w = match sampled.unit.as_ref() {
                            Some(UnitOfMeasure::Kw) => value * 1000.0,
                            _ => value,
                        };
                        sample.power_w = Some(w);
                    }
                    Measurand::SoC => sample.state_of_charge = Some(value),
                    other => debug!(measurand = ?other, value, "Unhandled measurand"),
                }
            }
            sample
        })
        .collect()
}

pub async fn handle_meter_values(handler: &OcppHandlerV16, payload: &Value) -> CallOutcome {
    let req: MeterValuesRequest = decode(handler, "MeterValues", payload)?;
    let connector_id = req.connector_id;
    let transaction_id = req.transaction_id;

    info!(
        station_id = %handler.station_id,
        connector_id,
        ?transaction_id,
        samples = req.meter_value.len(),
        "MeterValues"
    );

    let samples = samples_from(&req.meter_value);
    if let Some(running) = handler.core.sessions().record_meter_values(
        &handler.station_id,
        connector_id,
        transaction_id,
        &samples,
    )? {
        debug!(
            station_id = %handler.station_id,
            total = %running.total_money(),
            "Running cost updated"
        );
    }

    encode(&MeterValuesResponse {})
}
