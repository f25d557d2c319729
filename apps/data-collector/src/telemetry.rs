use serde::Deserialize;
use thiserror::Error;

/// Wire form of an inbound reading. `sensor_type` also travels on the wire
/// but the topic is authoritative, so only these two fields matter here.
#[derive(Debug, Deserialize)]
struct WireTelemetry {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    value: Option<f64>,
}

/// Why an inbound payload was rejected. Rejections are logged and counted;
/// they never stop the ingestion stream.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("malformed telemetry payload: {0}")]
    Malformed(#[from] simd_json::Error),
    #[error("payload is missing 'value'")]
    MissingValue,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedReading {
    pub measurement_time: f64,
    pub value: f64,
}

/// Parses one payload. A reading without a sender timestamp falls back to
/// the ingestor's receipt time; a reading without a value is rejected.
pub fn parse_payload(payload: &mut [u8], received_at: f64) -> Result<AcceptedReading, RejectReason> {
    let wire: WireTelemetry = simd_json::from_slice(payload)?;
    let value = wire.value.ok_or(RejectReason::MissingValue)?;
    let measurement_time = wire.timestamp.unwrap_or(received_at);
    Ok(AcceptedReading {
        measurement_time,
        value,
    })
}
