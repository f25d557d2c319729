use chrono::Utc;
use rand::Rng;
use serde::Serialize;

/// Fixed identity of one agent; set at startup, never mutated.
#[derive(Debug, Clone)]
pub struct SensorIdentity {
    pub sensor_type: String,
    pub sensor_id: String,
    pub topic_prefix: String,
}

impl SensorIdentity {
    pub fn new(sensor_type: String, sensor_id: Option<String>, topic_prefix: String) -> Self {
        let sensor_id = sensor_id.unwrap_or_else(|| sensor_type.clone());
        Self {
            sensor_type,
            sensor_id,
            topic_prefix,
        }
    }

    pub fn telemetry_topic(&self) -> String {
        format!("{}/{}", self.topic_prefix, self.sensor_type)
    }

    pub fn command_topics(&self) -> [String; 2] {
        [
            format!("commands/{}", self.sensor_id),
            "commands/all".to_string(),
        ]
    }
}

/// Wire form of one reading. Key names and order are part of the bus
/// contract.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub timestamp: f64,
    pub value: f64,
    pub sensor_type: String,
}

/// Wall-clock now as float Unix seconds, the sender-side sample timestamp.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One sample: base plus uniform noise in `[-variance, variance]`, rounded
/// to 2 decimal places.
pub fn sample_value(base: f64, variance: f64, rng: &mut impl Rng) -> f64 {
    let raw = if variance > 0.0 {
        base + rng.gen_range(-variance..=variance)
    } else {
        base
    };
    round2(raw)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
