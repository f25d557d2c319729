use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

fn default_count() -> u32 {
    10
}

fn default_interval() -> f64 {
    1.0
}

fn default_base() -> f64 {
    25.0
}

fn default_variance() -> f64 {
    5.0
}

/// Command body received on `commands/{sensor_id}` or `commands/all`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum CommandEnvelope {
    Measure {
        #[serde(default = "default_count")]
        count: u32,
        #[serde(default = "default_interval")]
        interval: f64,
        #[serde(default = "default_base")]
        base: f64,
        #[serde(default = "default_variance")]
        variance: f64,
    },
    Stop,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("invalid command payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("count must be positive")]
    ZeroCount,
    #[error("interval must be a valid non-negative duration")]
    BadInterval,
    #[error("variance must be a non-negative number")]
    BadVariance,
}

/// Parameters of one measurement run, fixed at the moment the `measure`
/// envelope is accepted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasureParams {
    pub count: u32,
    pub interval: Duration,
    pub base: f64,
    pub variance: f64,
}

impl CommandEnvelope {
    fn validate(&self) -> Result<(), CommandError> {
        if let CommandEnvelope::Measure {
            count,
            interval,
            variance,
            ..
        } = self
        {
            if *count == 0 {
                return Err(CommandError::ZeroCount);
            }
            // Rejects negative, non-finite, and Duration-overflowing values.
            if Duration::try_from_secs_f64(*interval).is_err() {
                return Err(CommandError::BadInterval);
            }
            if !variance.is_finite() || *variance < 0.0 {
                return Err(CommandError::BadVariance);
            }
        }
        Ok(())
    }

    pub fn measure_params(&self) -> Option<MeasureParams> {
        match *self {
            CommandEnvelope::Measure {
                count,
                interval,
                base,
                variance,
            } => {
                // Total even on unvalidated input: an interval Duration
                // cannot represent never starts a run.
                let interval = Duration::try_from_secs_f64(interval).ok()?;
                Some(MeasureParams {
                    count,
                    interval,
                    base,
                    variance,
                })
            }
            CommandEnvelope::Stop => None,
        }
    }
}

/// Parses and validates one inbound command payload. Anything that fails
/// here is discarded by the caller without a state change.
pub fn parse_command(payload: &[u8]) -> Result<CommandEnvelope, CommandError> {
    let envelope: CommandEnvelope = serde_json::from_slice(payload)?;
    envelope.validate()?;
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_measure_with_explicit_parameters() {
        let envelope = parse_command(
            br#"{"command":"measure","count":3,"interval":0.5,"base":25.0,"variance":0.0}"#,
        )
        .unwrap();
        let params = envelope.measure_params().unwrap();
        assert_eq!(params.count, 3);
        assert_eq!(params.interval, Duration::from_millis(500));
        assert_eq!(params.base, 25.0);
        assert_eq!(params.variance, 0.0);
    }

    #[test]
    fn measure_parameters_default_when_omitted() {
        let envelope = parse_command(br#"{"command":"measure"}"#).unwrap();
        let params = envelope.measure_params().unwrap();
        assert_eq!(params.count, 10);
        assert_eq!(params.interval, Duration::from_secs(1));
        assert_eq!(params.base, 25.0);
        assert_eq!(params.variance, 5.0);
    }

    #[test]
    fn parses_stop() {
        let envelope = parse_command(br#"{"command":"stop"}"#).unwrap();
        assert_eq!(envelope, CommandEnvelope::Stop);
        assert!(envelope.measure_params().is_none());
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            parse_command(br#"{"command":"reboot"}"#),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            parse_command(b"not json at all"),
            Err(CommandError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(matches!(
            parse_command(br#"{"command":"measure","count":0}"#),
            Err(CommandError::ZeroCount)
        ));
        assert!(matches!(
            parse_command(br#"{"command":"measure","interval":-1.0}"#),
            Err(CommandError::BadInterval)
        ));
        assert!(matches!(
            parse_command(br#"{"command":"measure","variance":-2.5}"#),
            Err(CommandError::BadVariance)
        ));
    }

    #[test]
    fn rejects_interval_too_large_for_a_duration() {
        // Larger than Duration can hold; must be discarded at parse time,
        // not blow up the agent loop.
        assert!(matches!(
            parse_command(br#"{"command":"measure","interval":1e300}"#),
            Err(CommandError::BadInterval)
        ));
    }

    #[test]
    fn oversized_interval_never_yields_run_params() {
        let envelope = CommandEnvelope::Measure {
            count: 1,
            interval: 1e300,
            base: 25.0,
            variance: 0.0,
        };
        assert!(envelope.measure_params().is_none());
    }
}
