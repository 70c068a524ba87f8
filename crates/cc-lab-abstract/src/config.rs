use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("bandwidth must be positive, got {0} Mbps")]
    NonPositiveBandwidth(f64),
    #[error("duration must be positive, got {0} s")]
    NonPositiveDuration(f64),
    #[error("{field} must be finite, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("loss rate must be within [0, 1], got {0}")]
    LossRateOutOfRange(f64),
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("invalid strategy '{spec}': {reason}")]
    InvalidStrategy { spec: String, reason: String },
    #[error("a {bandwidth_mbps} Mbps trace over {duration_seconds} s exceeds {max_entries} entries")]
    TraceTooLarge {
        bandwidth_mbps: f64,
        duration_seconds: f64,
        max_entries: u64,
    },
}

/// Shape of the emulated link between the senders and the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    /// One-way propagation delay added by the shaper.
    pub delay_ms: u64,
    /// Droptail queue limit on the downlink.
    pub queue_size_bytes: u64,
    /// Packet-admission schedule used for both directions.
    pub trace_file: PathBuf,
    /// Optional random loss applied to the downlink.
    #[serde(default)]
    pub loss_rate: Option<f64>,
}

impl Default for NetworkProfile {
    fn default() -> Self {
        Self {
            delay_ms: 88,
            queue_size_bytes: 26_400,
            trace_file: PathBuf::from("traces/2.64mbps-poisson.trace"),
            loss_rate: None,
        }
    }
}

impl NetworkProfile {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(loss) = self.loss_rate
            && !(0.0..=1.0).contains(&loss)
        {
            return Err(ConfigError::LossRateOutOfRange(loss));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_reference_link() {
        let profile = NetworkProfile::default();
        assert_eq!(profile.delay_ms, 88);
        assert_eq!(profile.queue_size_bytes, 26_400);
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn rejects_loss_outside_unit_interval() {
        let profile = NetworkProfile {
            loss_rate: Some(1.5),
            ..Default::default()
        };
        assert_eq!(profile.validate(), Err(ConfigError::LossRateOutOfRange(1.5)));
    }
}
