//! Process-wide configuration
//!
//! SLA thresholds have no safe defaults; they load once at startup and
//! a missing or nonsensical value is fatal. The finalizer knobs follow
//! the usual struct-with-defaults pattern.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration parse failure: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid SLA configuration: {0}")]
    Invalid(String),
}

/// Compliance SLA thresholds. Loaded once, read-only thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Grace period (ms) after a trip's last event during which late
    /// telemetry may still arrive before finalization.
    pub max_telemetry_time_ms: i64,

    /// Distance (meters) above which a successive telemetry jump inside
    /// a trip counts as a violation.
    pub max_telemetry_distance_m: f64,

    /// Lateness threshold (ms) for trip_start/trip_end delivery.
    pub max_start_end_time_ms: i64,

    /// Lateness threshold (ms) for trip_enter/trip_leave delivery.
    pub max_enter_leave_time_ms: i64,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    compliance_sla: SlaConfig,
}

impl SlaConfig {
    /// Parse the `[compliance_sla]` table out of a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        file.compliance_sla.validate()?;
        Ok(file.compliance_sla)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_telemetry_time_ms <= 0 {
            return Err(ConfigError::Invalid(format!(
                "max_telemetry_time_ms must be positive, got {}",
                self.max_telemetry_time_ms
            )));
        }
        if !(self.max_telemetry_distance_m > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_telemetry_distance_m must be positive, got {}",
                self.max_telemetry_distance_m
            )));
        }
        if self.max_start_end_time_ms <= 0 || self.max_enter_leave_time_ms <= 0 {
            return Err(ConfigError::Invalid(
                "lateness thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Knobs for the periodic trip finalizer.
#[derive(Debug, Clone)]
pub struct FinalizerConfig {
    /// How often to sweep open trips.
    pub sweep_interval: Duration,

    /// How many device keys to pull from the store per page.
    pub device_batch_size: usize,
}

impl Default for FinalizerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            device_batch_size: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sla_from_toml() {
        let raw = r#"
            [compliance_sla]
            max_telemetry_time_ms = 86400000
            max_telemetry_distance_m = 100.0
            max_start_end_time_ms = 30000
            max_enter_leave_time_ms = 30000
        "#;
        let sla = SlaConfig::from_toml_str(raw).unwrap();
        assert_eq!(sla.max_telemetry_time_ms, 86_400_000);
        assert_eq!(sla.max_telemetry_distance_m, 100.0);
    }

    #[test]
    fn test_missing_sla_section_is_fatal() {
        let err = SlaConfig::from_toml_str("[other]\nx = 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_nonpositive_threshold_is_fatal() {
        let raw = r#"
            [compliance_sla]
            max_telemetry_time_ms = 0
            max_telemetry_distance_m = 100.0
            max_start_end_time_ms = 30000
            max_enter_leave_time_ms = 30000
        "#;
        let err = SlaConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
