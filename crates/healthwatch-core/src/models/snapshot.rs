//! Metric snapshot data models

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of the watched service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Service is running
    Active,
    /// Service is stopped, failed or otherwise not running
    Inactive,
    /// State could not be determined
    #[default]
    Unknown,
}

impl ServiceState {
    /// Interpret the first line printed by `systemctl is-active`
    pub fn from_systemctl(output: &str) -> Self {
        match output.lines().next().map(str::trim) {
            Some("active") => Self::Active,
            Some("inactive" | "failed" | "activating" | "deactivating" | "reloading") => {
                Self::Inactive
            }
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Vendor throttle bitmask, kept opaque and only compared for equality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThrottleFlags(String);

impl ThrottleFlags {
    /// Wrap a raw flag code, normalising case and whitespace
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_lowercase())
    }

    /// Whether the code matches the no-throttle sentinel
    pub fn is_clear(&self, sentinel: &str) -> bool {
        self.0 == sentinel.trim().to_ascii_lowercase()
    }

    /// The raw code
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThrottleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One complete set of simultaneously sampled health metrics.
///
/// A `None` field means the sampler could not read it this cycle.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// SoC temperature in degrees Celsius
    #[serde(default)]
    pub temperature_c: Option<f64>,

    /// CPU utilisation over the sample window
    #[serde(default)]
    pub cpu_usage_percent: Option<f64>,

    /// Memory in use (total minus available)
    #[serde(default)]
    pub memory_usage_percent: Option<f64>,

    /// Usage of the monitored filesystem
    #[serde(default)]
    pub disk_usage_percent: Option<f64>,

    /// Throttle bitmask as reported by firmware
    #[serde(default)]
    pub throttle_flags: Option<ThrottleFlags>,

    /// Run state of the watched service
    #[serde(default)]
    pub watched_service: ServiceState,
}

impl MetricSnapshot {
    /// Snapshot with every reading present and nothing wrong
    pub fn healthy() -> Self {
        Self {
            temperature_c: Some(45.0),
            cpu_usage_percent: Some(10.0),
            memory_usage_percent: Some(40.0),
            disk_usage_percent: Some(50.0),
            throttle_flags: Some(ThrottleFlags::new("0x0")),
            watched_service: ServiceState::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_systemctl_states() {
        assert_eq!(ServiceState::from_systemctl("active\n"), ServiceState::Active);
        assert_eq!(ServiceState::from_systemctl("failed\n"), ServiceState::Inactive);
        assert_eq!(ServiceState::from_systemctl("inactive"), ServiceState::Inactive);
        assert_eq!(ServiceState::from_systemctl(""), ServiceState::Unknown);
        assert_eq!(ServiceState::from_systemctl("bogus"), ServiceState::Unknown);
    }

    #[test]
    fn test_throttle_flags_compare_normalised() {
        let flags = ThrottleFlags::new(" 0X0 ");
        assert!(flags.is_clear("0x0"));
        assert!(!ThrottleFlags::new("0x50005").is_clear("0x0"));
    }

    #[test]
    fn test_snapshot_missing_fields_deserialize_as_unavailable() {
        let snapshot: MetricSnapshot =
            serde_json::from_str(r#"{"temperature_c": 61.5, "watched_service": "active"}"#)
                .unwrap();

        assert_eq!(snapshot.temperature_c, Some(61.5));
        assert_eq!(snapshot.memory_usage_percent, None);
        assert_eq!(snapshot.throttle_flags, None);
        assert_eq!(snapshot.watched_service, ServiceState::Active);
    }
}
