//! Alert data models

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::snapshot::{MetricSnapshot, ServiceState};
use crate::config::ThresholdConfig;

/// What a rule looks at and when it fires
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleCheck {
    /// Temperature strictly above the limit
    TemperatureAbove {
        /// Limit in degrees Celsius
        limit: f64,
    },
    /// Memory usage strictly above the limit
    MemoryAbove {
        /// Limit in percent
        limit: f64,
    },
    /// Throttle flags differ from the no-throttle sentinel
    Throttled {
        /// Sentinel code meaning "not throttled"
        clear: String,
    },
    /// Watched service is anything but active
    ServiceNotActive {
        /// Unit name, used in the message
        service: String,
    },
}

/// A named predicate over a snapshot plus its message template.
///
/// Templates may use `{value}`, `{limit}` and `{service}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    /// Stable rule name
    pub name: String,

    /// Predicate
    pub check: RuleCheck,

    /// Message rendered when the rule fires on a present reading
    pub message_template: String,
}

impl ThresholdRule {
    /// Create a rule
    pub fn new(name: impl Into<String>, check: RuleCheck, message_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            check,
            message_template: message_template.into(),
        }
    }

    /// The fixed rule set, in declaration order
    pub fn standard_set(thresholds: &ThresholdConfig, watched_service: &str) -> Vec<Self> {
        vec![
            Self::new(
                "temperature",
                RuleCheck::TemperatureAbove {
                    limit: thresholds.temperature_c,
                },
                "Temperature {value}°C is above {limit}°C",
            ),
            Self::new(
                "memory",
                RuleCheck::MemoryAbove {
                    limit: thresholds.memory_percent,
                },
                "Memory usage {value}% is above {limit}%",
            ),
            Self::new(
                "throttle",
                RuleCheck::Throttled {
                    clear: thresholds.throttle_clear.clone(),
                },
                "Throttling detected (flags {value})",
            ),
            Self::new(
                "service",
                RuleCheck::ServiceNotActive {
                    service: watched_service.to_string(),
                },
                "Service {service} is {value}",
            ),
        ]
    }

    /// Apply the rule; an unreadable field counts as a breach
    pub fn check(&self, snapshot: &MetricSnapshot) -> Option<TriggeredCondition> {
        let message = match &self.check {
            RuleCheck::TemperatureAbove { limit } => {
                self.check_above(snapshot.temperature_c, *limit, "Temperature")?
            }
            RuleCheck::MemoryAbove { limit } => {
                self.check_above(snapshot.memory_usage_percent, *limit, "Memory usage")?
            }
            RuleCheck::Throttled { clear } => match &snapshot.throttle_flags {
                Some(flags) if flags.is_clear(clear) => return None,
                Some(flags) => self.render(flags.as_str(), ""),
                None => "Throttle state unavailable".to_string(),
            },
            RuleCheck::ServiceNotActive { .. } => match snapshot.watched_service {
                ServiceState::Active => return None,
                state => self.render(&state.to_string(), ""),
            },
        };

        Some(TriggeredCondition {
            rule: self.name.clone(),
            message,
        })
    }

    fn check_above(&self, reading: Option<f64>, limit: f64, label: &str) -> Option<String> {
        match reading {
            Some(value) if !value.is_finite() => Some(format!("{label} unavailable")),
            Some(value) if value > limit => {
                Some(self.render(&format!("{value:.1}"), &format!("{limit:.1}")))
            }
            Some(_) => None,
            None => Some(format!("{label} unavailable")),
        }
    }

    fn render(&self, value: &str, limit: &str) -> String {
        let service = match &self.check {
            RuleCheck::ServiceNotActive { service } => service.as_str(),
            _ => "",
        };

        self.message_template
            .replace("{value}", value)
            .replace("{limit}", limit)
            .replace("{service}", service)
    }
}

/// One rule that fired against one snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredCondition {
    /// Name of the rule that fired
    pub rule: String,

    /// Rendered message
    pub message: String,
}

/// The persisted alert history: when an alert was last delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertState {
    /// Epoch seconds of the last delivered alert
    pub last_alert_epoch_seconds: i64,
}

impl AlertState {
    /// State recording a delivery at `at`
    pub fn delivered_at(at: DateTime<Utc>) -> Self {
        Self {
            last_alert_epoch_seconds: at.timestamp(),
        }
    }

    /// Seconds from the last alert to `now`; negative if the clock moved back
    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().saturating_sub(self.last_alert_epoch_seconds)
    }

    /// Last alert time as a timestamp
    pub fn last_alert(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.last_alert_epoch_seconds, 0).single()
    }
}

/// A composed, ready-to-send alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlertMessage(String);

impl AlertMessage {
    /// Wrap composed text
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Message text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
