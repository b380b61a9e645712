//! Alert message composition

use chrono::{DateTime, SecondsFormat, Utc};

use crate::config::AlertingConfig;
use crate::models::{AlertMessage, TriggeredCondition};

/// Builds one alert text out of the conditions a cycle triggered
#[derive(Debug, Clone)]
pub struct AlertComposer {
    header: String,
}

impl AlertComposer {
    /// Create a composer with a fixed header line
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }

    /// Header from config, with the host name when one is set
    pub fn from_config(config: &AlertingConfig) -> Self {
        match &config.hostname {
            Some(host) => Self::new(format!("{} on {host}", config.header)),
            None => Self::new(config.header.clone()),
        }
    }

    /// Header line, one line per condition in order, then the timestamp.
    ///
    /// Returns `None` when nothing triggered.
    pub fn compose(&self, conditions: &[TriggeredCondition], now: DateTime<Utc>) -> Option<AlertMessage> {
        if conditions.is_empty() {
            return None;
        }

        let mut lines = Vec::with_capacity(conditions.len() + 2);
        lines.push(self.header.clone());
        lines.extend(conditions.iter().map(|c| format!("- {}", c.message)));
        lines.push(format!("Time: {}", now.to_rfc3339_opts(SecondsFormat::Secs, true)));

        Some(AlertMessage::new(lines.join("\n")))
    }
}

impl Default for AlertComposer {
    fn default() -> Self {
        Self::from_config(&AlertingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn condition(rule: &str, message: &str) -> TriggeredCondition {
        TriggeredCondition {
            rule: rule.to_string(),
            message: message.to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 14, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_empty_conditions_compose_nothing() {
        assert!(AlertComposer::default().compose(&[], now()).is_none());
    }

    #[test]
    fn test_single_condition_layout() {
        let message = AlertComposer::default()
            .compose(&[condition("temperature", "Temperature 80.0°C is above 75.0°C")], now())
            .unwrap();

        assert_eq!(
            message.as_str(),
            "Health alert\n- Temperature 80.0°C is above 75.0°C\nTime: 2026-10-14T08:30:00Z"
        );
    }

    #[test]
    fn test_conditions_keep_order_and_host_header() {
        let composer = AlertComposer::from_config(&AlertingConfig {
            hostname: Some("pi-garage".to_string()),
            ..AlertingConfig::default()
        });
        let conditions = [
            condition("memory", "Memory usage 90.0% is above 85.0%"),
            condition("throttle", "Throttling detected (flags 0x50005)"),
            condition("service", "Service ssh is unknown"),
        ];

        let message = composer.compose(&conditions, now()).unwrap();

        assert_eq!(
            message.as_str(),
            "Health alert on pi-garage\n\
             - Memory usage 90.0% is above 85.0%\n\
             - Throttling detected (flags 0x50005)\n\
             - Service ssh is unknown\n\
             Time: 2026-10-14T08:30:00Z"
        );
        assert_eq!(composer.compose(&conditions, now()), Some(message));
    }
}
