//! Threshold rule evaluation

use tracing::debug;

use crate::models::{MetricSnapshot, ThresholdRule, TriggeredCondition};

/// Applies a fixed rule set to snapshots
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    rules: Vec<ThresholdRule>,
}

impl ThresholdEvaluator {
    /// Create an evaluator over `rules`, kept in declaration order
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    /// Every condition the snapshot triggers, in rule order
    pub fn evaluate(&self, snapshot: &MetricSnapshot) -> Vec<TriggeredCondition> {
        let conditions: Vec<_> = self
            .rules
            .iter()
            .filter_map(|rule| rule.check(snapshot))
            .collect();

        debug!(
            rules = self.rules.len(),
            triggered = conditions.len(),
            "Evaluated snapshot"
        );

        conditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::models::{ServiceState, ThrottleFlags};
    use proptest::prelude::*;

    fn evaluator() -> ThresholdEvaluator {
        ThresholdEvaluator::new(ThresholdRule::standard_set(&ThresholdConfig::default(), "ssh"))
    }

    fn rule_names(conditions: &[TriggeredCondition]) -> Vec<&str> {
        conditions.iter().map(|c| c.rule.as_str()).collect()
    }

    #[test]
    fn test_healthy_snapshot_triggers_nothing() {
        assert!(evaluator().evaluate(&MetricSnapshot::healthy()).is_empty());
    }

    #[test]
    fn test_hot_host_triggers_temperature_only() {
        let snapshot = MetricSnapshot {
            temperature_c: Some(80.0),
            memory_usage_percent: Some(60.0),
            ..MetricSnapshot::healthy()
        };

        let conditions = evaluator().evaluate(&snapshot);
        assert_eq!(rule_names(&conditions), vec!["temperature"]);
    }

    #[test]
    fn test_conditions_follow_rule_order() {
        let snapshot = MetricSnapshot {
            temperature_c: Some(70.0),
            memory_usage_percent: Some(90.0),
            throttle_flags: Some(ThrottleFlags::new("0x50005")),
            watched_service: ServiceState::Unknown,
            ..MetricSnapshot::healthy()
        };

        let conditions = evaluator().evaluate(&snapshot);
        assert_eq!(rule_names(&conditions), vec!["memory", "throttle", "service"]);
    }

    #[test]
    fn test_cpu_and_disk_are_not_rules() {
        let snapshot = MetricSnapshot {
            cpu_usage_percent: Some(100.0),
            disk_usage_percent: Some(99.0),
            ..MetricSnapshot::healthy()
        };

        assert!(evaluator().evaluate(&snapshot).is_empty());
    }

    proptest! {
        #[test]
        fn prop_in_bounds_never_triggers(
            temp in -40.0f64..=75.0,
            mem in 0.0f64..=85.0,
            cpu in 0.0f64..=100.0,
            disk in 0.0f64..=100.0,
        ) {
            let snapshot = MetricSnapshot {
                temperature_c: Some(temp),
                cpu_usage_percent: Some(cpu),
                memory_usage_percent: Some(mem),
                disk_usage_percent: Some(disk),
                throttle_flags: Some(ThrottleFlags::new("0x0")),
                watched_service: ServiceState::Active,
            };

            prop_assert!(evaluator().evaluate(&snapshot).is_empty());
        }

        #[test]
        fn prop_evaluation_is_deterministic(
            temp in proptest::option::of(0.0f64..120.0),
            mem in proptest::option::of(0.0f64..100.0),
            throttled in any::<bool>(),
            service in prop_oneof![
                Just(ServiceState::Active),
                Just(ServiceState::Inactive),
                Just(ServiceState::Unknown),
            ],
        ) {
            let snapshot = MetricSnapshot {
                temperature_c: temp,
                memory_usage_percent: mem,
                throttle_flags: Some(ThrottleFlags::new(if throttled { "0x4" } else { "0x0" })),
                watched_service: service,
                ..MetricSnapshot::default()
            };

            let evaluator = evaluator();
            prop_assert_eq!(evaluator.evaluate(&snapshot), evaluator.evaluate(&snapshot));
        }
    }
}
