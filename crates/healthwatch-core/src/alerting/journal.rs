//! Cycle journal: the append-only record of what each cycle decided
//!
//! Journals never fail the caller. Write errors are reported through
//! `tracing` and dropped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{MetricSnapshot, TriggeredCondition};

/// Which state store operation degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOperation {
    /// Taking the cross-process lock
    Lock,
    /// Reading the last alert time
    Load,
    /// Writing the last alert time
    Save,
}

/// Something a cycle did worth keeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CycleEvent {
    /// No rule fired
    Clean {
        /// The snapshot that was evaluated
        snapshot: MetricSnapshot,
    },
    /// At least one rule fired
    Triggered {
        /// Snapshot that triggered
        snapshot: MetricSnapshot,
        /// Conditions in rule order
        conditions: Vec<TriggeredCondition>,
    },
    /// An alert was withheld by the cooldown
    Suppressed {
        /// Last delivered alert
        last_alert_epoch_seconds: i64,
        /// Seconds until the cooldown ends
        remaining_secs: i64,
    },
    /// The notifier accepted the alert
    Dispatched {
        /// Recorded delivery time
        last_alert_epoch_seconds: i64,
    },
    /// The notifier failed; state left untouched
    DispatchFailed {
        /// Transport failure
        error: String,
    },
    /// The state store failed and the cycle carried on without it
    StorageDegraded {
        /// Failing operation
        operation: StoreOperation,
        /// Store failure
        error: String,
    },
    /// Another cycle held the state lock; this one was skipped
    LockContended {
        /// How long this cycle waited
        waited_ms: u64,
    },
}

/// Append-only sink for cycle events
pub trait CycleJournal: Send + Sync {
    /// Record `event`; must not panic or block for long
    fn record(&self, at: DateTime<Utc>, cycle_id: Uuid, event: &CycleEvent);
}

impl<T: CycleJournal + ?Sized> CycleJournal for Arc<T> {
    fn record(&self, at: DateTime<Utc>, cycle_id: Uuid, event: &CycleEvent) {
        (**self).record(at, cycle_id, event);
    }
}

/// Emits every event as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingJournal;

impl CycleJournal for TracingJournal {
    fn record(&self, at: DateTime<Utc>, cycle_id: Uuid, event: &CycleEvent) {
        let at = at.timestamp();
        match event {
            CycleEvent::Clean { snapshot } => info!(
                %cycle_id,
                at,
                temperature_c = ?snapshot.temperature_c,
                cpu_percent = ?snapshot.cpu_usage_percent,
                memory_percent = ?snapshot.memory_usage_percent,
                disk_percent = ?snapshot.disk_usage_percent,
                service = %snapshot.watched_service,
                "All metrics within bounds"
            ),
            CycleEvent::Triggered { conditions, .. } => {
                let rules: Vec<&str> = conditions.iter().map(|c| c.rule.as_str()).collect();
                info!(%cycle_id, at, rules = ?rules, "Thresholds breached");
            }
            CycleEvent::Suppressed {
                last_alert_epoch_seconds,
                remaining_secs,
            } => info!(
                %cycle_id,
                at,
                last_alert = last_alert_epoch_seconds,
                remaining_secs,
                "Alert suppressed by cooldown"
            ),
            CycleEvent::Dispatched {
                last_alert_epoch_seconds,
            } => info!(%cycle_id, at, last_alert = last_alert_epoch_seconds, "Alert dispatched"),
            CycleEvent::DispatchFailed { error } => {
                warn!(%cycle_id, at, error = %error, "Alert dispatch failed");
            }
            CycleEvent::StorageDegraded { operation, error } => warn!(
                %cycle_id,
                at,
                operation = ?operation,
                error = %error,
                "Alert state unavailable, alerting without dedupe"
            ),
            CycleEvent::LockContended { waited_ms } => {
                warn!(%cycle_id, at, waited_ms, "Alert state locked by another cycle, skipping");
            }
        }
    }
}

#[derive(Serialize)]
struct JournalLine<'a> {
    at: DateTime<Utc>,
    cycle_id: Uuid,
    #[serde(flatten)]
    event: &'a CycleEvent,
}

/// Appends one JSON object per event to a file
#[derive(Debug, Clone)]
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    /// Journal appending to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, line: &JournalLine<'_>) -> std::io::Result<()> {
        let mut encoded = serde_json::to_vec(line)?;
        encoded.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&encoded)
    }
}

impl CycleJournal for JsonlJournal {
    fn record(&self, at: DateTime<Utc>, cycle_id: Uuid, event: &CycleEvent) {
        let line = JournalLine { at, cycle_id, event };
        if let Err(e) = self.append(&line) {
            warn!(path = %self.path.display(), error = %e, "Failed to append cycle journal");
        }
    }
}

/// Forwards every event to each inner journal
#[derive(Default)]
pub struct FanoutJournal {
    journals: Vec<Box<dyn CycleJournal>>,
}

impl FanoutJournal {
    /// Empty fan-out
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a journal
    #[must_use]
    pub fn with(mut self, journal: impl CycleJournal + 'static) -> Self {
        self.journals.push(Box::new(journal));
        self
    }
}

impl CycleJournal for FanoutJournal {
    fn record(&self, at: DateTime<Utc>, cycle_id: Uuid, event: &CycleEvent) {
        for journal in &self.journals {
            journal.record(at, cycle_id, event);
        }
    }
}

/// Keeps events in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryJournal {
    events: Mutex<Vec<CycleEvent>>,
}

impl MemoryJournal {
    /// Empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far
    pub fn events(&self) -> Vec<CycleEvent> {
        self.events.lock().clone()
    }
}

impl CycleJournal for MemoryJournal {
    fn record(&self, _at: DateTime<Utc>, _cycle_id: Uuid, event: &CycleEvent) {
        self.events.lock().push(event.clone());
    }
}
