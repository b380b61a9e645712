//! One monitoring cycle: evaluate, dedupe, dispatch, persist
//!
//! ```text
//! Idle -> Evaluating -> NoTrigger -> Idle
//!                    -> Triggered -> DedupeCheck -> Suppressed -> Idle
//!                                                -> Dispatching -> PersistingState -> Idle
//! ```
//!
//! Dedupe check through persist runs under the store lock so overlapping
//! invocations cannot both pass the cooldown check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tracing::debug;
use uuid::Uuid;

use super::composer::AlertComposer;
use super::evaluator::ThresholdEvaluator;
use super::journal::{CycleEvent, CycleJournal, StoreOperation};
use super::notifier::Notifier;
use super::repository::AlertStateStore;
use crate::config::Config;
use crate::error::{Error, Result, StoreError};
use crate::models::{AlertMessage, AlertState, MetricSnapshot, ThresholdRule, TriggeredCondition};

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing triggered
    Clean,
    /// Triggered, but an alert went out too recently
    Suppressed {
        /// Seconds until the cooldown ends
        remaining_secs: i64,
    },
    /// The alert was delivered
    Delivered {
        /// What was sent
        message: AlertMessage,
    },
    /// The notifier failed; the next cycle will try again
    DeliveryFailed {
        /// What we tried to send
        message: AlertMessage,
        /// Transport failure
        error: String,
    },
    /// Another cycle held the state lock; nothing was done
    LockContended {
        /// How long this cycle waited
        waited_ms: u64,
    },
}

/// Result of [`Monitor::run_cycle`]
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// Identifier tagging this cycle's journal entries
    pub cycle_id: Uuid,
    /// Conditions that triggered, in rule order
    pub conditions: Vec<TriggeredCondition>,
    /// Final state
    #[serde(flatten)]
    pub outcome: CycleOutcome,
    /// The state store failed at some point and the cycle went on without it
    pub storage_degraded: bool,
}

/// Fixed parameters of every cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Notification target identity
    pub target: String,
    /// Minimum time between two delivered alerts
    pub cooldown: Duration,
    /// Longest wait for the state lock
    pub lock_timeout: Duration,
}

impl CycleSettings {
    /// Settings from config; fails if no target is configured
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            target: config.notifier.require_target()?.to_string(),
            cooldown: config.alerting.cooldown,
            lock_timeout: config.state.lock_timeout,
        })
    }
}

/// Drives monitoring cycles against a state store, notifier and journal
pub struct Monitor<S: AlertStateStore> {
    evaluator: ThresholdEvaluator,
    composer: AlertComposer,
    store: Arc<S>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn CycleJournal>,
    settings: CycleSettings,
}

impl<S: AlertStateStore> Monitor<S> {
    /// Create a monitor from its parts
    pub fn new(
        evaluator: ThresholdEvaluator,
        composer: AlertComposer,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn CycleJournal>,
        settings: CycleSettings,
    ) -> Self {
        Self {
            evaluator,
            composer,
            store,
            notifier,
            journal,
            settings,
        }
    }

    /// Standard rules and composer from config
    pub fn from_config(
        config: &Config,
        store: Arc<S>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn CycleJournal>,
    ) -> Result<Self> {
        let settings = CycleSettings::from_config(config)?;
        let rules = ThresholdRule::standard_set(&config.thresholds, &config.sampler.watched_service);

        Ok(Self::new(
            ThresholdEvaluator::new(rules),
            AlertComposer::from_config(&config.alerting),
            store,
            notifier,
            journal,
            settings,
        ))
    }

    /// Run one cycle for `snapshot` taken at `now`.
    ///
    /// Never fails: store and transport errors degrade the cycle and are journaled.
    pub async fn run_cycle(&self, snapshot: &MetricSnapshot, now: DateTime<Utc>) -> CycleReport {
        let mut cycle = Cycle {
            id: Uuid::now_v7(),
            now,
            journal: self.journal.as_ref(),
            storage_degraded: false,
        };

        let conditions = self.evaluator.evaluate(snapshot);
        let Some(message) = self.composer.compose(&conditions, now) else {
            cycle.record(&CycleEvent::Clean {
                snapshot: snapshot.clone(),
            });
            return cycle.finish(conditions, CycleOutcome::Clean);
        };

        cycle.record(&CycleEvent::Triggered {
            snapshot: snapshot.clone(),
            conditions: conditions.clone(),
        });

        let outcome = self.dedupe_and_dispatch(&mut cycle, message).await;
        cycle.finish(conditions, outcome)
    }

    async fn dedupe_and_dispatch(&self, cycle: &mut Cycle<'_>, message: AlertMessage) -> CycleOutcome {
        let _guard = match self.acquire_lock().await {
            Ok(LockAttempt::Acquired(guard)) => Some(guard),
            Ok(LockAttempt::TimedOut(waited)) => {
                let err = Error::LockContention { waited };
                debug!(error = %err, "Skipping cycle");
                let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                cycle.record(&CycleEvent::LockContended { waited_ms });
                return CycleOutcome::LockContended { waited_ms };
            }
            // An unusable lock file is a storage failure like any other: the
            // cycle alerts without overlap protection instead of going silent.
            Err(e) => {
                cycle.degraded(StoreOperation::Lock, &e);
                None
            }
        };

        let prior = match self.store.load() {
            Ok(prior) => prior,
            Err(e) => {
                cycle.degraded(StoreOperation::Load, &e);
                None
            }
        };

        if let Some(prior) = prior {
            let cooldown = i64::try_from(self.settings.cooldown.as_secs()).unwrap_or(i64::MAX);
            let elapsed = prior.elapsed_secs(cycle.now);
            if elapsed < cooldown {
                let remaining_secs = cooldown.saturating_sub(elapsed);
                cycle.record(&CycleEvent::Suppressed {
                    last_alert_epoch_seconds: prior.last_alert_epoch_seconds,
                    remaining_secs,
                });
                return CycleOutcome::Suppressed { remaining_secs };
            }
        }

        if let Err(e) = self.notifier.send(&self.settings.target, &message).await {
            let error = Error::from(e).to_string();
            cycle.record(&CycleEvent::DispatchFailed {
                error: error.clone(),
            });
            return CycleOutcome::DeliveryFailed { message, error };
        }

        let state = AlertState::delivered_at(cycle.now);
        if let Err(e) = self.store.save(state) {
            cycle.degraded(StoreOperation::Save, &e);
        }
        cycle.record(&CycleEvent::Dispatched {
            last_alert_epoch_seconds: state.last_alert_epoch_seconds,
        });

        CycleOutcome::Delivered { message }
    }

    /// Poll the store lock until `lock_timeout`
    async fn acquire_lock(&self) -> std::result::Result<LockAttempt<S::Guard>, StoreError> {
        let started = Instant::now();
        loop {
            if let Some(guard) = self.store.try_lock()? {
                debug!(waited = ?started.elapsed(), "Acquired alert state lock");
                return Ok(LockAttempt::Acquired(guard));
            }

            let waited = started.elapsed();
            if waited >= self.settings.lock_timeout {
                return Ok(LockAttempt::TimedOut(waited));
            }
            sleep(LOCK_POLL_INTERVAL.min(self.settings.lock_timeout - waited)).await;
        }
    }
}

enum LockAttempt<G> {
    Acquired(G),
    TimedOut(Duration),
}

/// Per-cycle bookkeeping
struct Cycle<'a> {
    id: Uuid,
    now: DateTime<Utc>,
    journal: &'a dyn CycleJournal,
    storage_degraded: bool,
}

impl Cycle<'_> {
    fn record(&self, event: &CycleEvent) {
        self.journal.record(self.now, self.id, event);
    }

    fn degraded(&mut self, operation: StoreOperation, err: &StoreError) {
        self.storage_degraded = true;
        self.record(&CycleEvent::StorageDegraded {
            operation,
            error: err.to_string(),
        });
    }

    fn finish(self, conditions: Vec<TriggeredCondition>, outcome: CycleOutcome) -> CycleReport {
        CycleReport {
            cycle_id: self.id,
            conditions,
            outcome,
            storage_degraded: self.storage_degraded,
        }
    }
}
