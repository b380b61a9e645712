//! Alerting engine for Healthwatch
//!
//! Threshold evaluation, alert composition, cooldown deduplication and
//! notification delivery.

mod composer;
mod cycle;
mod evaluator;
mod journal;
mod notifier;
mod repository;

pub use composer::AlertComposer;
pub use cycle::{CycleOutcome, CycleReport, CycleSettings, Monitor};
pub use evaluator::ThresholdEvaluator;
pub use journal::{
    CycleEvent, CycleJournal, FanoutJournal, JsonlJournal, MemoryJournal, StoreOperation,
    TracingJournal,
};
pub use notifier::{HttpNotifier, Notifier};
pub use repository::{
    AlertStateStore, FileLockGuard, FileStateStore, MemoryLockGuard, MemoryStateStore,
};
