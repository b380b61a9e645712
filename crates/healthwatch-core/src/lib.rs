//! # Healthwatch
//!
//! Periodic health monitoring and alert deduplication for edge hosts.
//!
//! Each invocation samples a fixed set of health metrics, checks them against
//! static thresholds and, when something is wrong, sends one alert through the
//! configured notification channel. Repeat alerts inside the cooldown window
//! are suppressed.
//!
//! ## Architecture
//!
//! - **Collector**: samples temperature, CPU, memory, disk, throttling and a watched service
//! - **Evaluator**: applies the threshold rules to a snapshot
//! - **Composer**: turns triggered conditions into one message
//! - **Repository**: persists the last delivered alert time
//! - **Monitor**: runs one cycle and decides whether to dispatch
//!
//! ## Quick Start
//!
//! ```bash
//! # Run one cycle (from cron or a systemd timer)
//! healthwatch check
//!
//! # See what would fire without sending anything
//! healthwatch evaluate
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod alerting;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{
        AlertComposer, AlertStateStore, CycleOutcome, CycleReport, FileStateStore, Monitor,
        Notifier, ThresholdEvaluator,
    };
    pub use crate::collector::{HostSampler, MetricSource, SnapshotFile};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
}
