//! Collector module - metric sampling
//!
//! Produces the [`MetricSnapshot`](crate::models::MetricSnapshot) each cycle
//! evaluates, either from the local host or from a document written by an
//! external sampler.

mod sampler;

pub use sampler::{
    cpu_percent, parse_df, parse_meminfo, parse_millidegrees, parse_proc_stat, parse_throttled,
    CpuTimes, HostSampler, MetricSource, SnapshotFile,
};
