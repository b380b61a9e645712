//! Host metric sampling from procfs, sysfs and a few system commands

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::models::{MetricSnapshot, ServiceState, ThrottleFlags};

/// Produces one snapshot per call.
///
/// Never fails as a whole; a reading that cannot be taken is left `None`.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Sample every metric once
    async fn sample(&self) -> MetricSnapshot;
}

/// Samples the local Linux host
#[derive(Debug, Clone)]
pub struct HostSampler {
    config: SamplerConfig,
}

impl HostSampler {
    /// Create a sampler
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    async fn temperature(&self) -> Option<f64> {
        let raw = tokio::fs::read_to_string(&self.config.thermal_path).await.ok()?;
        parse_millidegrees(&raw)
    }

    async fn cpu(&self) -> Option<f64> {
        let before = parse_proc_stat(&tokio::fs::read_to_string("/proc/stat").await.ok()?)?;
        sleep(self.config.cpu_sample_window).await;
        let after = parse_proc_stat(&tokio::fs::read_to_string("/proc/stat").await.ok()?)?;
        cpu_percent(before, after)
    }

    async fn memory(&self) -> Option<f64> {
        let meminfo = tokio::fs::read_to_string("/proc/meminfo").await.ok()?;
        parse_meminfo(&meminfo)
    }

    async fn disk(&self) -> Option<f64> {
        let mount = self.config.disk_mount.to_string_lossy();
        let output = self.run("df", &["-P", mount.as_ref()], true).await?;
        parse_df(&output)
    }

    async fn throttle(&self) -> Option<ThrottleFlags> {
        let output = self.run("vcgencmd", &["get_throttled"], true).await?;
        parse_throttled(&output)
    }

    async fn service(&self) -> ServiceState {
        // is-active exits non-zero for inactive units but still prints the state
        match self
            .run("systemctl", &["is-active", self.config.watched_service.as_str()], false)
            .await
        {
            Some(output) => ServiceState::from_systemctl(&output),
            None => ServiceState::Unknown,
        }
    }

    async fn run(&self, program: &str, args: &[&str], require_success: bool) -> Option<String> {
        let output = match timeout(
            self.config.command_timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                debug!(program, error = %e, "Command failed to start");
                return None;
            }
            Err(_) => {
                warn!(program, timeout = ?self.config.command_timeout, "Command timed out");
                return None;
            }
        };

        if require_success && !output.status.success() {
            debug!(program, status = %output.status, "Command exited unsuccessfully");
            return None;
        }

        String::from_utf8(output.stdout).ok()
    }
}

#[async_trait]
impl MetricSource for HostSampler {
    async fn sample(&self) -> MetricSnapshot {
        let (temperature, cpu, memory, disk, throttle, service) = tokio::join!(
            self.temperature(),
            self.cpu(),
            self.memory(),
            self.disk(),
            self.throttle(),
            self.service(),
        );

        let snapshot = MetricSnapshot {
            temperature_c: temperature,
            cpu_usage_percent: cpu,
            memory_usage_percent: memory,
            disk_usage_percent: disk,
            throttle_flags: throttle,
            watched_service: service,
        };

        debug!(?snapshot, "Sampled host metrics");
        snapshot
    }
}

/// A snapshot supplied as a JSON document by an external sampler
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    /// Snapshot stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Document location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the snapshot
    pub async fn load(&self) -> Result<MetricSnapshot> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::config(format!("cannot read snapshot {}: {e}", self.path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    /// idle + iowait
    pub idle: u64,
    /// Sum of all fields
    pub total: u64,
}

/// Convert sysfs millidegrees to degrees Celsius
pub fn parse_millidegrees(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .map(|t| t / 1000.0)
}

/// Parse the aggregate `cpu` line of `/proc/stat`
pub fn parse_proc_stat(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let vals: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect();
    if vals.len() < 4 {
        return None;
    }

    Some(CpuTimes {
        idle: vals[3] + vals.get(4).copied().unwrap_or(0),
        total: vals.iter().sum(),
    })
}

/// Busy share between two counter reads
pub fn cpu_percent(before: CpuTimes, after: CpuTimes) -> Option<f64> {
    let total = after.total.checked_sub(before.total)?;
    let idle = after.idle.checked_sub(before.idle)?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(idle) as f64 / total as f64 * 100.0)
}

/// Memory in use as `(MemTotal - MemAvailable) / MemTotal`
pub fn parse_meminfo(meminfo: &str) -> Option<f64> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };

    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total == 0 {
        return None;
    }
    Some(total.saturating_sub(available) as f64 / total as f64 * 100.0)
}

/// Capacity column of `df -P` for the single listed filesystem
pub fn parse_df(output: &str) -> Option<f64> {
    let line = output.lines().nth(1)?;
    let capacity = line.split_whitespace().nth(4)?;
    capacity.trim_end_matches('%').parse().ok()
}

/// Flag code from `vcgencmd get_throttled` (`throttled=0x50005`)
pub fn parse_throttled(output: &str) -> Option<ThrottleFlags> {
    let code = output.trim().strip_prefix("throttled=")?;
    if code.is_empty() {
        return None;
    }
    Some(ThrottleFlags::new(code))
}
