//! Configuration management for Healthwatch

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix for overrides (`HEALTHWATCH_NOTIFIER__TARGET`)
pub const ENV_PREFIX: &str = "HEALTHWATCH";

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Rule thresholds
    pub thresholds: ThresholdConfig,

    /// Alert composition and cooldown
    pub alerting: AlertingConfig,

    /// Persisted alert state
    pub state: StateConfig,

    /// Notification delivery
    pub notifier: NotifierConfig,

    /// Host metric sampling
    pub sampler: SamplerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load defaults, then the optional file, then `HEALTHWATCH_*` variables.
    ///
    /// Call [`Config::validate`] before running a cycle.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);

        let mut builder = config::Config::builder();
        if let Some(path) = &path {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;

        if self.alerting.cooldown.is_zero() {
            return Err(Error::config("alerting.cooldown must be greater than zero"));
        }

        self.notifier.validate()
    }
}

/// Location of the config file when none is given
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "healthwatch").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Rule threshold configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Temperature limit in degrees Celsius
    pub temperature_c: f64,
    /// Memory usage limit in percent
    pub memory_percent: f64,
    /// Throttle code meaning "not throttled"
    pub throttle_clear: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temperature_c: 75.0,
            memory_percent: 85.0,
            throttle_clear: "0x0".to_string(),
        }
    }
}

impl ThresholdConfig {
    /// Reject non-positive limits and an empty sentinel
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("thresholds.temperature_c", self.temperature_c),
            ("thresholds.memory_percent", self.memory_percent),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::config(format!("{name} must be a positive number, got {value}")));
            }
        }

        if self.throttle_clear.trim().is_empty() {
            return Err(Error::config("thresholds.throttle_clear must not be empty"));
        }

        Ok(())
    }
}

/// Alerting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    /// Minimum time between two delivered alerts
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
    /// First line of every alert
    pub header: String,
    /// Host name appended to the header
    pub hostname: Option<String>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(3600),
            header: "Health alert".to_string(),
            hostname: None,
        }
    }
}

/// Alert state configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// File holding the last alert time
    pub path: PathBuf,
    /// Longest wait for the state lock
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", "healthwatch").map_or_else(
            || PathBuf::from("/var/lib/healthwatch/last_alert"),
            |dirs| dirs.data_dir().join("last_alert"),
        );

        Self {
            path,
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Notification channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Telegram bot
    Telegram {
        /// Bot token
        bot_token: String,
        /// API root, overridable for proxies and tests
        #[serde(default = "default_telegram_api")]
        api_base: String,
    },
    /// Slack incoming webhook
    Slack {
        /// Webhook URL
        webhook_url: String,
    },
    /// Generic JSON webhook
    Webhook {
        /// Endpoint URL
        url: String,
        /// Extra request headers
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl ChannelConfig {
    fn endpoint(&self) -> &str {
        match self {
            Self::Telegram { api_base, .. } => api_base,
            Self::Slack { webhook_url } => webhook_url,
            Self::Webhook { url, .. } => url,
        }
    }
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Delivery channel
    pub channel: Option<ChannelConfig>,
    /// Target identity (chat id, channel name, ...)
    pub target: Option<String>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            channel: None,
            target: None,
            timeout: Duration::from_secs(10),
        }
    }
}

impl NotifierConfig {
    /// The configured target, or a configuration error
    pub fn require_target(&self) -> Result<&str> {
        match self.target.as_deref().map(str::trim) {
            Some(target) if !target.is_empty() => Ok(target),
            _ => Err(Error::config("notifier.target is required")),
        }
    }

    /// The configured channel, or a configuration error
    pub fn require_channel(&self) -> Result<&ChannelConfig> {
        self.channel
            .as_ref()
            .ok_or_else(|| Error::config("notifier.channel is required"))
    }

    fn validate(&self) -> Result<()> {
        self.require_target()?;
        let channel = self.require_channel()?;

        url::Url::parse(channel.endpoint()).map_err(|e| {
            Error::config(format!("notifier endpoint {:?} is not a URL: {e}", channel.endpoint()))
        })?;

        if let ChannelConfig::Telegram { bot_token, .. } = channel {
            if bot_token.trim().is_empty() {
                return Err(Error::config("notifier.channel.bot_token is required"));
            }
        }

        Ok(())
    }
}

/// Host sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// systemd unit whose run state is watched
    pub watched_service: String,
    /// Mount point whose usage is sampled
    pub disk_mount: PathBuf,
    /// Thermal zone reporting millidegrees
    pub thermal_path: PathBuf,
    /// Limit for each external command
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Interval between the two CPU counter reads
    #[serde(with = "humantime_serde")]
    pub cpu_sample_window: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            watched_service: "ssh".to_string(),
            disk_mount: PathBuf::from("/"),
            thermal_path: PathBuf::from("/sys/class/thermal/thermal_zone0/temp"),
            command_timeout: Duration::from_secs(5),
            cpu_sample_window: Duration::from_millis(500),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or pretty)
    pub format: String,
    /// Write diagnostics here instead of stderr
    pub file: Option<PathBuf>,
    /// Append one JSON line per cycle event here
    pub journal: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file: None,
            journal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Config {
        let mut config = Config::default();
        config.notifier.target = Some("12345".to_string());
        config.notifier.channel = Some(ChannelConfig::Telegram {
            bot_token: "token".to_string(),
            api_base: default_telegram_api(),
        });
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.alerting.cooldown, Duration::from_secs(3600));
        assert!((config.thresholds.temperature_c - 75.0).abs() < f64::EPSILON);
        assert!((config.thresholds.memory_percent - 85.0).abs() < f64::EPSILON);
        assert_eq!(config.thresholds.throttle_clear, "0x0");
    }

    #[test]
    fn test_missing_target_is_config_error() {
        let mut config = valid();
        config.notifier.target = Some("   ".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("notifier.target"));
    }

    #[test]
    fn test_bad_webhook_url_rejected() {
        let mut config = valid();
        config.notifier.channel = Some(ChannelConfig::Webhook {
            url: "not a url".to_string(),
            headers: BTreeMap::new(),
        });

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let mut config = valid();
        config.thresholds.memory_percent = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[thresholds]
temperature_c = 70.0

[alerting]
cooldown = "30m"

[notifier]
target = "ops"
timeout = "3s"

[notifier.channel]
type = "slack"
webhook_url = "https://hooks.slack.com/services/T000/B000/XXX"
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        config.validate().unwrap();

        assert!((config.thresholds.temperature_c - 70.0).abs() < f64::EPSILON);
        assert!((config.thresholds.memory_percent - 85.0).abs() < f64::EPSILON);
        assert_eq!(config.alerting.cooldown, Duration::from_secs(1800));
        assert_eq!(config.notifier.timeout, Duration::from_secs(3));
        assert_eq!(config.notifier.require_target().unwrap(), "ops");
        assert!(matches!(config.notifier.channel, Some(ChannelConfig::Slack { .. })));
    }
}
