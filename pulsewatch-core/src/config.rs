//! Configuration Module
//!
//! TOML configuration with per-field defaults, environment overrides for
//! credentials and recipients, and startup validation.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::classifier::{AlertPolicy, ThresholdConfig};
use crate::engine::EngineSettings;
use crate::error::ConfigError;
use crate::escalator::{AlertTargets, CooldownScope, EscalationConfig};
use crate::notifier::{NotifierKind, NotifierSettings};
use crate::sample::Bpm;
use crate::sink::LogFileNaming;
use crate::transport::RestartPolicy;

pub const ENV_TWILIO_ACCOUNT_SID: &str = "PULSEWATCH_TWILIO_ACCOUNT_SID";
pub const ENV_TWILIO_AUTH_TOKEN: &str = "PULSEWATCH_TWILIO_AUTH_TOKEN";
pub const ENV_TWILIO_FROM: &str = "PULSEWATCH_TWILIO_FROM";
pub const ENV_ALERT_RECIPIENTS: &str = "PULSEWATCH_ALERT_RECIPIENTS";
pub const ENV_LOG_DIR: &str = "PULSEWATCH_LOG_DIR";

/// Upper bound for every `*_seconds` setting (one year).
const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub sampling: SamplingSection,
    #[serde(default)]
    pub smoothing: SmoothingSection,
    #[serde(default)]
    pub thresholds: ThresholdsSection,
    #[serde(default)]
    pub alerts: AlertsSection,
    #[serde(default)]
    pub notifier: NotifierSettings,
    #[serde(default)]
    pub log: LogSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSection {
    #[serde(default = "default_min_interval_seconds")]
    pub min_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingSection {
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_resting_heart_rate")]
    pub resting_heart_rate: Bpm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsSection {
    #[serde(default = "default_warning")]
    pub warning: Bpm,
    #[serde(default = "default_critical")]
    pub critical: Bpm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsSection {
    #[serde(default = "default_warning_cooldown_seconds")]
    pub warning_cooldown_seconds: u64,
    #[serde(default = "default_critical_cooldown_seconds")]
    pub critical_cooldown_seconds: u64,
    #[serde(default = "default_true")]
    pub sms_enabled: bool,
    #[serde(default)]
    pub voice_enabled: bool,
    #[serde(default)]
    pub policy: AlertPolicy,
    #[serde(default)]
    pub cooldown_scope: CooldownScope,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub callback_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogNaming {
    #[default]
    Daily,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub naming: LogNaming,
    /// Prefix for daily files, full file name for a fixed file.
    #[serde(default = "default_log_file_name")]
    pub file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_restart_attempts")]
    pub transport_restart_attempts: u32,
    #[serde(default = "default_restart_backoff_seconds")]
    pub transport_restart_backoff_seconds: u64,
    /// Sample log records allowed to wait for the writer.
    #[serde(default = "default_sink_queue_capacity")]
    pub sink_queue_capacity: usize,
    /// Delivery reports kept for the end-of-run report.
    #[serde(default = "default_recent_alerts")]
    pub recent_alerts: usize,
}

fn default_min_interval_seconds() -> u64 {
    5
}

fn default_window_size() -> usize {
    6
}

fn default_resting_heart_rate() -> Bpm {
    80
}

fn default_warning() -> Bpm {
    100
}

fn default_critical() -> Bpm {
    115
}

fn default_warning_cooldown_seconds() -> u64 {
    300
}

fn default_critical_cooldown_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_log_directory() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("pulsewatch"))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_file_name() -> String {
    "hr_log".to_string()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_sink_queue_capacity() -> usize {
    1024
}

fn default_recent_alerts() -> usize {
    32
}

fn default_restart_attempts() -> u32 {
    5
}

fn default_restart_backoff_seconds() -> u64 {
    2
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            min_interval_seconds: default_min_interval_seconds(),
        }
    }
}

impl Default for SmoothingSection {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            resting_heart_rate: default_resting_heart_rate(),
        }
    }
}

impl Default for ThresholdsSection {
    fn default() -> Self {
        Self {
            warning: default_warning(),
            critical: default_critical(),
        }
    }
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            warning_cooldown_seconds: default_warning_cooldown_seconds(),
            critical_cooldown_seconds: default_critical_cooldown_seconds(),
            sms_enabled: true,
            voice_enabled: false,
            policy: AlertPolicy::default(),
            cooldown_scope: CooldownScope::default(),
            recipients: Vec::new(),
            callback_url: String::new(),
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: default_log_directory(),
            naming: LogNaming::default(),
            file_name: default_log_file_name(),
        }
    }
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            transport_restart_attempts: default_restart_attempts(),
            transport_restart_backoff_seconds: default_restart_backoff_seconds(),
            sink_queue_capacity: default_sink_queue_capacity(),
            recent_alerts: default_recent_alerts(),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(value.min(MAX_SECONDS) as i64)
}

impl MonitorConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Read `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {:?}", path))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse configuration file {:?}", path))?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(sid) = get(ENV_TWILIO_ACCOUNT_SID) {
            debug!("Using {} from environment", ENV_TWILIO_ACCOUNT_SID);
            self.notifier.account_sid = Some(sid);
        }
        if let Some(token) = get(ENV_TWILIO_AUTH_TOKEN) {
            debug!("Using {} from environment", ENV_TWILIO_AUTH_TOKEN);
            self.notifier.auth_token = Some(token);
        }
        if let Some(from) = get(ENV_TWILIO_FROM) {
            self.notifier.from_number = Some(from);
        }
        if let Some(recipients) = get(ENV_ALERT_RECIPIENTS) {
            self.alerts.recipients = recipients
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(dir) = get(ENV_LOG_DIR) {
            self.log.directory = PathBuf::from(dir);
        }
    }

    fn any_channel_enabled(&self) -> bool {
        self.alerts.sms_enabled || self.alerts.voice_enabled
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.threshold_config().validate()?;

        if self.smoothing.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if self.runtime.queue_capacity == 0 || self.runtime.sink_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueue);
        }

        let timers = [
            ("sampling.min_interval_seconds", self.sampling.min_interval_seconds),
            ("alerts.warning_cooldown_seconds", self.alerts.warning_cooldown_seconds),
            ("alerts.critical_cooldown_seconds", self.alerts.critical_cooldown_seconds),
            ("runtime.transport_restart_backoff_seconds", self.runtime.transport_restart_backoff_seconds),
        ];
        for (name, value) in timers {
            if value > MAX_SECONDS {
                return Err(ConfigError::Invalid(format!("{} must be at most {}", name, MAX_SECONDS)));
            }
        }

        if self.log.enabled && self.log.file_name.trim().is_empty() {
            return Err(ConfigError::Invalid("log.file_name must not be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for recipient in &self.alerts.recipients {
            if !seen.insert(recipient.trim()) {
                return Err(ConfigError::DuplicateRecipient(recipient.trim().to_string()));
            }
        }

        if self.notifier.kind == NotifierKind::Twilio && self.any_channel_enabled() {
            self.notifier.validate()?;
            if self.alerts.recipients.is_empty() {
                return Err(ConfigError::NoRecipients);
            }
        }

        if self.alerts.voice_enabled && self.alerts.callback_url.trim().is_empty() {
            return Err(ConfigError::MissingCallbackUrl);
        }

        Ok(())
    }

    pub fn threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            warning: self.thresholds.warning,
            critical: self.thresholds.critical,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            min_interval: seconds(self.sampling.min_interval_seconds),
            window_size: self.smoothing.window_size,
            resting_heart_rate: self.smoothing.resting_heart_rate,
            thresholds: self.threshold_config(),
            escalation: EscalationConfig {
                warning_cooldown: seconds(self.alerts.warning_cooldown_seconds),
                critical_cooldown: seconds(self.alerts.critical_cooldown_seconds),
                sms_enabled: self.alerts.sms_enabled,
                voice_enabled: self.alerts.voice_enabled,
                policy: self.alerts.policy,
                scope: self.alerts.cooldown_scope,
            },
            targets: AlertTargets {
                recipients: self.alerts.recipients.clone(),
                callback_url: self.alerts.callback_url.clone(),
            },
            recent_alert_limit: self.runtime.recent_alerts,
            sink_queue_capacity: self.runtime.sink_queue_capacity,
        }
    }

    /// `None` when sample logging is disabled.
    pub fn log_naming(&self) -> Option<LogFileNaming> {
        if !self.log.enabled {
            return None;
        }
        Some(match self.log.naming {
            LogNaming::Daily => LogFileNaming::Daily {
                directory: self.log.directory.clone(),
                prefix: self.log.file_name.clone(),
            },
            LogNaming::Fixed => LogFileNaming::Fixed {
                path: self.log.directory.join(&self.log.file_name),
            },
        })
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            max_restarts: self.runtime.transport_restart_attempts,
            backoff: StdDuration::from_secs(self.runtime.transport_restart_backoff_seconds.min(MAX_SECONDS)),
        }
    }
}

/// Locates, creates and loads the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager for `<config dir>/pulsewatch/config.toml`.
    pub fn new() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("pulsewatch");

        Ok(Self {
            config_path: config_dir.join("config.toml"),
        })
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    /// `explicit` if given, the default location otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Ok(Self::with_path(path)),
            None => Self::new(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn config_exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Load the file if present, defaults otherwise. Environment overrides
    /// apply in both cases.
    pub fn load_config(&self) -> Result<MonitorConfig> {
        if !self.config_exists() {
            info!("No configuration at {:?}, using defaults", self.config_path);
            let mut config = MonitorConfig::default();
            config.apply_env_overrides();
            return Ok(config);
        }

        debug!("Loading configuration from {:?}", self.config_path);
        MonitorConfig::load(&self.config_path)
    }

    pub fn create_default_config(&self) -> Result<()> {
        if self.config_exists() {
            return Err(anyhow::anyhow!("Configuration file already exists at {:?}", self.config_path));
        }

        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = MonitorConfig::default()
            .to_toml_string()
            .context("Failed to serialize default configuration")?;

        std::fs::write(&self.config_path, toml_string).context("Failed to write default configuration")?;

        info!("Created default configuration at {:?}", self.config_path);
        Ok(())
    }

    pub fn validate_config(&self) -> Result<MonitorConfig> {
        let config = self.load_config()?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", self.config_path))?;
        Ok(config)
    }
}
