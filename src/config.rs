//! Application configuration using Figment.
//!
//! Configuration is loaded from a TOML file merged with environment
//! variables prefixed `RUST_PROCEDURE_` (nested keys separated by `__`,
//! e.g. `RUST_PROCEDURE_SCHEDULER__POLL_INTERVAL_MS=50`).
//!
//! ```toml
//! [application]
//! name = "Bath"
//! log_level = "info"
//!
//! [[devices]]
//! name = "Clock"
//! driver = "tick"
//! interval_ms = 1000
//! channels = ["Now"]
//!
//! [[channels]]
//! path = "Bath.Probe"
//! initial = "18.5"
//!
//! [[variables]]
//! name = "Temperature"
//! initial = "18.5"
//! channel = "Bath.Probe"
//!
//! [procedure]
//! Active = "Warmup"
//! AutoStart = true
//!
//! [[procedure.Sequence]]
//! Name = "Warmup"
//!
//! [[procedure.Sequence.Step]]
//! Action = "Bath.Heater=1"
//! Trigger = "Temperature>=25"
//! Description = "Heat until 25 degrees"
//! ```

use crate::error::{AppResult, ProcedureError};
use crate::registry::ChannelRegistry;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_PROCEDURE_";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sequencer settings
    pub scheduler: SchedulerSettings,
    /// Polled channel groups
    pub devices: Vec<DeviceDefinition>,
    /// Channels registered at startup
    pub channels: Vec<ChannelDefinition>,
    /// Variables created at startup
    pub variables: Vec<VariableDefinition>,
    /// Step sequences
    pub procedure: Option<SchedulerConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Sequencer runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Fallback trigger re-check interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Log channel and variable traffic at info level
    #[serde(default)]
    pub verbose: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            verbose: false,
        }
    }
}

impl SchedulerSettings {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A device whose channels are registered as `<name>.<channel>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDefinition {
    /// Device name, first path segment of its channels
    pub name: String,
    /// Driver kind (`tick`)
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Poll interval in milliseconds
    #[serde(default = "default_device_interval")]
    pub interval_ms: u64,
    /// Logical channel names
    #[serde(default)]
    pub channels: Vec<String>,
}

impl DeviceDefinition {
    /// Registry paths of the device's channels.
    pub fn channel_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.channels
            .iter()
            .map(move |channel| format!("{}.{}", self.name, channel))
    }
}

/// A channel registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDefinition {
    /// Registry path (`Bath.Heater`)
    pub path: String,
    /// Initial value literal, type inferred
    #[serde(default)]
    pub initial: Option<String>,
    /// Whether the channel publishes
    #[serde(default = "default_active")]
    pub active: bool,
}

/// A variable created at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Name used in trigger expressions
    pub name: String,
    /// Initial value literal; its inferred kind is kept for the lifetime
    pub initial: String,
    /// Channel whose published values are assigned to the variable
    #[serde(default)]
    pub channel: Option<String>,
}

/// `Scheduler` element: the sequences and which one runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SchedulerConfig {
    /// Name of the sequence to run
    pub active: String,
    /// Activate on build
    #[serde(default)]
    pub auto_start: bool,
    /// Exit the host after completion
    #[serde(default)]
    pub auto_exit: bool,
    /// Declared sequences
    #[serde(rename = "Sequence", default)]
    pub sequences: Vec<SequenceConfig>,
}

impl SchedulerConfig {
    /// The sequence named by `Active`.
    pub fn active_sequence(&self) -> Option<&SequenceConfig> {
        self.sequences.iter().find(|s| s.name == self.active)
    }
}

/// `Sequence` element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SequenceConfig {
    /// Sequence name
    pub name: String,
    /// Steps in execution order
    #[serde(rename = "Step", default)]
    pub steps: Vec<StepConfig>,
}

/// `Step` element.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StepConfig {
    /// `Path=Value, ...`
    #[serde(default)]
    pub action: Option<String>,
    /// Logical expression to wait for
    #[serde(default)]
    pub trigger: Option<String>,
    /// Free text
    #[serde(default)]
    pub description: Option<String>,
}

fn default_name() -> String {
    "rust-procedure".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> u64 {
    100
}

fn default_driver() -> String {
    "tick".to_string()
}

fn default_device_interval() -> u64 {
    1000
}

fn default_active() -> bool {
    true
}

impl AppConfig {
    /// Load from a TOML file and `RUST_PROCEDURE_` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment.
    pub fn from_toml(document: &str) -> AppResult<Self> {
        let config = Figment::new().merge(Toml::string(document)).extract()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self).map_err(|e| ProcedureError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.scheduler.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }

        let mut paths = HashSet::new();
        for device in &self.devices {
            if device.interval_ms == 0 {
                return Err(format!("Device '{}' needs interval_ms > 0", device.name));
            }
            for path in device.channel_paths() {
                if !paths.insert(ChannelRegistry::normalize(&path)) {
                    return Err(format!("Duplicate channel path: {}", path));
                }
            }
        }
        for channel in &self.channels {
            if !paths.insert(ChannelRegistry::normalize(&channel.path)) {
                return Err(format!("Duplicate channel path: {}", channel.path));
            }
        }

        let mut names = HashSet::new();
        for variable in &self.variables {
            if !names.insert(variable.name.as_str()) {
                return Err(format!("Duplicate variable name: {}", variable.name));
            }
            if let Some(path) = &variable.channel {
                if !paths.contains(&ChannelRegistry::normalize(path)) {
                    return Err(format!(
                        "Variable '{}' follows unknown channel '{}'",
                        variable.name, path
                    ));
                }
            }
        }

        if let Some(procedure) = &self.procedure {
            if procedure.active_sequence().is_none() {
                return Err(format!(
                    "Active sequence '{}' is not defined",
                    procedure.active
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[application]
name = "Bath"
log_level = "debug"

[scheduler]
poll_interval_ms = 20

[[devices]]
name = "Clock"
channels = ["Now"]

[[channels]]
path = "Bath.Probe"
initial = "18.5"

[[channels]]
path = "Bath.Heater"
active = false

[[variables]]
name = "Temperature"
initial = "18.5"
channel = "bath:probe"

[procedure]
Active = "Warmup"
AutoStart = true

[[procedure.Sequence]]
Name = "Warmup"

[[procedure.Sequence.Step]]
Action = "Bath.Heater=1"
Trigger = "Temperature>=25"
Description = "Heat"

[[procedure.Sequence.Step]]
Action = "Bath.Heater=0"
"#;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.scheduler.poll_interval(), Duration::from_millis(100));
        assert!(config.procedure.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_element_tree() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.application.name, "Bath");
        assert_eq!(config.scheduler.poll_interval_ms, 20);
        assert!(config.channels[0].active);
        assert!(!config.channels[1].active);

        let procedure = config.procedure.as_ref().unwrap();
        assert!(procedure.auto_start);
        assert!(!procedure.auto_exit);
        let warmup = procedure.active_sequence().unwrap();
        assert_eq!(warmup.steps.len(), 2);
        assert_eq!(warmup.steps[0].trigger.as_deref(), Some("Temperature>=25"));
        assert!(warmup.steps[1].trigger.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("procedure.toml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.variables[0].name, "Temperature");
    }

    #[test]
    fn test_render_effective_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("Active = \"Warmup\""));
        let reparsed = AppConfig::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.channels.len(), config.channels.len());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = AppConfig::default();
        config.application.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval() {
        let mut config = AppConfig::default();
        config.scheduler.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_channel_paths() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.channels.push(ChannelDefinition {
            path: "BATH:PROBE".to_string(),
            initial: None,
            active: true,
        });
        assert!(config
            .validate()
            .unwrap_err()
            .contains("Duplicate channel path"));
    }

    #[test]
    fn test_device_defaults_and_paths() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let clock = &config.devices[0];
        assert_eq!(clock.driver, "tick");
        assert_eq!(clock.interval_ms, 1000);
        assert_eq!(clock.channel_paths().collect::<Vec<_>>(), vec!["Clock.Now"]);
    }

    #[test]
    fn test_variable_may_follow_device_channel() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.variables[0].channel = Some("clock.now".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_followed_channel() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.variables[0].channel = Some("Bath.Level".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_active_sequence() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        if let Some(procedure) = config.procedure.as_mut() {
            procedure.active = "Cooldown".to_string();
        }
        assert!(config.validate().is_err());
    }
}
