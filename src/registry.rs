//! Name lookup for channels and variables.
//!
//! - [`ChannelRegistry`]: flat map from a dotted or colon-segmented path
//!   (`Bath.Heater`, `Bath:Heater`) to a channel handle. Lookup is
//!   case-insensitive and both separators are equivalent.
//! - [`VariableTable`]: case-sensitive map from variable name to
//!   [`Variable`], used when binding comparisons.
//! - [`Workspace`]: both of the above, plus the configured devices,
//!   populated from an [`AppConfig`].
//!
//! Both maps are cheap to clone; clones share the same entries.

use crate::channel::{Channel, ChannelPort};
use crate::device::{driver_for, Device};
use crate::config::AppConfig;
use crate::error::{AppResult, ProcedureError};
use crate::reactive::Variable;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

// =============================================================================
// Channel Registry
// =============================================================================

/// Path → channel lookup.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: Arc<RwLock<HashMap<String, Arc<dyn ChannelPort>>>>,
}

impl ChannelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form of a path: trimmed, lowercase, `.`-separated.
    pub fn normalize(path: &str) -> String {
        path.trim().to_lowercase().replace(':', ".")
    }

    /// Register a channel, returning any channel previously at that path.
    pub fn register(
        &self,
        path: &str,
        channel: Arc<dyn ChannelPort>,
    ) -> Option<Arc<dyn ChannelPort>> {
        let key = Self::normalize(path);
        debug!(path = %key, "Registering channel");
        self.channels.write().insert(key, channel)
    }

    /// Look up a channel.
    pub fn resolve(&self, path: &str) -> Option<Arc<dyn ChannelPort>> {
        self.channels.read().get(&Self::normalize(path)).cloned()
    }

    /// Remove a channel.
    pub fn remove(&self, path: &str) -> Option<Arc<dyn ChannelPort>> {
        self.channels.write().remove(&Self::normalize(path))
    }

    /// Registered paths in canonical form, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.channels.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("paths", &self.paths())
            .finish()
    }
}

// =============================================================================
// Variable Table
// =============================================================================

/// Name → variable lookup.
#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    variables: Arc<RwLock<HashMap<String, Arc<Variable>>>>,
}

impl VariableTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable under its own name, returning any previous entry.
    pub fn insert(&self, variable: Arc<Variable>) -> Option<Arc<Variable>> {
        self.variables
            .write()
            .insert(variable.name().to_string(), variable)
    }

    /// Look up a variable by exact name.
    pub fn get(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables.read().get(name).cloned()
    }

    /// Whether a variable exists.
    pub fn contains(&self, name: &str) -> bool {
        self.variables.read().contains_key(name)
    }

    /// Variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.variables.read().is_empty()
    }
}

// =============================================================================
// Workspace
// =============================================================================

/// Devices, channels and variables declared in configuration.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    /// Registered channels
    pub channels: ChannelRegistry,
    /// Declared variables
    pub variables: VariableTable,
    /// Polled devices, inactive until [`Workspace::start_devices`]
    pub devices: Vec<Arc<Device>>,
}

impl Workspace {
    /// Create devices and channels, then variables, following channels
    /// where requested.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let mut workspace = Self::default();

        for definition in &config.devices {
            let driver = driver_for(&definition.driver).ok_or_else(|| {
                ProcedureError::Configuration(format!(
                    "Device '{}' uses unknown driver '{}'",
                    definition.name, definition.driver
                ))
            })?;
            let device = Device::new(
                definition.name.clone(),
                driver,
                std::time::Duration::from_millis(definition.interval_ms),
            );
            for logical in &definition.channels {
                let channel = Arc::new(Channel::new(logical.clone()));
                channel.set_verbose(config.scheduler.verbose);
                device.add(channel);
            }
            device.register_channels(&workspace.channels);
            workspace.devices.push(Arc::new(device));
        }

        for definition in &config.channels {
            let initial = definition.initial.as_deref().map(Value::infer);
            let channel = Arc::new(Channel::new(definition.path.clone()));
            if let Some(value) = initial {
                channel.set_value(value);
            }
            channel.set_active(definition.active);
            channel.set_verbose(config.scheduler.verbose);
            workspace.channels.register(&definition.path, channel);
        }

        for definition in &config.variables {
            let variable = Arc::new(Variable::new(
                definition.name.clone(),
                Value::infer(&definition.initial),
            ));
            variable.set_verbose(config.scheduler.verbose);
            if let Some(path) = &definition.channel {
                let channel = workspace.channels.resolve(path).ok_or_else(|| {
                    ProcedureError::Configuration(format!(
                        "Variable '{}' follows unknown channel '{}'",
                        definition.name, path
                    ))
                })?;
                variable.follow(channel.as_ref());
            }
            workspace.variables.insert(variable);
        }

        info!(
            devices = workspace.devices.len(),
            channels = workspace.channels.len(),
            variables = workspace.variables.len(),
            "Workspace ready"
        );
        Ok(workspace)
    }

    /// Start polling every device. Requires a tokio runtime.
    pub fn start_devices(&self) -> AppResult<()> {
        for device in &self.devices {
            device.activate()?;
        }
        Ok(())
    }

    /// Stop and clear every device.
    pub fn shutdown(&self) {
        for device in &self.devices {
            device.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelDefinition, DeviceDefinition, VariableDefinition};

    #[test]
    fn lookup_ignores_case_and_separator() {
        let registry = ChannelRegistry::new();
        registry.register("Bath.Heater", Arc::new(Channel::new("Heater")));
        assert!(registry.resolve("bath:heater").is_some());
        assert!(registry.resolve(" BATH.HEATER ").is_some());
        assert!(registry.resolve("Bath.Pump").is_none());
        assert_eq!(registry.paths(), vec!["bath.heater"]);
    }

    #[test]
    fn variable_lookup_is_exact() {
        let table = VariableTable::new();
        table.insert(Arc::new(Variable::new("Level", Value::Number(1.0))));
        assert!(table.contains("Level"));
        assert!(!table.contains("level"));
    }

    #[test]
    fn workspace_from_config() {
        let mut config = AppConfig::default();
        config.channels.push(ChannelDefinition {
            path: "Bath.Probe".into(),
            initial: Some("21.5".into()),
            active: true,
        });
        config.variables.push(VariableDefinition {
            name: "Temperature".into(),
            initial: "20".into(),
            channel: Some("bath:probe".into()),
        });

        let workspace = Workspace::from_config(&config).unwrap();
        let probe = workspace.channels.resolve("Bath.Probe").unwrap();
        let temperature = workspace.variables.get("Temperature").unwrap();

        probe.set_value(Value::Number(30.0));
        assert_eq!(temperature.value(), Value::Number(30.0));
    }

    #[tokio::test]
    async fn workspace_devices_feed_variables() {
        let mut config = AppConfig::default();
        config.devices.push(DeviceDefinition {
            name: "Clock".into(),
            driver: "tick".into(),
            interval_ms: 5,
            channels: vec!["Now".into()],
        });
        config.variables.push(VariableDefinition {
            name: "TickTime".into(),
            initial: "2000/01/01T00:00:00".into(),
            channel: Some("Clock.Now".into()),
        });

        let workspace = Workspace::from_config(&config).unwrap();
        let before = workspace.variables.get("TickTime").unwrap().value();
        workspace.devices[0].poll_once().await.unwrap();
        let after = workspace.variables.get("TickTime").unwrap().value();
        assert!(after.compare(&before) == Some(std::cmp::Ordering::Greater));
        workspace.shutdown();
    }

    #[test]
    fn workspace_rejects_unknown_driver() {
        let mut config = AppConfig::default();
        config.devices.push(DeviceDefinition {
            name: "Scope".into(),
            driver: "oscilloscope".into(),
            interval_ms: 100,
            channels: vec![],
        });
        assert!(matches!(
            Workspace::from_config(&config),
            Err(ProcedureError::Configuration(_))
        ));
    }

    #[test]
    fn workspace_rejects_unknown_followed_channel() {
        let mut config = AppConfig::default();
        config.variables.push(VariableDefinition {
            name: "Temperature".into(),
            initial: "20".into(),
            channel: Some("Nowhere".into()),
        });
        assert!(matches!(
            Workspace::from_config(&config),
            Err(ProcedureError::Configuration(_))
        ));
    }
}
