//! Devices: groups of channels refreshed by a driver on a fixed interval.
//!
//! A [`Device`] owns a list of [`Channel`]s and a [`DeviceDriver`]. While
//! active, a tokio task calls [`DeviceDriver::poll`] every interval; the
//! driver writes fresh values to the channels, which publish them to their
//! subscribers (typically [`Variable`](crate::reactive::Variable)s following
//! them). [`TickDriver`] is the built-in clock.

use crate::channel::{Channel, ChannelPort};
use crate::error::{AppResult, ProcedureError};
use crate::registry::ChannelRegistry;
use crate::value::Value;
use async_trait::async_trait;
use chrono::Local;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Produces values for a device's channels.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Driver identifier (`tick`).
    fn kind(&self) -> &str;

    /// Write the current reading of every channel.
    async fn poll(&self, channels: &[Arc<Channel>]) -> anyhow::Result<()>;
}

/// Writes the current local time to every channel.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickDriver;

#[async_trait]
impl DeviceDriver for TickDriver {
    fn kind(&self) -> &str {
        "tick"
    }

    async fn poll(&self, channels: &[Arc<Channel>]) -> anyhow::Result<()> {
        let now = Local::now();
        for channel in channels {
            channel.set_value(Value::Timestamp(now));
        }
        Ok(())
    }
}

/// Driver for a configured kind name.
pub fn driver_for(kind: &str) -> Option<Arc<dyn DeviceDriver>> {
    match kind.to_lowercase().as_str() {
        "tick" => Some(Arc::new(TickDriver)),
        _ => None,
    }
}

/// A named channel group polled by a driver.
pub struct Device {
    name: String,
    driver: Arc<dyn DeviceDriver>,
    interval: Duration,
    channels: Arc<RwLock<Vec<Arc<Channel>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Device {
    /// New inactive device.
    pub fn new(name: impl Into<String>, driver: Arc<dyn DeviceDriver>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            driver,
            interval: interval.max(Duration::from_millis(1)),
            channels: Arc::new(RwLock::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Attach and activate a channel. Returns `None` if a channel with the
    /// same logical name is already attached.
    pub fn add(&self, channel: Arc<Channel>) -> Option<Arc<Channel>> {
        let mut channels = self.channels.write();
        if channels
            .iter()
            .any(|c| c.logical_name().eq_ignore_ascii_case(channel.logical_name()))
        {
            warn!(device = %self.name, channel = %channel.logical_name(), "Duplicate channel refused");
            return None;
        }
        channel.set_active(true);
        channels.push(Arc::clone(&channel));
        debug!(device = %self.name, channel = %channel.logical_name(), "Channel added");
        Some(channel)
    }

    /// Detach and deactivate a channel by logical name.
    pub fn remove(&self, logical_name: &str) -> Option<Arc<Channel>> {
        let mut channels = self.channels.write();
        let index = channels
            .iter()
            .position(|c| c.logical_name().eq_ignore_ascii_case(logical_name))?;
        let channel = channels.remove(index);
        channel.set_active(false);
        Some(channel)
    }

    /// Channel at `index`.
    pub fn get(&self, index: usize) -> Option<Arc<Channel>> {
        self.channels.read().get(index).cloned()
    }

    /// Channel by logical name.
    pub fn by_name(&self, logical_name: &str) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .iter()
            .find(|c| c.logical_name().eq_ignore_ascii_case(logical_name))
            .cloned()
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    /// Whether no channel is attached.
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Register every channel as `<device>.<logical name>`.
    pub fn register_channels(&self, registry: &ChannelRegistry) {
        for channel in self.channels.read().iter() {
            let path = format!("{}.{}", self.name, channel.logical_name());
            registry.register(&path, Arc::clone(channel) as Arc<dyn ChannelPort>);
        }
    }

    /// Run the driver once.
    pub async fn poll_once(&self) -> anyhow::Result<()> {
        let snapshot = self.channels.read().clone();
        self.driver.poll(&snapshot).await
    }

    /// Whether the polling task is running.
    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Start polling. Must be called from within a tokio runtime.
    pub fn activate(&self) -> AppResult<()> {
        let runtime = Handle::try_current().map_err(|_| {
            ProcedureError::Configuration(format!(
                "device '{}' must be activated inside a tokio runtime",
                self.name
            ))
        })?;
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }

        let name = self.name.clone();
        let driver = Arc::clone(&self.driver);
        let channels = Arc::clone(&self.channels);
        let period = self.interval;
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let snapshot = channels.read().clone();
                if let Err(e) = driver.poll(&snapshot).await {
                    warn!(device = %name, error = %e, "Poll failed");
                }
            }
        }));
        info!(device = %self.name, driver = self.driver.kind(), interval_ms = self.interval.as_millis() as u64, "Device started");
        Ok(())
    }

    /// Stop polling.
    pub fn deactivate(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!(device = %self.name, "Device stopped");
        }
    }

    /// Stop polling, deactivate and drop every channel.
    pub fn dispose(&self) {
        self.deactivate();
        for channel in self.channels.write().drain(..) {
            channel.set_active(false);
            channel.clear_handlers();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("driver", &self.driver.kind())
            .field("interval", &self.interval)
            .field("channels", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn clock() -> Device {
        Device::new("Clock", Arc::new(TickDriver), Duration::from_millis(5))
    }

    #[test]
    fn add_refuses_duplicates_and_activates() {
        let device = clock();
        let now = device.add(Arc::new(Channel::new("Now"))).unwrap();
        assert!(now.is_active());
        assert!(device.add(Arc::new(Channel::new("now"))).is_none());
        assert_eq!(device.len(), 1);

        let removed = device.remove("NOW").unwrap();
        assert!(!removed.is_active());
        assert!(device.is_empty());
    }

    #[test]
    fn lookup_by_index_and_name() {
        let device = clock();
        device.add(Arc::new(Channel::new("A")));
        device.add(Arc::new(Channel::new("B")));
        assert_eq!(device.get(1).unwrap().logical_name(), "B");
        assert!(device.get(2).is_none());
        assert_eq!(device.by_name("a").unwrap().logical_name(), "A");
    }

    #[test]
    fn registers_under_device_name() {
        let device = clock();
        device.add(Arc::new(Channel::new("Now")));
        let registry = ChannelRegistry::new();
        device.register_channels(&registry);
        assert!(registry.resolve("clock:now").is_some());
    }

    #[tokio::test]
    async fn poll_once_writes_timestamp() {
        let device = clock();
        let now = device.add(Arc::new(Channel::new("Now"))).unwrap();
        device.poll_once().await.unwrap();
        assert!(matches!(now.value(), Some(Value::Timestamp(_))));
    }

    #[tokio::test]
    async fn activation_publishes_periodically() {
        let device = clock();
        let now = device.add(Arc::new(Channel::new("Now"))).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        now.subscribe(
            Arc::new(move |_: &EventMessage| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
            false,
        );

        device.activate().unwrap();
        assert!(device.is_active());
        tokio::time::sleep(Duration::from_millis(60)).await;
        device.dispose();
        assert!(!device.is_active());
        assert!(count.load(Ordering::SeqCst) >= 2);
        assert_eq!(now.subscriber_count(), 0);
    }

    #[test]
    fn unknown_driver_kind() {
        assert!(driver_for("Tick").is_some());
        assert!(driver_for("thermometer").is_none());
    }
}
