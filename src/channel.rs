//! Channel publish/subscribe substrate.
//!
//! A [`Channel`] is a named value slot with an ordered list of synchronous
//! subscribers. Writing a value while the channel is active publishes an
//! [`EventMessage`] to every subscriber in subscription order; inactive
//! channels keep the latest value but stay silent.
//!
//! The subscriber list is snapshotted before dispatch, so handlers may
//! subscribe, unsubscribe or write to other channels without deadlocking
//! and without affecting the delivery in progress.
//!
//! [`ChannelPort`] is the capability set external hardware channels must
//! honour to take part in action resolution and variable following.

use crate::value::Value;
use chrono::{DateTime, Local};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

// =============================================================================
// Subscriptions
// =============================================================================

/// Handle returned by a successful subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Synchronous notification handler.
pub type Handler<M> = Arc<dyn Fn(&M) + Send + Sync>;

/// Ordered subscriber list shared by channels and reactive nodes.
pub struct Subscribers<M> {
    handlers: Mutex<Vec<(SubscriptionId, Handler<M>)>>,
}

impl<M> Default for Subscribers<M> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }
}

impl<M> Subscribers<M> {
    /// Empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Returns `None` if this exact handler is already
    /// subscribed.
    pub fn subscribe(&self, handler: Handler<M>) -> Option<SubscriptionId> {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|(_, known)| Arc::ptr_eq(known, &handler)) {
            return None;
        }
        let id = SubscriptionId::new();
        handlers.push((id, handler));
        Some(id)
    }

    /// Remove a handler. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(known, _)| *known != id);
        handlers.len() != before
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Deliver a message to a snapshot of the current handlers, in
    /// subscription order.
    pub fn publish(&self, message: &M) {
        let snapshot: Vec<Handler<M>> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in snapshot {
            handler(message);
        }
    }
}

impl<M> fmt::Debug for Subscribers<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers").field("len", &self.len()).finish()
    }
}

// =============================================================================
// Messages
// =============================================================================

/// Message published by channels.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMessage {
    /// Assigned name of the publishing channel
    pub source: String,
    /// Creation time
    pub stamp: DateTime<Local>,
    /// Command verb (`Value`, `OnNext`, `OnCompleted`, ...)
    pub command: String,
    /// Payload, if any
    pub value: Option<Value>,
    /// Free text
    pub description: String,
}

impl EventMessage {
    /// Command used for plain value publications.
    pub const VALUE: &'static str = "Value";

    /// New message stamped now.
    pub fn new(source: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            stamp: Local::now(),
            command: command.into(),
            value: None,
            description: String::new(),
        }
    }

    /// Attach a payload.
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Attach a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.stamp.format("%H:%M:%S%.3f"),
            self.source,
            self.command
        )?;
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}

// =============================================================================
// Channel capability
// =============================================================================

/// Capability set of anything addressable as a channel.
pub trait ChannelPort: Send + Sync {
    /// Name the channel is addressed by.
    fn assigned_name(&self) -> String;

    /// Rename the channel.
    fn set_assigned_name(&self, name: &str);

    /// Latest written value.
    fn value(&self) -> Option<Value>;

    /// Store a value and publish it while active.
    fn set_value(&self, value: Value);

    /// Subscribe a handler; with `send_now` the latest value is published
    /// immediately. Returns `None` for a duplicate handler.
    fn subscribe(&self, handler: Handler<EventMessage>, send_now: bool)
        -> Option<SubscriptionId>;

    /// Remove a subscription.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Whether publications are delivered.
    fn is_active(&self) -> bool;

    /// Enable or disable publication.
    fn set_active(&self, active: bool);
}

// =============================================================================
// Channel
// =============================================================================

#[derive(Debug)]
struct ChannelState {
    assigned_name: String,
    value: Option<Value>,
}

/// In-process channel.
#[derive(Debug)]
pub struct Channel {
    logical_name: String,
    state: RwLock<ChannelState>,
    active: AtomicBool,
    verbose: AtomicBool,
    subscribers: Subscribers<EventMessage>,
}

impl Channel {
    /// New inactive channel. The assigned name starts equal to the logical
    /// name.
    pub fn new(logical_name: impl Into<String>) -> Self {
        let logical_name = logical_name.into();
        Self {
            state: RwLock::new(ChannelState {
                assigned_name: logical_name.clone(),
                value: None,
            }),
            logical_name,
            active: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
            subscribers: Subscribers::new(),
        }
    }

    /// New active channel holding an initial value.
    pub fn active_with(logical_name: impl Into<String>, initial: Option<Value>) -> Arc<Self> {
        let channel = Self::new(logical_name);
        channel.state.write().value = initial;
        channel.active.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    /// Name given by the owning device.
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    /// Log every publication at info level.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Publish an arbitrary message while active. Returns whether it was
    /// delivered.
    pub fn notify(&self, message: EventMessage) -> bool {
        if !self.is_active() {
            trace!(channel = %message.source, command = %message.command, "Inactive channel, message dropped");
            return false;
        }
        if self.verbose.load(Ordering::Relaxed) {
            info!("{message}");
        } else {
            debug!(channel = %message.source, command = %message.command, "Publishing");
        }
        self.subscribers.publish(&message);
        true
    }

    /// Drop every subscriber.
    pub fn clear_handlers(&self) {
        self.subscribers.clear();
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn value_message(&self, value: Value) -> EventMessage {
        EventMessage::new(self.assigned_name(), EventMessage::VALUE).with_value(value)
    }
}

impl ChannelPort for Channel {
    fn assigned_name(&self) -> String {
        self.state.read().assigned_name.clone()
    }

    fn set_assigned_name(&self, name: &str) {
        self.state.write().assigned_name = name.to_string();
    }

    fn value(&self) -> Option<Value> {
        self.state.read().value.clone()
    }

    fn set_value(&self, value: Value) {
        self.state.write().value = Some(value.clone());
        self.notify(self.value_message(value));
    }

    fn subscribe(
        &self,
        handler: Handler<EventMessage>,
        send_now: bool,
    ) -> Option<SubscriptionId> {
        let id = self.subscribers.subscribe(handler)?;
        if send_now {
            if let Some(value) = self.value() {
                self.notify(self.value_message(value));
            }
        }
        Some(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Handler<EventMessage>, Arc<Mutex<Vec<EventMessage>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Handler<EventMessage> = Arc::new(move |m: &EventMessage| sink.lock().push(m.clone()));
        (handler, seen)
    }

    #[test]
    fn publishes_only_while_active() {
        let channel = Channel::new("Heater");
        let (handler, seen) = recorder();
        channel.subscribe(handler, false).unwrap();

        channel.set_value(Value::Number(1.0));
        assert!(seen.lock().is_empty());
        assert_eq!(channel.value(), Some(Value::Number(1.0)));

        channel.set_active(true);
        channel.set_value(Value::Number(2.0));
        channel.set_value(Value::Number(2.0));
        let seen = seen.lock();
        assert_eq!(seen.len(), 2, "duplicate writes are not deduplicated");
        assert_eq!(seen[0].source, "Heater");
        assert_eq!(seen[0].value, Some(Value::Number(2.0)));
    }

    #[test]
    fn subscribers_called_in_order() {
        let channel = Channel::active_with("c", None);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            channel.subscribe(Arc::new(move |_: &EventMessage| order.lock().push(i)), false);
        }
        channel.set_value(Value::Bool(true));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn duplicate_handler_is_rejected() {
        let channel = Channel::new("c");
        let (handler, _) = recorder();
        assert!(channel.subscribe(Arc::clone(&handler), false).is_some());
        assert!(channel.subscribe(handler, false).is_none());
        assert_eq!(channel.subscriber_count(), 1);
    }

    #[test]
    fn unsubscribe_restores_count() {
        let channel = Channel::new("c");
        let (handler, _) = recorder();
        let id = channel.subscribe(handler, false).unwrap();
        assert!(channel.unsubscribe(id));
        assert!(!channel.unsubscribe(id));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn send_now_delivers_latest_value() {
        let channel = Channel::active_with("c", Some(Value::Number(7.0)));
        let (handler, seen) = recorder();
        channel.subscribe(handler, true);
        assert_eq!(seen.lock()[0].value, Some(Value::Number(7.0)));
    }

    #[test]
    fn handler_may_unsubscribe_during_dispatch() {
        let channel = Channel::active_with("c", None);
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&channel);
        let id_slot = Arc::clone(&slot);
        let id = channel
            .subscribe(
                Arc::new(move |_: &EventMessage| {
                    if let (Some(channel), Some(id)) = (weak.upgrade(), *id_slot.lock()) {
                        channel.unsubscribe(id);
                    }
                }),
                false,
            )
            .unwrap();
        *slot.lock() = Some(id);
        channel.set_value(Value::Number(1.0));
        assert_eq!(channel.subscriber_count(), 0);
    }

    #[test]
    fn message_display() {
        let message = EventMessage::new("Seq", "OnNext")
            .with_value(Value::Text("Bath.Heater".into()))
            .with_description("warm up");
        let text = message.to_string();
        assert!(text.ends_with("Seq OnNext Bath.Heater (warm up)"));
    }
}
