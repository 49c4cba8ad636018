use super::{ChangeKind, Notification};
use crate::channel::{ChannelPort, EventMessage, Handler, SubscriptionId, Subscribers};
use crate::error::{AppResult, ProcedureError};
use crate::value::{Value, ValueKind};
use chrono::Local;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A named value that notifies subscribers on every assignment.
///
/// The kind of the initial value is kept for the variable's lifetime;
/// later assignments are converted to it.
#[derive(Debug)]
pub struct Variable {
    name: String,
    value: RwLock<Value>,
    verbose: AtomicBool,
    subscribers: Subscribers<Notification>,
}

impl Variable {
    /// New variable holding `initial`.
    pub fn new(name: impl Into<String>, initial: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: RwLock::new(initial.into()),
            verbose: AtomicBool::new(false),
            subscribers: Subscribers::new(),
        }
    }

    /// Variable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn value(&self) -> Value {
        self.value.read().clone()
    }

    /// Kind fixed at construction.
    pub fn kind(&self) -> ValueKind {
        self.value.read().kind()
    }

    /// Log assignments at info level.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Assign a value, converting it to the variable's kind, and publish
    /// `Changed` if it differs from the previous value or `Updated`
    /// otherwise.
    pub fn set(&self, value: impl Into<Value>) -> AppResult<ChangeKind> {
        let value = value.into();
        let stamp = Local::now();
        let (kind, value) = {
            let mut current = self.value.write();
            let converted = value.coerce(current.kind()).ok_or_else(|| {
                ProcedureError::Value(format!(
                    "cannot assign {} '{}' to {} variable '{}'",
                    value.kind(),
                    value,
                    current.kind(),
                    self.name
                ))
            })?;
            let kind = if converted.same_as(&current) {
                ChangeKind::Updated
            } else {
                ChangeKind::Changed
            };
            *current = converted.clone();
            (kind, converted)
        };

        let notification = Notification {
            source: self.name.clone(),
            kind,
            value,
            stamp,
        };
        if self.verbose.load(Ordering::Relaxed) {
            info!(variable = %self.name, value = %notification.value, ?kind, "Variable assigned");
        } else {
            debug!(variable = %self.name, value = %notification.value, ?kind, "Variable assigned");
        }
        self.subscribers.publish(&notification);
        Ok(kind)
    }

    /// Subscribe to assignments.
    pub fn subscribe(&self, handler: Handler<Notification>) -> Option<SubscriptionId> {
        self.subscribers.subscribe(handler)
    }

    /// Remove a subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Assign every value published by `channel` to this variable.
    pub fn follow(self: &Arc<Self>, channel: &dyn ChannelPort) -> Option<SubscriptionId> {
        let weak = Arc::downgrade(self);
        let source = channel.assigned_name();
        channel.subscribe(
            Arc::new(move |message: &EventMessage| {
                let (Some(variable), Some(value)) = (weak.upgrade(), message.value.clone()) else {
                    return;
                };
                if let Err(e) = variable.set(value) {
                    warn!(channel = %source, error = %e, "Ignoring channel value");
                }
            }),
            false,
        )
    }
}
