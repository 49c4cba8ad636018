use super::{ChangeKind, Comparable, Notification};
use crate::channel::{Handler, SubscriptionId, Subscribers};
use crate::error::{BindingError, EvaluationError};
use crate::formula::LogicalExpression;
use crate::registry::VariableTable;
use crate::value::Value;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

struct TriggerState {
    /// Working copy of the compiled expression; `None` for a blank trigger.
    working: Option<LogicalExpression>,
    children: Vec<Arc<Comparable>>,
    subscriptions: Vec<(Arc<Comparable>, SubscriptionId)>,
    latest: bool,
    repeat: u32,
}

/// A logical expression over comparisons that detects edges of its own
/// value.
///
/// While active, every child notification re-samples all children from the
/// live variable values, evaluates the expression and publishes `Changed`
/// when the result differs from the previous one, `Updated` otherwise.
/// Each `Changed` while active counts down `repeat`; at zero the trigger
/// deactivates itself. Deactivation drops the children, which are rebuilt
/// from the variable table on the next activation.
///
/// # Example
///
/// ```
/// use rust_procedure::reactive::{Trigger, Variable};
/// use rust_procedure::registry::VariableTable;
/// use std::sync::Arc;
///
/// let variables = VariableTable::new();
/// let level = Arc::new(Variable::new("Level", 1.0));
/// variables.insert(Arc::clone(&level));
///
/// let trigger = Trigger::new("Level>=5", &variables).unwrap();
/// trigger.activate().unwrap();
/// level.set(6.0).unwrap();
/// assert!(trigger.value());
/// assert!(!trigger.is_active(), "repeat count of one is used up");
/// ```
pub struct Trigger {
    expression: String,
    variables: VariableTable,
    state: Mutex<TriggerState>,
    initial_repeat: u32,
    active: AtomicBool,
    verbose: AtomicBool,
    subscribers: Subscribers<Notification>,
    value_tx: watch::Sender<bool>,
    me: Weak<Trigger>,
}

impl Trigger {
    /// Compile a trigger that fires once.
    pub fn new(expression: &str, variables: &VariableTable) -> Result<Arc<Self>, BindingError> {
        Self::with_repeat(expression, variables, 1)
    }

    /// Compile a trigger that deactivates after `repeat` transitions.
    /// Negative counts are clamped to zero (exhausted).
    pub fn with_repeat(
        expression: &str,
        variables: &VariableTable,
        repeat: i64,
    ) -> Result<Arc<Self>, BindingError> {
        let working = if expression.trim().is_empty() {
            None
        } else {
            Some(LogicalExpression::compile(expression)?)
        };
        let children = match &working {
            Some(expr) => build_children(expr, variables)?,
            None => Vec::new(),
        };
        let latest = working.is_none();
        let repeat = u32::try_from(repeat.max(0)).unwrap_or(u32::MAX);
        let (value_tx, _) = watch::channel(latest);

        Ok(Arc::new_cyclic(|me| Self {
            expression: expression.to_string(),
            variables: variables.clone(),
            state: Mutex::new(TriggerState {
                working,
                children,
                subscriptions: Vec::new(),
                latest,
                repeat,
            }),
            initial_repeat: repeat,
            active: AtomicBool::new(false),
            verbose: AtomicBool::new(false),
            subscribers: Subscribers::new(),
            value_tx,
            me: me.clone(),
        }))
    }

    /// Source expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Last evaluated value.
    pub fn value(&self) -> bool {
        self.state.lock().latest
    }

    /// Remaining transitions before self-deactivation.
    pub fn repeat(&self) -> u32 {
        self.state.lock().repeat
    }

    /// Number of live child comparisons.
    pub fn child_count(&self) -> usize {
        self.state.lock().children.len()
    }

    /// Whether the trigger is listening to its children.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Log transitions at info level.
    pub fn set_verbose(&self, verbose: bool) {
        self.verbose.store(verbose, Ordering::Relaxed);
    }

    /// Receiver that observes every evaluated value.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.value_tx.subscribe()
    }

    /// Subscribe to this trigger's notifications.
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

    /// Restore the configured repeat count and forget the last value, so
    /// the next activation starts from scratch. Ignored while active.
    pub fn rearm(&self) {
        let latest = {
            let mut state = self.state.lock();
            if self.is_active() {
                return;
            }
            state.repeat = self.initial_repeat;
            state.latest = state.working.is_none();
            state.latest
        };
        self.value_tx.send_replace(latest);
    }

    /// Subscribe to the children and recompute. An exhausted trigger stays
    /// inactive.
    pub fn activate(&self) -> Result<(), BindingError> {
        let children = {
            let mut state = self.state.lock();
            if state.repeat == 0 {
                warn!(trigger = %self.expression, "Repeat count exhausted, not activating");
                return Ok(());
            }
            if self.active.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            if state.children.is_empty() {
                if let Some(expr) = &state.working {
                    match build_children(expr, &self.variables) {
                        Ok(children) => state.children = children,
                        Err(e) => {
                            self.active.store(false, Ordering::SeqCst);
                            return Err(e);
                        }
                    }
                }
            }
            state.children.clone()
        };

        let mut subscriptions = Vec::with_capacity(children.len());
        for child in children {
            child.activate();
            let me = self.me.clone();
            let handler: Handler<Notification> = Arc::new(move |n: &Notification| {
                if let Some(trigger) = me.upgrade() {
                    trigger.on_child_notification(n.stamp);
                }
            });
            if let Some(id) = child.subscribe(handler) {
                subscriptions.push((child, id));
            }
        }
        {
            let mut state = self.state.lock();
            if self.is_active() {
                state.subscriptions = subscriptions;
            } else {
                // Deactivated by a notification that arrived mid-activation.
                drop(state);
                for (child, id) in subscriptions {
                    child.unsubscribe(id);
                    child.deactivate();
                }
                return Ok(());
            }
        }
        debug!(trigger = %self.expression, "Trigger activated");

        if let Err(e) = self.evaluate() {
            warn!(trigger = %self.expression, error = %e, "Evaluation on activation failed");
        }
        Ok(())
    }

    /// Unsubscribe and drop the children. Idempotent.
    pub fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let (subscriptions, children) = {
            let mut state = self.state.lock();
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.children),
            )
        };
        for (child, id) in subscriptions {
            child.unsubscribe(id);
        }
        for child in children {
            child.deactivate();
        }
        debug!(trigger = %self.expression, "Trigger deactivated");
    }

    /// Re-sample every child, evaluate and publish `Changed` or `Updated`,
    /// stamped now.
    pub fn evaluate(&self) -> Result<ChangeKind, EvaluationError> {
        self.evaluate_at(Local::now())
    }

    /// Evaluate and publish with the stamp of the triggering assignment.
    pub fn evaluate_at(&self, stamp: DateTime<Local>) -> Result<ChangeKind, EvaluationError> {
        let (kind, value, exhausted) = {
            let mut state = self.state.lock();
            let value = evaluate_state(&mut state)?;
            if value == state.latest {
                (ChangeKind::Updated, value, false)
            } else {
                state.latest = value;
                let mut exhausted = false;
                if self.is_active() {
                    state.repeat = state.repeat.saturating_sub(1);
                    exhausted = state.repeat == 0;
                }
                (ChangeKind::Changed, value, exhausted)
            }
        };

        self.value_tx.send_replace(value);
        if kind == ChangeKind::Changed {
            if self.verbose.load(Ordering::Relaxed) {
                info!(trigger = %self.expression, value, "Trigger changed");
            } else {
                debug!(trigger = %self.expression, value, "Trigger changed");
            }
        }
        self.subscribers.publish(&Notification {
            source: self.expression.clone(),
            kind,
            value: Value::Bool(value),
            stamp,
        });

        if exhausted {
            debug!(trigger = %self.expression, "Repeat count reached zero");
            self.deactivate();
        }
        Ok(kind)
    }

    fn on_child_notification(&self, stamp: DateTime<Local>) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.evaluate_at(stamp) {
            warn!(trigger = %self.expression, error = %e, "Evaluation failed");
        }
    }
}

impl Drop for Trigger {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("expression", &self.expression)
            .field("active", &self.is_active())
            .field("value", &self.value())
            .finish()
    }
}

fn build_children(
    expr: &LogicalExpression,
    variables: &VariableTable,
) -> Result<Vec<Arc<Comparable>>, BindingError> {
    expr.atoms()
        .iter()
        .map(|atom| Comparable::parse(atom, variables))
        .collect()
}

fn evaluate_state(state: &mut TriggerState) -> Result<bool, EvaluationError> {
    let Some(working) = state.working.as_mut() else {
        return Ok(true);
    };
    if state.children.is_empty() {
        return working.evaluate();
    }
    for child in &state.children {
        working.bind(child.expression(), child.sample());
    }
    working.evaluate()
}
