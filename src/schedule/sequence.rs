//! Step sequencer.
//!
//! A [`Sequence`] owns a FIFO of [`Step`]s. Activation dequeues the first
//! step and runs it on the tokio runtime; each later step is dequeued only
//! after the previous one has finished, so at most one step executes at a
//! time. A step:
//!
//! 1. publishes `OnNext` on the sequence channel (action text and
//!    description),
//! 2. writes each action's value to its target channel, skipping targets
//!    that do not resolve and bare placeholder entries,
//! 3. if it has a trigger, re-arms and activates it and waits until the
//!    trigger is true or the sequence is deactivated, then deactivates the
//!    trigger. A trigger that cannot be activated cancels the sequence.
//!
//! When the queue is drained while the sequence is still active,
//! `OnCompleted` is published and the sequence returns to inactive.
//! Pausing takes effect between steps; resuming dequeues the next step.
//! Deactivation clears the queue and interrupts a pending trigger wait.
//!
//! Besides the synchronous channel messages, every lifecycle transition is
//! sent as a [`SequenceEvent`] on a broadcast stream for async observers.

use super::state::SequenceState;
use super::step::Step;
use crate::channel::{Channel, ChannelPort, EventMessage, Handler, SubscriptionId};
use crate::error::{AppResult, ProcedureError};
use crate::reactive::Trigger;
use crate::registry::ChannelRegistry;
use crate::value::Value;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Fallback re-check interval while waiting on a trigger.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Command of the message published before a step runs.
pub const ON_NEXT: &str = "OnNext";

/// Command of the message published when the queue drains.
pub const ON_COMPLETED: &str = "OnCompleted";

const EVENT_CAPACITY: usize = 1024;

/// Lifecycle event sent on the sequence's broadcast stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum SequenceEvent {
    /// Activated
    Started {
        /// Sequence name
        sequence: String,
    },
    /// A step was dequeued
    StepStarted {
        /// One-based step number within this activation
        index: usize,
        /// Action text
        actions: String,
        /// Step description
        description: String,
    },
    /// An action was written
    ActionApplied {
        /// Target path
        path: String,
        /// Written value
        value: Value,
    },
    /// An action target did not resolve
    ActionSkipped {
        /// Target path
        path: String,
    },
    /// Waiting for a trigger
    WaitingOnTrigger {
        /// Trigger expression
        expression: String,
    },
    /// The awaited trigger became true
    TriggerSatisfied {
        /// Trigger expression
        expression: String,
    },
    /// Stopped between steps
    Paused,
    /// Continuing after a pause
    Resumed,
    /// Queue drained
    Completed,
    /// Deactivated before the queue drained
    Cancelled,
}

struct Inner {
    queue: VecDeque<Step>,
    paused: bool,
    in_flight: bool,
    executed: usize,
    runtime: Option<Handle>,
}

/// FIFO step executor. See the module documentation.
pub struct Sequence {
    name: String,
    registry: ChannelRegistry,
    channel: Arc<Channel>,
    inner: Mutex<Inner>,
    active: AtomicBool,
    active_tx: watch::Sender<bool>,
    state_tx: watch::Sender<SequenceState>,
    events: broadcast::Sender<SequenceEvent>,
    poll_interval: Duration,
    me: Weak<Sequence>,
}

impl Sequence {
    /// New idle sequence resolving action targets through `registry`.
    pub fn new(name: impl Into<String>, registry: ChannelRegistry) -> Arc<Self> {
        Self::with_poll_interval(name, registry, DEFAULT_POLL_INTERVAL)
    }

    /// New idle sequence with a custom trigger re-check interval.
    pub fn with_poll_interval(
        name: impl Into<String>,
        registry: ChannelRegistry,
        poll_interval: Duration,
    ) -> Arc<Self> {
        let name = name.into();
        let (active_tx, _) = watch::channel(false);
        let (state_tx, _) = watch::channel(SequenceState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new_cyclic(|me| Self {
            channel: Arc::new(Channel::new(name.clone())),
            name,
            registry,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                paused: false,
                in_flight: false,
                executed: 0,
                runtime: None,
            }),
            active: AtomicBool::new(false),
            active_tx,
            state_tx,
            events,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            me: me.clone(),
        })
    }

    /// Sequence name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel carrying `OnNext` / `OnCompleted` messages.
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Subscribe to `OnNext` / `OnCompleted` messages.
    pub fn subscribe(&self, handler: Handler<EventMessage>) -> Option<SubscriptionId> {
        self.channel.subscribe(handler, false)
    }

    /// Remove a message subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.channel.unsubscribe(id)
    }

    /// Async lifecycle event stream.
    pub fn events(&self) -> broadcast::Receiver<SequenceEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SequenceState {
        *self.state_tx.borrow()
    }

    /// Receiver observing lifecycle state changes.
    pub fn watch_state(&self) -> watch::Receiver<SequenceState> {
        self.state_tx.subscribe()
    }

    /// Wait until the current run completes or is cancelled. Returns
    /// immediately if the sequence is already in a finished state.
    pub async fn finished(&self) -> SequenceState {
        let mut rx = self.watch_state();
        let result = match rx.wait_for(SequenceState::is_finished).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        result
    }

    /// Whether a run is in progress.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Whether the pause flag is set.
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Number of queued steps.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Append a step.
    pub fn push(&self, step: Step) {
        self.inner.lock().queue.push_back(step);
    }

    /// Start executing the queue. Must be called from within a tokio
    /// runtime. Activating an active sequence does nothing.
    pub fn activate(&self) -> AppResult<()> {
        let runtime = Handle::try_current().map_err(|_| {
            ProcedureError::Sequence(format!(
                "sequence '{}' must be activated inside a tokio runtime",
                self.name
            ))
        })?;
        if self.active.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        {
            let mut inner = self.inner.lock();
            inner.runtime = Some(runtime);
            inner.executed = 0;
        }
        self.channel.set_active(true);
        self.active_tx.send_replace(true);
        self.state_tx.send_replace(SequenceState::Running);
        info!(sequence = %self.name, steps = self.pending(), "Sequence started");
        self.emit(SequenceEvent::Started {
            sequence: self.name.clone(),
        });
        self.advance();
        Ok(())
    }

    /// Stop the run: clear the queue and interrupt any trigger wait.
    pub fn deactivate(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let dropped = {
            let mut inner = self.inner.lock();
            inner.paused = false;
            let dropped = inner.queue.len();
            inner.queue.clear();
            dropped
        };
        self.active_tx.send_replace(false);
        self.state_tx.send_replace(SequenceState::Cancelled);
        self.channel.set_active(false);
        info!(sequence = %self.name, dropped, "Sequence cancelled");
        self.emit(SequenceEvent::Cancelled);
    }

    /// Set the pause flag; the current step finishes first.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
        debug!(sequence = %self.name, "Pause requested");
    }

    /// Clear the pause flag and continue with the next step. If the
    /// sequence has not reached a pause yet, the request is withdrawn and
    /// the running step carries on.
    pub fn resume(&self) {
        {
            let mut inner = self.inner.lock();
            if !inner.paused {
                return;
            }
            inner.paused = false;
            // Paused is only entered under this lock.
            if !self.is_active() || self.state() != SequenceState::Paused {
                debug!(sequence = %self.name, "Pause request withdrawn");
                return;
            }
            self.state_tx.send_replace(SequenceState::Running);
            info!(sequence = %self.name, "Sequence resumed");
            self.emit(SequenceEvent::Resumed);
        }
        self.advance();
    }

    /// Pause or resume.
    pub fn set_paused(&self, paused: bool) {
        if paused {
            self.pause();
        } else {
            self.resume();
        }
    }

    /// Deactivate and drop every subscriber. Idempotent.
    pub fn dispose(&self) {
        self.deactivate();
        self.inner.lock().queue.clear();
        self.channel.clear_handlers();
    }

    fn emit(&self, event: SequenceEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Dequeue and spawn the next step unless one is already running.
    fn advance(&self) {
        let (step, runtime) = {
            let mut inner = self.inner.lock();
            if !self.is_active() || inner.in_flight {
                return;
            }
            if inner.paused {
                self.enter_pause(&inner);
                return;
            }
            match inner.queue.pop_front() {
                Some(step) => {
                    inner.in_flight = true;
                    (step, inner.runtime.clone())
                }
                None => {
                    drop(inner);
                    self.complete();
                    return;
                }
            }
        };
        let (Some(me), Some(runtime)) = (self.me.upgrade(), runtime) else {
            error!(sequence = %self.name, "No runtime to execute step");
            self.inner.lock().in_flight = false;
            return;
        };
        runtime.spawn(me.run(step));
    }

    async fn run(self: Arc<Self>, first: Step) {
        let mut next = Some(first);
        while let Some(step) = next.take() {
            self.execute(step).await;
            next = self.next_step();
        }
    }

    /// Continuation after a step: stop, complete, pause or dequeue.
    fn next_step(&self) -> Option<Step> {
        let mut inner = self.inner.lock();
        if !self.is_active() {
            inner.in_flight = false;
            return None;
        }
        if inner.queue.is_empty() {
            inner.in_flight = false;
            drop(inner);
            self.complete();
            return None;
        }
        if inner.paused {
            inner.in_flight = false;
            self.enter_pause(&inner);
            return None;
        }
        inner.queue.pop_front()
    }

    /// Publish the pause. Called with `inner` held so that a concurrent
    /// `resume` observes either the flag or the `Paused` state, never a gap.
    fn enter_pause(&self, inner: &Inner) {
        self.state_tx.send_replace(SequenceState::Paused);
        info!(sequence = %self.name, pending = inner.queue.len(), "Sequence paused");
        self.emit(SequenceEvent::Paused);
    }

    fn complete(&self) {
        if !self.is_active() {
            return;
        }
        self.channel
            .notify(EventMessage::new(self.name.clone(), ON_COMPLETED));
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.active_tx.send_replace(false);
        self.state_tx.send_replace(SequenceState::Completed);
        self.channel.set_active(false);
        info!(sequence = %self.name, "Sequence completed");
        self.emit(SequenceEvent::Completed);
    }

    async fn execute(&self, step: Step) {
        let index = {
            let mut inner = self.inner.lock();
            inner.executed += 1;
            inner.executed
        };
        info!(
            sequence = %self.name,
            index,
            actions = %step.source(),
            description = %step.description(),
            "Step started"
        );
        self.channel.notify(
            EventMessage::new(self.name.clone(), ON_NEXT)
                .with_value(Value::Text(step.source().to_string()))
                .with_description(step.description()),
        );
        self.emit(SequenceEvent::StepStarted {
            index,
            actions: step.source().to_string(),
            description: step.description().to_string(),
        });

        for action in step.actions() {
            let Some(value) = action.value() else {
                debug!(sequence = %self.name, path = %action.path, "Placeholder action, nothing written");
                continue;
            };
            match action.resolve(&self.registry) {
                Some(target) => {
                    debug!(sequence = %self.name, path = %action.path, %value, "Applying action");
                    target.set_value(value.clone());
                    self.emit(SequenceEvent::ActionApplied {
                        path: action.path.clone(),
                        value,
                    });
                }
                None => {
                    warn!(sequence = %self.name, path = %action.path, "Action target not found, skipped");
                    self.emit(SequenceEvent::ActionSkipped {
                        path: action.path.clone(),
                    });
                }
            }
        }

        let Some(trigger) = step.trigger() else {
            return;
        };
        if !self.is_active() {
            return;
        }
        trigger.rearm();
        if trigger.repeat() == 0 {
            error!(sequence = %self.name, trigger = %trigger.expression(), "Trigger has no transitions left, cancelling");
            self.deactivate();
            return;
        }
        if let Err(e) = trigger.activate() {
            error!(sequence = %self.name, trigger = %trigger.expression(), error = %e, "Trigger activation failed, cancelling");
            self.deactivate();
            return;
        }
        self.emit(SequenceEvent::WaitingOnTrigger {
            expression: trigger.expression().to_string(),
        });
        self.wait_for(trigger).await;
        trigger.deactivate();
        if trigger.value() {
            debug!(sequence = %self.name, trigger = %trigger.expression(), "Trigger satisfied");
            self.emit(SequenceEvent::TriggerSatisfied {
                expression: trigger.expression().to_string(),
            });
        }
    }

    /// Wait until `trigger` is true or the sequence is deactivated. Wakes on
    /// either change, re-checking at least every poll interval.
    async fn wait_for(&self, trigger: &Trigger) {
        let mut value_rx = trigger.watch();
        let mut active_rx = self.active_tx.subscribe();
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !trigger.value() && self.is_active() {
            tokio::select! {
                _ = value_rx.changed() => {}
                _ = active_rx.changed() => {}
                _ = tick.tick() => {}
            }
        }
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn activation_requires_runtime() {
        let sequence = Sequence::new("outside", ChannelRegistry::new());
        sequence.push(Step::new("A=1"));
        assert!(matches!(
            sequence.activate(),
            Err(ProcedureError::Sequence(_))
        ));
        assert!(!sequence.is_active());
    }

    #[tokio::test]
    async fn empty_queue_completes_immediately() {
        let sequence = Sequence::new("empty", ChannelRegistry::new());
        let mut events = sequence.events();
        sequence.activate().unwrap();
        assert_eq!(sequence.finished().await, SequenceState::Completed);
        assert!(matches!(events.recv().await, Ok(SequenceEvent::Started { .. })));
        assert!(matches!(events.recv().await, Ok(SequenceEvent::Completed)));
        assert!(!sequence.is_active());
    }

    #[tokio::test]
    #[traced_test]
    async fn lifecycle_is_logged() {
        let sequence = Sequence::new("logged", ChannelRegistry::new());
        sequence.activate().unwrap();
        assert!(logs_contain("Sequence started"));
        assert!(logs_contain("Sequence completed"));
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let sequence = Sequence::new("idle", ChannelRegistry::new());
        sequence.deactivate();
        assert_eq!(sequence.state(), SequenceState::Idle);
        sequence.dispose();
        sequence.dispose();
    }
}
