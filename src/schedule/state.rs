//! Sequence lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a [`Sequence`](super::Sequence).
///
/// # State Machine
///
/// ```text
/// Idle ──activate──> Running ──queue drained──> Completed
///                     │   ▲
///               pause │   │ resume
///                     ▼   │
///                    Paused
///
/// Running | Paused ──deactivate──> Cancelled
/// ```
///
/// `Completed` and `Cancelled` are terminal for the current activation; a
/// sequence in either state can be refilled and activated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceState {
    /// Never activated
    Idle,
    /// A step is executing or about to be dequeued
    Running,
    /// Stopped between steps until resumed
    Paused,
    /// Queue drained while active
    Completed,
    /// Deactivated before the queue drained
    Cancelled,
}

impl fmt::Display for SequenceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceState::Idle => write!(f, "Idle"),
            SequenceState::Running => write!(f, "Running"),
            SequenceState::Paused => write!(f, "Paused"),
            SequenceState::Completed => write!(f, "Completed"),
            SequenceState::Cancelled => write!(f, "Cancelled"),
        }
    }
}

impl SequenceState {
    /// Whether the run has ended.
    pub fn is_finished(&self) -> bool {
        matches!(self, SequenceState::Completed | SequenceState::Cancelled)
    }
}
