//! Reactive comparison graph.
//!
//! Data flows one way: a [`Variable`] assignment notifies the
//! [`Comparable`]s reading it, which notify the [`Trigger`]s that own them.
//! Every node publishes a [`Notification`] tagged `Changed` when its value
//! differs from the previous one and `Updated` otherwise, so consumers can
//! react to edges without tracking history themselves. The stamp of the
//! variable assignment travels unchanged through every hop it causes.
//!
//! Propagation is synchronous on the thread performing the assignment.
//! Subscriber lists are snapshotted before dispatch, so handlers may
//! subscribe or unsubscribe freely while a notification is in flight.

mod comparable;
mod trigger;
mod variable;

use crate::value::Value;
use chrono::{DateTime, Local};
use serde::Serialize;

pub use comparable::{Comparable, Comparator, Operand};
pub use trigger::Trigger;
pub use variable::Variable;

/// Whether a publication moved the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    /// New value differs from the previous one
    Changed,
    /// Value rewritten unchanged
    Updated,
}

/// Published by variables, comparisons and triggers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    /// Variable name or expression text of the publisher
    pub source: String,
    /// Edge or level
    pub kind: ChangeKind,
    /// Value after the publication
    pub value: Value,
    /// Time of the assignment that caused the publication
    pub stamp: DateTime<Local>,
}
