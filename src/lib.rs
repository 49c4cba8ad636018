//! # rust_procedure
//!
//! Building blocks for automating laboratory procedures: a small expression
//! language, a reactive comparison graph driven by named variables, a
//! channel-based publish/subscribe substrate, and a step sequencer that
//! writes to channels and waits on triggers.
//!
//! ## Crate Structure
//!
//! - **`value`**: the tagged `Value` union shared by channels and variables.
//! - **`error`**: `CompileError`, `BindingError`, `EvaluationError` and the
//!   top-level `ProcedureError`.
//! - **`formula`**: arithmetic and logical infix→postfix compilers, the
//!   built-in function table and the stack evaluators.
//! - **`channel`**: `Channel` publish/subscribe nodes and `EventMessage`.
//! - **`device`**: channel groups refreshed by a polling driver.
//! - **`registry`**: path lookup for channels, name lookup for variables,
//!   and the `Workspace` built from configuration.
//! - **`reactive`**: `Variable` → `Comparable` → `Trigger` change
//!   propagation with edge detection.
//! - **`schedule`**: `Step`, `Sequence` and the configuration-driven
//!   `Scheduler`.
//! - **`config`**: figment-backed configuration.
//! - **`logging`**: tracing subscriber setup.

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod formula;
pub mod logging;
pub mod reactive;
pub mod registry;
pub mod schedule;
pub mod value;

pub use channel::{Channel, ChannelPort, EventMessage, SubscriptionId};
pub use config::AppConfig;
pub use error::{AppResult, BindingError, CompileError, EvaluationError, ProcedureError};
pub use formula::{Formula, LogicalExpression};
pub use reactive::{ChangeKind, Comparable, Notification, Trigger, Variable};
pub use registry::{ChannelRegistry, VariableTable, Workspace};
pub use schedule::{Scheduler, Sequence, SequenceEvent, SequenceState, Step};
pub use value::{Value, ValueKind};
