//! Step sequencing.
//!
//! A [`Sequence`] runs [`Step`]s one at a time: each step writes its
//! [`Action`]s to registry channels and may then wait on a trigger before
//! the next step is dequeued. [`Scheduler`] builds the active sequence
//! from configuration.

mod action;
mod scheduler;
mod sequence;
mod state;
mod step;

pub use action::Action;
pub use scheduler::Scheduler;
pub use sequence::{Sequence, SequenceEvent, DEFAULT_POLL_INTERVAL, ON_COMPLETED, ON_NEXT};
pub use state::SequenceState;
pub use step::Step;
