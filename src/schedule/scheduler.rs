//! Builds the active [`Sequence`] from a `[procedure]` configuration tree.

use super::sequence::Sequence;
use super::step::Step;
use crate::config::SchedulerConfig;
use crate::error::{AppResult, ProcedureError};
use crate::registry::{ChannelRegistry, VariableTable};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The sequence selected by `Active`, with its start/exit policy.
#[derive(Debug, Clone)]
pub struct Scheduler {
    sequence: Arc<Sequence>,
    auto_start: bool,
    auto_exit: bool,
}

impl Scheduler {
    /// Compile every step of the `Active` sequence and queue it. The
    /// sequence stays idle until [`Scheduler::start`].
    pub fn build(
        config: &SchedulerConfig,
        channels: &ChannelRegistry,
        variables: &VariableTable,
        poll_interval: Duration,
    ) -> AppResult<Self> {
        let definition = config.active_sequence().ok_or_else(|| {
            ProcedureError::Configuration(format!(
                "Active sequence '{}' is not defined",
                config.active
            ))
        })?;

        let sequence =
            Sequence::with_poll_interval(definition.name.clone(), channels.clone(), poll_interval);
        for step in &definition.steps {
            sequence.push(Step::from_config(step, variables)?);
        }
        info!(
            sequence = %definition.name,
            steps = sequence.pending(),
            auto_start = config.auto_start,
            auto_exit = config.auto_exit,
            "Scheduler built"
        );

        Ok(Self {
            sequence,
            auto_start: config.auto_start,
            auto_exit: config.auto_exit,
        })
    }

    /// Activate the sequence if `AutoStart` is set. Returns whether it was
    /// activated. Requires a tokio runtime.
    pub fn start(&self) -> AppResult<bool> {
        if !self.auto_start {
            return Ok(false);
        }
        self.sequence.activate()?;
        Ok(true)
    }

    /// The scheduled sequence.
    pub fn sequence(&self) -> &Arc<Sequence> {
        &self.sequence
    }

    /// Whether [`Scheduler::start`] activates the sequence.
    pub fn auto_start(&self) -> bool {
        self.auto_start
    }

    /// Whether the host should exit once the sequence completes.
    pub fn auto_exit(&self) -> bool {
        self.auto_exit
    }
}
