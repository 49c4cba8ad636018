//! A unit of work in a sequence.

use super::action::Action;
use crate::config::StepConfig;
use crate::error::BindingError;
use crate::reactive::Trigger;
use crate::registry::VariableTable;
use std::sync::Arc;

/// Actions to apply, then an optional trigger to wait for.
#[derive(Debug, Clone, Default)]
pub struct Step {
    source: String,
    actions: Vec<Action>,
    trigger: Option<Arc<Trigger>>,
    description: String,
}

impl Step {
    /// Step with the given action text (`Path=Value, ...`).
    pub fn new(actions: &str) -> Self {
        Self {
            source: actions.trim().to_string(),
            actions: Action::parse_list(actions),
            ..Self::default()
        }
    }

    /// Wait for `trigger` after applying the actions.
    pub fn with_trigger(mut self, trigger: Arc<Trigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Build from configuration, compiling the trigger against `variables`.
    pub fn from_config(config: &StepConfig, variables: &VariableTable) -> Result<Self, BindingError> {
        let mut step = Step::new(config.action.as_deref().unwrap_or_default());
        if let Some(expression) = config.trigger.as_deref().filter(|t| !t.trim().is_empty()) {
            step = step.with_trigger(Trigger::new(expression, variables)?);
        }
        if let Some(description) = &config.description {
            step = step.with_description(description.clone());
        }
        Ok(step)
    }

    /// Action text as given.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed actions.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Trigger to wait for, if any.
    pub fn trigger(&self) -> Option<&Arc<Trigger>> {
        self.trigger.as_ref()
    }

    /// Description.
    pub fn description(&self) -> &str {
        &self.description
    }
}
