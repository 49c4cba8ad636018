//! Step actions: `Path=Value` assignments to registry channels. A bare
//! `Path` is a placeholder and writes nothing.

use crate::channel::ChannelPort;
use crate::registry::ChannelRegistry;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// A single assignment parsed from a step's action text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Target channel path
    pub path: String,
    /// Literal to write; `None` for a bare target
    pub literal: Option<String>,
}

impl Action {
    /// Parse a comma-separated action list. Empty entries are skipped.
    ///
    /// ```
    /// use rust_procedure::schedule::Action;
    ///
    /// let actions = Action::parse_list("Bath.Heater=on, Bath:Pump");
    /// assert_eq!(actions.len(), 2);
    /// assert_eq!(actions[0].literal.as_deref(), Some("on"));
    /// assert_eq!(actions[1].literal, None);
    /// ```
    pub fn parse_list(text: &str) -> Vec<Action> {
        text.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Action::parse)
            .collect()
    }

    /// Parse one `Path=Value` or bare `Path` entry.
    pub fn parse(entry: &str) -> Action {
        match entry.split_once('=') {
            Some((path, literal)) => Action {
                path: path.trim().to_string(),
                literal: Some(literal.trim().to_string()),
            },
            None => Action {
                path: entry.trim().to_string(),
                literal: None,
            },
        }
    }

    /// Value to write, or `None` for a bare placeholder that writes
    /// nothing.
    pub fn value(&self) -> Option<Value> {
        self.literal.as_deref().map(Value::infer)
    }

    /// Resolve the target channel.
    pub fn resolve(&self, registry: &ChannelRegistry) -> Option<Arc<dyn ChannelPort>> {
        registry.resolve(&self.path)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.literal {
            Some(literal) => write!(f, "{}={}", self.path, literal),
            None => write!(f, "{}", self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn parses_assignments_and_bare_targets() {
        let actions = Action::parse_list(" A.B = 3.5 ,, C:D ,E=");
        assert_eq!(
            actions,
            vec![
                Action {
                    path: "A.B".into(),
                    literal: Some("3.5".into())
                },
                Action {
                    path: "C:D".into(),
                    literal: None
                },
                Action {
                    path: "E".into(),
                    literal: Some(String::new())
                },
            ]
        );
        assert_eq!(actions[0].value(), Some(Value::Number(3.5)));
        assert_eq!(actions[1].value(), None);
        assert_eq!(actions[0].to_string(), "A.B=3.5");
    }

    #[test]
    fn resolves_case_insensitively() {
        let registry = ChannelRegistry::new();
        registry.register("Bath.Heater", Arc::new(Channel::new("Heater")));
        assert!(Action::parse("bath:HEATER=1").resolve(&registry).is_some());
        assert!(Action::parse("Bath.Pump=1").resolve(&registry).is_none());
    }
}
