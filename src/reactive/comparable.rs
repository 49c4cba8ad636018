use super::{ChangeKind, Notification, Variable};
use crate::channel::{Handler, SubscriptionId, Subscribers};
use crate::error::BindingError;
use crate::registry::VariableTable;
use crate::value::Value;
use chrono::{DateTime, Local};
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use tracing::trace;

/// `left OP right`, with operands that cannot contain comparator characters.
const COMPARISON_PATTERN: &str = r"^([^<>=!]+)(?:(<=|>=|==|!=|=|<|>)([^<>=!]+))?$";

fn comparison_regex() -> Result<&'static Regex, BindingError> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(COMPARISON_PATTERN).ok())
        .as_ref()
        .ok_or_else(|| BindingError::MalformedComparison(COMPARISON_PATTERN.to_string()))
}

/// Relational operator of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `=` or `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterOrEqual,
    /// `<`
    Less,
    /// `<=`
    LessOrEqual,
}

impl Comparator {
    /// Parse an operator symbol.
    pub fn parse(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | "==" => Some(Comparator::Equal),
            "!=" => Some(Comparator::NotEqual),
            ">" => Some(Comparator::Greater),
            ">=" => Some(Comparator::GreaterOrEqual),
            "<" => Some(Comparator::Less),
            "<=" => Some(Comparator::LessOrEqual),
            _ => None,
        }
    }

    /// Apply to the ordering of left against right. Incomparable values
    /// (different kinds, NaN) only satisfy `!=`.
    pub fn test(self, ordering: Option<Ordering>) -> bool {
        match ordering {
            Some(ordering) => match self {
                Comparator::Equal => ordering == Ordering::Equal,
                Comparator::NotEqual => ordering != Ordering::Equal,
                Comparator::Greater => ordering == Ordering::Greater,
                Comparator::GreaterOrEqual => ordering != Ordering::Less,
                Comparator::Less => ordering == Ordering::Less,
                Comparator::LessOrEqual => ordering != Ordering::Greater,
            },
            None => self == Comparator::NotEqual,
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Comparator::Equal => "==",
            Comparator::NotEqual => "!=",
            Comparator::Greater => ">",
            Comparator::GreaterOrEqual => ">=",
            Comparator::Less => "<",
            Comparator::LessOrEqual => "<=",
        };
        write!(f, "{symbol}")
    }
}

/// One side of a comparison.
#[derive(Debug, Clone)]
pub enum Operand {
    /// Live variable
    Variable(Arc<Variable>),
    /// Constant parsed as the opposite variable's kind
    Constant(Value),
}

impl Operand {
    /// Current value.
    pub fn value(&self) -> Value {
        match self {
            Operand::Variable(variable) => variable.value(),
            Operand::Constant(value) => value.clone(),
        }
    }
}

/// A boolean node comparing two operands, at least one of which is a
/// variable.
///
/// While active it listens to its variables and republishes its own value
/// as `Changed` (edge) or `Updated` (level unchanged) on every operand
/// notification.
pub struct Comparable {
    expression: String,
    left: Operand,
    comparator: Comparator,
    right: Operand,
    latest: Mutex<bool>,
    subscriptions: Mutex<Vec<(Arc<Variable>, SubscriptionId)>>,
    subscribers: Subscribers<Notification>,
    me: Weak<Comparable>,
}

impl Comparable {
    /// Parse `left OP right` (or a bare Bool variable name) against a
    /// variable table.
    pub fn parse(expression: &str, variables: &VariableTable) -> Result<Arc<Self>, BindingError> {
        let stripped: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
        let captures = comparison_regex()?
            .captures(&stripped)
            .ok_or_else(|| BindingError::MalformedComparison(expression.to_string()))?;
        let left_text = captures.get(1).map_or("", |m| m.as_str());

        let (left, comparator, right) = match (captures.get(2), captures.get(3)) {
            (Some(op), Some(right_text)) => {
                let comparator = Comparator::parse(op.as_str())
                    .ok_or_else(|| BindingError::MalformedComparison(expression.to_string()))?;
                let (left, right) =
                    bind_operands(expression, left_text, right_text.as_str(), variables)?;
                (left, comparator, right)
            }
            _ => {
                let variable = variables
                    .get(left_text)
                    .ok_or_else(|| BindingError::NoVariableFound(expression.to_string()))?;
                if variable.value().as_bool().is_none() {
                    return Err(BindingError::NotBoolean(expression.to_string()));
                }
                (
                    Operand::Variable(variable),
                    Comparator::Equal,
                    Operand::Constant(Value::Bool(true)),
                )
            }
        };

        let initial = comparator.test(left.value().compare(&right.value()));
        Ok(Arc::new_cyclic(|me| Self {
            expression: stripped,
            left,
            comparator,
            right,
            latest: Mutex::new(initial),
            subscriptions: Mutex::new(Vec::new()),
            subscribers: Subscribers::new(),
            me: me.clone(),
        }))
    }

    /// Comparison text with whitespace removed.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Relational operator.
    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    /// Left and right operands.
    pub fn operands(&self) -> (&Operand, &Operand) {
        (&self.left, &self.right)
    }

    /// Last published value.
    pub fn value(&self) -> bool {
        *self.latest.lock()
    }

    /// Compare the operands' current values without publishing.
    pub fn sample(&self) -> bool {
        self.comparator
            .test(self.left.value().compare(&self.right.value()))
    }

    /// Recompute and publish `Changed` or `Updated`, stamped now.
    pub fn refresh(&self) -> ChangeKind {
        self.refresh_at(Local::now())
    }

    /// Recompute and publish with the stamp of the triggering assignment.
    pub fn refresh_at(&self, stamp: DateTime<Local>) -> ChangeKind {
        let value = self.sample();
        let kind = {
            let mut latest = self.latest.lock();
            let kind = if *latest == value {
                ChangeKind::Updated
            } else {
                ChangeKind::Changed
            };
            *latest = value;
            kind
        };
        trace!(comparison = %self.expression, value, ?kind, "Comparison refreshed");
        self.subscribers.publish(&Notification {
            source: self.expression.clone(),
            kind,
            value: Value::Bool(value),
            stamp,
        });
        kind
    }

    /// Whether variable subscriptions are held.
    pub fn is_active(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// Subscribe to every variable operand. Idempotent.
    pub fn activate(&self) {
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.is_empty() {
            return;
        }
        *self.latest.lock() = self.sample();
        for operand in [&self.left, &self.right] {
            let Operand::Variable(variable) = operand else {
                continue;
            };
            let me = self.me.clone();
            let handler: Handler<Notification> = Arc::new(move |n: &Notification| {
                if let Some(comparable) = me.upgrade() {
                    comparable.refresh_at(n.stamp);
                }
            });
            if let Some(id) = variable.subscribe(handler) {
                subscriptions.push((Arc::clone(variable), id));
            }
        }
    }

    /// Drop every variable subscription. Idempotent.
    pub fn deactivate(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for (variable, id) in subscriptions {
            variable.unsubscribe(id);
        }
    }

    /// Subscribe to this comparison's notifications.
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
}

impl Drop for Comparable {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl fmt::Debug for Comparable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comparable")
            .field("expression", &self.expression)
            .field("value", &self.value())
            .finish()
    }
}

fn bind_operands(
    expression: &str,
    left: &str,
    right: &str,
    variables: &VariableTable,
) -> Result<(Operand, Operand), BindingError> {
    let constant = |text: &str, variable: &Variable| {
        Value::parse_as(text, variable.kind())
            .map(Operand::Constant)
            .ok_or_else(|| BindingError::InvalidConstant {
                expression: expression.to_string(),
                constant: text.to_string(),
                kind: variable.kind(),
            })
    };

    match (variables.get(left), variables.get(right)) {
        (Some(l), Some(r)) => {
            if l.kind() != r.kind() {
                return Err(BindingError::TypeMismatch {
                    expression: expression.to_string(),
                    left: l.kind(),
                    right: r.kind(),
                });
            }
            Ok((Operand::Variable(l), Operand::Variable(r)))
        }
        (Some(l), None) => {
            let right = constant(right, &l)?;
            Ok((Operand::Variable(l), right))
        }
        (None, Some(r)) => {
            let left = constant(left, &r)?;
            Ok((left, Operand::Variable(r)))
        }
        (None, None) => Err(BindingError::NoVariableFound(expression.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Local};

    fn table() -> VariableTable {
        let table = VariableTable::new();
        table.insert(Arc::new(Variable::new("Level", 3.0)));
        table.insert(Arc::new(Variable::new("Limit", 5.0)));
        table.insert(Arc::new(Variable::new("Pump", false)));
        table.insert(Arc::new(Variable::new("Clock", Local::now())));
        table
    }

    #[test]
    fn variable_against_constant() {
        let table = table();
        let cmp = Comparable::parse("Level >= 5", &table).unwrap();
        assert!(!cmp.sample());
        table.get("Level").unwrap().set(5.0).unwrap();
        assert!(cmp.sample());
    }

    #[test]
    fn constant_on_the_left() {
        let table = table();
        let cmp = Comparable::parse("4<Level", &table).unwrap();
        assert!(!cmp.sample());
        assert!(matches!(cmp.operands().0, Operand::Constant(Value::Number(_))));
    }

    #[test]
    fn variable_against_variable() {
        let table = table();
        let cmp = Comparable::parse("Level<Limit", &table).unwrap();
        assert!(cmp.sample());
        assert_eq!(cmp.comparator(), Comparator::Less);
    }

    #[test]
    fn bare_bool_means_equal_true() {
        let table = table();
        let cmp = Comparable::parse("Pump", &table).unwrap();
        assert!(!cmp.sample());
        table.get("Pump").unwrap().set(true).unwrap();
        assert!(cmp.sample());
        assert!(matches!(
            Comparable::parse("Level", &table),
            Err(BindingError::NotBoolean(_))
        ));
    }

    #[test]
    fn single_equals_is_equality() {
        let table = table();
        assert!(Comparable::parse("Level=3", &table).unwrap().sample());
        assert!(Comparable::parse("Level!=4", &table).unwrap().sample());
    }

    #[test]
    fn binding_errors() {
        let table = table();
        assert!(matches!(
            Comparable::parse("Level==Pump", &table),
            Err(BindingError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Comparable::parse("3<4", &table),
            Err(BindingError::NoVariableFound(_))
        ));
        assert!(matches!(
            Comparable::parse("Level>high", &table),
            Err(BindingError::InvalidConstant { .. })
        ));
        assert!(matches!(
            Comparable::parse("Level>>3", &table),
            Err(BindingError::MalformedComparison(_))
        ));
    }

    #[test]
    fn timestamp_constants() {
        let table = table();
        let absolute = Comparable::parse("Clock>2021/09/30T23:00:00", &table).unwrap();
        assert!(absolute.sample());

        let relative = Comparable::parse("10<Clock", &table).unwrap();
        assert!(!relative.sample());
        table
            .get("Clock")
            .unwrap()
            .set(Local::now() + Duration::seconds(20))
            .unwrap();
        assert!(relative.sample());
    }

    #[test]
    fn activation_subscribes_and_deactivation_releases() {
        let table = table();
        let level = table.get("Level").unwrap();
        let cmp = Comparable::parse("Level>4", &table).unwrap();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        cmp.subscribe(Arc::new(move |n: &Notification| sink.lock().push(n.kind)));

        cmp.activate();
        cmp.activate();
        assert_eq!(level.subscriber_count(), 1);

        level.set(6.0).unwrap();
        level.set(7.0).unwrap();
        assert_eq!(*kinds.lock(), vec![ChangeKind::Changed, ChangeKind::Updated]);
        assert!(cmp.value());

        cmp.deactivate();
        assert_eq!(level.subscriber_count(), 0);
        level.set(1.0).unwrap();
        assert_eq!(kinds.lock().len(), 2);
    }

    #[test]
    fn flips_are_counted_once_each() {
        let table = table();
        let level = table.get("Level").unwrap();
        let cmp = Comparable::parse("Level>4", &table).unwrap();
        cmp.activate();

        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        cmp.subscribe(Arc::new(move |n: &Notification| sink.lock().push(n.kind)));

        for value in [6.0, 1.0, 1.0, 9.0] {
            level.set(value).unwrap();
        }
        let changed = kinds
            .lock()
            .iter()
            .filter(|k| **k == ChangeKind::Changed)
            .count();
        assert_eq!(changed, 3);
        assert_eq!(kinds.lock().len(), 4);
    }

    #[test]
    fn never_writes_back_to_its_variables() {
        let table = table();
        let level = table.get("Level").unwrap();
        let limit = table.get("Limit").unwrap();
        let cmp = Comparable::parse("Level<Limit", &table).unwrap();
        cmp.activate();

        let assignments = Arc::new(Mutex::new(0));
        for variable in [&level, &limit] {
            let sink = Arc::clone(&assignments);
            variable.subscribe(Arc::new(move |_: &Notification| *sink.lock() += 1));
        }

        level.set(7.0).unwrap();
        limit.set(8.0).unwrap();
        level.set(9.0).unwrap();

        assert_eq!(*assignments.lock(), 3);
        assert_eq!(level.value(), Value::Number(9.0));
        assert_eq!(limit.value(), Value::Number(8.0));
        assert!(!cmp.value());
    }
}
