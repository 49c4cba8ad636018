//! Dynamic values carried by channels, variables and comparisons.
//!
//! `Value` is a closed tagged union over the four kinds the procedure engine
//! understands. Comparisons are only defined between values of the same
//! kind; conversions between kinds are explicit through [`Value::coerce`]
//! and [`Value::parse_as`].

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Timestamp formats accepted for literal constants, tried in order.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y/%m/%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Display format used for timestamps.
const TIMESTAMP_DISPLAY: &str = "%Y/%m/%dT%H:%M:%S%.3f";

/// Kind tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// 64-bit float
    Number,
    /// Boolean flag
    Bool,
    /// Local wall-clock instant
    Timestamp,
    /// Free text
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Number => write!(f, "Number"),
            ValueKind::Bool => write!(f, "Bool"),
            ValueKind::Timestamp => write!(f, "Timestamp"),
            ValueKind::Text => write!(f, "Text"),
        }
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    /// Numeric value
    Number(f64),
    /// Boolean value
    Bool(bool),
    /// Point in time
    Timestamp(DateTime<Local>),
    /// Text value
    Text(String),
}

impl Value {
    /// Kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Text(_) => ValueKind::Text,
        }
    }

    /// Infer a value from a literal: bool, then number, then timestamp,
    /// falling back to text.
    pub fn infer(literal: &str) -> Value {
        let trimmed = literal.trim();
        if let Some(flag) = parse_bool(trimmed) {
            return Value::Bool(flag);
        }
        if let Some(number) = parse_number(trimmed) {
            return Value::Number(number);
        }
        if let Some(stamp) = parse_timestamp(trimmed) {
            return Value::Timestamp(stamp);
        }
        Value::Text(literal.to_string())
    }

    /// Parse a literal as a value of the given kind.
    ///
    /// For [`ValueKind::Timestamp`] a plain number is read as an offset in
    /// seconds from now, so `10` means "ten seconds from now".
    pub fn parse_as(literal: &str, kind: ValueKind) -> Option<Value> {
        let trimmed = literal.trim();
        match kind {
            ValueKind::Number => parse_number(trimmed).map(Value::Number),
            ValueKind::Bool => parse_bool(trimmed).map(Value::Bool),
            ValueKind::Timestamp => parse_timestamp(trimmed)
                .or_else(|| parse_number(trimmed).and_then(seconds_from_now))
                .map(Value::Timestamp),
            ValueKind::Text => Some(Value::Text(literal.to_string())),
        }
    }

    /// Convert this value to another kind, if a conversion exists.
    pub fn coerce(&self, kind: ValueKind) -> Option<Value> {
        if self.kind() == kind {
            return Some(self.clone());
        }
        match (self, kind) {
            (Value::Bool(b), ValueKind::Number) => Some(Value::Number(if *b { 1.0 } else { 0.0 })),
            (Value::Number(n), ValueKind::Bool) => Some(Value::Bool(*n != 0.0)),
            (Value::Text(text), kind) => Value::parse_as(text, kind),
            (other, ValueKind::Text) => Some(Value::Text(other.to_string())),
            _ => None,
        }
    }

    /// Identity used for change detection. NaN is considered equal to NaN so
    /// that repeatedly writing NaN is reported as an update, not a change.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b) == Ordering::Equal,
            _ => self == other,
        }
    }

    /// Ordering between two values of the same kind. Returns `None` across
    /// kinds and for NaN.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Boolean view of the value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_DISPLAY)),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<DateTime<Local>> for Value {
    fn from(value: DateTime<Local>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

/// Parse `true`/`false` case-insensitively.
pub fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse a decimal literal with optional sign, fraction and exponent.
///
/// Unlike `f64::from_str` this rejects `inf`, `nan` and friends, which would
/// otherwise turn identifiers into numbers.
pub fn parse_number(text: &str) -> Option<f64> {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    match body.chars().next() {
        Some(c) if c.is_ascii_digit() || c == '.' => text.parse().ok(),
        _ => None,
    }
}

/// Parse an absolute timestamp literal in local time.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.with_timezone(&Local));
    }
    TIMESTAMP_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
    })
}

fn seconds_from_now(seconds: f64) -> Option<DateTime<Local>> {
    if !seconds.is_finite() {
        return None;
    }
    let offset = chrono::Duration::try_milliseconds((seconds * 1000.0).round() as i64)?;
    Local::now().checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn infer_prefers_bool_then_number() {
        assert_eq!(Value::infer("TRUE"), Value::Bool(true));
        assert_eq!(Value::infer("2.5e3"), Value::Number(2500.0));
        assert_eq!(Value::infer("-4"), Value::Number(-4.0));
        assert_eq!(Value::infer("nan"), Value::Text("nan".into()));
        assert_eq!(Value::infer("Open"), Value::Text("Open".into()));
    }

    #[test]
    fn infer_recognises_timestamps() {
        let value = Value::infer("2021/09/30T23:00:00");
        let Value::Timestamp(stamp) = value else {
            panic!("expected timestamp, got {value:?}");
        };
        assert_eq!(stamp.year(), 2021);
        assert_eq!(stamp.month(), 9);
        assert_eq!(stamp.hour(), 23);
    }

    #[test]
    fn numeric_timestamp_is_relative_to_now() {
        let before = Local::now();
        let value = Value::parse_as("10", ValueKind::Timestamp);
        let Some(Value::Timestamp(stamp)) = value else {
            panic!("expected timestamp");
        };
        let delta = stamp - before;
        assert!(delta.num_milliseconds() >= 9_900 && delta.num_milliseconds() <= 11_000);
    }

    #[test]
    fn coerce_between_kinds() {
        assert_eq!(Value::Bool(true).coerce(ValueKind::Number), Some(Value::Number(1.0)));
        assert_eq!(Value::Number(0.0).coerce(ValueKind::Bool), Some(Value::Bool(false)));
        assert_eq!(
            Value::Text("12.5".into()).coerce(ValueKind::Number),
            Some(Value::Number(12.5))
        );
        assert_eq!(Value::Number(3.0).coerce(ValueKind::Text), Some(Value::Text("3".into())));
        assert_eq!(Value::Text("abc".into()).coerce(ValueKind::Bool), None);
        assert_eq!(Value::Bool(true).coerce(ValueKind::Timestamp), None);
    }

    #[test]
    fn compare_only_within_kind() {
        assert_eq!(
            Value::Number(1.0).compare(&Value::Number(2.0)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::Number(1.0).compare(&Value::Bool(true)), None);
        assert_eq!(Value::Number(f64::NAN).compare(&Value::Number(1.0)), None);
    }

    #[test]
    fn nan_is_same_as_nan() {
        assert!(Value::Number(f64::NAN).same_as(&Value::Number(f64::NAN)));
        assert!(!Value::Number(1.0).same_as(&Value::Number(2.0)));
    }
}
