//! Compiled arithmetic formulas with named variable bindings.

use super::compiler::compile_arithmetic;
use super::evaluator::evaluate_numeric;
use super::token::{TokenKind, TokenStream, TokenValue};
use crate::error::{CompileError, EvaluationError};
use std::fmt;

/// Name of the abscissa variable, always first in the variable table.
pub const ABSCISSA: &str = "x";

/// A compiled arithmetic expression.
///
/// # Example
///
/// ```
/// use rust_procedure::formula::Formula;
///
/// let formula = Formula::compile("height * exp(-x / tau)").unwrap();
/// assert_eq!(formula.variables(), &["x", "height", "tau"]);
///
/// let value = formula.evaluate_at(0.0, &[("height", 5.0), ("tau", 2.0)]).unwrap();
/// assert_eq!(value, 5.0);
/// ```
#[derive(Debug, Clone)]
pub struct Formula {
    expression: String,
    postfix: TokenStream,
    variables: Vec<String>,
}

impl Formula {
    /// Compile an infix expression.
    pub fn compile(expression: &str) -> Result<Self, CompileError> {
        let postfix = compile_arithmetic(expression)?;
        let mut variables = postfix.variable_names();
        if let Some(position) = variables.iter().position(|name| name == ABSCISSA) {
            let x = variables.remove(position);
            variables.insert(0, x);
        }
        Ok(Self {
            expression: expression.to_string(),
            postfix,
            variables,
        })
    }

    /// Source expression as given.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Compiled postfix template.
    pub fn postfix(&self) -> &TokenStream {
        &self.postfix
    }

    /// Variable table; `x` first when referenced, others in order of
    /// appearance.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Fully parenthesised infix reconstruction.
    pub fn to_infix(&self) -> String {
        self.postfix.to_infix()
    }

    /// Fresh binding set with every variable at zero.
    pub fn bindings(&self) -> Bindings {
        Bindings {
            names: self.variables.clone(),
            values: vec![0.0; self.variables.len()],
        }
    }

    /// Evaluate with an explicit binding set.
    pub fn evaluate(&self, bindings: &Bindings) -> Result<f64, EvaluationError> {
        let mut working = self.postfix.clone();
        for token in working.tokens_mut() {
            if token.kind == TokenKind::Variable {
                if let Some(value) = bindings.get(&token.name) {
                    token.value = TokenValue::Number(value);
                }
            }
        }
        evaluate_numeric(&working)
    }

    /// Evaluate at abscissa `x` with named parameters. Names the formula
    /// does not reference are ignored.
    pub fn evaluate_at(&self, x: f64, parameters: &[(&str, f64)]) -> Result<f64, EvaluationError> {
        let mut bindings = self.bindings();
        let _ = bindings.set(ABSCISSA, x);
        for (name, value) in parameters {
            let _ = bindings.set(name, *value);
        }
        self.evaluate(&bindings)
    }

    /// Evaluate with values given in variable-table order. Missing trailing
    /// values stay at zero; extra values are ignored.
    pub fn evaluate_positional(&self, values: &[f64]) -> Result<f64, EvaluationError> {
        let mut bindings = self.bindings();
        for (slot, value) in bindings.values.iter_mut().zip(values) {
            *slot = *value;
        }
        self.evaluate(&bindings)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression)
    }
}

/// Values bound to a formula's variables. Slots keep their last value
/// until overwritten.
#[derive(Debug, Clone, PartialEq)]
pub struct Bindings {
    names: Vec<String>,
    values: Vec<f64>,
}

impl Bindings {
    /// Bind a variable by name (case-insensitive, since formulas are
    /// lowercased on compile).
    pub fn set(&mut self, name: &str, value: f64) -> Result<(), CompileError> {
        let name = name.to_lowercase();
        let slot = self
            .names
            .iter()
            .position(|known| *known == name)
            .ok_or(CompileError::UnboundVariable(name))?;
        self.values[slot] = value;
        Ok(())
    }

    /// Bound value of a variable.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|known| known == name)
            .map(|slot| self.values[slot])
    }

    /// Variable names in table order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Bound values in table order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}
