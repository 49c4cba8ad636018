//! Custom error types for the procedure engine.
//!
//! Errors are split by the stage that raises them so callers can react to
//! each one precisely, while `ProcedureError` consolidates everything for
//! code that only needs to propagate with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`CompileError`**: raised while turning an infix expression into a
//!   postfix token stream. Covers unknown function names, variables that a
//!   formula does not reference, and structurally malformed input
//!   (unbalanced parentheses, bad numeric literals, wrong argument counts).
//! - **`BindingError`**: raised while resolving the operands of a comparison
//!   against the variable table: mismatched variable types, constants that
//!   cannot be parsed as the variable's type, or comparisons with no
//!   variable at all.
//! - **`EvaluationError`**: a compiled stream that cannot be reduced to a
//!   single value. The compilers validate arity up front, so seeing one of
//!   these means a token stream was built by hand incorrectly.
//! - **`ProcedureError`**: the application-level error. It wraps the three
//!   above with `#[from]`, plus configuration loading (`figment`), I/O,
//!   value conversion and sequencer failures.

use crate::value::ValueKind;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, ProcedureError>;

/// Failure while compiling an infix expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Call to a name missing from the function table
    #[error("Undefined function '{0}'")]
    UndefinedFunction(String),

    /// Binding to a name the formula does not use
    #[error("Variable '{0}' is not referenced by the expression")]
    UnboundVariable(String),

    /// Structural problem in the input text
    #[error("Malformed expression '{expression}': {reason}")]
    MalformedExpression {
        /// Input text
        expression: String,
        /// What is wrong with it
        reason: String,
    },
}

impl CompileError {
    pub(crate) fn malformed(expression: &str, reason: impl Into<String>) -> Self {
        CompileError::MalformedExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failure while binding comparison operands to variables.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BindingError {
    /// Neither operand names a known variable
    #[error("No variable found in comparison '{0}'")]
    NoVariableFound(String),

    /// Two variables of different kinds
    #[error("Type mismatch in '{expression}': {left} cannot be compared with {right}")]
    TypeMismatch {
        /// Comparison text
        expression: String,
        /// Kind of the left variable
        left: ValueKind,
        /// Kind of the right variable
        right: ValueKind,
    },

    /// Constant not parseable as the variable's kind
    #[error("Constant '{constant}' in '{expression}' is not a valid {kind}")]
    InvalidConstant {
        /// Comparison text
        expression: String,
        /// Offending constant
        constant: String,
        /// Kind it had to parse as
        kind: ValueKind,
    },

    /// Bare operand that is not a Bool variable
    #[error("Comparison '{0}' without an operator requires a Bool variable")]
    NotBoolean(String),

    /// Text that does not match `left OP right`
    #[error("Malformed comparison '{0}'")]
    MalformedComparison(String),

    /// The enclosing logical expression failed to compile
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// A token stream that does not reduce to a single value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    /// Operator or function with too few operands on the stack
    #[error("'{token}' expects {arity} operand(s), stack holds {available}")]
    StackUnderflow {
        /// Token being applied
        token: String,
        /// Operands it needs
        arity: usize,
        /// Operands present
        available: usize,
    },

    /// Stream left more than one value
    #[error("Expression reduced to {0} values instead of one")]
    Unreduced(usize),

    /// Numeric token in a logical stream or the reverse
    #[error("Token '{0}' is not valid in this expression kind")]
    UnexpectedToken(String),
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum ProcedureError {
    /// Expression compilation
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Comparison binding
    #[error(transparent)]
    Binding(#[from] BindingError),

    /// Stream reduction
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is inconsistent
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// File access
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Value cannot be converted to the target kind
    #[error("Value error: {0}")]
    Value(String),

    /// Sequencer misuse or step failure
    #[error("Sequence error: {0}")]
    Sequence(String),
}

impl From<figment::Error> for ProcedureError {
    fn from(value: figment::Error) -> Self {
        ProcedureError::Config(Box::new(value))
    }
}
