//! Expression compiler and evaluator.
//!
//! Two grammars share one token model:
//!
//! - **Arithmetic** (`compile_arithmetic`, [`Formula`]): numbers, variables,
//!   `+ - * /`, parentheses and the built-in function table in
//!   [`functions`]. Evaluates to `f64`; domain errors yield NaN.
//! - **Logical** (`compile_logical`, [`LogicalExpression`]): comparison
//!   atoms joined by `& | !` and parentheses. Evaluates to `bool` once
//!   every atom has been bound.
//!
//! Compilation produces a validated postfix [`TokenStream`]; evaluation
//! works on a copy, so one compiled template serves any number of
//! evaluations.

pub mod compiler;
pub mod evaluator;
pub mod functions;
pub mod logical;
pub mod mathematical;
pub mod token;

pub use compiler::{compile_arithmetic, compile_logical};
pub use evaluator::{evaluate_logical, evaluate_numeric};
pub use logical::LogicalExpression;
pub use mathematical::{Bindings, Formula, ABSCISSA};
pub use token::{Token, TokenKind, TokenStream, TokenValue};
