//! Postfix evaluation.
//!
//! Operands are pushed; each operator or function pops exactly `arity`
//! operands and pushes its result, which is the same as repeatedly
//! reducing the leftmost operator of the stream in place. The input slice
//! is never modified, so a compiled template can be evaluated any number
//! of times from bound working copies.

use super::functions;
use super::token::{Token, TokenKind, TokenValue};
use crate::error::EvaluationError;

/// Evaluate an arithmetic postfix stream. Variable tokens contribute their
/// bound value.
pub fn evaluate_numeric(tokens: &[Token]) -> Result<f64, EvaluationError> {
    reduce(
        tokens,
        |token| match (token.kind, token.value) {
            (TokenKind::Numeric | TokenKind::Variable, TokenValue::Number(value)) => Ok(value),
            _ => Err(EvaluationError::UnexpectedToken(token.name.clone())),
        },
        |token, args| match (token.kind, args) {
            (TokenKind::Operator, [a, b]) => match token.name.as_str() {
                "+" => Ok(a + b),
                "-" => Ok(a - b),
                "*" => Ok(a * b),
                "/" if *b == 0.0 => Ok(f64::NAN),
                "/" => Ok(a / b),
                _ => Err(EvaluationError::UnexpectedToken(token.name.clone())),
            },
            (TokenKind::Function, args) => functions::apply(&token.name, args)
                .ok_or_else(|| EvaluationError::UnexpectedToken(token.name.clone())),
            _ => Err(EvaluationError::UnexpectedToken(token.name.clone())),
        },
    )
}

/// Evaluate a logical postfix stream. LogicAtom tokens contribute their
/// bound truth value.
pub fn evaluate_logical(tokens: &[Token]) -> Result<bool, EvaluationError> {
    reduce(
        tokens,
        |token| match (token.kind, token.value) {
            (TokenKind::LogicAtom, TokenValue::Bool(value)) => Ok(value),
            _ => Err(EvaluationError::UnexpectedToken(token.name.clone())),
        },
        |token, args| match (token.name.as_str(), args) {
            ("&", [a, b]) => Ok(*a && *b),
            ("|", [a, b]) => Ok(*a || *b),
            ("!", [a]) => Ok(!*a),
            _ => Err(EvaluationError::UnexpectedToken(token.name.clone())),
        },
    )
}

fn reduce<T: Copy>(
    tokens: &[Token],
    operand: impl Fn(&Token) -> Result<T, EvaluationError>,
    apply: impl Fn(&Token, &[T]) -> Result<T, EvaluationError>,
) -> Result<T, EvaluationError> {
    let mut stack: Vec<T> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.kind.is_calculable() {
            stack.push(operand(token)?);
            continue;
        }
        if token.arity > stack.len() {
            return Err(EvaluationError::StackUnderflow {
                token: token.name.clone(),
                arity: token.arity,
                available: stack.len(),
            });
        }
        let args = stack.split_off(stack.len() - token.arity);
        stack.push(apply(token, &args)?);
    }
    match stack.as_slice() {
        [result] => Ok(*result),
        other => Err(EvaluationError::Unreduced(other.len())),
    }
}
