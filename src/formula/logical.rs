//! Compiled logical expressions over comparison atoms.

use super::compiler::compile_logical;
use super::evaluator::evaluate_logical;
use super::token::{TokenKind, TokenStream, TokenValue};
use crate::error::{CompileError, EvaluationError};

/// A compiled logical expression. Each distinct atom text is a slot whose
/// truth value is bound before evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalExpression {
    expression: String,
    postfix: TokenStream,
}

impl LogicalExpression {
    /// Compile an infix logical expression.
    pub fn compile(expression: &str) -> Result<Self, CompileError> {
        Ok(Self {
            expression: expression.to_string(),
            postfix: compile_logical(expression)?,
        })
    }

    /// Source expression as given.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Postfix stream with the currently bound atom values.
    pub fn postfix(&self) -> &TokenStream {
        &self.postfix
    }

    /// Distinct atom texts in order of first appearance.
    pub fn atoms(&self) -> Vec<String> {
        self.postfix.logic_atoms()
    }

    /// Bind every occurrence of `atom`. Returns false if the atom does not
    /// occur.
    pub fn bind(&mut self, atom: &str, value: bool) -> bool {
        let mut found = false;
        for token in self.postfix.tokens_mut() {
            if token.kind == TokenKind::LogicAtom && token.name == atom {
                token.value = TokenValue::Bool(value);
                found = true;
            }
        }
        found
    }

    /// Evaluate with the currently bound atom values.
    pub fn evaluate(&self) -> Result<bool, EvaluationError> {
        evaluate_logical(&self.postfix)
    }

    /// Bind every atom through `resolve` (unresolved atoms are false) and
    /// evaluate.
    pub fn evaluate_with(
        &mut self,
        resolve: impl Fn(&str) -> Option<bool>,
    ) -> Result<bool, EvaluationError> {
        for atom in self.atoms() {
            let value = resolve(&atom).unwrap_or(false);
            self.bind(&atom, value);
        }
        self.evaluate()
    }

    /// Fully parenthesised infix reconstruction.
    pub fn to_infix(&self) -> String {
        self.postfix.to_infix()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_evaluate() {
        let mut expr = LogicalExpression::compile("(Level>=5|Temp<20.0)&10<Tick").unwrap();
        assert_eq!(expr.atoms(), vec!["Level>=5", "Temp<20.0", "10<Tick"]);
        assert!(!expr.evaluate().unwrap());

        expr.bind("Temp<20.0", true);
        expr.bind("10<Tick", true);
        assert!(expr.evaluate().unwrap());
        assert!(!expr.bind("Missing", true));
    }

    #[test]
    fn repeated_atoms_share_a_slot() {
        let mut expr = LogicalExpression::compile("A&!A").unwrap();
        assert_eq!(expr.atoms(), vec!["A"]);
        assert!(!expr.evaluate_with(|_| Some(true)).unwrap());
        assert!(!expr.evaluate_with(|_| Some(false)).unwrap());
    }

    #[test]
    fn infix_reconstruction() {
        let expr = LogicalExpression::compile("a|b&!c").unwrap();
        assert_eq!(expr.to_infix(), "(a|(b&!c))");
    }
}
