//! Token model shared by the arithmetic and logical compilers.

use crate::error::CompileError;
use std::fmt;
use std::ops::Deref;

/// Role of a token in a postfix stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Numeric literal
    Numeric,
    /// Named arithmetic variable, bound at evaluation time
    Variable,
    /// Infix operator (`+ - * /` or `& | !`)
    Operator,
    /// Named function with fixed arity
    Function,
    /// Opaque comparison text inside a logical expression
    LogicAtom,
}

impl TokenKind {
    /// Whether the token is an operand (something an operator consumes).
    pub fn is_calculable(self) -> bool {
        matches!(
            self,
            TokenKind::Numeric | TokenKind::Variable | TokenKind::LogicAtom
        )
    }
}

/// Value slot of a token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenValue {
    /// Operators and functions carry no value
    Empty,
    /// Numeric literal or bound variable value
    Number(f64),
    /// Bound truth value of a logic atom
    Bool(bool),
}

/// A single postfix token.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Source text (operator symbol, function or variable name, atom text)
    pub name: String,
    /// Token role
    pub kind: TokenKind,
    /// Bound value
    pub value: TokenValue,
    /// Number of operands consumed (zero for operands)
    pub arity: usize,
}

impl Token {
    /// Numeric literal.
    pub fn numeric(value: f64) -> Self {
        Self {
            name: value.to_string(),
            kind: TokenKind::Numeric,
            value: TokenValue::Number(value),
            arity: 0,
        }
    }

    /// Named variable, bound to zero until evaluation.
    pub fn variable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TokenKind::Variable,
            value: TokenValue::Number(0.0),
            arity: 0,
        }
    }

    /// Operator; `!` is unary, everything else binary.
    pub fn operator(symbol: char) -> Self {
        Self {
            name: symbol.to_string(),
            kind: TokenKind::Operator,
            value: TokenValue::Empty,
            arity: if symbol == '!' { 1 } else { 2 },
        }
    }

    /// Function call with a known arity.
    pub fn function(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            kind: TokenKind::Function,
            value: TokenValue::Empty,
            arity,
        }
    }

    /// Comparison atom, unbound (false) until evaluation.
    pub fn atom(text: impl Into<String>) -> Self {
        Self {
            name: text.into(),
            kind: TokenKind::LogicAtom,
            value: TokenValue::Bool(false),
            arity: 0,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An ordered postfix token sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream(Vec<Token>);

impl TokenStream {
    /// Empty stream.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, token: Token) {
        self.0.push(token);
    }

    pub(crate) fn extend(&mut self, other: TokenStream) {
        self.0.extend(other.0);
    }

    pub(crate) fn tokens_mut(&mut self) -> &mut [Token] {
        &mut self.0
    }

    /// Check that every operator finds its operands and exactly one value
    /// remains.
    pub fn validate(&self, expression: &str) -> Result<(), CompileError> {
        let mut depth = 0usize;
        for token in &self.0 {
            if token.arity > depth {
                return Err(CompileError::malformed(
                    expression,
                    format!("'{}' is missing operands", token.name),
                ));
            }
            depth = depth - token.arity + 1;
        }
        match depth {
            1 => Ok(()),
            0 => Err(CompileError::malformed(expression, "empty expression")),
            n => Err(CompileError::malformed(
                expression,
                format!("{n} operands are not joined by an operator"),
            )),
        }
    }

    /// Distinct variable names in order of first appearance.
    pub fn variable_names(&self) -> Vec<String> {
        self.distinct_names(TokenKind::Variable)
    }

    /// Distinct logic atom texts in order of first appearance.
    pub fn logic_atoms(&self) -> Vec<String> {
        self.distinct_names(TokenKind::LogicAtom)
    }

    fn distinct_names(&self, kind: TokenKind) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for token in self.0.iter().filter(|t| t.kind == kind) {
            if !names.contains(&token.name) {
                names.push(token.name.clone());
            }
        }
        names
    }

    /// Rebuild a fully parenthesised infix string.
    pub fn to_infix(&self) -> String {
        let mut stack: Vec<String> = Vec::new();
        for token in &self.0 {
            if token.kind.is_calculable() {
                stack.push(token.name.clone());
                continue;
            }
            let split = stack.len().saturating_sub(token.arity);
            let args = stack.split_off(split);
            let text = match (token.kind, args.as_slice()) {
                (TokenKind::Operator, [lhs, rhs]) => format!("({lhs}{}{rhs})", token.name),
                (TokenKind::Operator, [operand]) => format!("{}{operand}", token.name),
                _ => format!("{}({})", token.name, args.join(",")),
            };
            stack.push(text);
        }
        stack.join(" ")
    }
}

impl Deref for TokenStream {
    type Target = [Token];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Token>> for TokenStream {
    fn from(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }
}

impl fmt::Display for TokenStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|t| t.name.as_str()).collect();
        write!(f, "{}", names.join(", "))
    }
}
