//! Infix to postfix compilers.
//!
//! Both grammars use operator-precedence (shunting-yard) parsing: operands go
//! straight to the output, operators wait on a stack and are flushed while
//! the operator on top binds at least as tightly as the incoming one.
//! Parenthesised groups and function arguments are compiled recursively and
//! spliced into the output.
//!
//! Arithmetic: `*` `/` bind tighter than `+` `-`; names followed by `(` are
//! function calls; other names are variables. Input is lowercased and all
//! whitespace removed before scanning.
//!
//! Logical: `!` binds tighter than `&`, which binds tighter than `|`.
//! Everything between operators is an opaque comparison atom. The logical
//! grammar keeps case, since atoms name variables.

use super::functions;
use super::token::{Token, TokenStream};
use crate::error::CompileError;

/// Binding strength of an operator on the pending stack.
type Priority = u8;

/// Unary negation is compiled as `-1 *` with a priority above `*` and `/`.
const UNARY_PRIORITY: Priority = 3;

/// Compile an arithmetic infix expression into a validated postfix stream.
pub fn compile_arithmetic(expression: &str) -> Result<TokenStream, CompileError> {
    let normalized: String = expression
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let chars: Vec<char> = normalized.chars().collect();
    let stream = compile_arithmetic_group(&chars, &normalized)?;
    stream.validate(&normalized)?;
    Ok(stream)
}

/// Compile a logical infix expression into a validated postfix stream.
pub fn compile_logical(expression: &str) -> Result<TokenStream, CompileError> {
    let normalized: String = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let chars: Vec<char> = normalized.chars().collect();
    let stream = compile_logical_group(&chars, &normalized)?;
    stream.validate(&normalized)?;
    Ok(stream)
}

fn arithmetic_priority(op: char) -> Priority {
    match op {
        '*' | '/' => 2,
        _ => 1,
    }
}

fn logical_priority(op: char) -> Priority {
    match op {
        '!' => 3,
        '&' => 2,
        _ => 1,
    }
}

/// Move operators that bind at least as tightly as `priority` to the output.
fn flush_operators(ops: &mut Vec<(char, Priority)>, output: &mut TokenStream, priority: Priority) {
    while let Some(&(op, top)) = ops.last() {
        if top < priority {
            break;
        }
        output.push(Token::operator(op));
        ops.pop();
    }
}

fn compile_arithmetic_group(chars: &[char], whole: &str) -> Result<TokenStream, CompileError> {
    let mut output = TokenStream::new();
    let mut ops: Vec<(char, Priority)> = Vec::new();
    let mut expect_operand = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                if !expect_operand {
                    return Err(CompileError::malformed(whole, "missing operator before '('"));
                }
                let close = matching_paren(chars, i, whole)?;
                output.extend(compile_arithmetic_group(&chars[i + 1..close], whole)?);
                i = close + 1;
                expect_operand = false;
            }
            ')' => return Err(CompileError::malformed(whole, "unbalanced ')'")),
            '-' if expect_operand => {
                if chars.get(i + 1).is_some_and(|n| n.is_ascii_digit() || *n == '.') {
                    let (value, len) = scan_number(&chars[i..], whole)?;
                    output.push(Token::numeric(value));
                    i += len;
                    expect_operand = false;
                } else {
                    output.push(Token::numeric(-1.0));
                    ops.push(('*', UNARY_PRIORITY));
                    i += 1;
                }
            }
            '+' if expect_operand => i += 1,
            '+' | '-' | '*' | '/' => {
                if expect_operand {
                    return Err(CompileError::malformed(
                        whole,
                        format!("operator '{c}' has no left operand"),
                    ));
                }
                let priority = arithmetic_priority(c);
                flush_operators(&mut ops, &mut output, priority);
                ops.push((c, priority));
                expect_operand = true;
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                if !expect_operand {
                    return Err(CompileError::malformed(whole, "missing operator before number"));
                }
                let (value, len) = scan_number(&chars[i..], whole)?;
                output.push(Token::numeric(value));
                i += len;
                expect_operand = false;
            }
            c if c.is_alphabetic() || c == '_' => {
                if !expect_operand {
                    return Err(CompileError::malformed(whole, "missing operator before name"));
                }
                let len = chars[i..]
                    .iter()
                    .take_while(|n| n.is_alphanumeric() || **n == '_')
                    .count();
                let name: String = chars[i..i + len].iter().collect();
                i += len;
                if chars.get(i) == Some(&'(') {
                    let close = matching_paren(chars, i, whole)?;
                    compile_call(&name, &chars[i + 1..close], whole, &mut output)?;
                    i = close + 1;
                } else {
                    output.push(Token::variable(name));
                }
                expect_operand = false;
            }
            other => {
                return Err(CompileError::malformed(
                    whole,
                    format!("unexpected character '{other}'"),
                ))
            }
        }
    }

    flush_operators(&mut ops, &mut output, 0);
    Ok(output)
}

fn compile_call(
    name: &str,
    body: &[char],
    whole: &str,
    output: &mut TokenStream,
) -> Result<(), CompileError> {
    let arity =
        functions::arity(name).ok_or_else(|| CompileError::UndefinedFunction(name.to_string()))?;
    let args = split_arguments(body);
    let given = if body.is_empty() { 0 } else { args.len() };
    if given != arity {
        return Err(CompileError::malformed(
            whole,
            format!("{name} takes {arity} argument(s), {given} given"),
        ));
    }
    for arg in args.iter().take(given) {
        if arg.is_empty() {
            return Err(CompileError::malformed(whole, format!("empty argument to {name}")));
        }
        output.extend(compile_arithmetic_group(arg, whole)?);
    }
    output.push(Token::function(name, arity));
    Ok(())
}

fn compile_logical_group(chars: &[char], whole: &str) -> Result<TokenStream, CompileError> {
    let mut output = TokenStream::new();
    let mut ops: Vec<(char, Priority)> = Vec::new();
    let mut atom = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' => {
                if !atom.is_empty() {
                    return Err(CompileError::malformed(whole, "'(' inside a comparison"));
                }
                let close = matching_paren(chars, i, whole)?;
                output.extend(compile_logical_group(&chars[i + 1..close], whole)?);
                i = close + 1;
            }
            ')' => return Err(CompileError::malformed(whole, "unbalanced ')'")),
            '!' if chars.get(i + 1) == Some(&'=') => {
                atom.push_str("!=");
                i += 2;
            }
            '!' => {
                if !atom.is_empty() {
                    return Err(CompileError::malformed(whole, "'!' inside a comparison"));
                }
                ops.push(('!', logical_priority('!')));
                i += 1;
            }
            '&' | '|' => {
                flush_atom(&mut atom, &mut output);
                let priority = logical_priority(c);
                flush_operators(&mut ops, &mut output, priority);
                ops.push((c, priority));
                i += if chars.get(i + 1) == Some(&c) { 2 } else { 1 };
            }
            other => {
                atom.push(other);
                i += 1;
            }
        }
    }

    flush_atom(&mut atom, &mut output);
    flush_operators(&mut ops, &mut output, 0);
    Ok(output)
}

fn flush_atom(atom: &mut String, output: &mut TokenStream) {
    if !atom.is_empty() {
        output.push(Token::atom(std::mem::take(atom)));
    }
}

/// Index of the `)` closing the `(` at `open`.
fn matching_paren(chars: &[char], open: usize, whole: &str) -> Result<usize, CompileError> {
    let mut depth = 0usize;
    for (offset, c) in chars[open..].iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(open + offset);
                }
            }
            _ => {}
        }
    }
    Err(CompileError::malformed(whole, "unbalanced '('"))
}

/// Split a function body on commas outside nested parentheses.
fn split_arguments(body: &[char]) -> Vec<&[char]> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in body.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(&body[start..]);
    args
}

/// Scan a numeric literal (optional leading `-`, fraction, exponent) and
/// return its value and length in chars.
fn scan_number(chars: &[char], whole: &str) -> Result<(f64, usize), CompileError> {
    let digits = |from: usize| chars[from..].iter().take_while(|c| c.is_ascii_digit()).count();

    let mut len = usize::from(chars.first() == Some(&'-'));
    len += digits(len);
    if chars.get(len) == Some(&'.') {
        len += 1;
        len += digits(len);
    }
    if chars.get(len) == Some(&'e') {
        let sign = usize::from(matches!(chars.get(len + 1), Some('+' | '-')));
        let exponent = digits(len + 1 + sign);
        if exponent > 0 {
            len += 1 + sign + exponent;
        }
    }

    let literal: String = chars[..len].iter().collect();
    literal
        .parse::<f64>()
        .map(|value| (value, len))
        .map_err(|_| CompileError::malformed(whole, format!("invalid number '{literal}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::token::TokenKind;

    fn names(stream: &TokenStream) -> Vec<String> {
        stream.iter().map(|t| t.name.clone()).collect()
    }

    #[test]
    fn precedence_of_product_over_sum() {
        let stream = compile_arithmetic("3 + 4 * 2").unwrap();
        assert_eq!(names(&stream), vec!["3", "4", "2", "*", "+"]);
    }

    #[test]
    fn left_associative_chains() {
        let stream = compile_arithmetic("8-3-2").unwrap();
        assert_eq!(names(&stream), vec!["8", "3", "-", "2", "-"]);
    }

    #[test]
    fn parentheses_group() {
        let stream = compile_arithmetic("(1+2)*3").unwrap();
        assert_eq!(names(&stream), vec!["1", "2", "+", "3", "*"]);
    }

    #[test]
    fn function_arguments_are_compiled_in_order() {
        let stream = compile_arithmetic("pow(x+1, 2)").unwrap();
        assert_eq!(names(&stream), vec!["x", "1", "+", "2", "pow"]);
        assert_eq!(stream[4].kind, TokenKind::Function);
        assert_eq!(stream[4].arity, 2);
    }

    #[test]
    fn case_and_whitespace_are_normalised() {
        let stream = compile_arithmetic("  SQRT( X ) ").unwrap();
        assert_eq!(names(&stream), vec!["x", "sqrt"]);
    }

    #[test]
    fn scientific_literals() {
        let stream = compile_arithmetic("4.53E-13*2").unwrap();
        assert_eq!(stream[0].value, crate::formula::TokenValue::Number(4.53e-13));
    }

    #[test]
    fn unary_minus_before_name_binds_tightly() {
        let stream = compile_arithmetic("-x/4").unwrap();
        assert_eq!(names(&stream), vec!["-1", "x", "*", "4", "/"]);
        let stream = compile_arithmetic("a/-b").unwrap();
        assert_eq!(names(&stream), vec!["a", "-1", "b", "*", "/"]);
        let stream = compile_arithmetic("-5+3").unwrap();
        assert_eq!(names(&stream), vec!["-5", "3", "+"]);
    }

    #[test]
    fn zero_arity_constant() {
        let stream = compile_arithmetic("2*pi()").unwrap();
        assert_eq!(names(&stream), vec!["2", "pi", "*"]);
        assert!(compile_arithmetic("pi(1)").is_err());
    }

    #[test]
    fn undefined_function() {
        assert_eq!(
            compile_arithmetic("foo(1)"),
            Err(CompileError::UndefinedFunction("foo".into()))
        );
    }

    #[test]
    fn malformed_inputs() {
        for bad in ["(1+2", "1+2)", "1+", "*2", "2x", "1..2", "pow(1)", "pow(1,)", "", "()", "3#4"] {
            assert!(
                matches!(
                    compile_arithmetic(bad),
                    Err(CompileError::MalformedExpression { .. })
                ),
                "{bad:?} should be malformed"
            );
        }
    }

    #[test]
    fn logical_precedence() {
        let stream = compile_logical("(A>3|B<2)&!C==true").unwrap();
        assert_eq!(names(&stream), vec!["A>3", "B<2", "|", "C==true", "!", "&"]);
    }

    #[test]
    fn logical_not_equal_is_an_atom() {
        let stream = compile_logical("Flag!=true&!Other").unwrap();
        assert_eq!(names(&stream), vec!["Flag!=true", "Other", "!", "&"]);
    }

    #[test]
    fn logical_keeps_case_and_accepts_doubled_operators() {
        let stream = compile_logical("WaterLevel >= 5 && Pump || Heater").unwrap();
        assert_eq!(names(&stream), vec!["WaterLevel>=5", "Pump", "&", "Heater", "|"]);
    }

    #[test]
    fn logical_malformed() {
        for bad in ["a&", "(a|b", "a(b)", "a!b", "&a", ""] {
            assert!(compile_logical(bad).is_err(), "{bad:?} should be malformed");
        }
    }
}
