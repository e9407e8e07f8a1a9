//! §4.5 Expression Evaluator — a restricted expression language over a named
//! scope. No arbitrary code, no I/O: parsing and evaluation are pure and
//! deterministic.
//!
//! Grammar (lowest to highest precedence):
//! ```text
//! expr    := or
//! or      := and ("||" and)*
//! and     := not ("&&" not)*
//! not     := "!" not | cmp
//! cmp     := additive (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in"
//!                        | "matches" | "contains" | "startsWith" | "endsWith") additive)?
//! additive:= term (("+" | "-") term)*
//! term    := unary (("*" | "/") unary)*
//! unary   := "-" unary | postfix
//! postfix := primary ("." ident)* ("exists" | "empty")?
//! primary := literal | ident-path | "(" expr ")"
//! ```

use std::fmt;

use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, miette::Diagnostic)]
pub enum ExpressionError {
    #[error("invalid expression: {0}")]
    #[diagnostic(code(threadengine::expression::invalid))]
    InvalidExpression(String),
}

/// The named values an expression may reference: `state.data`,
/// `state.metadata`, and the previous node's result (§4.4 step 3).
#[derive(Clone, Debug, Default)]
pub struct EvalScope {
    pub state_data: FxHashMap<String, Value>,
    pub state_metadata: FxHashMap<String, String>,
    pub previous_result: FxHashMap<String, Value>,
}

/// A value resolved while evaluating an expression, including the sentinel
/// `Undefined` for absent identifiers (§4.5: "undefined identifiers resolve
/// to `undefined`").
#[derive(Clone, Debug, PartialEq)]
enum EvalValue {
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Json(Value),
}

impl EvalValue {
    fn truthy(&self) -> bool {
        match self {
            EvalValue::Undefined => false,
            EvalValue::Bool(b) => *b,
            EvalValue::Number(n) => *n != 0.0,
            EvalValue::String(s) => !s.is_empty(),
            EvalValue::Json(v) => !matches!(v, Value::Null) && !(v.is_bool() && v == &Value::Bool(false)),
        }
    }

    fn as_str(&self) -> Option<String> {
        match self {
            EvalValue::String(s) => Some(s.clone()),
            EvalValue::Json(Value::String(s)) => Some(s.clone()),
            EvalValue::Number(n) => Some(n.to_string()),
            EvalValue::Json(v) if v.is_string() => v.as_str().map(str::to_string),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Number(n) => Some(*n),
            EvalValue::Json(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => EvalValue::Undefined,
            Value::Bool(b) => EvalValue::Bool(*b),
            Value::Number(n) => EvalValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => EvalValue::String(s.clone()),
            other => EvalValue::Json(other.clone()),
        }
    }
}

impl fmt::Display for EvalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalValue::Undefined => write!(f, "undefined"),
            EvalValue::Bool(b) => write!(f, "{b}"),
            EvalValue::Number(n) => write!(f, "{n}"),
            EvalValue::String(s) => write!(f, "{s}"),
            EvalValue::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Compiles and evaluates expressions against an [`EvalScope`].
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Parses and evaluates `expr` in one step, returning its truthiness
    /// (what the router needs). A malformed expression surfaces as
    /// [`ExpressionError::InvalidExpression`]; callers that must treat a
    /// throwing guard as `false` (§4.4 step 5) should use
    /// [`Self::evaluate_or_false`] instead.
    pub fn evaluate(expr: &str, scope: &EvalScope) -> Result<bool, ExpressionError> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser { tokens, pos: 0 };
        let value = parser.parse_expr(scope)?;
        if parser.pos != parser.tokens.len() {
            return Err(ExpressionError::InvalidExpression(format!(
                "unexpected trailing input in `{expr}`"
            )));
        }
        Ok(value.truthy())
    }

    /// §4.4 step 5: missing/invalid expressions and throwing guards are
    /// logged and treated as `false`.
    #[must_use]
    pub fn evaluate_or_false(expr: &str, scope: &EvalScope) -> bool {
        match Self::evaluate(expr, scope) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(target: "threadengine::expression", guard = expr, error = %err, "guard expression failed, treating as false");
                false
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Dot,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    s.push(chars[i]);
                    i += 1;
                }
                if i >= chars.len() {
                    return Err(ExpressionError::InvalidExpression(format!(
                        "unterminated string literal in `{input}`"
                    )));
                }
                i += 1;
                tokens.push(Token::Str(s));
            }
            '=' | '!' | '<' | '>' | '&' | '|' => {
                let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
                match two.as_str() {
                    "==" | "!=" | "<=" | ">=" | "&&" | "||" => {
                        tokens.push(Token::Op(match two.as_str() {
                            "==" => "==",
                            "!=" => "!=",
                            "<=" => "<=",
                            ">=" => ">=",
                            "&&" => "&&",
                            "||" => "||",
                            _ => unreachable!(),
                        }));
                        i += 2;
                    }
                    _ => {
                        tokens.push(Token::Op(match c {
                            '<' => "<",
                            '>' => ">",
                            '!' => "!",
                            _ => {
                                return Err(ExpressionError::InvalidExpression(format!(
                                    "unexpected character '{c}' in `{input}`"
                                )))
                            }
                        }));
                        i += 1;
                    }
                }
            }
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => unreachable!(),
                }));
                i += 1;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text
                    .parse()
                    .map_err(|_| ExpressionError::InvalidExpression(format!("bad number `{text}`")))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => {
                return Err(ExpressionError::InvalidExpression(format!(
                    "unexpected character '{c}' in `{input}`"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn expect_op(&mut self, op: &str) -> Result<(), ExpressionError> {
        match self.bump() {
            Some(Token::Op(o)) if o == op => Ok(()),
            other => Err(ExpressionError::InvalidExpression(format!(
                "expected `{op}`, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        self.parse_or(scope)
    }

    fn parse_or(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let mut left = self.parse_and(scope)?;
        while matches!(self.peek(), Some(Token::Op("||"))) {
            self.bump();
            let right = self.parse_and(scope)?;
            left = EvalValue::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let mut left = self.parse_not(scope)?;
        while matches!(self.peek(), Some(Token::Op("&&"))) {
            self.bump();
            let right = self.parse_not(scope)?;
            left = EvalValue::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        if matches!(self.peek(), Some(Token::Op("!"))) {
            self.bump();
            let value = self.parse_not(scope)?;
            return Ok(EvalValue::Bool(!value.truthy()));
        }
        self.parse_cmp(scope)
    }

    fn parse_cmp(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let left = self.parse_additive(scope)?;
        let op = match self.peek() {
            Some(Token::Op(o @ ("==" | "!=" | "<" | "<=" | ">" | ">="))) => Some(*o),
            Some(Token::Ident(word))
                if matches!(word.as_str(), "in" | "matches" | "contains" | "startsWith" | "endsWith") =>
            {
                Some(match word.as_str() {
                    "in" => "in",
                    "matches" => "matches",
                    "contains" => "contains",
                    "startsWith" => "startsWith",
                    "endsWith" => "endsWith",
                    _ => unreachable!(),
                })
            }
            _ => None,
        };
        let Some(op) = op else { return Ok(left) };
        self.bump();
        let right = self.parse_additive(scope)?;
        Ok(EvalValue::Bool(apply_cmp(op, &left, &right)?))
    }

    fn parse_additive(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let mut left = self.parse_term(scope)?;
        loop {
            match self.peek() {
                Some(Token::Op(op @ ("+" | "-"))) => {
                    let op = *op;
                    self.bump();
                    let right = self.parse_term(scope)?;
                    left = arithmetic(op, &left, &right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_term(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let mut left = self.parse_unary(scope)?;
        loop {
            match self.peek() {
                Some(Token::Op(op @ ("*" | "/"))) => {
                    let op = *op;
                    self.bump();
                    let right = self.parse_unary(scope)?;
                    left = arithmetic(op, &left, &right)?;
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn parse_unary(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        if matches!(self.peek(), Some(Token::Op("-"))) {
            self.bump();
            let value = self.parse_unary(scope)?;
            let n = value
                .as_f64()
                .ok_or_else(|| ExpressionError::InvalidExpression("unary `-` on non-number".into()))?;
            return Ok(EvalValue::Number(-n));
        }
        self.parse_postfix(scope)
    }

    fn parse_postfix(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        let mut value = self.parse_primary(scope)?;
        loop {
            match self.peek() {
                Some(Token::Ident(word)) if word == "exists" => {
                    self.bump();
                    value = EvalValue::Bool(!matches!(value, EvalValue::Undefined));
                }
                Some(Token::Ident(word)) if word == "empty" => {
                    self.bump();
                    value = EvalValue::Bool(is_empty(&value));
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn parse_primary(&mut self, scope: &EvalScope) -> Result<EvalValue, ExpressionError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(EvalValue::Number(n)),
            Some(Token::Str(s)) => Ok(EvalValue::String(s)),
            Some(Token::LParen) => {
                let value = self.parse_expr(scope)?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    other => Err(ExpressionError::InvalidExpression(format!(
                        "expected `)`, found {other:?}"
                    ))),
                }
            }
            Some(Token::Ident(name)) if name == "true" => Ok(EvalValue::Bool(true)),
            Some(Token::Ident(name)) if name == "false" => Ok(EvalValue::Bool(false)),
            Some(Token::Ident(first)) => {
                let mut path = vec![first];
                while matches!(self.peek(), Some(Token::Dot)) {
                    self.bump();
                    match self.bump() {
                        Some(Token::Ident(segment)) => path.push(segment),
                        other => {
                            return Err(ExpressionError::InvalidExpression(format!(
                                "expected identifier after `.`, found {other:?}"
                            )))
                        }
                    }
                }
                Ok(resolve_path(&path, scope))
            }
            other => Err(ExpressionError::InvalidExpression(format!(
                "unexpected token {other:?}"
            ))),
        }
    }
}

fn resolve_path(path: &[String], scope: &EvalScope) -> EvalValue {
    let Some((root, rest)) = path.split_first() else {
        return EvalValue::Undefined;
    };
    match root.as_str() {
        "state" => match rest.split_first() {
            Some((section, fields)) if section == "data" => match fields.split_first() {
                Some((key, nested)) => scope
                    .state_data
                    .get(key)
                    .map(|v| resolve_json_path(v, nested))
                    .unwrap_or(EvalValue::Undefined),
                None => EvalValue::Undefined,
            },
            Some((section, fields)) if section == "metadata" => match fields.split_first() {
                Some((key, _)) => scope
                    .state_metadata
                    .get(key)
                    .map(|v| EvalValue::String(v.clone()))
                    .unwrap_or(EvalValue::Undefined),
                None => EvalValue::Undefined,
            },
            _ => EvalValue::Undefined,
        },
        "result" | "previousResult" => match rest.split_first() {
            Some((key, nested)) => scope
                .previous_result
                .get(key)
                .map(|v| resolve_json_path(v, nested))
                .unwrap_or(EvalValue::Undefined),
            None => EvalValue::Undefined,
        },
        _ => EvalValue::Undefined,
    }
}

fn resolve_json_path(value: &Value, path: &[String]) -> EvalValue {
    let mut current = value;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return EvalValue::Undefined,
        }
    }
    EvalValue::from_json(current)
}

fn is_empty(value: &EvalValue) -> bool {
    match value {
        EvalValue::Undefined => true,
        EvalValue::String(s) => s.is_empty(),
        EvalValue::Json(Value::Array(a)) => a.is_empty(),
        EvalValue::Json(Value::Object(o)) => o.is_empty(),
        EvalValue::Json(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

fn apply_cmp(op: &str, left: &EvalValue, right: &EvalValue) -> Result<bool, ExpressionError> {
    if matches!(left, EvalValue::Undefined) || matches!(right, EvalValue::Undefined) {
        // §4.5: comparisons with `undefined` yield false.
        return Ok(false);
    }
    match op {
        "==" => Ok(values_equal(left, right)),
        "!=" => Ok(!values_equal(left, right)),
        "<" | "<=" | ">" | ">=" => {
            let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
                return Ok(false);
            };
            Ok(match op {
                "<" => a < b,
                "<=" => a <= b,
                ">" => a > b,
                ">=" => a >= b,
                _ => unreachable!(),
            })
        }
        "in" => {
            let Some(needle) = left.as_str() else { return Ok(false) };
            match right {
                EvalValue::Json(Value::Array(items)) => {
                    Ok(items.iter().any(|v| v.as_str() == Some(needle.as_str())))
                }
                EvalValue::String(haystack) => Ok(haystack.contains(&needle)),
                _ => Ok(false),
            }
        }
        "matches" => {
            let (Some(text), Some(pattern)) = (left.as_str(), right.as_str()) else {
                return Ok(false);
            };
            let re = Regex::new(&pattern)
                .map_err(|e| ExpressionError::InvalidExpression(format!("bad regex `{pattern}`: {e}")))?;
            Ok(re.is_match(&text))
        }
        "contains" => {
            let (Some(haystack), Some(needle)) = (left.as_str(), right.as_str()) else {
                return Ok(false);
            };
            Ok(haystack.contains(&needle))
        }
        "startsWith" => {
            let (Some(haystack), Some(needle)) = (left.as_str(), right.as_str()) else {
                return Ok(false);
            };
            Ok(haystack.starts_with(&needle))
        }
        "endsWith" => {
            let (Some(haystack), Some(needle)) = (left.as_str(), right.as_str()) else {
                return Ok(false);
            };
            Ok(haystack.ends_with(&needle))
        }
        _ => Ok(false),
    }
}

fn values_equal(left: &EvalValue, right: &EvalValue) -> bool {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (left.as_str(), right.as_str()) {
        return a == b;
    }
    left == right
}

fn arithmetic(op: &str, left: &EvalValue, right: &EvalValue) -> Result<EvalValue, ExpressionError> {
    let a = left
        .as_f64()
        .ok_or_else(|| ExpressionError::InvalidExpression(format!("`{left}` is not a number")))?;
    let b = right
        .as_f64()
        .ok_or_else(|| ExpressionError::InvalidExpression(format!("`{right}` is not a number")))?;
    Ok(EvalValue::Number(match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" => a / b,
        _ => unreachable!(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope_with(key: &str, value: Value) -> EvalScope {
        let mut state_data = FxHashMap::default();
        state_data.insert(key.to_string(), value);
        EvalScope {
            state_data,
            ..Default::default()
        }
    }

    #[test]
    fn comparison_against_literal() {
        let scope = scope_with("x", Value::from(5));
        assert!(ExpressionEvaluator::evaluate("state.data.x > 0", &scope).unwrap());
        assert!(!ExpressionEvaluator::evaluate("state.data.x < 0", &scope).unwrap());
    }

    #[test]
    fn undefined_identifier_is_falsy_in_comparisons() {
        let scope = EvalScope::default();
        assert!(!ExpressionEvaluator::evaluate("state.data.missing > 0", &scope).unwrap());
        assert!(!ExpressionEvaluator::evaluate("state.data.missing exists", &scope).unwrap());
    }

    #[test]
    fn logical_and_or_not() {
        let scope = scope_with("x", Value::from(1));
        assert!(ExpressionEvaluator::evaluate("state.data.x == 1 && !(state.data.x == 2)", &scope).unwrap());
    }

    #[test]
    fn regex_match_operator() {
        let scope = scope_with("name", Value::from("order-42"));
        assert!(ExpressionEvaluator::evaluate(r#"state.data.name matches "^order-\d+$""#, &scope).unwrap());
    }

    #[test]
    fn string_predicates() {
        let scope = scope_with("name", Value::from("hello world"));
        assert!(ExpressionEvaluator::evaluate(r#"state.data.name contains "world""#, &scope).unwrap());
        assert!(ExpressionEvaluator::evaluate(r#"state.data.name startsWith "hello""#, &scope).unwrap());
        assert!(ExpressionEvaluator::evaluate(r#"state.data.name endsWith "world""#, &scope).unwrap());
    }

    #[test]
    fn invalid_expression_is_an_error_but_evaluate_or_false_swallows_it() {
        let scope = EvalScope::default();
        assert!(ExpressionEvaluator::evaluate("state.data.x ===", &scope).is_err());
        assert!(!ExpressionEvaluator::evaluate_or_false("state.data.x ===", &scope));
    }

    #[test]
    fn arithmetic_precedence() {
        let scope = scope_with("x", Value::from(2));
        assert!(ExpressionEvaluator::evaluate("state.data.x * 2 + 1 == 5", &scope).unwrap());
    }
}
