//! Condition mini-language.
//!
//! ```text
//! or      := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | "(" or ")" | cmp
//! cmp     := operand (op operand)?
//! op      := "==" | "!=" | ">" | ">=" | "<" | "<=" | "contains"
//! operand := path | string | number | "true" | "false" | "null"
//! path    := "$" ("." ident | "[" index "]" | "[" string "]")*
//! ```
//!
//! `$` is bound by the caller: a source payload for `result` conditions, the
//! run's `{ "state", "results" }` view for `custom` ones.

use serde_json::Value;

use crate::error::ValidationError;
use crate::types::{Condition, ConditionKind, ExecutionContext};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(Operand, CompareOp, Operand),
    Truthy(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Path(Vec<PathSegment>),
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Op(CompareOp),
    Path(Vec<PathSegment>),
    Literal(Value),
}

/// Outcome of evaluating a [`Condition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub met: bool,
    /// Human-readable explanation, used as the skip reason.
    pub reason: String,
}

/// Evaluate `condition` against the results and state recorded in `ctx`.
pub fn evaluate_condition(
    condition: &Condition,
    ctx: &ExecutionContext,
) -> Result<ConditionOutcome, ValidationError> {
    let source = &condition.source_id;
    let expression = condition.expression.trim();

    let met = match condition.kind {
        ConditionKind::Error => ctx.result(source).is_some_and(|result| !result.success),
        ConditionKind::Result => match ctx.result(source) {
            None => false,
            Some(result) if expression.is_empty() => result.success,
            Some(result) => evaluate(expression, &result.payload)?,
        },
        ConditionKind::Custom => {
            if expression.is_empty() {
                return Err(invalid(expression, "custom conditions need an expression"));
            }
            evaluate(expression, &ctx.condition_scope())?
        }
    };

    let reason = match (condition.kind, ctx.result(source)) {
        (ConditionKind::Custom, _) => format!("custom condition `{expression}` is {met}"),
        (_, None) => format!("source '{source}' has no result"),
        (ConditionKind::Error, Some(_)) if met => format!("'{source}' failed"),
        (ConditionKind::Error, Some(_)) => format!("'{source}' did not fail"),
        (ConditionKind::Result, Some(_)) if expression.is_empty() => {
            format!("'{source}' succeeded: {met}")
        }
        (ConditionKind::Result, Some(_)) => format!("`{expression}` on '{source}' is {met}"),
    };

    Ok(ConditionOutcome { met, reason })
}

/// Parse and evaluate `expression` with `$` bound to `root`.
pub fn evaluate(expression: &str, root: &Value) -> Result<bool, ValidationError> {
    Ok(parse(expression)?.eval(root))
}

/// Parse an expression without evaluating it.
pub fn parse(expression: &str) -> Result<Expr, ValidationError> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        source: expression,
    };
    let expr = parser.or()?;
    if parser.pos != tokens.len() {
        return Err(invalid(expression, "unexpected trailing input"));
    }
    Ok(expr)
}

impl Expr {
    pub fn eval(&self, root: &Value) -> bool {
        match self {
            Self::Or(lhs, rhs) => lhs.eval(root) || rhs.eval(root),
            Self::And(lhs, rhs) => lhs.eval(root) && rhs.eval(root),
            Self::Not(inner) => !inner.eval(root),
            Self::Compare(lhs, op, rhs) => compare(&lhs.resolve(root), *op, &rhs.resolve(root)),
            Self::Truthy(operand) => truthy(&operand.resolve(root)),
        }
    }
}

impl Operand {
    fn resolve(&self, root: &Value) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Path(segments) => {
                let mut current = root;
                for segment in segments {
                    let next = match segment {
                        PathSegment::Key(key) => current.get(key.as_str()),
                        PathSegment::Index(idx) => current.get(*idx),
                    };
                    match next {
                        Some(value) => current = value,
                        None => return Value::Null,
                    }
                }
                current.clone()
            }
        }
    }
}

fn compare(lhs: &Value, op: CompareOp, rhs: &Value) -> bool {
    match op {
        CompareOp::Eq => loosely_equal(lhs, rhs),
        CompareOp::Ne => !loosely_equal(lhs, rhs),
        CompareOp::Contains => match (lhs, rhs) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|item| loosely_equal(item, needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            _ => false,
        },
        CompareOp::Gt | CompareOp::Ge | CompareOp::Lt | CompareOp::Le => {
            let ordering = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => a
                    .as_f64()
                    .zip(b.as_f64())
                    .and_then(|(a, b)| a.partial_cmp(&b)),
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CompareOp::Gt => ordering.is_gt(),
                CompareOp::Ge => ordering.is_ge(),
                CompareOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
    }
}

/// JSON equality, except that numbers compare by value (`1 == 1.0`).
fn loosely_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn invalid(expression: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::InvalidCondition {
        expression: expression.to_string(),
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ValidationError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '>' | '<' => {
                let inclusive = next == Some('=');
                tokens.push(Token::Op(match (c, inclusive) {
                    ('>', true) => CompareOp::Ge,
                    ('>', false) => CompareOp::Gt,
                    ('<', true) => CompareOp::Le,
                    _ => CompareOp::Lt,
                }));
                i += if inclusive { 2 } else { 1 };
            }
            '"' | '\'' => {
                let (value, end) = read_string(&chars, i, source)?;
                tokens.push(Token::Literal(Value::String(value)));
                i = end;
            }
            '$' => {
                let (segments, end) = read_path(&chars, i + 1, source)?;
                tokens.push(Token::Path(segments));
                i = end;
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || matches!(chars[i], '.' | 'e' | 'E')) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number: Value = serde_json::from_str(&text)
                    .map_err(|_| invalid(source, format!("invalid number '{text}'")))?;
                tokens.push(Token::Literal(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    "contains" => Token::Op(CompareOp::Contains),
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => return Err(invalid(source, format!("unknown word '{word}'"))),
                });
            }
            other => return Err(invalid(source, format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize, source: &str) -> Result<(String, usize), ValidationError> {
    let quote = chars[start];
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                value.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((value, i + 1)),
            c => {
                value.push(c);
                i += 1;
            }
        }
    }
    Err(invalid(source, "unterminated string"))
}

fn read_path(chars: &[char], mut i: usize, source: &str) -> Result<(Vec<PathSegment>, usize), ValidationError> {
    let mut segments = Vec::new();
    loop {
        match chars.get(i) {
            Some('.') => {
                let start = i + 1;
                i = start;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-') {
                    i += 1;
                }
                if i == start {
                    return Err(invalid(source, "expected a field name after '.'"));
                }
                segments.push(PathSegment::Key(chars[start..i].iter().collect()));
            }
            Some('[') => match chars.get(i + 1) {
                Some('"') | Some('\'') => {
                    let (key, end) = read_string(chars, i + 1, source)?;
                    if chars.get(end) != Some(&']') {
                        return Err(invalid(source, "expected ']'"));
                    }
                    segments.push(PathSegment::Key(key));
                    i = end + 1;
                }
                _ => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && chars[end].is_ascii_digit() {
                        end += 1;
                    }
                    if end == start || chars.get(end) != Some(&']') {
                        return Err(invalid(source, "expected an index like [0]"));
                    }
                    let text: String = chars[start..end].iter().collect();
                    let index = text
                        .parse()
                        .map_err(|_| invalid(source, format!("index '{text}' out of range")))?;
                    segments.push(PathSegment::Index(index));
                    i = end + 1;
                }
            },
            _ => return Ok((segments, i)),
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn or(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            lhs = Expr::Or(Box::new(lhs), Box::new(self.and()?));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ValidationError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ValidationError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.unary()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.or()?;
                if self.advance() != Some(&Token::RParen) {
                    return Err(invalid(self.source, "expected ')'"));
                }
                Ok(inner)
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Expr, ValidationError> {
        let lhs = self.operand()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.operand()?;
            return Ok(Expr::Compare(lhs, op, rhs));
        }
        Ok(Expr::Truthy(lhs))
    }

    fn operand(&mut self) -> Result<Operand, ValidationError> {
        match self.advance() {
            Some(Token::Path(segments)) => Ok(Operand::Path(segments.clone())),
            Some(Token::Literal(value)) => Ok(Operand::Literal(value.clone())),
            Some(other) => Err(invalid(self.source, format!("unexpected token {other:?}"))),
            None => Err(invalid(self.source, "unexpected end of expression")),
        }
    }
}
