//! Restricted expression interpreter for computed parameters.
//!
//! Grammar, loosest binding first:
//!
//! ```text
//! or      := and ('or' and)*
//! and     := not ('and' not)*
//! not     := 'not' not | cmp
//! cmp     := sum (('==' | '!=' | '<' | '<=' | '>' | '>=') sum)?
//! sum     := product (('+' | '-') product)*
//! product := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | primary
//! primary := INT | FLOAT | STRING | true | false | null
//!          | IDENT | IDENT '(' args ')' | '(' or ')'
//! ```
//!
//! Identifiers resolve from the binding map. Only the functions listed in
//! [`call`] exist; the only host access is environment reads and the clock.

use crate::value::{Map, Value};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, TimeDelta};
use std::cmp::Ordering;

/// Default output format of `today()` and `date_add()`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Default output format of `now()`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Evaluate an expression against bindings.
pub fn eval(source: &str, bindings: &Map) -> Result<Value, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(ExprError::Parse {
            pos: tok.pos,
            message: format!("unexpected {}", tok.kind),
        });
    }
    expr.eval(bindings)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenKind::Int(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::Str(s) => write!(f, "{:?}", s),
            TokenKind::Ident(s) => write!(f, "'{}'", s),
            TokenKind::Op(op) => write!(f, "'{}'", op),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::Comma => f.write_str("','"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

const OPERATORS: [&str; 13] = [
    "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "=", "!",
];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let kind = match c {
            '(' => {
                i += 1;
                TokenKind::LParen
            }
            ')' => {
                i += 1;
                TokenKind::RParen
            }
            ',' => {
                i += 1;
                TokenKind::Comma
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(ExprError::Parse {
                                pos: start,
                                message: "unterminated string".into(),
                            });
                        }
                        Some('\\') => {
                            let escaped = chars.get(i + 1).copied().unwrap_or('\\');
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                TokenKind::Str(s)
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let is_float = chars.get(i) == Some(&'.')
                    && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit());
                if is_float {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                if is_float {
                    TokenKind::Float(text.parse().map_err(|_| ExprError::Parse {
                        pos: start,
                        message: format!("invalid number {}", text),
                    })?)
                } else {
                    TokenKind::Int(text.parse().map_err(|_| ExprError::Parse {
                        pos: start,
                        message: format!("integer out of range {}", text),
                    })?)
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                TokenKind::Ident(chars[start..i].iter().collect())
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| ExprError::Parse {
                        pos: start,
                        message: format!("unexpected character '{}'", c),
                    })?;
                i += op.chars().count();
                match *op {
                    "=" => TokenKind::Op("=="),
                    "!" => TokenKind::Op("not"),
                    other => TokenKind::Op(other),
                }
            }
        };
        tokens.push(Token { kind, pos: start });
    }
    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn end_pos(&self) -> usize {
        self.tokens.last().map(|t| t.pos + 1).unwrap_or(0)
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(w), .. }) if w == word)
    }

    fn at_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Op(op),
                ..
            }) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_not()?;
        while self.at_keyword("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if self.at_keyword("not") || self.at_op(&["not"]).is_some() {
            self.pos += 1;
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Expr, ExprError> {
        let left = self.parse_sum()?;
        if let Some(op) = self.at_op(&["==", "!=", "<", "<=", ">", ">="]) {
            self.pos += 1;
            let right = self.parse_sum()?;
            return Ok(Expr::Binary(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_sum(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_product()?;
        while let Some(op) = self.at_op(&["+", "-"]) {
            self.pos += 1;
            let right = self.parse_product()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.at_op(&["*", "/", "%"]) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        if self.at_op(&["-"]).is_some() {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        let end = self.end_pos();
        let tok = self.next().ok_or(ExprError::Parse {
            pos: end,
            message: "unexpected end of expression".into(),
        })?;
        match tok.kind {
            TokenKind::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            TokenKind::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::String(s))),
            TokenKind::LParen => {
                let inner = self.parse_or()?;
                self.expect_rparen()?;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "None" => Ok(Expr::Literal(Value::Null)),
                _ if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) => {
                    self.pos += 1;
                    let args = self.parse_args()?;
                    Ok(Expr::Call(name, args))
                }
                _ => Ok(Expr::Name(name)),
            },
            other => Err(ExprError::Parse {
                pos: tok.pos,
                message: format!("unexpected {}", other),
            }),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, ExprError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Some(Token { kind: TokenKind::RParen, .. })) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.parse_or()?);
            match self.next() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => return Ok(args),
                Some(tok) => {
                    return Err(ExprError::Parse {
                        pos: tok.pos,
                        message: format!("expected ',' or ')', found {}", tok.kind),
                    });
                }
                None => {
                    return Err(ExprError::Parse {
                        pos: self.end_pos(),
                        message: "unclosed argument list".into(),
                    });
                }
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<(), ExprError> {
        match self.next() {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Ok(()),
            Some(tok) => Err(ExprError::Parse {
                pos: tok.pos,
                message: format!("expected ')', found {}", tok.kind),
            }),
            None => Err(ExprError::Parse {
                pos: self.end_pos(),
                message: "expected ')'".into(),
            }),
        }
    }
}

impl Expr {
    fn eval(&self, bindings: &Map) -> Result<Value, ExprError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Name(name) => lookup(bindings, name).ok_or_else(|| ExprError::UnknownName(name.clone())),
            Expr::Call(name, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(bindings))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &values)
            }
            Expr::Neg(inner) => match inner.eval(bindings)? {
                Value::Int(n) => n
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| ExprError::Type(format!("integer overflow in -({})", n))),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(ExprError::Type(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(bindings)?.is_truthy())),
            Expr::And(l, r) => {
                let left = l.eval(bindings)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                r.eval(bindings)
            }
            Expr::Or(l, r) => {
                let left = l.eval(bindings)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                r.eval(bindings)
            }
            Expr::Binary(op, l, r) => binary(op, l.eval(bindings)?, r.eval(bindings)?),
        }
    }
}

fn lookup(bindings: &Map, name: &str) -> Option<Value> {
    if let Some(v) = bindings.get(name) {
        return Some(v.clone());
    }
    let mut parts = name.split('.');
    let mut current = bindings.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

fn binary(op: &str, left: Value, right: Value) -> Result<Value, ExprError> {
    match op {
        "==" => Ok(Value::Bool(left.loose_eq(&right))),
        "!=" => Ok(Value::Bool(!left.loose_eq(&right))),
        "<" | "<=" | ">" | ">=" => {
            let ord = order(&left, &right)?;
            Ok(Value::Bool(match op {
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        "+" => match (left, right) {
            (Value::String(a), b) => Ok(Value::String(a + &b.to_text())),
            (a, Value::String(b)) => Ok(Value::String(a.to_text() + &b)),
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (a, b) => arithmetic(op, a, b),
        },
        _ => arithmetic(op, left, right),
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    match (left, right) {
        (a, b) if a.is_number() && b.is_number() => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .ok_or_else(|| ExprError::Type("cannot compare NaN".into())),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (a, b) => Err(ExprError::Type(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn arithmetic(op: &str, left: Value, right: Value) -> Result<Value, ExprError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                "+" => a.checked_add(b),
                "-" => a.checked_sub(b),
                "*" => a.checked_mul(b),
                "/" => {
                    if b == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    match a.checked_rem(b) {
                        Some(0) => a.checked_div(b),
                        Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                        None => None,
                    }
                }
                "%" => {
                    if b == 0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    a.checked_rem_euclid(b)
                }
                _ => None,
            };
            result
                .map(Value::Int)
                .ok_or_else(|| ExprError::Type(format!("integer overflow in {} {} {}", a, op, b)))
        }
        (a, b) if a.is_number() && b.is_number() => {
            let (x, y) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            match op {
                "+" => Ok(Value::Float(x + y)),
                "-" => Ok(Value::Float(x - y)),
                "*" => Ok(Value::Float(x * y)),
                "/" if y == 0.0 => Err(ExprError::DivisionByZero),
                "/" => Ok(Value::Float(x / y)),
                "%" if y == 0.0 => Err(ExprError::DivisionByZero),
                "%" => Ok(Value::Float(x.rem_euclid(y))),
                _ => Err(ExprError::Type(format!("unknown operator {}", op))),
            }
        }
        (a, b) => Err(ExprError::Type(format!(
            "unsupported operands for {}: {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), ExprError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else {
            format!("{}..{}", min, max)
        };
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            found: args.len(),
        });
    }
    Ok(())
}

fn format_arg(args: &[Value], idx: usize, default: &str) -> String {
    args.get(idx)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn format_time(time: &DateTime<Local>, fmt: &str) -> Result<Value, ExprError> {
    let items: Vec<Item<'_>> = StrftimeItems::new(fmt).collect();
    if items.iter().any(|i| matches!(i, Item::Error)) {
        return Err(ExprError::Type(format!("invalid date format '{}'", fmt)));
    }
    Ok(Value::String(time.format_with_items(items.into_iter()).to_string()))
}

fn number(name: &str, v: &Value) -> Result<f64, ExprError> {
    match v {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ExprError::Type(format!("{}: '{}' is not a number", name, s))),
        other => other
            .as_f64()
            .ok_or_else(|| ExprError::Type(format!("{}: expected number, got {}", name, other.type_name()))),
    }
}

/// Call an allow-listed function.
fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match name {
        "env" => {
            arity(name, args, 1, 2)?;
            let var = args[0].to_text();
            Ok(match std::env::var(&var) {
                Ok(v) => Value::String(v),
                Err(_) => args.get(1).cloned().unwrap_or(Value::Null),
            })
        }
        "upper" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(args[0].to_text().to_uppercase()))
        }
        "lower" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(args[0].to_text().to_lowercase()))
        }
        "trim" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(args[0].to_text().trim().to_string()))
        }
        "len" => {
            arity(name, args, 1, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => return Err(ExprError::Type(format!("len of {}", other.type_name()))),
            };
            Ok(Value::from(n))
        }
        "str" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(args[0].to_text()))
        }
        "int" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => Ok(Value::Int(*n)),
                Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
                other => match other.as_str().map(|s| s.trim().parse::<i64>()) {
                    Some(Ok(n)) => Ok(Value::Int(n)),
                    _ => Ok(Value::Int(number(name, other)?.trunc() as i64)),
                },
            }
        }
        "float" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Float(number(name, &args[0])?))
        }
        "round" => {
            arity(name, args, 1, 2)?;
            let x = number(name, &args[0])?;
            match args.get(1) {
                None => Ok(Value::Int(x.round() as i64)),
                Some(d) => {
                    let digits = d
                        .as_i64()
                        .ok_or_else(|| ExprError::Type("round: digits must be an integer".into()))?;
                    let factor = 10f64.powi(digits as i32);
                    Ok(Value::Float((x * factor).round() / factor))
                }
            }
        }
        "abs" => {
            arity(name, args, 1, 1)?;
            match &args[0] {
                Value::Int(n) => n
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| ExprError::Type(format!("integer overflow in abs({})", n))),
                other => Ok(Value::Float(number(name, other)?.abs())),
            }
        }
        "min" | "max" => {
            let items: Vec<Value> = match args {
                [Value::Array(items)] => items.clone(),
                _ => args.to_vec(),
            };
            if items.is_empty() {
                return Err(ExprError::Arity {
                    name: name.to_string(),
                    expected: "1..".into(),
                    found: 0,
                });
            }
            let mut best = items[0].clone();
            for item in &items[1..] {
                let ord = order(item, &best)?;
                let better = if name == "min" {
                    ord == Ordering::Less
                } else {
                    ord == Ordering::Greater
                };
                if better {
                    best = item.clone();
                }
            }
            Ok(best)
        }
        "concat" => Ok(Value::String(args.iter().map(Value::to_text).collect())),
        "replace" => {
            arity(name, args, 3, 3)?;
            Ok(Value::String(
                args[0].to_text().replace(&args[1].to_text(), &args[2].to_text()),
            ))
        }
        "coalesce" => Ok(args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        "today" => {
            arity(name, args, 0, 1)?;
            let fmt = format_arg(args, 0, DATE_FORMAT);
            format_time(&Local::now(), &fmt)
        }
        "now" => {
            arity(name, args, 0, 1)?;
            let fmt = format_arg(args, 0, DATETIME_FORMAT);
            format_time(&Local::now(), &fmt)
        }
        "date_add" => {
            arity(name, args, 1, 2)?;
            let days = args[0]
                .as_i64()
                .ok_or_else(|| ExprError::Type("date_add: days must be an integer".into()))?;
            let fmt = format_arg(args, 1, DATE_FORMAT);
            let date = TimeDelta::try_days(days)
                .and_then(|delta| Local::now().checked_add_signed(delta))
                .ok_or_else(|| ExprError::Type(format!("date_add: {} days out of range", days)))?;
            format_time(&date, &fmt)
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("syntax error at {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unknown name: {0}")]
    UnknownName(String),

    #[error("unknown function: {0}")]
    UnknownFunction(String),

    #[error("{name}() takes {expected} arguments, got {found}")]
    Arity {
        name: String,
        expected: String,
        found: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapExt;

    fn ev(src: &str) -> Value {
        eval(src, &Map::new()).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(ev("1 + 2 * 3"), Value::Int(7));
        assert_eq!(ev("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(ev("-2 * 3 + 10 % 4"), Value::Int(-4));
        assert_eq!(ev("7 / 2"), Value::Float(3.5));
        assert_eq!(ev("8 / 2"), Value::Int(4));
        assert_eq!(ev("1.5 + 1"), Value::Float(2.5));
    }

    #[test]
    fn test_strings_and_logic() {
        assert_eq!(ev("'a' + \"b\" + 1"), Value::from("ab1"));
        assert_eq!(ev("1 < 2 and 'x' == 'x'"), Value::Bool(true));
        assert_eq!(ev("not 1 > 2"), Value::Bool(true));
        assert_eq!(ev("null or 'fallback'"), Value::from("fallback"));
    }

    #[test]
    fn test_bindings() {
        let bindings = Map::new()
            .with("limit", 10i64)
            .with("customer", Map::new().with("name", "Ada"));
        assert_eq!(eval("limit * 2", &bindings).unwrap(), Value::Int(20));
        assert_eq!(eval("upper(customer.name)", &bindings).unwrap(), Value::from("ADA"));
        assert_eq!(
            eval("missing + 1", &bindings),
            Err(ExprError::UnknownName("missing".into()))
        );
    }

    #[test]
    fn test_functions() {
        assert_eq!(ev("concat('a', 1, true)"), Value::from("a1true"));
        assert_eq!(ev("coalesce(null, 3)"), Value::Int(3));
        assert_eq!(ev("round(2.346, 2)"), Value::Float(2.35));
        assert_eq!(ev("max(3, 9, 4)"), Value::Int(9));
        assert_eq!(ev("int('42') + len('abc')"), Value::Int(45));
        assert_eq!(ev("replace('a-b-c', '-', '')"), Value::from("abc"));
        assert_eq!(ev("env('METL_EXPR_SURELY_UNSET', 'dflt')"), Value::from("dflt"));
    }

    #[test]
    fn test_dates() {
        let today = Local::now().format(DATE_FORMAT).to_string();
        assert_eq!(ev("today()"), Value::String(today.clone()));
        assert_eq!(ev("date_add(0)"), Value::String(today));
        let year = Local::now().format("%Y").to_string();
        assert_eq!(ev("today('%Y')"), Value::String(year));
    }

    #[test]
    fn test_rejects_host_access() {
        assert_eq!(
            eval("__import__('os')", &Map::new()),
            Err(ExprError::UnknownFunction("__import__".into()))
        );
        assert!(matches!(eval("1 +", &Map::new()), Err(ExprError::Parse { .. })));
        assert!(matches!(eval("a; b", &Map::new()), Err(ExprError::Parse { pos: 1, .. })));
        assert_eq!(eval("1 / 0", &Map::new()), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn test_integer_overflow_is_an_error() {
        let min = "(-9223372036854775807 - 1)";
        for src in [
            format!("{} / -1", min),
            format!("{} % -1", min),
            format!("-{}", min),
            format!("abs({})", min),
            "9223372036854775807 + 1".to_string(),
            "9223372036854775807 * 2".to_string(),
        ] {
            assert!(
                matches!(eval(&src, &Map::new()), Err(ExprError::Type(_))),
                "{} should overflow",
                src
            );
        }
        assert_eq!(ev(&format!("{} / 1", min)), Value::Int(i64::MIN));
        assert_eq!(ev(&format!("{} % 7", min)), Value::Int(i64::MIN.rem_euclid(7)));
        assert_eq!(ev("-7 % 3"), Value::Int(2));
        assert_eq!(ev("abs(-5)"), Value::Int(5));
    }
}
