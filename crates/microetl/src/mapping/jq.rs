//! A small jq subset.
//!
//! Supported: `.`, `.field`, `."quoted"`, `.[n]`, `.["key"]`, `.[]`, `|`,
//! `,`, `//`, `or`, `and`, `==`, `!=`, `<`, `<=`, `>`, `>=`, `+`, object
//! and array construction, literals, `if c then a else b end`, and the
//! builtins `select`, `map`, `length`, `keys`, `tostring`, `not` and
//! `empty`.
//!
//! Binding, loosest first: `|`, `,`, `//`, `or`, `and`, comparisons, `+`.
//! Ordering follows jq: null < false < true < numbers < strings < arrays
//! < objects.
//!
//! Filters produce streams: [`run`] returns every output in order.

use crate::value::{Map, Value};
use std::cmp::Ordering;

/// A compiled jq filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Identity,
    Literal(Value),
    Field(Box<Filter>, String),
    Index(Box<Filter>, Box<Filter>),
    Iterate(Box<Filter>),
    Pipe(Box<Filter>, Box<Filter>),
    Comma(Box<Filter>, Box<Filter>),
    Alternative(Box<Filter>, Box<Filter>),
    Compare(Box<Filter>, Box<Filter>, Comparison),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Add(Box<Filter>, Box<Filter>),
    Object(Vec<(ObjectKey, Filter)>),
    Array(Option<Box<Filter>>),
    If(Box<Filter>, Box<Filter>, Box<Filter>),
    Call(Builtin, Option<Box<Filter>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, l: &Value, r: &Value) -> bool {
        match self {
            Comparison::Eq => l.loose_eq(r),
            Comparison::Ne => !l.loose_eq(r),
            Comparison::Lt => order(l, r) == Ordering::Less,
            Comparison::Le => order(l, r) != Ordering::Greater,
            Comparison::Gt => order(l, r) == Ordering::Greater,
            Comparison::Ge => order(l, r) != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Name(String),
    Computed(Filter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Select,
    Map,
    Length,
    Keys,
    ToString,
    Not,
    Empty,
}

impl Builtin {
    fn lookup(name: &str) -> Option<(Self, bool)> {
        Some(match name {
            "select" => (Builtin::Select, true),
            "map" => (Builtin::Map, true),
            "length" => (Builtin::Length, false),
            "keys" => (Builtin::Keys, false),
            "tostring" => (Builtin::ToString, false),
            "not" => (Builtin::Not, false),
            "empty" => (Builtin::Empty, false),
            _ => return None,
        })
    }
}

/// Errors compiling or running a filter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum JqError {
    #[error("jq syntax error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("jq error: {0}")]
    Runtime(String),
}

impl Filter {
    /// Compile filter text.
    pub fn parse(source: &str) -> Result<Self, JqError> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let filter = parser.pipe()?;
        if parser.peek() != &Tok::Eof {
            return Err(parser.unexpected("end of filter"));
        }
        Ok(filter)
    }

    /// Run against an input, collecting every output.
    pub fn run(&self, input: &Value) -> Result<Vec<Value>, JqError> {
        let mut out = Vec::new();
        self.eval(input, &mut out)?;
        Ok(out)
    }

    fn eval(&self, input: &Value, out: &mut Vec<Value>) -> Result<(), JqError> {
        match self {
            Filter::Identity => out.push(input.clone()),
            Filter::Literal(v) => out.push(v.clone()),
            Filter::Field(base, name) => {
                for v in base.run(input)? {
                    out.push(index(&v, &Value::String(name.clone()))?);
                }
            }
            Filter::Index(base, idx) => {
                let keys = idx.run(input)?;
                for v in base.run(input)? {
                    for key in &keys {
                        out.push(index(&v, key)?);
                    }
                }
            }
            Filter::Iterate(base) => {
                for v in base.run(input)? {
                    match v {
                        Value::Array(items) => out.extend(items),
                        Value::Object(obj) => out.extend(obj.into_values()),
                        other => {
                            return Err(JqError::Runtime(format!(
                                "cannot iterate over {}",
                                other.type_name()
                            )));
                        }
                    }
                }
            }
            Filter::Pipe(left, right) => {
                for v in left.run(input)? {
                    right.eval(&v, out)?;
                }
            }
            Filter::Comma(left, right) => {
                left.eval(input, out)?;
                right.eval(input, out)?;
            }
            Filter::Alternative(left, right) => {
                let kept: Vec<Value> = left
                    .run(input)
                    .unwrap_or_default()
                    .into_iter()
                    .filter(truthy)
                    .collect();
                if kept.is_empty() {
                    right.eval(input, out)?;
                } else {
                    out.extend(kept);
                }
            }
            Filter::Compare(left, right, op) => {
                let rs = right.run(input)?;
                for l in left.run(input)? {
                    for r in &rs {
                        out.push(Value::Bool(op.holds(&l, r)));
                    }
                }
            }
            Filter::And(left, right) => {
                for l in left.run(input)? {
                    if !truthy(&l) {
                        out.push(Value::Bool(false));
                        continue;
                    }
                    for r in right.run(input)? {
                        out.push(Value::Bool(truthy(&r)));
                    }
                }
            }
            Filter::Or(left, right) => {
                for l in left.run(input)? {
                    if truthy(&l) {
                        out.push(Value::Bool(true));
                        continue;
                    }
                    for r in right.run(input)? {
                        out.push(Value::Bool(truthy(&r)));
                    }
                }
            }
            Filter::Add(left, right) => {
                let rs = right.run(input)?;
                for l in left.run(input)? {
                    for r in &rs {
                        out.push(add(&l, r)?);
                    }
                }
            }
            Filter::Object(entries) => {
                let mut objects = vec![Map::new()];
                for (key, value) in entries {
                    let keys = match key {
                        ObjectKey::Name(name) => vec![name.clone()],
                        ObjectKey::Computed(f) => f
                            .run(input)?
                            .into_iter()
                            .map(|k| match k {
                                Value::String(s) => Ok(s),
                                other => Err(JqError::Runtime(format!(
                                    "object keys must be strings, found {}",
                                    other.type_name()
                                ))),
                            })
                            .collect::<Result<_, _>>()?,
                    };
                    let values = value.run(input)?;
                    let mut next = Vec::with_capacity(objects.len() * keys.len() * values.len());
                    for obj in &objects {
                        for k in &keys {
                            for v in &values {
                                let mut o = obj.clone();
                                o.insert(k.clone(), v.clone());
                                next.push(o);
                            }
                        }
                    }
                    objects = next;
                }
                out.extend(objects.into_iter().map(Value::Object));
            }
            Filter::Array(inner) => {
                let items = match inner {
                    Some(f) => f.run(input)?,
                    None => Vec::new(),
                };
                out.push(Value::Array(items));
            }
            Filter::If(cond, then, otherwise) => {
                for c in cond.run(input)? {
                    if truthy(&c) {
                        then.eval(input, out)?;
                    } else {
                        otherwise.eval(input, out)?;
                    }
                }
            }
            Filter::Call(builtin, arg) => call(*builtin, arg.as_deref(), input, out)?,
        }
        Ok(())
    }
}

/// Compile and run a filter.
pub fn run(source: &str, input: &Value) -> Result<Vec<Value>, JqError> {
    Filter::parse(source)?.run(input)
}

fn truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Int(_) | Value::Float(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// jq's total order over values.
fn order(l: &Value, r: &Value) -> Ordering {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (a, b) if a.is_number() && b.is_number() => {
            a.as_f64().unwrap_or(0.0).total_cmp(&b.as_f64().unwrap_or(0.0))
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a
            .iter()
            .zip(b)
            .map(|(x, y)| order(x, y))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| a.len().cmp(&b.len())),
        (Value::Object(a), Value::Object(b)) => {
            let mut ka: Vec<&String> = a.keys().collect();
            let mut kb: Vec<&String> = b.keys().collect();
            ka.sort();
            kb.sort();
            ka.cmp(&kb).then_with(|| {
                ka.iter()
                    .map(|k| order(&a[k.as_str()], &b[k.as_str()]))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
        }
        (a, b) => rank(a).cmp(&rank(b)),
    }
}

fn index(v: &Value, key: &Value) -> Result<Value, JqError> {
    match (v, key) {
        (Value::Null, _) => Ok(Value::Null),
        (Value::Object(obj), Value::String(k)) => Ok(obj.get(k).cloned().unwrap_or_default()),
        (Value::Array(items), k) if k.as_i64().is_some() => {
            let i = k.as_i64().unwrap_or(0);
            let len = items.len() as i64;
            let pos = if i < 0 { len + i } else { i };
            Ok(usize::try_from(pos)
                .ok()
                .and_then(|p| items.get(p))
                .cloned()
                .unwrap_or_default())
        }
        (v, k) => Err(JqError::Runtime(format!(
            "cannot index {} with {}",
            v.type_name(),
            k
        ))),
    }
}

fn add(l: &Value, r: &Value) -> Result<Value, JqError> {
    Ok(match (l, r) {
        (Value::Null, x) | (x, Value::Null) => x.clone(),
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .unwrap_or(Value::Float(*a as f64 + *b as f64)),
        (a, b) if a.is_number() && b.is_number() => {
            Value::Float(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0))
        }
        (Value::String(a), Value::String(b)) => Value::String(format!("{}{}", a, b)),
        (Value::Array(a), Value::Array(b)) => Value::Array(a.iter().chain(b).cloned().collect()),
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        (a, b) => {
            return Err(JqError::Runtime(format!(
                "{} and {} cannot be added",
                a.type_name(),
                b.type_name()
            )));
        }
    })
}

fn call(
    builtin: Builtin,
    arg: Option<&Filter>,
    input: &Value,
    out: &mut Vec<Value>,
) -> Result<(), JqError> {
    match (builtin, arg) {
        (Builtin::Select, Some(f)) => {
            for c in f.run(input)? {
                if truthy(&c) {
                    out.push(input.clone());
                }
            }
        }
        (Builtin::Map, Some(f)) => {
            let items: Vec<Value> = match input {
                Value::Array(items) => items.clone(),
                Value::Object(obj) => obj.values().cloned().collect(),
                other => {
                    return Err(JqError::Runtime(format!(
                        "cannot iterate over {}",
                        other.type_name()
                    )));
                }
            };
            let mut mapped = Vec::new();
            for item in &items {
                f.eval(item, &mut mapped)?;
            }
            out.push(Value::Array(mapped));
        }
        (Builtin::Length, _) => out.push(match input {
            Value::Null => Value::Int(0),
            Value::Bool(b) => {
                return Err(JqError::Runtime(format!("boolean ({}) has no length", b)));
            }
            Value::Int(n) => Value::Int(n.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            Value::String(s) => Value::from(s.chars().count()),
            Value::Array(a) => Value::from(a.len()),
            Value::Object(o) => Value::from(o.len()),
        }),
        (Builtin::Keys, _) => out.push(match input {
            Value::Object(obj) => {
                let mut keys: Vec<&String> = obj.keys().collect();
                keys.sort();
                Value::Array(keys.into_iter().map(|k| Value::String(k.clone())).collect())
            }
            Value::Array(items) => Value::Array((0..items.len()).map(Value::from).collect()),
            other => {
                return Err(JqError::Runtime(format!("{} has no keys", other.type_name())));
            }
        }),
        (Builtin::ToString, _) => out.push(match input {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }),
        (Builtin::Not, _) => out.push(Value::Bool(!truthy(input))),
        (Builtin::Empty, _) => {}
        (b, None) => {
            return Err(JqError::Runtime(format!("{:?} requires an argument", b)));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Dot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Alt,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Str(String),
    Num(Value),
    Ident(String),
    Eof,
}

fn lex(source: &str) -> Result<Vec<(Tok, usize)>, JqError> {
    let bytes: Vec<(usize, char)> = source.char_indices().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let parse_err = |pos: usize, message: String| JqError::Parse { pos, message };

    while i < bytes.len() {
        let (pos, c) = bytes[i];
        let next = bytes.get(i + 1).map(|(_, c)| *c);
        let tok = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '#' => {
                while i < bytes.len() && bytes[i].1 != '\n' {
                    i += 1;
                }
                continue;
            }
            '.' => Tok::Dot,
            '[' => Tok::LBracket,
            ']' => Tok::RBracket,
            '{' => Tok::LBrace,
            '}' => Tok::RBrace,
            '(' => Tok::LParen,
            ')' => Tok::RParen,
            '|' => Tok::Pipe,
            ',' => Tok::Comma,
            ':' => Tok::Colon,
            '+' => Tok::Plus,
            '/' if next == Some('/') => {
                i += 1;
                Tok::Alt
            }
            '=' if next == Some('=') => {
                i += 1;
                Tok::EqEq
            }
            '!' if next == Some('=') => {
                i += 1;
                Tok::NotEq
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                if or_equal {
                    i += 1;
                }
                match (c, or_equal) {
                    ('<', false) => Tok::Lt,
                    ('<', true) => Tok::Le,
                    (_, false) => Tok::Gt,
                    (_, true) => Tok::Ge,
                }
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    let Some(&(_, ch)) = bytes.get(i) else {
                        return Err(parse_err(pos, "unterminated string".into()));
                    };
                    match ch {
                        '"' => break,
                        '\\' => {
                            i += 1;
                            let Some(&(_, esc)) = bytes.get(i) else {
                                return Err(parse_err(pos, "unterminated string".into()));
                            };
                            s.push(match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => other,
                            });
                        }
                        ch => s.push(ch),
                    }
                    i += 1;
                }
                Tok::Str(s)
            }
            c if c.is_ascii_digit() || (c == '-' && next.is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < bytes.len() && (bytes[i].1.is_ascii_digit() || bytes[i].1 == '.') {
                    i += 1;
                }
                let literal: String = bytes[start..i].iter().map(|(_, c)| *c).collect();
                out.push((
                    Tok::Num(match literal.parse::<i64>() {
                        Ok(n) => Value::Int(n),
                        Err(_) => literal.parse::<f64>().map(Value::Float).map_err(|_| {
                            parse_err(pos, format!("invalid number {}", literal))
                        })?,
                    }),
                    pos,
                ));
                continue;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].1.is_alphanumeric() || bytes[i].1 == '_') {
                    i += 1;
                }
                out.push((Tok::Ident(bytes[start..i].iter().map(|(_, c)| *c).collect()), pos));
                continue;
            }
            other => return Err(parse_err(pos, format!("unexpected character '{}'", other))),
        };
        out.push((tok, pos));
        i += 1;
    }
    out.push((Tok::Eof, source.len()));
    Ok(out)
}

struct Parser {
    tokens: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].0
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].0.clone();
        if tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn unexpected(&self, wanted: &str) -> JqError {
        let (tok, pos) = &self.tokens[self.pos];
        JqError::Parse {
            pos: *pos,
            message: format!("expected {}, found {:?}", wanted, tok),
        }
    }

    fn expect(&mut self, tok: Tok, wanted: &str) -> Result<(), JqError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.unexpected(wanted))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<(), JqError> {
        if self.is_keyword(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn pipe(&mut self) -> Result<Filter, JqError> {
        let mut left = self.comma()?;
        while self.eat(&Tok::Pipe) {
            let right = self.comma()?;
            left = Filter::Pipe(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn comma(&mut self) -> Result<Filter, JqError> {
        let mut left = self.alternative()?;
        while self.eat(&Tok::Comma) {
            let right = self.alternative()?;
            left = Filter::Comma(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn alternative(&mut self) -> Result<Filter, JqError> {
        let left = self.or()?;
        if self.eat(&Tok::Alt) {
            let right = self.alternative()?;
            return Ok(Filter::Alternative(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Filter, JqError> {
        let mut left = self.and()?;
        while self.is_keyword("or") {
            self.advance();
            let right = self.and()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Filter, JqError> {
        let mut left = self.comparison()?;
        while self.is_keyword("and") {
            self.advance();
            let right = self.comparison()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// Comparisons do not chain.
    fn comparison(&mut self) -> Result<Filter, JqError> {
        let left = self.sum()?;
        let op = match self.peek() {
            Tok::EqEq => Comparison::Eq,
            Tok::NotEq => Comparison::Ne,
            Tok::Lt => Comparison::Lt,
            Tok::Le => Comparison::Le,
            Tok::Gt => Comparison::Gt,
            Tok::Ge => Comparison::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.sum()?;
        Ok(Filter::Compare(Box::new(left), Box::new(right), op))
    }

    fn sum(&mut self) -> Result<Filter, JqError> {
        let mut left = self.postfix()?;
        while self.eat(&Tok::Plus) {
            let right = self.postfix()?;
            left = Filter::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn postfix(&mut self) -> Result<Filter, JqError> {
        let mut term = self.primary()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    term = match self.peek().clone() {
                        Tok::Ident(name) | Tok::Str(name) => {
                            self.advance();
                            Filter::Field(Box::new(term), name)
                        }
                        Tok::LBracket => continue,
                        _ => return Err(self.unexpected("a field name")),
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    term = self.bracket(term)?;
                }
                _ => return Ok(term),
            }
        }
    }

    fn bracket(&mut self, base: Filter) -> Result<Filter, JqError> {
        if self.eat(&Tok::RBracket) {
            return Ok(Filter::Iterate(Box::new(base)));
        }
        let idx = self.pipe()?;
        self.expect(Tok::RBracket, "']'")?;
        Ok(Filter::Index(Box::new(base), Box::new(idx)))
    }

    fn primary(&mut self) -> Result<Filter, JqError> {
        match self.peek().clone() {
            Tok::Dot => {
                self.advance();
                match self.peek().clone() {
                    Tok::Ident(name) | Tok::Str(name) => {
                        self.advance();
                        Ok(Filter::Field(Box::new(Filter::Identity), name))
                    }
                    Tok::LBracket => {
                        self.advance();
                        self.bracket(Filter::Identity)
                    }
                    _ => Ok(Filter::Identity),
                }
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Filter::Literal(Value::String(s)))
            }
            Tok::Num(n) => {
                self.advance();
                Ok(Filter::Literal(n))
            }
            Tok::LParen => {
                self.advance();
                let inner = self.pipe()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket => {
                self.advance();
                if self.eat(&Tok::RBracket) {
                    return Ok(Filter::Array(None));
                }
                let inner = self.pipe()?;
                self.expect(Tok::RBracket, "']'")?;
                Ok(Filter::Array(Some(Box::new(inner))))
            }
            Tok::LBrace => {
                self.advance();
                self.object()
            }
            Tok::Ident(word) => self.word(&word),
            _ => Err(self.unexpected("a filter")),
        }
    }

    fn word(&mut self, word: &str) -> Result<Filter, JqError> {
        match word {
            "true" | "false" | "null" => {
                self.advance();
                Ok(Filter::Literal(match word {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::Null,
                }))
            }
            "if" => {
                self.advance();
                self.conditional()
            }
            _ => {
                let Some((builtin, takes_arg)) = Builtin::lookup(word) else {
                    return Err(self.unexpected("a known function"));
                };
                self.advance();
                let arg = if takes_arg {
                    self.expect(Tok::LParen, "'('")?;
                    let inner = self.pipe()?;
                    self.expect(Tok::RParen, "')'")?;
                    Some(Box::new(inner))
                } else {
                    None
                };
                Ok(Filter::Call(builtin, arg))
            }
        }
    }

    /// After `if`: `c then a (elif c then a)* (else b)? end`.
    fn conditional(&mut self) -> Result<Filter, JqError> {
        let cond = self.pipe()?;
        self.expect_keyword("then")?;
        let then = self.pipe()?;
        let otherwise = if self.is_keyword("elif") {
            self.advance();
            return Ok(Filter::If(
                Box::new(cond),
                Box::new(then),
                Box::new(self.conditional()?),
            ));
        } else if self.is_keyword("else") {
            self.advance();
            self.pipe()?
        } else {
            Filter::Identity
        };
        self.expect_keyword("end")?;
        Ok(Filter::If(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn object(&mut self) -> Result<Filter, JqError> {
        let mut entries = Vec::new();
        if self.eat(&Tok::RBrace) {
            return Ok(Filter::Object(entries));
        }
        loop {
            let (key, shorthand) = match self.peek().clone() {
                Tok::Ident(name) | Tok::Str(name) => {
                    self.advance();
                    (ObjectKey::Name(name.clone()), Some(name))
                }
                Tok::LParen => {
                    self.advance();
                    let f = self.pipe()?;
                    self.expect(Tok::RParen, "')'")?;
                    (ObjectKey::Computed(f), None)
                }
                _ => return Err(self.unexpected("an object key")),
            };
            let value = if self.eat(&Tok::Colon) {
                self.alternative()?
            } else {
                match shorthand {
                    Some(name) => Filter::Field(Box::new(Filter::Identity), name),
                    None => return Err(self.unexpected("':'")),
                }
            };
            entries.push((key, value));
            if self.eat(&Tok::RBrace) {
                return Ok(Filter::Object(entries));
            }
            self.expect(Tok::Comma, "',' or '}'")?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json(text: &str) -> Value {
        Value::from(serde_json::from_str::<serde_json::Value>(text).unwrap())
    }

    fn one(filter: &str, input: &Value) -> Value {
        let mut out = run(filter, input).unwrap();
        assert_eq!(out.len(), 1, "{} produced {:?}", filter, out);
        out.remove(0)
    }

    #[test]
    fn test_paths() {
        let input = json(r#"{"source": {"users": [{"name": "Ada"}, {"name": "Bob"}], "odd key": 1}}"#);
        assert_eq!(one(".source.users[1].name", &input), Value::from("Bob"));
        assert_eq!(one(".source.users[-1].name", &input), Value::from("Bob"));
        assert_eq!(one(r#".source."odd key""#, &input), Value::Int(1));
        assert_eq!(one(".source.missing", &input), Value::Null);
        assert_eq!(
            run(".source.users[].name", &input).unwrap(),
            vec![Value::from("Ada"), Value::from("Bob")]
        );
    }

    #[test]
    fn test_construction_and_builtins() {
        let input = json(r#"{"source": [{"id": 1, "ok": true}, {"id": 2, "ok": false}]}"#);
        assert_eq!(
            one("[.source[] | select(.ok) | {id, label: \"n\" + (.id | tostring)}]", &input),
            json(r#"[{"id": 1, "label": "n1"}]"#)
        );
        assert_eq!(
            one(".source | map(select(.ok == true) | {id})", &input),
            json(r#"[{"id": 1}]"#)
        );
        assert_eq!(one(".source | length", &input), Value::Int(2));
        assert_eq!(one(".source[0] | keys", &input), json(r#"["id", "ok"]"#));
        assert_eq!(one(".source[1].id | tostring", &input), Value::from("2"));
        assert_eq!(
            one("[.source[] | if .ok then \"yes\" else \"no\" end]", &input),
            json(r#"["yes", "no"]"#)
        );
    }

    #[test]
    fn test_add_and_alternative() {
        let input = json(r#"{"a": 1, "b": 2.5, "s": "x", "l": [1], "o": {"k": 1}}"#);
        assert_eq!(one(".a + .a", &input), Value::Int(2));
        assert_eq!(one(".a + .b", &input), Value::Float(3.5));
        assert_eq!(one(".s + \"y\"", &input), Value::from("xy"));
        assert_eq!(one(".l + [2]", &input), json("[1, 2]"));
        assert_eq!(one(".o + {j: 2}", &input), json(r#"{"k": 1, "j": 2}"#));
        assert_eq!(one(".missing // \"default\"", &input), Value::from("default"));
        assert_eq!(one(".a // 5", &input), Value::Int(1));
        assert!(run(".s + 1", &input).is_err());
    }

    #[test]
    fn test_comma_streams() {
        let input = json(r#"{"a": 1, "b": 2}"#);
        assert_eq!(run(".a, .b", &input).unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(one("[.a, .b]", &input), json("[1, 2]"));
    }

    #[test]
    fn test_ordering_comparisons() {
        let input = json(r#"{"source": [{"n": "ada", "age": 36}, {"n": "bob", "age": 17}, {"n": "cy", "age": 21}]}"#);
        assert_eq!(
            one("[.source[] | select(.age >= 21) | .n]", &input),
            json(r#"["ada", "cy"]"#)
        );
        assert_eq!(one("[.source[] | .age < 21]", &input), json("[false, true, false]"));
        assert_eq!(one(".source[0].age > 36", &input), Value::Bool(false));
        assert_eq!(one(".source[0].age <= 36", &input), Value::Bool(true));
        assert_eq!(one(r#""b" > "a""#, &input), Value::Bool(true));
        assert_eq!(one("null < false", &input), Value::Bool(true));
        assert_eq!(one("1 < \"1\"", &input), Value::Bool(true));
        assert_eq!(one("[1, 2] < [1, 3]", &input), Value::Bool(true));
        assert_eq!(
            one("9007199254740993 > 9007199254740992", &input),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_boolean_operators() {
        let input = json(r#"{"source": [{"age": 36, "vip": false}, {"age": 17, "vip": true}, {"age": 50, "vip": true}]}"#);
        assert_eq!(
            one("[.source[] | select(.age > 18 and .vip) | .age]", &input),
            json("[50]")
        );
        assert_eq!(
            one("[.source[] | select(.age < 18 or .age > 40) | .age]", &input),
            json("[17, 50]")
        );
        assert_eq!(one("[.source[] | .vip | not]", &input), json("[true, false, false]"));
        // `and` binds tighter than `or`
        assert_eq!(one("true or false and false", &input), Value::Bool(true));
        assert_eq!(one(".missing or null", &input), Value::Bool(false));
        assert_eq!(one(".missing or null // \"none\"", &input), Value::from("none"));
    }

    #[test]
    fn test_errors() {
        let err = Filter::parse(".a | frobnicate").unwrap_err();
        assert!(matches!(err, JqError::Parse { pos: 5, .. }), "{:?}", err);
        assert!(matches!(Filter::parse("[.a"), Err(JqError::Parse { .. })));
        assert!(matches!(run(".[]", &Value::Int(3)), Err(JqError::Runtime(_))));
    }
}
