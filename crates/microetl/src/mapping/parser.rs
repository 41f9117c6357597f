//! Recursive-descent parser for the mapping DSL.
//!
//! ```text
//! # comments run to end of line
//! {
//!     fullName: concat(customer.first_name, " ", customer.last_name)
//!     city: address.city + ", " + address.country
//!     items: forall(orders, { id: id, big: total != 0 })
//! }
//! ```
//!
//! Entries are separated by commas or newlines; the outer braces are
//! optional.

use super::{CmpOp, Mapping, MappingError, Node, Path, Segment};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Dot,
    Dollar,
    Plus,
    EqEq,
    NotEq,
    Newline,
    Str(String),
    Num(Value),
    Ident(String),
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Str(s) => format!("string {:?}", s),
            Tok::Num(n) => format!("number {}", n),
            Tok::Ident(s) => format!("'{}'", s),
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of input".to_string(),
            other => format!("'{}'", symbol(other)),
        }
    }
}

fn symbol(tok: &Tok) -> &'static str {
    match tok {
        Tok::LBrace => "{",
        Tok::RBrace => "}",
        Tok::LBracket => "[",
        Tok::RBracket => "]",
        Tok::LParen => "(",
        Tok::RParen => ")",
        Tok::Comma => ",",
        Tok::Colon => ":",
        Tok::Dot => ".",
        Tok::Dollar => "$",
        Tok::Plus => "+",
        Tok::EqEq => "==",
        Tok::NotEq => "!=",
        _ => "?",
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: usize,
    col: usize,
}

fn error(line: usize, col: usize, message: impl Into<String>) -> MappingError {
    MappingError::Parse {
        line,
        col,
        message: message.into(),
    }
}

fn lex(text: &str) -> Result<Vec<Spanned>, MappingError> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let (mut i, mut line, mut col) = (0, 1, 1);

    while i < chars.len() {
        let c = chars[i];
        let (start_line, start_col) = (line, col);
        let single = match c {
            '{' => Some(Tok::LBrace),
            '}' => Some(Tok::RBrace),
            '[' => Some(Tok::LBracket),
            ']' => Some(Tok::RBracket),
            '(' => Some(Tok::LParen),
            ')' => Some(Tok::RParen),
            ',' => Some(Tok::Comma),
            ':' => Some(Tok::Colon),
            '.' => Some(Tok::Dot),
            '$' => Some(Tok::Dollar),
            '+' => Some(Tok::Plus),
            _ => None,
        };
        if let Some(tok) = single {
            out.push(Spanned {
                tok,
                line: start_line,
                col: start_col,
            });
            i += 1;
            col += 1;
            continue;
        }

        match c {
            '\n' => {
                out.push(Spanned {
                    tok: Tok::Newline,
                    line,
                    col,
                });
                i += 1;
                line += 1;
                col = 1;
            }
            c if c.is_whitespace() => {
                i += 1;
                col += 1;
            }
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '=' | '!' => {
                if chars.get(i + 1) != Some(&'=') {
                    return Err(error(line, col, format!("unexpected character '{}'", c)));
                }
                let tok = if c == '=' { Tok::EqEq } else { Tok::NotEq };
                out.push(Spanned {
                    tok,
                    line,
                    col,
                });
                i += 2;
                col += 2;
            }
            '"' | '\'' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                col += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(error(start_line, start_col, "unterminated string"));
                    };
                    i += 1;
                    col += 1;
                    match ch {
                        '\\' => {
                            let escaped = chars
                                .get(i)
                                .copied()
                                .ok_or_else(|| error(start_line, start_col, "unterminated string"))?;
                            i += 1;
                            col += 1;
                            s.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                other => other,
                            });
                        }
                        '\n' => return Err(error(start_line, start_col, "unterminated string")),
                        ch if ch == quote => break,
                        ch => s.push(ch),
                    }
                }
                out.push(Spanned {
                    tok: Tok::Str(s),
                    line: start_line,
                    col: start_col,
                });
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || (chars[i] == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())))
                {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                col += i - start;
                let value = match literal.parse::<i64>() {
                    Ok(n) => Value::Int(n),
                    Err(_) => literal
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| error(start_line, start_col, format!("invalid number {}", literal)))?,
                };
                out.push(Spanned {
                    tok: Tok::Num(value),
                    line: start_line,
                    col: start_col,
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                col += i - start;
                out.push(Spanned {
                    tok: Tok::Ident(chars[start..i].iter().collect()),
                    line: start_line,
                    col: start_col,
                });
            }
            other => {
                return Err(error(line, col, format!("unexpected character '{}'", other)));
            }
        }
    }
    out.push(Spanned {
        tok: Tok::Eof,
        line,
        col,
    });
    Ok(out)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.tokens[self.pos].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].tok
    }

    /// The next token that is not a newline, without consuming anything.
    fn peek_past_newlines(&self) -> &Tok {
        let mut idx = self.pos;
        while self.tokens[idx].tok == Tok::Newline {
            idx += 1;
        }
        &self.tokens[idx].tok
    }

    fn advance(&mut self) -> Tok {
        let tok = self.tokens[self.pos].tok.clone();
        if tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == Tok::Newline {
            self.pos += 1;
        }
    }

    fn fail(&self, message: impl Into<String>) -> MappingError {
        let at = &self.tokens[self.pos];
        error(at.line, at.col, message)
    }

    fn unexpected(&self, wanted: &str) -> MappingError {
        self.fail(format!("expected {}, found {}", wanted, self.peek().describe()))
    }

    fn expect(&mut self, tok: Tok) -> Result<(), MappingError> {
        if *self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", symbol(&tok))))
        }
    }

    fn file(&mut self) -> Result<Mapping, MappingError> {
        self.skip_newlines();
        let mapping = if *self.peek() == Tok::LBrace {
            self.advance();
            let mapping = self.entries(Tok::RBrace)?;
            self.expect(Tok::RBrace)?;
            mapping
        } else {
            self.entries(Tok::Eof)?
        };
        self.skip_newlines();
        if *self.peek() != Tok::Eof {
            return Err(self.unexpected("end of input"));
        }
        Ok(mapping)
    }

    fn entries(&mut self, close: Tok) -> Result<Mapping, MappingError> {
        let mut mapping = Mapping::new();
        loop {
            self.skip_newlines();
            if *self.peek() == close {
                return Ok(mapping);
            }
            let key = match self.peek().clone() {
                Tok::Ident(s) | Tok::Str(s) => s,
                _ => return Err(self.unexpected("an entry key")),
            };
            self.advance();
            self.expect(Tok::Colon)?;
            self.skip_newlines();
            let node = self.expr()?;
            mapping = mapping.entry(key, node);

            match self.peek() {
                Tok::Comma | Tok::Newline => {
                    self.advance();
                }
                t if *t == close => {}
                _ => return Err(self.unexpected("',' or end of line")),
            }
        }
    }

    fn expr(&mut self) -> Result<Node, MappingError> {
        let first = self.cmp()?;
        let mut parts = vec![first];
        while *self.peek_past_newlines() == Tok::Plus {
            self.skip_newlines();
            self.advance();
            self.skip_newlines();
            parts.push(self.cmp()?);
        }
        Ok(if parts.len() == 1 {
            parts.remove(0)
        } else {
            Node::Concat(parts)
        })
    }

    fn cmp(&mut self) -> Result<Node, MappingError> {
        let left = self.atom()?;
        let op = match self.peek() {
            Tok::EqEq => CmpOp::Eq,
            Tok::NotEq => CmpOp::Ne,
            _ => return Ok(left),
        };
        self.advance();
        self.skip_newlines();
        let right = self.atom()?;
        Ok(Node::Compare(op, Box::new(left), Box::new(right)))
    }

    fn atom(&mut self) -> Result<Node, MappingError> {
        match self.peek().clone() {
            Tok::Str(s) => {
                self.advance();
                Ok(Node::Const(Value::String(s)))
            }
            Tok::Num(n) => {
                self.advance();
                Ok(Node::Const(n))
            }
            Tok::LParen => {
                self.advance();
                self.skip_newlines();
                let inner = self.expr()?;
                self.skip_newlines();
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            Tok::LBrace => {
                self.advance();
                let mapping = self.entries(Tok::RBrace)?;
                self.expect(Tok::RBrace)?;
                Ok(Node::Object(mapping))
            }
            Tok::LBracket => {
                self.advance();
                let items = self.args(Tok::RBracket)?;
                Ok(Node::List(items))
            }
            Tok::Ident(name) if *self.peek_at(1) == Tok::LParen => {
                self.advance();
                self.advance();
                let args = self.args(Tok::RParen)?;
                self.call(&name, args)
            }
            Tok::Ident(name) if matches!(name.as_str(), "true" | "false" | "null") => {
                self.advance();
                Ok(Node::Const(match name.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => Value::Null,
                }))
            }
            Tok::Ident(_) | Tok::Dot | Tok::Dollar => self.path().map(Node::Select),
            _ => Err(self.unexpected("a value")),
        }
    }

    /// Comma-separated expressions up to and including `close`.
    fn args(&mut self, close: Tok) -> Result<Vec<Node>, MappingError> {
        let mut items = Vec::new();
        self.skip_newlines();
        if *self.peek() == close {
            self.advance();
            return Ok(items);
        }
        loop {
            self.skip_newlines();
            items.push(self.expr()?);
            self.skip_newlines();
            match self.peek() {
                Tok::Comma => {
                    self.advance();
                }
                t if *t == close => {
                    self.advance();
                    return Ok(items);
                }
                _ => return Err(self.unexpected(&format!("',' or '{}'", symbol(&close)))),
            }
        }
    }

    fn path(&mut self) -> Result<Path, MappingError> {
        let mut segments = Vec::new();
        match self.advance() {
            Tok::Ident(name) => segments.push(Segment::Key(name)),
            _ => {
                if *self.peek() == Tok::Dot {
                    self.advance();
                }
                match self.peek().clone() {
                    Tok::Ident(name) | Tok::Str(name) => {
                        self.advance();
                        segments.push(Segment::Key(name));
                    }
                    _ => return Ok(Path::root()),
                }
            }
        }
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    match self.peek().clone() {
                        Tok::Ident(name) | Tok::Str(name) => segments.push(Segment::Key(name)),
                        _ => return Err(self.unexpected("a field name after '.'")),
                    }
                    self.advance();
                }
                Tok::LBracket => {
                    self.advance();
                    match self.peek().clone() {
                        Tok::Num(Value::Int(n)) => segments.push(Segment::Index(n)),
                        Tok::Str(name) => segments.push(Segment::Key(name)),
                        _ => return Err(self.unexpected("an index")),
                    }
                    self.advance();
                    self.expect(Tok::RBracket)?;
                }
                _ => return Ok(Path(segments)),
            }
        }
    }

    fn call(&self, name: &str, mut args: Vec<Node>) -> Result<Node, MappingError> {
        let arity = |min: usize, max: usize| -> Result<(), MappingError> {
            if args.len() < min || args.len() > max {
                let expected = if min == max {
                    min.to_string()
                } else if max == usize::MAX {
                    format!("at least {}", min)
                } else {
                    format!("{} to {}", min, max)
                };
                return Err(self.fail(format!(
                    "{}() takes {} arguments, got {}",
                    name,
                    expected,
                    args.len()
                )));
            }
            Ok(())
        };

        match name {
            "concat" => {
                arity(1, usize::MAX)?;
                Ok(Node::Concat(args))
            }
            "format" => {
                arity(1, usize::MAX)?;
                let template = match args.remove(0) {
                    Node::Const(Value::String(s)) => s,
                    _ => return Err(self.fail("format() template must be a string literal")),
                };
                Ok(Node::Format(template, args))
            }
            "if" => {
                arity(2, 3)?;
                let otherwise = if args.len() == 3 {
                    args.pop().unwrap_or(Node::Const(Value::Null))
                } else {
                    Node::Const(Value::Null)
                };
                let then = args.pop().unwrap_or(Node::Const(Value::Null));
                let cond = args.pop().unwrap_or(Node::Const(Value::Null));
                Ok(Node::If(Box::new(cond), Box::new(then), Box::new(otherwise)))
            }
            "forall" => {
                arity(2, 2)?;
                let body = args.pop().unwrap_or(Node::Const(Value::Null));
                let path = self.path_arg(name, args.remove(0))?;
                Ok(Node::Forall(path, Box::new(body)))
            }
            "optional" => {
                arity(1, 2)?;
                let default = if args.len() == 2 {
                    self.const_arg(name, args.pop().unwrap_or(Node::Const(Value::Null)))?
                } else {
                    Value::Null
                };
                let path = self.path_arg(name, args.remove(0))?;
                Ok(Node::OptionalSelect(path, default))
            }
            "K" => {
                arity(1, 1)?;
                Ok(Node::Const(self.const_arg(name, args.remove(0))?))
            }
            "S" | "OptionalS" => {
                arity(1, usize::MAX)?;
                let mut segments = Vec::with_capacity(args.len());
                for arg in args {
                    segments.push(match self.const_arg(name, arg)? {
                        Value::String(s) => Segment::Key(s),
                        Value::Int(n) => Segment::Index(n),
                        other => {
                            return Err(self.fail(format!(
                                "{}() segments must be strings or integers, found {}",
                                name,
                                other.type_name()
                            )));
                        }
                    });
                }
                let path = Path(segments);
                Ok(if name == "S" {
                    Node::Select(path)
                } else {
                    Node::OptionalSelect(path, Value::Null)
                })
            }
            "F" | "list" => Ok(Node::List(args)),
            other => Err(self.fail(format!("unknown function '{}'", other))),
        }
    }

    fn path_arg(&self, func: &str, node: Node) -> Result<Path, MappingError> {
        match node {
            Node::Select(path) => Ok(path),
            Node::Const(Value::String(s)) => Path::parse(&s),
            _ => Err(self.fail(format!("{}() expects a path as first argument", func))),
        }
    }

    fn const_arg(&self, func: &str, node: Node) -> Result<Value, MappingError> {
        match node {
            Node::Const(v) => Ok(v),
            _ => Err(self.fail(format!("{}() expects a literal", func))),
        }
    }
}

/// Parse mapping DSL text.
pub fn parse(text: &str) -> Result<Mapping, MappingError> {
    let tokens = lex(text)?;
    Parser { tokens, pos: 0 }.file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Map, MapExt};

    fn doc(json: &str) -> Value {
        Value::from(serde_json::from_str::<serde_json::Value>(json).unwrap())
    }

    #[test]
    fn test_customer_mapping() {
        let mapping = parse(
            r#"
            # customer card
            {
                fullName: concat(customer.first_name, " ", customer.last_name),
                city: concat(address.city, ", ", address.country)
            }
            "#,
        )
        .unwrap();
        let input = doc(
            r#"{"customer":{"first_name":"Giovanni","last_name":"Montoya"},
                "address":{"city":"Milano","country":"Italy"}}"#,
        );
        let out = mapping.bend(&input).unwrap();
        assert_eq!(
            out,
            Value::Object(
                Map::new()
                    .with("fullName", "Giovanni Montoya")
                    .with("city", "Milano, Italy")
            )
        );
    }

    #[test]
    fn test_newline_separated_entries_without_braces() {
        let mapping = parse("a: x.y\nb: 'lit' + x.z\n\nc: 3\n").unwrap();
        assert_eq!(mapping.len(), 3);
        let out = mapping.bend(&doc(r#"{"x": {"y": 1, "z": "!"}}"#)).unwrap();
        let obj = out.as_object().unwrap();
        assert_eq!(obj["a"], Value::Int(1));
        assert_eq!(obj["b"], Value::from("lit!"));
        assert_eq!(obj["c"], Value::Int(3));
    }

    #[test]
    fn test_plus_continues_on_next_line() {
        let mapping = parse("name: first\n    + \" \"\n    + last\n").unwrap();
        let out = mapping.bend(&doc(r#"{"first": "Ada", "last": "Lovelace"}"#)).unwrap();
        assert_eq!(out.as_object().unwrap()["name"], Value::from("Ada Lovelace"));
    }

    #[test]
    fn test_functions() {
        let mapping = parse(
            r#"{
                ids: forall(orders, id),
                rows: forall(orders, {n: id, big: if(total != 0, "yes", "no")}),
                first: orders[0].id,
                label: format("{} ({})", name, K("x")),
                nick: optional(nick, "none"),
                deep: S("meta", "tags", 1),
                gone: OptionalS("meta", "missing"),
                pair: F(name, 1),
                same: name == "Ada"
            }"#,
        )
        .unwrap();
        let input = doc(
            r#"{"name": "Ada", "meta": {"tags": ["a", "b"]},
                "orders": [{"id": 1, "total": 0}, {"id": 2, "total": 5}]}"#,
        );
        let out = mapping.bend(&input).unwrap();
        let obj = out.as_object().unwrap();
        assert_eq!(obj["ids"], Value::from(vec![1i64, 2]));
        assert_eq!(
            obj["rows"].as_array().unwrap()[1].as_object().unwrap()["big"],
            Value::from("yes")
        );
        assert_eq!(obj["first"], Value::Int(1));
        assert_eq!(obj["label"], Value::from("Ada (x)"));
        assert_eq!(obj["nick"], Value::from("none"));
        assert_eq!(obj["deep"], Value::from("b"));
        assert_eq!(obj["gone"], Value::Null);
        assert_eq!(obj["pair"], Value::from(vec![Value::from("Ada"), Value::Int(1)]));
        assert_eq!(obj["same"], Value::Bool(true));
    }

    #[test]
    fn test_quoted_keys_and_segments() {
        let mapping = parse(r#""out key": ."in key".inner"#).unwrap();
        let out = mapping.bend(&doc(r#"{"in key": {"inner": true}}"#)).unwrap();
        assert_eq!(out.as_object().unwrap()["out key"], Value::Bool(true));
    }

    #[test]
    fn test_errors_carry_position() {
        let err = parse("{\n  a: concat(x,\n  b: 1\n}").unwrap_err();
        assert!(matches!(err, MappingError::Parse { line: 3, .. }), "{:?}", err);

        let err = parse("a: nope(1)").unwrap_err();
        assert!(matches!(err, MappingError::Parse { line: 1, .. }));
        assert!(err.to_string().contains("unknown function"));

        let err = parse("a: 'open").unwrap_err();
        assert!(matches!(err, MappingError::Parse { line: 1, col: 4, .. }));
    }
}
