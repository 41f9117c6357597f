//! JSON-to-JSON mapping.
//!
//! A [`Mapping`] is an ordered list of `key: node` entries. Each [`Node`]
//! computes a value from the input document; evaluation is pure and
//! bottom-up. Mappings are usually written in the textual DSL handled by
//! [`parser`]; the jq subset lives in [`jq`].

pub mod jq;
pub mod parser;

use crate::value::{Map, Value};
use std::fmt;

/// One step of a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Key(String),
    /// Array index; negative counts from the end.
    Index(i64),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) if is_plain_key(k) => f.write_str(k),
            Segment::Key(k) => write!(f, "{:?}", k),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

fn is_plain_key(k: &str) -> bool {
    !k.is_empty() && k.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// A path into a document. The empty path is the document itself.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Path(pub Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Parse `a.b[0]."odd key"`. `.` and `$` alone are the root.
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        let text = text.trim();
        if text.is_empty() || text == "." || text == "$" {
            return Ok(Self::root());
        }
        let invalid = |why: &str| MappingError::InvalidPath(format!("{}: {}", text, why));
        let chars: Vec<char> = text.trim_start_matches(['$', '.']).chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;
        let mut expect_key = true;

        while i < chars.len() {
            match chars[i] {
                '.' => {
                    if expect_key {
                        return Err(invalid("empty segment"));
                    }
                    expect_key = true;
                    i += 1;
                }
                '[' => {
                    let close = chars[i..]
                        .iter()
                        .position(|&c| c == ']')
                        .ok_or_else(|| invalid("unclosed '['"))?;
                    let inner: String = chars[i + 1..i + close].iter().collect();
                    let idx = inner
                        .trim()
                        .parse::<i64>()
                        .map_err(|_| invalid("index must be an integer"))?;
                    segments.push(Segment::Index(idx));
                    expect_key = false;
                    i += close + 1;
                }
                '"' => {
                    let close = chars[i + 1..]
                        .iter()
                        .position(|&c| c == '"')
                        .ok_or_else(|| invalid("unclosed quote"))?;
                    segments.push(Segment::Key(chars[i + 1..i + 1 + close].iter().collect()));
                    expect_key = false;
                    i += close + 2;
                }
                _ => {
                    let start = i;
                    while i < chars.len() && !matches!(chars[i], '.' | '[' | '"') {
                        i += 1;
                    }
                    segments.push(Segment::Key(chars[start..i].iter().collect()));
                    expect_key = false;
                }
            }
        }
        if expect_key && !segments.is_empty() {
            return Err(invalid("trailing '.'"));
        }
        Ok(Self(segments))
    }

    /// Resolve against a document; on failure return the index of the
    /// first segment that could not be followed.
    pub fn lookup<'a>(&self, doc: &'a Value) -> Result<&'a Value, usize> {
        let mut current = doc;
        for (i, segment) in self.0.iter().enumerate() {
            let next = match (segment, current) {
                (Segment::Key(k), Value::Object(obj)) => obj.get(k),
                (Segment::Index(idx), Value::Array(items)) => {
                    let len = items.len() as i64;
                    let pos = if *idx < 0 { len + idx } else { *idx };
                    usize::try_from(pos).ok().and_then(|p| items.get(p))
                }
                _ => None,
            };
            current = next.ok_or(i)?;
        }
        Ok(current)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 && matches!(segment, Segment::Key(_)) {
                f.write_str(".")?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
}

/// A mapping expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(Value),
    Select(Path),
    OptionalSelect(Path, Value),
    Concat(Vec<Node>),
    Format(String, Vec<Node>),
    If(Box<Node>, Box<Node>, Box<Node>),
    Compare(CmpOp, Box<Node>, Box<Node>),
    /// Evaluate the node once per element of the array at the path.
    Forall(Path, Box<Node>),
    Object(Mapping),
    List(Vec<Node>),
}

impl Node {
    pub fn select(path: &str) -> Result<Self, MappingError> {
        Path::parse(path).map(Node::Select)
    }

    /// Evaluate against a document.
    pub fn eval(&self, doc: &Value) -> Result<Value, MappingError> {
        match self {
            Node::Const(v) => Ok(v.clone()),
            Node::Select(path) => path.lookup(doc).cloned().map_err(|at| missing(path, at)),
            Node::OptionalSelect(path, default) => {
                Ok(path.lookup(doc).cloned().unwrap_or_else(|_| default.clone()))
            }
            Node::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.eval(doc)?.to_text());
                }
                Ok(Value::String(out))
            }
            Node::Format(template, args) => {
                let values = args
                    .iter()
                    .map(|a| a.eval(doc))
                    .collect::<Result<Vec<_>, _>>()?;
                format_template(template, &values).map(Value::String)
            }
            Node::If(cond, then, otherwise) => {
                if cond.eval(doc)?.is_truthy() {
                    then.eval(doc)
                } else {
                    otherwise.eval(doc)
                }
            }
            Node::Compare(op, l, r) => {
                let equal = l.eval(doc)?.loose_eq(&r.eval(doc)?);
                Ok(Value::Bool(match op {
                    CmpOp::Eq => equal,
                    CmpOp::Ne => !equal,
                }))
            }
            Node::Forall(path, body) => {
                let target = path.lookup(doc).map_err(|at| missing(path, at))?;
                match target {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| body.eval(item))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    Value::Null => Ok(Value::Array(Vec::new())),
                    other => Err(MappingError::Type(format!(
                        "forall over {} expects an array, found {}",
                        path,
                        other.type_name()
                    ))),
                }
            }
            Node::Object(mapping) => mapping.bend(doc),
            Node::List(items) => items
                .iter()
                .map(|n| n.eval(doc))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
        }
    }
}

fn missing(path: &Path, at: usize) -> MappingError {
    MappingError::MissingPath {
        path: path.to_string(),
        at: path.0.get(at).map(ToString::to_string).unwrap_or_default(),
    }
}

/// Fill `{}` (sequential) and `{n}` (positional) slots. `{{` and `}}` are
/// literal braces.
fn format_template(template: &str, args: &[Value]) -> Result<String, MappingError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_arg = 0;

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(ch) => spec.push(ch),
                        None => {
                            return Err(MappingError::Type(format!(
                                "unclosed '{{' in format string {:?}",
                                template
                            )));
                        }
                    }
                }
                let idx = if spec.trim().is_empty() {
                    next_arg += 1;
                    next_arg - 1
                } else {
                    spec.trim().parse::<usize>().map_err(|_| {
                        MappingError::Type(format!("invalid format slot {{{}}}", spec))
                    })?
                };
                let value = args.get(idx).ok_or_else(|| {
                    MappingError::Type(format!(
                        "format slot {} out of range ({} arguments)",
                        idx,
                        args.len()
                    ))
                })?;
                out.push_str(&value.to_text());
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// An ordered set of output keys and the nodes computing them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Mapping {
    entries: Vec<(String, Node)>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    pub fn entry(mut self, key: impl Into<String>, node: Node) -> Self {
        self.entries.push((key.into(), node));
        self
    }

    pub fn entries(&self) -> &[(String, Node)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse the textual DSL.
    pub fn parse(text: &str) -> Result<Self, MappingError> {
        parser::parse(text)
    }

    /// Apply the mapping to a document, producing an object.
    pub fn bend(&self, doc: &Value) -> Result<Value, MappingError> {
        let mut out = Map::new();
        for (key, node) in &self.entries {
            out.insert(key.clone(), node.eval(doc)?);
        }
        Ok(Value::Object(out))
    }
}

/// Apply a mapping to a document.
pub fn bend(mapping: &Mapping, doc: &Value) -> Result<Value, MappingError> {
    mapping.bend(doc)
}

/// Errors from parsing or applying mappings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("path {path} not found (missing '{at}')")]
    MissingPath { path: String, at: String },

    #[error("invalid path {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Type(String),

    #[error("mapping syntax error at line {line}, column {col}: {message}")]
    Parse {
        line: usize,
        col: usize,
        message: String,
    },

    #[error(transparent)]
    Jq(#[from] jq::JqError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapExt;

    fn customer() -> Value {
        let json: serde_json::Value = serde_json::from_str(
            r#"{
                "customer": {"first_name": "Giovanni", "last_name": "Montoya"},
                "address": {"city": "Milano", "country": "Italy"},
                "orders": [{"id": 1, "total": 9.5}, {"id": 2, "total": 20}]
            }"#,
        )
        .unwrap();
        Value::from(json)
    }

    #[test]
    fn test_path_parse_and_display() {
        let path = Path::parse("orders[-1].\"total\"").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("orders".into()),
                Segment::Index(-1),
                Segment::Key("total".into())
            ]
        );
        assert_eq!(path.to_string(), "orders[-1].total");
        assert_eq!(Path::parse("$").unwrap(), Path::root());
        assert!(Path::parse("a..b").is_err());
        assert!(Path::parse("a[x]").is_err());
    }

    #[test]
    fn test_bend_concat() {
        let mapping = Mapping::new()
            .entry(
                "fullName",
                Node::Concat(vec![
                    Node::select("customer.first_name").unwrap(),
                    Node::Const(" ".into()),
                    Node::select("customer.last_name").unwrap(),
                ]),
            )
            .entry(
                "city",
                Node::Format(
                    "{}, {}".into(),
                    vec![
                        Node::select("address.city").unwrap(),
                        Node::select("address.country").unwrap(),
                    ],
                ),
            );
        let out = bend(&mapping, &customer()).unwrap();
        let expected = Map::new()
            .with("fullName", "Giovanni Montoya")
            .with("city", "Milano, Italy");
        assert_eq!(out, Value::Object(expected));
    }

    #[test]
    fn test_missing_path_names_first_missing_segment() {
        let node = Node::select("customer.middle_name.initial").unwrap();
        assert_eq!(
            node.eval(&customer()),
            Err(MappingError::MissingPath {
                path: "customer.middle_name.initial".into(),
                at: "middle_name".into(),
            })
        );

        let optional = Node::OptionalSelect(Path::parse("customer.middle_name").unwrap(), "-".into());
        assert_eq!(optional.eval(&customer()).unwrap(), Value::from("-"));
    }

    #[test]
    fn test_forall_and_conditionals() {
        let node = Node::Forall(
            Path::parse("orders").unwrap(),
            Box::new(Node::If(
                Box::new(Node::Compare(
                    CmpOp::Eq,
                    Box::new(Node::select("id").unwrap()),
                    Box::new(Node::Const(Value::Int(1))),
                )),
                Box::new(Node::Const("first".into())),
                Box::new(Node::select("total").unwrap()),
            )),
        );
        assert_eq!(
            node.eval(&customer()).unwrap(),
            Value::from(vec![Value::from("first"), Value::Int(20)])
        );
    }

    #[test]
    fn test_format_slots() {
        let args = [Value::from("a"), Value::Int(2)];
        assert_eq!(format_template("{1}-{0} {{x}}", &args).unwrap(), "2-a {x}");
        assert!(format_template("{5}", &args).is_err());
    }
}
