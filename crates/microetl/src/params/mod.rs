//! Parameter resolution.
//!
//! Raw action parameters go through four steps:
//! 1. `parameters_file` / `param_file` entries are loaded and merged
//!    (inline values win)
//! 2. strings are rendered through the template pass
//! 3. `expr(...)` / `value(...)` markers are evaluated
//! 4. the result is handed to the action as [`ResolvedParameters`]

pub mod expr;
pub mod sql;
pub mod template;

pub use sql::{CompiledSql, compile_sql};

use crate::config::Paths;
use crate::value::{Map, Value};
use regex::Regex;
use std::sync::LazyLock;

/// Keys naming parameter files to merge.
pub const PARAM_FILE_KEYS: [&str; 2] = ["parameters_file", "param_file"];

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*(expr|value|pyexpr|pyval)\((.*)\)\s*$").expect("valid marker regex")
});

/// Parameters of one action invocation, after resolution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParameters {
    values: Map,
    items: Vec<Value>,
}

impl ResolvedParameters {
    pub fn from_map(values: Map) -> Self {
        Self {
            values,
            items: Vec::new(),
        }
    }

    /// Named parameters.
    pub fn values(&self) -> &Map {
        &self.values
    }

    /// Positional parameters, when the action was given a list.
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// A string parameter (non-strings are rendered as text).
    pub fn str(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::Null => None,
            v => Some(v.to_text()),
        }
    }

    /// A required string parameter.
    pub fn require_str(&self, key: &str) -> Result<String, ParamError> {
        self.str(key)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParamError::Missing(key.to_string()))
    }

    /// A string or a list of strings.
    pub fn string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.values.get(key)? {
            Value::Array(items) => Some(items.iter().map(Value::to_text).collect()),
            Value::Null => None,
            single => Some(vec![single.to_text()]),
        }
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            other => other.as_i64().map(|n| n != 0),
        }
    }

    pub fn usize(&self, key: &str) -> Option<usize> {
        match self.values.get(key)? {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64().and_then(|n| usize::try_from(n).ok()),
        }
    }
}

/// Resolve raw parameters. Relative parameter files load from `paths.inp_path`.
pub fn resolve(paths: &Paths, raw: &Value) -> Result<ResolvedParameters, ParamError> {
    match raw {
        Value::Null => Ok(ResolvedParameters::default()),
        Value::Object(map) => {
            let merged = merge_param_files(paths, map)?;
            let values = resolve_map(&merged);
            Ok(ResolvedParameters::from_map(values))
        }
        Value::Array(items) => {
            let bindings = Map::new();
            let items = items.iter().map(|v| resolve_value(v, &bindings)).collect();
            Ok(ResolvedParameters {
                values: Map::new(),
                items,
            })
        }
        other => Err(ParamError::Shape(other.type_name())),
    }
}

fn merge_param_files(paths: &Paths, inline: &Map) -> Result<Map, ParamError> {
    let mut merged = Map::new();
    for key in PARAM_FILE_KEYS {
        let files = match inline.get(key) {
            Some(Value::Array(items)) => items.iter().map(Value::to_text).collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        };
        for file in files {
            let path = paths.input(&file);
            let text = std::fs::read_to_string(&path).map_err(|source| ParamError::File {
                path: path.display().to_string(),
                source,
            })?;
            let loaded: Value = serde_yaml::from_str(&text).map_err(|e| ParamError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            match loaded {
                Value::Object(values) => merged.extend(values),
                Value::Null => {}
                other => {
                    return Err(ParamError::Parse {
                        path: path.display().to_string(),
                        message: format!("expected a mapping, found {}", other.type_name()),
                    });
                }
            }
        }
    }
    for (key, value) in inline {
        if !PARAM_FILE_KEYS.contains(&key.as_str()) {
            merged.insert(key.clone(), value.clone());
        }
    }
    Ok(merged)
}

/// Render and evaluate every value, in declared order. Later values see
/// earlier results as bindings.
fn resolve_map(raw: &Map) -> Map {
    let mut bindings = raw.clone();
    for (key, value) in raw {
        let resolved = resolve_value(value, &bindings);
        bindings.insert(key.clone(), resolved);
    }
    bindings
}

fn resolve_value(value: &Value, bindings: &Map) -> Value {
    match value {
        Value::String(s) => resolve_string(s, bindings),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, bindings)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, bindings)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn resolve_string(raw: &str, bindings: &Map) -> Value {
    let rendered = if raw.contains("{{") {
        template::render(raw, bindings)
    } else {
        raw.to_string()
    };
    match evaluate_marker(&rendered, bindings) {
        Some(Ok(value)) => value,
        Some(Err(e)) => {
            tracing::warn!(parameter = %raw, error = %e, "failed to evaluate parameter, keeping literal");
            Value::String(rendered)
        }
        None => Value::String(rendered),
    }
}

/// Evaluate an `expr(...)` / `value(...)` marker, if the text is one.
///
/// `value(...)` takes a literal (number, bool, null, quoted or bare
/// string); `expr(...)` runs the expression interpreter.
pub fn evaluate_marker(text: &str, bindings: &Map) -> Option<Result<Value, expr::ExprError>> {
    let caps = MARKER.captures(text)?;
    let body = caps[2].trim();
    Some(match &caps[1] {
        "value" | "pyval" => Ok(literal(body)),
        _ => expr::eval(body, bindings),
    })
}

fn literal(body: &str) -> Value {
    let unquoted = body
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| body.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')));
    match unquoted {
        Some(s) => Value::String(s.to_string()),
        None => match body {
            "null" | "None" => Value::Null,
            _ => Value::infer(body),
        },
    }
}

/// Errors resolving parameters.
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("failed to read parameter file {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse parameter file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("parameters must be a mapping or a list, found {0}")]
    Shape(&'static str),

    #[error("missing required parameter: {0}")]
    Missing(String),

    #[error("unbound template variable: {0}")]
    Unbound(String),

    #[error("unknown template filter: {0}")]
    UnknownFilter(String),
}
