//! Compile SQL templates into parameterized statements.
//!
//! `{{ name }}` becomes a driver bind marker and its value is collected in
//! order. Two filters change that:
//! - `{{ name | sqlsafe }}` inlines the value verbatim (identifiers)
//! - `{{ name | inclause }}` expands a list into `(?, ?, ...)`

use super::ParamError;
use crate::connector::ParamStyle;
use crate::value::{Map, Value};
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*(?:\|\s*([A-Za-z_]+)\s*)?\}\}")
        .expect("valid placeholder regex")
});

/// A compiled statement and its bound values.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledSql {
    pub text: String,
    pub params: Vec<Value>,
}

struct Binder {
    style: ParamStyle,
    params: Vec<Value>,
}

impl Binder {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        match self.style {
            ParamStyle::Qmark => "?".to_string(),
            ParamStyle::Numeric => format!("${}", self.params.len()),
            ParamStyle::Format => "%s".to_string(),
        }
    }
}

/// Compile a template against bindings.
///
/// Every placeholder must be bound; an unbound name is an error.
pub fn compile_sql(template: &str, bindings: &Map, style: ParamStyle) -> Result<CompiledSql, ParamError> {
    let mut binder = Binder {
        style,
        params: Vec::new(),
    };
    let mut text = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        text.push_str(&template[last..whole.start()]);
        last = whole.end();

        let name = &caps[1];
        let value = lookup(bindings, name).ok_or_else(|| ParamError::Unbound(name.to_string()))?;
        let filter = caps.get(2).map(|m| m.as_str().to_lowercase());

        match filter.as_deref() {
            None => text.push_str(&binder.bind(value.clone())),
            Some("sqlsafe") => text.push_str(&value.to_text()),
            Some("inclause") => {
                let items = match value {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                if items.is_empty() {
                    text.push_str("(NULL)");
                } else {
                    let markers: Vec<String> = items.into_iter().map(|v| binder.bind(v)).collect();
                    text.push('(');
                    text.push_str(&markers.join(", "));
                    text.push(')');
                }
            }
            Some(other) => return Err(ParamError::UnknownFilter(other.to_string())),
        }
    }
    text.push_str(&template[last..]);

    Ok(CompiledSql {
        text,
        params: binder.params,
    })
}

fn lookup<'a>(bindings: &'a Map, name: &str) -> Option<&'a Value> {
    if let Some(v) = bindings.get(name) {
        return Some(v);
    }
    let mut parts = name.split('.');
    let mut current = bindings.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}
