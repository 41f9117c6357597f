//! Row predicates for the filter action.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A predicate for matching a single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Matches equal value (numbers compare by magnitude).
    Eq(Value),
    /// Matches if not equal.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Ge(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Le(Value),
    /// Value is one of these.
    In(Vec<Value>),
    /// Value is none of these.
    NotIn(Vec<Value>),
    /// String contains substring, or array contains element.
    Contains(Value),
    /// Negation of `Contains`.
    NotContains(Value),
    /// String starts with.
    StartsWith(String),
    /// String ends with.
    EndsWith(String),
}

impl Predicate {
    /// Build a predicate from an operator name and its operand.
    ///
    /// Operator names are case-insensitive; symbolic aliases (`==`, `>=`, ...)
    /// and underscore spellings (`not_in`) are accepted.
    pub fn parse(operator: &str, operand: Value) -> Result<Self, PredicateError> {
        let op = operator.trim().to_lowercase();
        let predicate = match op.as_str() {
            "eq" | "==" | "=" => Predicate::Eq(operand),
            "ne" | "!=" | "<>" => Predicate::Ne(operand),
            "gt" | ">" => Predicate::Gt(operand),
            "ge" | "gte" | ">=" => Predicate::Ge(operand),
            "lt" | "<" => Predicate::Lt(operand),
            "le" | "lte" | "<=" => Predicate::Le(operand),
            "in" => Predicate::In(into_list(operand)),
            "not-in" | "not_in" | "notin" | "not in" => Predicate::NotIn(into_list(operand)),
            "contains" => Predicate::Contains(operand),
            "not-contains" | "not_contains" | "notcontains" => Predicate::NotContains(operand),
            "startswith" | "starts_with" | "starts-with" => {
                Predicate::StartsWith(operand.to_text())
            }
            "endswith" | "ends_with" | "ends-with" => Predicate::EndsWith(operand.to_text()),
            _ => return Err(PredicateError::UnknownOperator(operator.to_string())),
        };
        Ok(predicate)
    }

    /// Check if a value matches this predicate.
    ///
    /// Ordering comparisons against null or against a value of an
    /// incomparable kind never match.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Predicate::Eq(expected) => coerced_eq(value, expected),
            Predicate::Ne(expected) => !coerced_eq(value, expected),
            Predicate::Gt(bound) => compare(value, bound) == Some(Ordering::Greater),
            Predicate::Ge(bound) => {
                matches!(compare(value, bound), Some(Ordering::Greater | Ordering::Equal))
            }
            Predicate::Lt(bound) => compare(value, bound) == Some(Ordering::Less),
            Predicate::Le(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Predicate::In(values) => values.iter().any(|v| coerced_eq(value, v)),
            Predicate::NotIn(values) => !values.iter().any(|v| coerced_eq(value, v)),
            Predicate::Contains(needle) => contains(value, needle),
            Predicate::NotContains(needle) => !contains(value, needle),
            Predicate::StartsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
            Predicate::EndsWith(suffix) => value.as_str().is_some_and(|s| s.ends_with(suffix)),
        }
    }
}

/// A predicate bound to a named column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnPredicate {
    pub column: String,
    pub predicate: Predicate,
}

impl ColumnPredicate {
    pub fn new(column: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            column: column.into(),
            predicate,
        }
    }
}

/// Errors raised while building predicates.
#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),
}

fn into_list(operand: Value) -> Vec<Value> {
    match operand {
        Value::Array(items) => items,
        other => vec![other],
    }
}

/// Number parsed from a string operand, so `"21"` in YAML still compares
/// against an integer column.
fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse::<f64>().ok(),
        other => other.as_f64(),
    }
}

fn coerced_eq(value: &Value, expected: &Value) -> bool {
    if value.loose_eq(expected) {
        return true;
    }
    match (value, expected) {
        (Value::String(_), v) | (v, Value::String(_)) if v.is_number() => {
            matches!((numeric(value), numeric(expected)), (Some(a), Some(b)) if a == b)
        }
        _ => false,
    }
}

fn compare(value: &Value, bound: &Value) -> Option<Ordering> {
    if value.is_null() || bound.is_null() {
        return None;
    }
    if value.is_number() || bound.is_number() {
        let (a, b) = (numeric(value)?, numeric(bound)?);
        return a.partial_cmp(&b);
    }
    match (value, bound) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(value: &Value, needle: &Value) -> bool {
    match value {
        Value::String(s) => s.contains(&needle.to_text()),
        Value::Array(items) => items.iter().any(|v| coerced_eq(v, needle)),
        Value::Object(obj) => needle.as_str().is_some_and(|k| obj.contains_key(k)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operators() {
        assert_eq!(
            Predicate::parse("EQ", Value::Int(1)).unwrap(),
            Predicate::Eq(Value::Int(1))
        );
        assert_eq!(
            Predicate::parse(" >= ", Value::Int(1)).unwrap(),
            Predicate::Ge(Value::Int(1))
        );
        assert_eq!(
            Predicate::parse("not_in", Value::Int(1)).unwrap(),
            Predicate::NotIn(vec![Value::Int(1)])
        );
        assert!(matches!(
            Predicate::parse("between", Value::Null),
            Err(PredicateError::UnknownOperator(op)) if op == "between"
        ));
    }

    #[test]
    fn test_numeric_predicates() {
        let ge = Predicate::Ge(Value::Int(21));
        assert!(ge.matches(&Value::Int(21)));
        assert!(ge.matches(&Value::Float(21.5)));
        assert!(!ge.matches(&Value::Int(18)));
        assert!(!ge.matches(&Value::Null));

        let lt = Predicate::Lt(Value::from("10"));
        assert!(lt.matches(&Value::Int(9)));
    }

    #[test]
    fn test_string_predicates() {
        assert!(Predicate::StartsWith("Mil".into()).matches(&Value::from("Milano")));
        assert!(Predicate::EndsWith("ano".into()).matches(&Value::from("Milano")));
        assert!(Predicate::Contains(Value::from("lan")).matches(&Value::from("Milano")));
        assert!(Predicate::NotContains(Value::from("xyz")).matches(&Value::from("Milano")));
        assert!(!Predicate::StartsWith("Mil".into()).matches(&Value::Int(1)));
    }

    #[test]
    fn test_membership() {
        let p = Predicate::parse("in", Value::from(vec!["it", "fr"])).unwrap();
        assert!(p.matches(&Value::from("it")));
        assert!(!p.matches(&Value::from("de")));

        let q = Predicate::parse("not-in", Value::from(vec![1i64, 2])).unwrap();
        assert!(q.matches(&Value::Int(3)));
        assert!(!q.matches(&Value::Float(2.0)));
    }

    #[test]
    fn test_eq_coerces_numeric_strings() {
        assert!(Predicate::Eq(Value::from("21")).matches(&Value::Int(21)));
        assert!(Predicate::Ne(Value::from("x")).matches(&Value::Int(21)));
    }
}
