use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind};
use crate::context::RunContext;
use crate::dataset::{Dataset, Table};
use crate::params::ResolvedParameters;
use crate::value::{GroupKey, Value};
use indexmap::IndexMap;

/// Group by key columns and reduce one column per group.
///
/// Groups appear in first-seen order; each distinct key appears once.
pub struct AggregateAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Count,
    Sum,
    Mean,
    Median,
    Min,
    Max,
    Std,
    Var,
    First,
    Last,
    NUnique,
    Unique,
    List,
}

impl Function {
    fn parse(name: &str) -> Option<Self> {
        Some(match name.trim().to_lowercase().as_str() {
            "count" | "size" => Function::Count,
            "sum" => Function::Sum,
            "mean" | "avg" | "average" => Function::Mean,
            "median" => Function::Median,
            "min" => Function::Min,
            "max" => Function::Max,
            "std" => Function::Std,
            "var" => Function::Var,
            "first" => Function::First,
            "last" => Function::Last,
            "nunique" => Function::NUnique,
            "unique" => Function::Unique,
            "list" => Function::List,
            _ => return None,
        })
    }

    fn reduce(self, values: &[Value]) -> Value {
        let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        let numbers: Vec<f64> = present.iter().filter_map(|v| v.as_f64()).collect();

        match self {
            Function::Count => Value::from(present.len()),
            Function::Sum => {
                let ints: Option<Vec<i64>> = present.iter().map(|v| int_only(v)).collect();
                match ints.and_then(|ns| ns.into_iter().try_fold(0i64, i64::checked_add)) {
                    Some(total) => Value::Int(total),
                    None => Value::Float(numbers.iter().sum()),
                }
            }
            Function::Mean if numbers.is_empty() => Value::Null,
            Function::Mean => Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64),
            Function::Median => median(numbers),
            Function::Min => present
                .iter()
                .min_by(|a, b| a.total_cmp(b))
                .map(|v| (*v).clone())
                .unwrap_or_default(),
            Function::Max => present
                .iter()
                .max_by(|a, b| a.total_cmp(b))
                .map(|v| (*v).clone())
                .unwrap_or_default(),
            Function::Var => variance(&numbers).map(Value::Float).unwrap_or_default(),
            Function::Std => variance(&numbers)
                .map(|v| Value::Float(v.sqrt()))
                .unwrap_or_default(),
            Function::First => present.first().map(|v| (*v).clone()).unwrap_or_default(),
            Function::Last => present.last().map(|v| (*v).clone()).unwrap_or_default(),
            Function::NUnique => Value::from(distinct(&present).len()),
            Function::Unique => Value::Array(distinct(&present)),
            Function::List => Value::Array(values.to_vec()),
        }
    }
}

fn int_only(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        _ => None,
    }
}

fn median(mut numbers: Vec<f64>) -> Value {
    if numbers.is_empty() {
        return Value::Null;
    }
    numbers.sort_by(f64::total_cmp);
    let mid = numbers.len() / 2;
    let m = if numbers.len() % 2 == 0 {
        (numbers[mid - 1] + numbers[mid]) / 2.0
    } else {
        numbers[mid]
    };
    Value::Float(m)
}

/// Sample variance (n - 1); undefined below two values.
fn variance(numbers: &[f64]) -> Option<f64> {
    if numbers.len() < 2 {
        return None;
    }
    let n = numbers.len() as f64;
    let mean = numbers.iter().sum::<f64>() / n;
    Some(numbers.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

fn distinct(values: &[&Value]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for v in values {
        if !out.iter().any(|seen| seen.loose_eq(v)) {
            out.push((*v).clone());
        }
    }
    out
}

impl ActionHandler for AggregateAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Aggregate
    }

    fn apply(
        &self,
        _ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let by = params
            .string_list("by")
            .or_else(|| params.string_list("groupby"))
            .unwrap_or_default();
        let function_name = params.str("function").unwrap_or_else(|| "count".to_string());
        let Some(function) = Function::parse(&function_name) else {
            tracing::error!(function = %function_name, "unknown aggregate function");
            return Ok(None);
        };
        let column = params.str("column");
        if column.is_none() && function != Function::Count {
            return Err(ActionError::invalid("column", "aggregate needs a column"));
        }

        let table = dataset.into_table()?;
        let key_idx = by
            .iter()
            .map(|c| table.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        let value_idx = column.as_deref().map(|c| table.require_column(c)).transpose()?;

        let mut groups: IndexMap<Vec<GroupKey>, (Vec<Value>, Vec<Value>)> = IndexMap::new();
        for row in table.rows() {
            let keys: Vec<&Value> = key_idx.iter().map(|&i| &row[i]).collect();
            let entry = groups
                .entry(keys.iter().map(|v| v.group_key()).collect())
                .or_insert_with(|| (keys.iter().map(|v| (*v).clone()).collect(), Vec::new()));
            entry.1.push(match value_idx {
                Some(i) => row[i].clone(),
                None => Value::Bool(true),
            });
        }

        let output_name = params
            .str("alias")
            .or(column)
            .unwrap_or_else(|| "count".to_string());
        let mut columns = by.clone();
        columns.push(output_name);

        let mut out = Table::new(columns);
        for (_, (mut keys, values)) in groups {
            keys.push(function.reduce(&values));
            out.push_row(keys);
        }
        tracing::debug!(groups = out.len(), function = %function_name, "aggregated");
        Ok(Some(Dataset::Table(out)))
    }
}
