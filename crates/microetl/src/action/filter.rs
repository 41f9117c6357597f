use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind};
use crate::context::RunContext;
use crate::dataset::Dataset;
use crate::params::ResolvedParameters;
use crate::predicate::{ColumnPredicate, Predicate};
use crate::value::Value;

/// Keep rows matching every `{name, operator, value}` filter, applied in
/// declared order.
pub struct FilterAction;

impl ActionHandler for FilterAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Filter
    }

    fn apply(
        &self,
        _ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let predicates = predicates(params)?;
        let mut table = dataset.into_table()?;

        for p in &predicates {
            let idx = table.require_column(&p.column)?;
            let before = table.len();
            table.retain_rows(|row| p.predicate.matches(&row[idx]));
            tracing::debug!(
                column = %p.column,
                before,
                after = table.len(),
                "filter applied"
            );
        }
        Ok(Some(Dataset::Table(table)))
    }
}

fn predicates(params: &ResolvedParameters) -> Result<Vec<ColumnPredicate>, ActionError> {
    let specs: Vec<&Value> = match params.get("filters") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        Some(other) => {
            return Err(ActionError::invalid(
                "filters",
                format!("expected a list, found {}", other.type_name()),
            ));
        }
        None if !params.items().is_empty() => params.items().iter().collect(),
        None if params.contains("name") => {
            return Ok(vec![column_predicate(&Value::Object(params.values().clone()))?]);
        }
        None => Vec::new(),
    };
    specs.into_iter().map(column_predicate).collect()
}

fn column_predicate(spec: &Value) -> Result<ColumnPredicate, ActionError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| ActionError::invalid("filters", "each filter must be a mapping"))?;
    let column = obj
        .get("name")
        .or_else(|| obj.get("column"))
        .map(Value::to_text)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ActionError::invalid("filters", "filter without a column name"))?;
    let operator = obj
        .get("operator")
        .or_else(|| obj.get("op"))
        .map(Value::to_text)
        .unwrap_or_else(|| "eq".to_string());
    let operand = obj.get("value").cloned().unwrap_or_default();
    Ok(ColumnPredicate::new(column, Predicate::parse(&operator, operand)?))
}
