use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind};
use crate::context::RunContext;
use crate::dataset::{Dataset, Table};
use crate::params::ResolvedParameters;
use crate::value::{GroupKey, Value};
use indexmap::IndexMap;

/// Long-to-wide reshape: distinct values of the `columns` column become
/// new columns holding `values`.
pub struct PivotAction;

impl ActionHandler for PivotAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Pivot
    }

    fn apply(
        &self,
        _ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let index = params
            .string_list("index")
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ActionError::invalid("index", "pivot needs an index"))?;
        let names_col = params.require_str("columns")?;
        let values_col = params.require_str("values")?;

        let table = dataset.into_table()?;
        let index_idx = index
            .iter()
            .map(|c| table.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;
        let name_idx = table.require_column(&names_col)?;
        let value_idx = table.require_column(&values_col)?;

        let mut names: Vec<String> = Vec::new();
        let mut rows: IndexMap<Vec<GroupKey>, (Vec<Value>, IndexMap<String, Value>)> = IndexMap::new();
        for row in table.rows() {
            let name = row[name_idx].to_text();
            if !names.contains(&name) {
                names.push(name.clone());
            }
            let keys: Vec<Value> = index_idx.iter().map(|&i| row[i].clone()).collect();
            let key: Vec<GroupKey> = keys.iter().map(Value::group_key).collect();
            rows.entry(key)
                .or_insert_with(|| (keys, IndexMap::new()))
                .1
                .insert(name, row[value_idx].clone());
        }

        let mut columns = index.clone();
        columns.extend(names.iter().cloned());
        let mut out = Table::new(columns);
        for (_, (mut cells, by_name)) in rows {
            cells.extend(names.iter().map(|n| by_name.get(n).cloned().unwrap_or_default()));
            out.push_row(cells);
        }
        Ok(Some(Dataset::Table(out)))
    }
}
