use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind};
use crate::context::RunContext;
use crate::dataset::Dataset;
use crate::params::ResolvedParameters;
use crate::value::Value;
use std::cmp::Ordering;

/// Stable sort by one or more columns. Nulls sort last in either direction.
pub struct SortAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "" | "asc" | "ascending" => Some(Direction::Ascending),
            "desc" | "descending" => Some(Direction::Descending),
            _ => None,
        }
    }
}

impl ActionHandler for SortAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Sort
    }

    fn apply(
        &self,
        _ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let columns = params
            .string_list("column")
            .or_else(|| params.string_list("by"))
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ActionError::invalid("column", "sort needs a column"))?;
        let direction_text = params.str("direction").unwrap_or_default();
        let Some(direction) = Direction::parse(&direction_text) else {
            tracing::error!(direction = %direction_text, "unknown sort direction");
            return Ok(None);
        };

        let mut table = dataset.into_table()?;
        let indices = columns
            .iter()
            .map(|c| table.require_column(c))
            .collect::<Result<Vec<_>, _>>()?;

        table.sort_rows_by(|a, b| {
            indices
                .iter()
                .map(|&i| compare(&a[i], &b[i], direction))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(Some(Dataset::Table(table)))
    }
}

fn compare(a: &Value, b: &Value, direction: Direction) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        _ => match direction {
            Direction::Ascending => a.total_cmp(b),
            Direction::Descending => b.total_cmp(a),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    #[test]
    fn test_sort_ascending_nulls_last() {
        let input = table(&["age"], &["[25]", "[null]", "[18]", "[21]"]);
        let out = run_on(&context(), ActionKind::Sort, "column: age", input)
            .unwrap()
            .unwrap();
        assert_eq!(
            column(&out, "age"),
            vec![Value::Int(18), Value::Int(21), Value::Int(25), Value::Null]
        );
    }

    #[test]
    fn test_sort_descending_is_stable() {
        let input = table(
            &["name", "age"],
            &[r#"["a", 2]"#, r#"["b", 1]"#, r#"["c", 2]"#, r#"["d", null]"#],
        );
        let out = run_on(&context(), ActionKind::Sort, "column: age\ndirection: DESC", input)
            .unwrap()
            .unwrap();
        assert_eq!(
            column(&out, "name"),
            vec![Value::from("a"), Value::from("c"), Value::from("b"), Value::from("d")]
        );
    }

    #[test]
    fn test_mixed_numbers_before_strings() {
        let input = table(&["v"], &[r#"["x"]"#, "[2]", "[1.5]"]);
        let out = run_on(&context(), ActionKind::Sort, "column: v", input)
            .unwrap()
            .unwrap();
        assert_eq!(
            column(&out, "v"),
            vec![Value::Float(1.5), Value::Int(2), Value::from("x")]
        );
    }

    #[test]
    fn test_unknown_direction_yields_none() {
        let input = table(&["age"], &["[1]"]);
        let out = run_on(&context(), ActionKind::Sort, "column: age\ndirection: sideways", input).unwrap();
        assert!(out.is_none());
    }
}
