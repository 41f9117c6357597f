use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind, Role};
use crate::context::RunContext;
use crate::dataset::{Dataset, Table};
use crate::datasource;
use crate::params::ResolvedParameters;
use crate::value::{Map, Value};

/// Join the dataset with a secondary table on one column.
pub struct JoinAction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum How {
    Inner,
    Left,
    Right,
    Outer,
}

impl How {
    fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "" | "inner" => Some(How::Inner),
            "left" => Some(How::Left),
            "right" => Some(How::Right),
            "outer" | "full" => Some(How::Outer),
            _ => None,
        }
    }
}

const COLLISION_SUFFIX: &str = "_right";

impl ActionHandler for JoinAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Join
    }

    fn apply(
        &self,
        ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let on = params.require_str("on")?;
        let how_text = params
            .str("how")
            .or_else(|| params.str("name"))
            .unwrap_or_default();
        let how = How::parse(&how_text)
            .ok_or_else(|| ActionError::invalid("how", format!("unknown join type '{}'", how_text)))?;

        let left = dataset.into_table()?;
        let Some(right) = secondary(ctx, params)? else {
            tracing::error!("join query produced no result set");
            return Ok(None);
        };
        let joined = join(&left, &right, &on, how)?;
        tracing::debug!(
            how = %how_text,
            left = left.len(),
            right = right.len(),
            rows = joined.len(),
            "joined"
        );
        Ok(Some(Dataset::Table(joined)))
    }
}

/// Load the right-hand table from `with` (or top-level `rows`).
fn secondary(ctx: &RunContext, params: &ResolvedParameters) -> Result<Option<Table>, ActionError> {
    let with = params
        .get("with")
        .or_else(|| params.get("rows"))
        .ok_or_else(|| ActionError::invalid("with", "join needs a secondary dataset"))?;

    match with {
        Value::Array(items) => records(items).map(Some),
        Value::String(path) => read_file(ctx, path, None).map(Some),
        Value::Object(obj) => {
            if let Some(Value::Array(items)) = obj.get("rows") {
                return records(items).map(Some);
            }
            if let Some(path) = obj.get("path").or_else(|| obj.get("file")) {
                let format = obj.get("format").and_then(Value::as_str);
                return read_file(ctx, &path.to_text(), format).map(Some);
            }
            if let Some(query) = obj.get("query").and_then(Value::as_str) {
                let role = Role::from_location(obj.get("location").and_then(Value::as_str));
                let spec = ctx.datasource(role)?;
                let bindings = match obj.get("parameters") {
                    Some(Value::Object(p)) => p.clone(),
                    _ => params.values().clone(),
                };
                let result = datasource::run_query(ctx, spec, role, query, &bindings)?;
                return result.map(Dataset::into_table).transpose().map_err(Into::into);
            }
            Err(ActionError::invalid("with", "expected rows, path or query"))
        }
        other => Err(ActionError::invalid(
            "with",
            format!("unsupported secondary dataset of type {}", other.type_name()),
        )),
    }
}

fn records(items: &[Value]) -> Result<Table, ActionError> {
    Ok(Dataset::Document(Value::Array(items.to_vec())).into_table()?)
}

fn read_file(ctx: &RunContext, relative: &str, format: Option<&str>) -> Result<Table, ActionError> {
    let path = ctx.paths().input(relative);
    let dataset = ctx.exec().formats.read_path(&path, format, &Map::new())?;
    Ok(dataset.into_table()?)
}

fn join(left: &Table, right: &Table, on: &str, how: How) -> Result<Table, ActionError> {
    let lk = left.require_column(on)?;
    let rk = right.require_column(on)?;

    let right_cols: Vec<usize> = (0..right.width()).filter(|&i| i != rk).collect();
    let mut columns: Vec<String> = left.columns().to_vec();
    for &i in &right_cols {
        let name = &right.columns()[i];
        if left.column_index(name).is_some() {
            columns.push(format!("{}{}", name, COLLISION_SUFFIX));
        } else {
            columns.push(name.clone());
        }
    }

    let mut out = Table::new(columns);
    let mut right_matched = vec![false; right.len()];
    let nulls_right = vec![Value::Null; right_cols.len()];

    let emit = |out: &mut Table, l: &[Value], r: Option<&[Value]>| {
        let mut row = l.to_vec();
        match r {
            Some(r) => row.extend(right_cols.iter().map(|&i| r[i].clone())),
            None => row.extend(nulls_right.iter().cloned()),
        }
        out.push_row(row);
    };

    if how == How::Right {
        for r in right.rows() {
            let matches: Vec<&Vec<Value>> = left
                .rows()
                .iter()
                .filter(|l| keys_match(&l[lk], &r[rk]))
                .collect();
            if matches.is_empty() {
                let mut l = vec![Value::Null; left.width()];
                l[lk] = r[rk].clone();
                emit(&mut out, &l, Some(r.as_slice()));
            }
            for l in matches {
                emit(&mut out, l.as_slice(), Some(r.as_slice()));
            }
        }
        return Ok(out);
    }

    for l in left.rows() {
        let mut matched = false;
        for (ri, r) in right.rows().iter().enumerate() {
            if keys_match(&l[lk], &r[rk]) {
                matched = true;
                right_matched[ri] = true;
                emit(&mut out, l.as_slice(), Some(r.as_slice()));
            }
        }
        if !matched && matches!(how, How::Left | How::Outer) {
            emit(&mut out, l.as_slice(), None);
        }
    }
    if how == How::Outer {
        for (ri, r) in right.rows().iter().enumerate() {
            if !right_matched[ri] {
                let mut l = vec![Value::Null; left.width()];
                l[lk] = r[rk].clone();
                emit(&mut out, &l, Some(r.as_slice()));
            }
        }
    }
    Ok(out)
}

fn keys_match(a: &Value, b: &Value) -> bool {
    !a.is_null() && a.loose_eq(b)
}
