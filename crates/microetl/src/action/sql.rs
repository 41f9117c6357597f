use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind, Role};
use crate::context::RunContext;
use crate::dataset::Dataset;
use crate::datasource;
use crate::params::ResolvedParameters;
use crate::value::Value;

/// Run a query against the connector of `location` (default `source`).
///
/// The result table replaces the dataset. With `execute_only: true` the
/// statement runs for its side effects and the dataset passes through.
pub struct SqlAction;

impl ActionHandler for SqlAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Sql
    }

    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        // Placeholders stay unrendered so values go through bind markers.
        let template = match action.param("query").and_then(Value::as_str) {
            Some(query) if !query.trim().is_empty() => query.to_string(),
            _ => {
                let file = params
                    .str("query_file")
                    .ok_or_else(|| ActionError::invalid("query", "sql needs query or query_file"))?;
                datasource::read_query_file(ctx, &file)?
            }
        };

        let location = action.location.as_deref().or(params.get("location").and_then(Value::as_str));
        let role = Role::from_location(location);
        let spec = ctx.datasource(role)?;
        let result = datasource::run_query(ctx, spec, role, &template, params.values())?;

        if params.bool("execute_only").unwrap_or(false) {
            return Ok(Some(dataset));
        }
        if result.is_none() {
            tracing::error!(role = %role, "sql statement produced no result set");
        }
        Ok(result)
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use super::super::testing::*;
    use super::*;

    const JOB: &str = "datasources:\n  source:\n    type: sqlite\n    database: shop.db\n  destination:\n    type: sqlite\n    database: shop.db\n";

    #[test]
    fn test_query_replaces_dataset_with_bound_params() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), JOB);
        run(
            &ctx,
            ActionKind::Sql,
            "query: CREATE TABLE items (name TEXT, price REAL)\nexecute_only: true",
        )
        .unwrap();
        run(
            &ctx,
            ActionKind::Sql,
            "query: \"INSERT INTO items VALUES ('pen', 1.5), ('ink', 4.0)\"\nexecute_only: true",
        )
        .unwrap();

        let out = run(
            &ctx,
            ActionKind::Sql,
            "query: SELECT name FROM items WHERE price > {{ min_price }}\nmin_price: 2",
        )
        .unwrap()
        .unwrap();
        assert_eq!(column(&out, "name"), vec![Value::from("ink")]);
    }

    #[test]
    fn test_query_file_against_destination() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("count.sql"), "SELECT 41 + {{ n }} AS answer").unwrap();
        let ctx = context_in(dir.path(), JOB);
        let action = Action::new(ActionKind::Sql)
            .location("destination")
            .parameters(serde_yaml::from_str::<Value>("query_file: count.sql\nn: 1").unwrap());
        let out = crate::action::process(&ctx, &action, Dataset::empty())
            .unwrap()
            .unwrap();
        assert_eq!(column(&out, "answer"), vec![Value::Int(42)]);
    }

    #[test]
    fn test_statement_without_result_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), JOB);
        let out = run(&ctx, ActionKind::Sql, "query: CREATE TABLE t (a INTEGER)").unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn test_unbound_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), JOB);
        let err = run(&ctx, ActionKind::Sql, "query: SELECT {{ missing }}").unwrap_err();
        assert!(matches!(
            err,
            ActionError::Datasource(crate::datasource::DatasourceError::Param(_))
        ));
    }
}
