use super::{ActionError, ActionHandler};
use crate::api::ApiRequest;
use crate::config::{Action, ActionKind, Role};
use crate::context::RunContext;
use crate::dataset::{Dataset, Table};
use crate::datasource::{self, DatasourceError};
use crate::params::ResolvedParameters;
use crate::value::{Map, Value};
use std::io::Write;

/// Re-read a datasource, replacing the dataset.
pub struct ReadAction;

/// Write the dataset to a file or the destination database. The dataset
/// passes through.
pub struct WriteAction;

/// Show the dataset on stdout.
pub struct PrintAction;

/// Fetch a document from the HTTP API of a datasource.
pub struct ApiAction;

fn role_of(action: &Action, params: &ResolvedParameters) -> Role {
    let location = action.location.as_deref().or(params.get("location").and_then(Value::as_str));
    Role::from_location(location)
}

impl ActionHandler for ReadAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Read
    }

    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        _dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let role = role_of(action, params);
        let mut spec = ctx.datasource(role)?.clone();
        if let Some(path) = params.str("local_input_data").or_else(|| params.str("path")) {
            spec.local_input_data = Some(path);
        }
        if let Some(format) = params.str("format") {
            spec.format = Some(format);
        }
        // Raw so bind markers survive until the query is compiled.
        if let Some(query) = action.param("query").and_then(Value::as_str) {
            spec.query = Some(query.to_string());
        }
        if let Some(file) = params.str("query_file") {
            spec.query = None;
            spec.query_file = Some(file);
        }
        if let Some(Value::Object(bindings)) = action.param("parameters") {
            spec.options
                .insert("parameters".to_string(), Value::Object(bindings.clone()));
        }

        let dataset = datasource::read_datasource(ctx, &spec, role)?;
        tracing::debug!(role = %role, records = dataset.record_count(), "re-read datasource");
        Ok(Some(dataset))
    }
}

impl ActionHandler for WriteAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Write
    }

    fn apply(
        &self,
        ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let target = params.str("target").unwrap_or_else(|| "file".to_string());
        let written = match target.trim().to_lowercase().as_str() {
            "file" => {
                let relative = params.require_str("path")?;
                let path = ctx.paths().output(&relative);
                let format = params.str("format");
                ctx.exec()
                    .formats
                    .write_path(&path, format.as_deref(), &dataset, &Map::new())?
            }
            "db" | "database" => {
                let spec = ctx.datasource(Role::Destination)?;
                let kind = spec.resolve_kind(Role::Destination)?;
                if !kind.is_backend() {
                    return Err(DatasourceError::UnsupportedSink(kind).into());
                }
                let table = params
                    .str("table")
                    .or_else(|| spec.table.clone())
                    .unwrap_or_else(|| ctx.job().to_string());
                datasource::write_table(ctx, spec, kind, &table, &dataset)?
            }
            other => return Err(ActionError::UnsupportedTarget(other.to_string())),
        };
        tracing::info!(target = %target, records = written, "intermediate write");
        Ok(Some(dataset))
    }
}

impl ActionHandler for PrintAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Print
    }

    fn apply(
        &self,
        _ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let limit = params.usize("limit");
        tracing::info!(
            action = %action.label(),
            representation = %dataset.representation(),
            records = dataset.record_count(),
            "dataset"
        );
        let shown = match limit {
            Some(n) => head(&dataset, n)?,
            None => dataset.clone(),
        };
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", shown)?;
        Ok(Some(dataset))
    }
}

/// The first `n` records of a dataset.
fn head(dataset: &Dataset, n: usize) -> Result<Dataset, ActionError> {
    Ok(match dataset {
        Dataset::Table(t) => Dataset::Table(Table::from_rows(
            t.columns().to_vec(),
            t.rows().iter().take(n).cloned().collect(),
        )?),
        Dataset::Document(Value::Array(items)) => {
            Dataset::Document(Value::Array(items.iter().take(n).cloned().collect()))
        }
        other => other.clone(),
    })
}

impl ActionHandler for ApiAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Api
    }

    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        _dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let role = role_of(action, params);
        let configured = ctx.config().datasource(role).and_then(|s| s.api.clone());
        let request = match configured {
            Some(request) => request,
            None => match params.str("url") {
                Some(url) => ApiRequest::get(url),
                None => return Err(DatasourceError::MissingApi(role).into()),
            },
        }
        .with_overrides(params.values());

        let document = ctx.exec().api.fetch(&request).map_err(DatasourceError::from)?;
        Ok(Some(Dataset::Document(document)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::api::{ApiClient, ApiError};
    use crate::config::{JobConfig, Paths};
    use crate::context::ExecutionContext;
    use crate::value::MapExt;

    #[test]
    fn test_write_file_passes_dataset_through() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context_in(dir.path(), "{}");
        let input = table(&["a"], &["[1]", "[2]"]);
        let out = run_on(&ctx, ActionKind::Write, "target: file\npath: snap/step.json", input.clone())
            .unwrap()
            .unwrap();
        assert_eq!(out, input);

        let text = std::fs::read_to_string(dir.path().join("snap/step.json")).unwrap();
        assert!(text.contains("\"a\": 2"));
    }

    #[test]
    fn test_write_unknown_target() {
        let err = run_on(&context(), ActionKind::Write, "target: s3", Dataset::empty()).unwrap_err();
        assert!(matches!(err, ActionError::UnsupportedTarget(t) if t == "s3"));
    }

    #[test]
    fn test_read_overrides_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"x": 1}]"#).unwrap();
        std::fs::write(dir.path().join("b.json"), r#"[{"x": 2}, {"x": 3}]"#).unwrap();
        let ctx = context_in(
            dir.path(),
            "datasources:\n  source:\n    type: file\n    local_input_data: a.json\n",
        );
        let out = run(&ctx, ActionKind::Read, "{}").unwrap().unwrap();
        assert_eq!(out.record_count(), 1);

        let out = run(&ctx, ActionKind::Read, "path: b.json").unwrap().unwrap();
        let t = out.into_table().unwrap();
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(1, "x"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_read_without_datasource() {
        let err = run(&context(), ActionKind::Read, "{}").unwrap_err();
        assert!(matches!(err, ActionError::Config(_)));
    }

    #[test]
    fn test_print_keeps_dataset() {
        let input = table(&["a"], &["[1]", "[2]", "[3]"]);
        let out = run_on(&context(), ActionKind::Print, "limit: 1", input.clone())
            .unwrap()
            .unwrap();
        assert_eq!(out, input);
        let shown = head(&input, 2).unwrap();
        assert_eq!(shown.record_count(), 2);
    }

    struct Echo;

    impl ApiClient for Echo {
        fn fetch(&self, request: &ApiRequest) -> Result<Value, ApiError> {
            Ok(Value::Object(
                Map::new()
                    .with("url", request.url.as_str())
                    .with("limit", request.limit.map(|l| l as i64)),
            ))
        }
    }

    #[test]
    fn test_api_uses_datasource_request_with_overrides() {
        let paths = Paths::under(".");
        let config = JobConfig::from_str_with_paths(
            "datasources:\n  source:\n    type: api\n    api:\n      url: https://example.test/items\n",
            &paths,
        )
        .unwrap();
        let ctx = RunContext::new("api", config, ExecutionContext::new().with_api_client(Echo));
        let out = run(&ctx, ActionKind::Api, "limit: 5").unwrap().unwrap();
        assert_eq!(
            out,
            Dataset::Document(Value::Object(
                Map::new()
                    .with("url", "https://example.test/items")
                    .with("limit", 5i64)
            ))
        );
    }

    #[test]
    fn test_api_without_request() {
        let err = run(&context(), ActionKind::Api, "{}").unwrap_err();
        assert!(matches!(err, ActionError::Datasource(DatasourceError::MissingApi(_))));
    }
}
