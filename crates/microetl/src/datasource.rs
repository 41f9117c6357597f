//! Reading from and writing to datasources.
//!
//! Dispatch is by [`DatasourceKind`] family: backends go through the
//! connector registry, flat files through the format registry, `api`
//! through the API client, and `none` reads an empty table and writes
//! nothing.

use crate::api::ApiError;
use crate::config::{ConfigError, DatasourceKind, DatasourceSpec, KindFamily, Role};
use crate::connector::{ConnectorError, Query};
use crate::context::RunContext;
use crate::dataset::{Dataset, DatasetError};
use crate::format::FormatError;
use crate::params::{self, ParamError};
use crate::value::{Map, Value};
use std::path::PathBuf;

/// Read a dataset from a datasource.
pub fn read_datasource(
    ctx: &RunContext,
    spec: &DatasourceSpec,
    role: Role,
) -> Result<Dataset, DatasourceError> {
    let kind = spec.resolve_kind(role)?;
    tracing::debug!(role = %role, kind = %kind, "reading datasource");

    match kind.family() {
        KindFamily::None => Ok(Dataset::empty()),
        KindFamily::File => {
            let local = spec
                .local_input_data
                .as_deref()
                .ok_or(DatasourceError::MissingPath(role))?;
            let path = ctx.paths().input(local);
            let format = spec.format.as_deref().or(kind.implied_format());
            Ok(ctx.exec().formats.read_path(&path, format, &spec.options)?)
        }
        KindFamily::Api => {
            let request = spec.api.as_ref().ok_or(DatasourceError::MissingApi(role))?;
            let document = ctx.exec().api.fetch(request)?;
            Ok(Dataset::Document(document))
        }
        _ => {
            let template = source_query(ctx, spec, role)?;
            let bindings = query_bindings(ctx, spec)?;
            run_query(ctx, spec, role, &template, &bindings)?
                .ok_or(DatasourceError::NoResult(role))
        }
    }
}

/// Write a dataset to a datasource. Returns the number of records written.
pub fn write_datasource(
    ctx: &RunContext,
    spec: &DatasourceSpec,
    role: Role,
    dataset: &Dataset,
) -> Result<usize, DatasourceError> {
    let kind = spec.resolve_kind(role)?;
    tracing::debug!(role = %role, kind = %kind, "writing datasource");

    match kind.family() {
        KindFamily::None => Ok(0),
        KindFamily::File => {
            let local = spec
                .local_output_data
                .as_deref()
                .ok_or(DatasourceError::MissingPath(role))?;
            let format = spec.format.as_deref().or(kind.implied_format());
            let path = output_file(ctx, local, format);
            Ok(ctx
                .exec()
                .formats
                .write_path(&path, format, dataset, &spec.options)?)
        }
        KindFamily::Api => Err(DatasourceError::UnsupportedSink(kind)),
        _ => {
            let table_name = spec
                .table
                .clone()
                .unwrap_or_else(|| ctx.job().to_string());
            write_table(ctx, spec, kind, &table_name, dataset)
        }
    }
}

/// Write a dataset as a table through a backend connector.
pub fn write_table(
    ctx: &RunContext,
    spec: &DatasourceSpec,
    kind: DatasourceKind,
    table_name: &str,
    dataset: &Dataset,
) -> Result<usize, DatasourceError> {
    let table = dataset.clone().into_table()?;
    let mut session = ctx.exec().connectors.open(kind, spec, ctx.paths())?;
    let written = session.write_table(table_name, &table)?;
    session.close()?;
    tracing::debug!(table = table_name, rows = written, "table written");
    Ok(written)
}

/// Compile a query template and run it against a datasource's backend.
///
/// `None` means the statement produced no result set.
pub fn run_query(
    ctx: &RunContext,
    spec: &DatasourceSpec,
    role: Role,
    template: &str,
    bindings: &Map,
) -> Result<Option<Dataset>, DatasourceError> {
    let kind = spec.resolve_kind(role)?;
    if !kind.is_backend() && kind != DatasourceKind::None {
        return Err(DatasourceError::NotQueryable(kind));
    }
    let mut session = ctx.exec().connectors.open(kind, spec, ctx.paths())?;
    let compiled = params::compile_sql(template, bindings, session.param_style())?;
    tracing::debug!(role = %role, query = %compiled.text, params = compiled.params.len(), "running query");

    let query = Query {
        text: compiled.text,
        options: spec.options.clone(),
    };
    let result = session.query(&query, &compiled.params)?;
    session.close()?;
    Ok(result)
}

/// Read a query template from a file relative to the input directory.
pub fn read_query_file(ctx: &RunContext, relative: &str) -> Result<String, DatasourceError> {
    let path = ctx.paths().input(relative);
    std::fs::read_to_string(&path).map_err(|source| DatasourceError::QueryFile {
        path: path.display().to_string(),
        source,
    })
}

fn source_query(ctx: &RunContext, spec: &DatasourceSpec, role: Role) -> Result<String, DatasourceError> {
    match (&spec.query, &spec.query_file) {
        (Some(query), _) if !query.trim().is_empty() => Ok(query.clone()),
        (_, Some(file)) => read_query_file(ctx, file),
        _ => Err(DatasourceError::MissingQuery(role)),
    }
}

/// Bindings for a datasource query: the datasource's free-form options, with the
/// resolved `parameters` mapping layered on top.
fn query_bindings(ctx: &RunContext, spec: &DatasourceSpec) -> Result<Map, DatasourceError> {
    let mut bindings = spec.options.clone();
    if let Some(raw @ Value::Object(_)) = spec.options.get("parameters") {
        let resolved = params::resolve(ctx.paths(), raw)?;
        bindings.extend(resolved.values().clone());
    }
    Ok(bindings)
}

/// Destination file for a write. A directory gets `<job>.<ext>`.
fn output_file(ctx: &RunContext, local: &str, format: Option<&str>) -> PathBuf {
    let path = ctx.paths().output(local);
    let is_dir = path.is_dir() || local.ends_with('/') || local.ends_with('\\');
    if !is_dir {
        return path;
    }
    let ext = format.unwrap_or("json").trim_start_matches('.');
    path.join(format!("{}.{}", ctx.job(), ext))
}

/// Errors reading or writing datasources.
#[derive(Debug, thiserror::Error)]
pub enum DatasourceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("{0} has no local path configured")]
    MissingPath(Role),

    #[error("{0} has no api request configured")]
    MissingApi(Role),

    #[error("{0} has no query or query_file")]
    MissingQuery(Role),

    #[error("failed to read query file {path}: {source}")]
    QueryFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("query against {0} produced no result set")]
    NoResult(Role),

    #[error("cannot run queries against {0}")]
    NotQueryable(DatasourceKind),

    #[error("cannot write to {0}")]
    UnsupportedSink(DatasourceKind),
}
