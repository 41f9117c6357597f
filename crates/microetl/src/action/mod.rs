//! Action dispatch.
//!
//! Each [`ActionKind`] is served by one registered [`ActionHandler`].
//! [`process`] resolves an action's parameters, finds its handler and runs
//! it. An unknown tag is not an error: the dataset passes through
//! unchanged.

mod aggregate;
mod document;
mod filter;
mod io;
mod join;
mod pivot;
mod sort;
mod sql;

pub use aggregate::AggregateAction;
pub use document::{DslAction, JqAction, ValidateAction};
pub use filter::FilterAction;
pub use io::{ApiAction, PrintAction, ReadAction, WriteAction};
pub use join::JoinAction;
pub use pivot::PivotAction;
pub use sort::SortAction;
pub use sql::SqlAction;

use crate::config::{Action, ActionKind, ConfigError};
use crate::context::RunContext;
use crate::dataset::{Dataset, DatasetError};
use crate::datasource::DatasourceError;
use crate::format::FormatError;
use crate::mapping::MappingError;
use crate::params::{self, ParamError, ResolvedParameters};
use crate::predicate::PredicateError;
use crate::schema::SchemaError;
use indexmap::IndexMap;
use std::sync::Arc;

/// A pipeline step.
pub trait ActionHandler: Send + Sync {
    /// Kind served by this handler.
    fn kind(&self) -> ActionKind;

    /// Run the step.
    ///
    /// `Ok(None)` means the step could not produce a dataset; the executor
    /// treats that as a transform failure.
    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError>;
}

/// Registry of action handlers.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: IndexMap<ActionKind, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(FilterAction);
        registry.register(AggregateAction);
        registry.register(SortAction);
        registry.register(PivotAction);
        registry.register(JoinAction);
        registry.register(SqlAction);
        registry.register(DslAction);
        registry.register(JqAction);
        registry.register(ValidateAction);
        registry.register(ReadAction);
        registry.register(WriteAction);
        registry.register(PrintAction);
        registry.register(ApiAction);
        registry
    }

    /// Register a handler, replacing any previous one for its kind.
    pub fn register(&mut self, handler: impl ActionHandler + 'static) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn get(&self, kind: &ActionKind) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Kinds with a registered handler.
    pub fn kinds(&self) -> impl Iterator<Item = &ActionKind> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Run one action on a dataset.
pub fn process(
    ctx: &RunContext,
    action: &Action,
    dataset: Dataset,
) -> Result<Option<Dataset>, ActionError> {
    let handler = match ctx.exec().actions.get(&action.kind) {
        Some(handler) => handler,
        None => {
            tracing::warn!(action = %action.kind, "unknown action type, passing dataset through");
            return Ok(Some(dataset));
        }
    };
    let params = params::resolve(ctx.paths(), &action.parameters)?;
    tracing::debug!(action = %action.label(), records = dataset.record_count(), "applying action");
    handler.apply(ctx, action, &params, dataset)
}

/// Errors raised by actions.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Datasource(#[from] DatasourceError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unsupported write target: {0}")]
    UnsupportedTarget(String),

    #[error("document failed schema validation against {0}")]
    Validation(String),

    #[error("failed to write to stdout: {0}")]
    Output(#[from] std::io::Error),
}

impl From<PredicateError> for ActionError {
    fn from(e: PredicateError) -> Self {
        match e {
            PredicateError::UnknownOperator(op) => ActionError::UnknownOperator(op),
        }
    }
}

impl ActionError {
    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        ActionError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::{JobConfig, Paths};
    use crate::context::ExecutionContext;
    use crate::dataset::Table;
    use crate::value::{Map, Value};

    /// A context rooted at `dir` (input and output both point there).
    pub fn context_in(dir: &std::path::Path, yaml: &str) -> RunContext {
        let paths = Paths::under(dir).with_inp(dir).with_out(dir);
        let config = JobConfig::from_str_with_paths(yaml, &paths).unwrap();
        RunContext::new("test", config, ExecutionContext::new())
    }

    pub fn context() -> RunContext {
        RunContext::new("test", JobConfig::default(), ExecutionContext::new())
    }

    /// A table from column names and rows of JSON values.
    pub fn table(columns: &[&str], rows: &[&str]) -> Dataset {
        let rows = rows
            .iter()
            .map(|r| {
                let json: serde_json::Value = serde_json::from_str(r).unwrap();
                match Value::from(json) {
                    Value::Array(cells) => cells,
                    other => panic!("row must be an array: {:?}", other),
                }
            })
            .collect();
        let columns = columns.iter().map(|c| c.to_string()).collect();
        Dataset::Table(Table::from_rows(columns, rows).unwrap())
    }

    pub fn run(ctx: &RunContext, kind: ActionKind, params: &str) -> Result<Option<Dataset>, ActionError> {
        run_on(ctx, kind, params, Dataset::empty())
    }

    pub fn run_on(
        ctx: &RunContext,
        kind: ActionKind,
        params: &str,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let parameters: Value = serde_yaml::from_str(params).unwrap();
        let action = Action::new(kind).parameters(parameters);
        process(ctx, &action, dataset)
    }

    pub fn column(dataset: &Dataset, name: &str) -> Vec<Value> {
        dataset
            .as_table()
            .unwrap()
            .column_values(name)
            .unwrap()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn map(pairs: &[(&str, Value)]) -> Map {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }
}
