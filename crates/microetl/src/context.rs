//! Execution contexts.
//!
//! [`ExecutionContext`] holds the registries and collaborators shared by
//! every job of a run. [`RunContext`] is the immutable view of one job.

use crate::action::ActionRegistry;
use crate::api::{self, ApiClient};
use crate::config::{ConfigError, DatasourceSpec, JobConfig, Paths, Role};
use crate::connector::ConnectorRegistry;
use crate::format::FormatRegistry;
use crate::schema::{self, JsonSchemaValidator, SchemaError, SchemaValidator};
use crate::value::Value;
use std::sync::Arc;

/// Collaborators for running jobs.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Action handlers by kind.
    pub actions: Arc<ActionRegistry>,
    /// Backend connectors by datasource kind.
    pub connectors: Arc<ConnectorRegistry>,
    /// Flat-file formats.
    pub formats: Arc<FormatRegistry>,
    /// HTTP API client for `api` datasources.
    pub api: Arc<dyn ApiClient>,
    /// Schema validator for `dsl`, `jq` and `validate`.
    pub validator: Arc<dyn SchemaValidator>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Context with every built-in registered.
    pub fn new() -> Self {
        Self {
            actions: Arc::new(ActionRegistry::with_builtins()),
            connectors: Arc::new(ConnectorRegistry::with_builtins()),
            formats: Arc::new(FormatRegistry::with_builtins()),
            api: api::default_client(),
            validator: Arc::new(JsonSchemaValidator),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = Arc::new(actions);
        self
    }

    pub fn with_connectors(mut self, connectors: ConnectorRegistry) -> Self {
        self.connectors = Arc::new(connectors);
        self
    }

    pub fn with_formats(mut self, formats: FormatRegistry) -> Self {
        self.formats = Arc::new(formats);
        self
    }

    pub fn with_api_client(mut self, client: impl ApiClient + 'static) -> Self {
        self.api = Arc::new(client);
        self
    }

    pub fn with_validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }
}

/// Everything an action may look at while a job runs.
#[derive(Clone)]
pub struct RunContext {
    job: String,
    config: JobConfig,
    exec: ExecutionContext,
}

impl RunContext {
    pub fn new(job: impl Into<String>, config: JobConfig, exec: ExecutionContext) -> Self {
        Self {
            job: job.into(),
            config,
            exec,
        }
    }

    /// Job name (the job file stem).
    pub fn job(&self) -> &str {
        &self.job
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.config.paths
    }

    pub fn exec(&self) -> &ExecutionContext {
        &self.exec
    }

    /// The datasource for a role, or a configuration error.
    pub fn datasource(&self, role: Role) -> Result<&DatasourceSpec, ConfigError> {
        self.config
            .datasource(role)
            .ok_or_else(|| ConfigError::MissingDatasource(role.key().to_string()))
    }

    /// Load a schema by name (from `schemas`) or path (relative to the
    /// input directory).
    pub fn load_schema(&self, reference: &str) -> Result<Value, SchemaError> {
        let path = self.config.schema_path(reference);
        schema::load_schema(&path, self.exec.validator.as_ref())
    }
}
