//! microetl: configuration-driven ETL pipelines
//!
//! A job file names a source, a destination and an ordered sequence of
//! transform actions. The executor reads the source into a [`Dataset`],
//! runs each action through the [`ActionRegistry`], and writes the result.

pub mod action;
pub mod api;
pub mod config;
pub mod connector;
pub mod context;
pub mod dataset;
pub mod datasource;
mod error;
pub mod executor;
pub mod format;
pub mod mapping;
pub mod params;
pub mod predicate;
pub mod schema;
mod value;

pub use action::{ActionError, ActionHandler, ActionRegistry};
pub use api::{ApiClient, ApiError, ApiRequest};
pub use config::{Action, ActionKind, ConfigError, DatasourceKind, DatasourceSpec, JobConfig, Paths, Role};
pub use connector::{Connector, ConnectorError, ConnectorRegistry};
pub use context::{ExecutionContext, RunContext};
pub use dataset::{Dataset, DatasetError, Table};
pub use error::{ErrorClass, PipelineError};
pub use executor::{BatchReport, RunReport, State, run, run_job, run_jobs};
pub use format::{Format, FormatError, FormatRegistry};
pub use mapping::{Mapping, MappingError};
pub use schema::{JsonSchemaValidator, SchemaValidator};
pub use value::{GroupKey, Map, MapExt, Value};
