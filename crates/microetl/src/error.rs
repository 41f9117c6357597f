//! Pipeline errors and their failure classes.
//!
//! Component errors keep their own enums; [`PipelineError`] adds the
//! pipeline position, and [`ErrorClass`] decides how far a failure
//! reaches. Configuration, connection and query failures stop the whole
//! run; everything else fails only the job it happened in.

use crate::action::ActionError;
use crate::config::{ConfigError, Role};
use crate::connector::ConnectorError;
use crate::datasource::DatasourceError;
use crate::format::FormatError;
use crate::params::ParamError;
use std::fmt;

/// Failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Config,
    Connection,
    Query,
    Transform,
    Validation,
    Io,
}

impl ErrorClass {
    /// Whether failures of this class stop every remaining job.
    pub fn is_fatal_for_run(self) -> bool {
        matches!(
            self,
            ErrorClass::Config | ErrorClass::Connection | ErrorClass::Query
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Config => "config",
            ErrorClass::Connection => "connection",
            ErrorClass::Query => "query",
            ErrorClass::Transform => "transform",
            ErrorClass::Validation => "validation",
            ErrorClass::Io => "io",
        })
    }
}

/// Errors that fail a job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to read {role}: {source}")]
    Read {
        role: Role,
        #[source]
        source: DatasourceError,
    },

    #[error("failed to write {role}: {source}")]
    Write {
        role: Role,
        #[source]
        source: DatasourceError,
    },

    #[error("action {index} ({kind}) in {section} failed: {source}")]
    Action {
        section: String,
        index: usize,
        kind: String,
        #[source]
        source: ActionError,
    },

    #[error("action {index} ({kind}) in {section} produced no dataset")]
    NullDataset {
        section: String,
        index: usize,
        kind: String,
    },

    #[error("failed to list jobs in {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Config(_) => ErrorClass::Config,
            PipelineError::Read { source, .. } | PipelineError::Write { source, .. } => {
                datasource_class(source)
            }
            PipelineError::Action { source, .. } => action_class(source),
            PipelineError::NullDataset { .. } => ErrorClass::Transform,
            PipelineError::Io { .. } => ErrorClass::Io,
        }
    }

    /// Whether this failure stops every remaining job.
    pub fn is_fatal_for_run(&self) -> bool {
        self.class().is_fatal_for_run()
    }
}

fn connector_class(e: &ConnectorError) -> ErrorClass {
    match e {
        e if e.is_connection() => ErrorClass::Connection,
        ConnectorError::Unsupported { .. } => ErrorClass::Config,
        _ => ErrorClass::Query,
    }
}

fn param_class(e: &ParamError) -> ErrorClass {
    match e {
        ParamError::Unbound(_) | ParamError::UnknownFilter(_) => ErrorClass::Query,
        ParamError::File { .. } => ErrorClass::Io,
        ParamError::Parse { .. } | ParamError::Shape(_) | ParamError::Missing(_) => {
            ErrorClass::Config
        }
    }
}

fn format_class(e: &FormatError) -> ErrorClass {
    match e {
        FormatError::Io { .. } => ErrorClass::Io,
        FormatError::Unknown(_) | FormatError::NoExtension(_) | FormatError::ReadOnly(_) => {
            ErrorClass::Config
        }
        _ => ErrorClass::Transform,
    }
}

fn datasource_class(e: &DatasourceError) -> ErrorClass {
    match e {
        DatasourceError::Config(_)
        | DatasourceError::MissingPath(_)
        | DatasourceError::MissingApi(_)
        | DatasourceError::MissingQuery(_)
        | DatasourceError::NotQueryable(_)
        | DatasourceError::UnsupportedSink(_) => ErrorClass::Config,
        DatasourceError::Connector(e) => connector_class(e),
        DatasourceError::Format(e) => format_class(e),
        DatasourceError::Api(_) => ErrorClass::Connection,
        DatasourceError::Param(e) => param_class(e),
        DatasourceError::Dataset(_) => ErrorClass::Transform,
        DatasourceError::QueryFile { .. } => ErrorClass::Io,
        DatasourceError::NoResult(_) => ErrorClass::Query,
    }
}

fn action_class(e: &ActionError) -> ErrorClass {
    match e {
        ActionError::Param(e) => param_class(e),
        ActionError::Config(_) => ErrorClass::Config,
        ActionError::Datasource(e) => datasource_class(e),
        ActionError::Format(e) => format_class(e),
        ActionError::Schema(_) | ActionError::Validation(_) => ErrorClass::Validation,
        ActionError::Output(_) => ErrorClass::Io,
        ActionError::Dataset(_)
        | ActionError::Mapping(_)
        | ActionError::UnknownOperator(_)
        | ActionError::InvalidParameter { .. }
        | ActionError::UnsupportedTarget(_) => ErrorClass::Transform,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasourceKind;

    fn action_error(source: ActionError) -> PipelineError {
        PipelineError::Action {
            section: "transform".into(),
            index: 2,
            kind: "filter".into(),
            source,
        }
    }

    #[test]
    fn test_connection_failures_stop_the_run() {
        let err = PipelineError::Read {
            role: Role::Source,
            source: ConnectorError::Connect {
                kind: DatasourceKind::Sqlite,
                message: "refused".into(),
            }
            .into(),
        };
        assert_eq!(err.class(), ErrorClass::Connection);
        assert!(err.is_fatal_for_run());
    }

    #[test]
    fn test_unbound_parameter_is_a_query_error() {
        let err = action_error(ActionError::Datasource(
            ParamError::Unbound("since".into()).into(),
        ));
        assert_eq!(err.class(), ErrorClass::Query);
    }

    #[test]
    fn test_transform_failures_are_job_local() {
        let err = action_error(ActionError::UnknownOperator("like".into()));
        assert_eq!(err.class(), ErrorClass::Transform);
        assert!(!err.is_fatal_for_run());
        assert!(err.to_string().contains("action 2 (filter) in transform"));

        let null = PipelineError::NullDataset {
            section: "transform".into(),
            index: 0,
            kind: "sort".into(),
        };
        assert!(!null.is_fatal_for_run());
    }

    #[test]
    fn test_validation_and_io() {
        let err = action_error(ActionError::Validation("customer.json".into()));
        assert_eq!(err.class(), ErrorClass::Validation);

        let err = PipelineError::Write {
            role: Role::Destination,
            source: FormatError::Io {
                path: "/out".into(),
                source: std::io::Error::other("disk full"),
            }
            .into(),
        };
        assert_eq!(err.class(), ErrorClass::Io);
        assert!(!err.is_fatal_for_run());
    }
}
