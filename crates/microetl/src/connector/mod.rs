//! Datasource connectors and their registry.
//!
//! A connector speaks to one backend kind through a small boundary:
//! `connect → cursor → execute → close`, plus `write_table` for sinks.
//! Handles are type-erased so the registry can hold any backend.

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteConnector;

use crate::config::{DatasourceKind, DatasourceSpec, Paths};
use crate::dataset::{Dataset, Table};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::sync::Arc;

/// An open backend connection.
pub struct Connection {
    kind: DatasourceKind,
    handle: Box<dyn Any + Send>,
}

impl Connection {
    pub fn new(kind: DatasourceKind, handle: impl Any + Send) -> Self {
        Self {
            kind,
            handle: Box::new(handle),
        }
    }

    pub fn kind(&self) -> DatasourceKind {
        self.kind
    }

    /// Borrow the backend handle as its concrete type.
    pub fn handle_mut<T: Any>(&mut self) -> Result<&mut T, ConnectorError> {
        let kind = self.kind;
        self.handle
            .downcast_mut::<T>()
            .ok_or(ConnectorError::HandleMismatch(kind))
    }

    /// Take the backend handle back, consuming the connection.
    pub fn into_handle<T: Any>(self) -> Result<T, ConnectorError> {
        let kind = self.kind;
        self.handle
            .downcast::<T>()
            .map(|b| *b)
            .map_err(|_| ConnectorError::HandleMismatch(kind))
    }
}

/// Per-statement execution state.
#[derive(Debug, Default)]
pub struct Cursor {
    /// Rows affected by the last statement without a result set.
    pub rowcount: Option<usize>,
}

/// A statement or lookup to run against a backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    /// Statement text, already compiled to the backend's bind markers.
    pub text: String,
    /// Backend-specific options (collection, index, ...).
    pub options: Map,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Map::new(),
        }
    }
}

/// Bind marker style used by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamStyle {
    /// `?`
    #[default]
    Qmark,
    /// `$1`, `$2`, ...
    Numeric,
    /// `%s`
    Format,
}

/// A datasource backend.
pub trait Connector: Send + Sync {
    /// Backend kind served by this connector.
    fn kind(&self) -> DatasourceKind;

    /// Bind marker style expected by `execute`.
    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    /// Open a connection. Relative file locations resolve against `paths`.
    fn connect(&self, spec: &DatasourceSpec, paths: &Paths) -> Result<Connection, ConnectorError>;

    /// Open a cursor on a connection.
    fn cursor(&self, conn: &mut Connection) -> Result<Cursor, ConnectorError> {
        let _ = conn;
        Ok(Cursor::default())
    }

    /// Run a query. `None` means the statement produced no result set.
    fn execute(
        &self,
        conn: &mut Connection,
        cursor: &mut Cursor,
        query: &Query,
        params: &[Value],
    ) -> Result<Option<Dataset>, ConnectorError>;

    /// Close a connection.
    fn close(&self, conn: Connection) -> Result<(), ConnectorError> {
        drop(conn);
        Ok(())
    }

    /// Write a table to the backend.
    ///
    /// Default implementation returns an error - override for sinks.
    fn write_table(
        &self,
        conn: &mut Connection,
        table_name: &str,
        table: &Table,
    ) -> Result<usize, ConnectorError> {
        let _ = (conn, table_name, table);
        Err(ConnectorError::Unsupported {
            kind: self.kind(),
            operation: "write_table",
        })
    }
}

/// Registry of available connectors.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: IndexMap<DatasourceKind, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in connectors (`none`, and `sqlite` when enabled).
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NoneConnector);
        #[cfg(feature = "sqlite")]
        registry.register(SqliteConnector);
        registry
    }

    /// Register a connector, replacing any previous one for its kind.
    pub fn register(&mut self, connector: impl Connector + 'static) {
        self.connectors.insert(connector.kind(), Arc::new(connector));
    }

    /// Get the connector for a kind.
    pub fn get(&self, kind: DatasourceKind) -> Result<Arc<dyn Connector>, ConnectorError> {
        self.connectors
            .get(&kind)
            .cloned()
            .ok_or(ConnectorError::Unregistered(kind))
    }

    /// Registered kinds, in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = DatasourceKind> + '_ {
        self.connectors.keys().copied()
    }

    /// Open a session that closes its connection when dropped.
    pub fn open(
        &self,
        kind: DatasourceKind,
        spec: &DatasourceSpec,
        paths: &Paths,
    ) -> Result<Session, ConnectorError> {
        let connector = self.get(kind)?;
        let conn = connector.connect(spec, paths)?;
        tracing::debug!(kind = %kind, "connection opened");
        Ok(Session {
            connector,
            conn: Some(conn),
        })
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }
}

/// An open connection bound to its connector.
///
/// The connection is closed on drop; call [`Session::close`] to observe
/// close errors.
pub struct Session {
    connector: Arc<dyn Connector>,
    conn: Option<Connection>,
}

impl Session {
    pub fn param_style(&self) -> ParamStyle {
        self.connector.param_style()
    }

    fn conn(&mut self) -> Result<&mut Connection, ConnectorError> {
        self.conn.as_mut().ok_or(ConnectorError::Closed)
    }

    /// Open a cursor and run one query.
    pub fn query(&mut self, query: &Query, params: &[Value]) -> Result<Option<Dataset>, ConnectorError> {
        let connector = Arc::clone(&self.connector);
        let conn = self.conn()?;
        let mut cursor = connector.cursor(conn)?;
        let result = connector.execute(conn, &mut cursor, query, params)?;
        if let Some(n) = cursor.rowcount {
            tracing::debug!(rows = n, "statement executed");
        }
        Ok(result)
    }

    /// Write a table through the connector.
    pub fn write_table(&mut self, table_name: &str, table: &Table) -> Result<usize, ConnectorError> {
        let connector = Arc::clone(&self.connector);
        let conn = self.conn()?;
        connector.write_table(conn, table_name, table)
    }

    /// Close the connection now.
    pub fn close(mut self) -> Result<(), ConnectorError> {
        match self.conn.take() {
            Some(conn) => self.connector.close(conn),
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let kind = conn.kind();
            if let Err(e) = self.connector.close(conn) {
                tracing::warn!(kind = %kind, error = %e, "failed to close connection");
            }
        }
    }
}

/// Connector for `none`: accepts everything, returns empty tables.
pub struct NoneConnector;

impl Connector for NoneConnector {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::None
    }

    fn connect(&self, _spec: &DatasourceSpec, _paths: &Paths) -> Result<Connection, ConnectorError> {
        Ok(Connection::new(DatasourceKind::None, ()))
    }

    fn execute(
        &self,
        _conn: &mut Connection,
        _cursor: &mut Cursor,
        _query: &Query,
        _params: &[Value],
    ) -> Result<Option<Dataset>, ConnectorError> {
        Ok(Some(Dataset::empty()))
    }

    fn write_table(
        &self,
        _conn: &mut Connection,
        _table_name: &str,
        table: &Table,
    ) -> Result<usize, ConnectorError> {
        Ok(table.len())
    }
}

/// Errors raised by connectors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("no connector registered for '{0}'")]
    Unregistered(DatasourceKind),

    #[error("failed to connect to {kind}: {message}")]
    Connect {
        kind: DatasourceKind,
        message: String,
    },

    #[error("query failed: {0}")]
    Query(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("{kind} connector does not support {operation}")]
    Unsupported {
        kind: DatasourceKind,
        operation: &'static str,
    },

    #[error("connection handle does not belong to the {0} connector")]
    HandleMismatch(DatasourceKind),

    #[error("connection already closed")]
    Closed,
}

impl ConnectorError {
    /// Whether the failure happened while connecting rather than querying.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ConnectorError::Unregistered(_)
                | ConnectorError::Connect { .. }
                | ConnectorError::HandleMismatch(_)
                | ConnectorError::Closed
        )
    }
}
