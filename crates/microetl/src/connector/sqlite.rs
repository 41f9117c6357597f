//! `SQLite` connector backed by rusqlite.
//!
//! `database` is a file path (relative to the input directory) or
//! `:memory:`.

use super::{Connection, Connector, ConnectorError, Cursor, ParamStyle, Query};
use crate::config::{DatasourceKind, DatasourceSpec, Paths};
use crate::dataset::{Dataset, Table};
use crate::value::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};

const MEMORY: &str = ":memory:";

pub struct SqliteConnector;

impl Connector for SqliteConnector {
    fn kind(&self) -> DatasourceKind {
        DatasourceKind::Sqlite
    }

    fn param_style(&self) -> ParamStyle {
        ParamStyle::Qmark
    }

    fn connect(&self, spec: &DatasourceSpec, paths: &Paths) -> Result<Connection, ConnectorError> {
        let database = spec.database.as_deref().unwrap_or(MEMORY);
        let conn = if database == MEMORY {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(paths.input(database))
        }
        .map_err(|e| ConnectorError::Connect {
            kind: DatasourceKind::Sqlite,
            message: e.to_string(),
        })?;
        Ok(Connection::new(DatasourceKind::Sqlite, conn))
    }

    fn execute(
        &self,
        conn: &mut Connection,
        cursor: &mut Cursor,
        query: &Query,
        params: &[Value],
    ) -> Result<Option<Dataset>, ConnectorError> {
        let db = conn.handle_mut::<rusqlite::Connection>()?;
        let mut stmt = db.prepare(&query.text).map_err(query_error)?;
        let bound = params.iter().map(to_sql);

        if stmt.column_count() == 0 {
            let n = stmt
                .execute(rusqlite::params_from_iter(bound))
                .map_err(query_error)?;
            cursor.rowcount = Some(n);
            return Ok(None);
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut table = Table::new(columns);
        let mut rows = stmt
            .query(rusqlite::params_from_iter(bound))
            .map_err(query_error)?;
        while let Some(row) = rows.next().map_err(query_error)? {
            let mut cells = Vec::with_capacity(width);
            for i in 0..width {
                cells.push(from_sql(row.get_ref(i).map_err(query_error)?));
            }
            table.push_row(cells);
        }
        cursor.rowcount = Some(table.len());
        Ok(Some(Dataset::Table(table)))
    }

    fn close(&self, conn: Connection) -> Result<(), ConnectorError> {
        let db = conn.into_handle::<rusqlite::Connection>()?;
        db.close().map_err(|(_, e)| ConnectorError::Query(e.to_string()))
    }

    fn write_table(
        &self,
        conn: &mut Connection,
        table_name: &str,
        table: &Table,
    ) -> Result<usize, ConnectorError> {
        let db = conn.handle_mut::<rusqlite::Connection>()?;
        let columns: Vec<String> = table.columns().iter().map(|c| quote_ident(c)).collect();
        let name = quote_ident(table_name);

        let tx = db.transaction().map_err(write_error)?;
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            name,
            columns.join(", ")
        ))
        .map_err(write_error)?;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            name,
            columns.join(", "),
            placeholders
        );
        {
            let mut stmt = tx.prepare(&insert).map_err(write_error)?;
            for row in table.rows() {
                stmt.execute(rusqlite::params_from_iter(row.iter().map(to_sql)))
                    .map_err(write_error)?;
            }
        }
        tx.commit().map_err(write_error)?;
        Ok(table.len())
    }
}

fn query_error(e: rusqlite::Error) -> ConnectorError {
    ConnectorError::Query(e.to_string())
}

fn write_error(e: rusqlite::Error) -> ConnectorError {
    ConnectorError::Write(e.to_string())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        // Nested values are stored as JSON text.
        other => SqlValue::Text(other.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
