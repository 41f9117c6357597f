//! Datasets: the value flowing between pipeline stages.
//!
//! A dataset is either a [`Table`] (ordered columns, ordered rows) or a
//! document (a tree of [`Value`]s). Actions state which representation they
//! accept; conversion between the two is explicit and fallible.

use crate::value::{Map, Value};
use indexmap::IndexSet;
use std::fmt;

/// Tabular data: ordered columns and ordered rows of equal width.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Create a table from columns and rows.
    ///
    /// Short rows are padded with nulls, long rows are rejected.
    pub fn from_rows(
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, DatasetError> {
        let width = columns.len();
        let mut table = Self::new(columns);
        for (idx, row) in rows.into_iter().enumerate() {
            if row.len() > width {
                return Err(DatasetError::RowWidth {
                    row: idx,
                    expected: width,
                    found: row.len(),
                });
            }
            table.push_row(row);
        }
        Ok(table)
    }

    /// Build a table from a list of records. Columns are the union of all
    /// record keys in first-seen order; missing cells are null.
    pub fn from_records(records: &[Map]) -> Self {
        let mut columns: IndexSet<String> = IndexSet::new();
        for record in records {
            for key in record.keys() {
                columns.insert(key.clone());
            }
        }
        let columns: Vec<String> = columns.into_iter().collect();
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<Value>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Position of a column by name, or an error naming the missing column.
    pub fn require_column(&self, name: &str) -> Result<usize, DatasetError> {
        self.column_index(name)
            .ok_or_else(|| DatasetError::MissingColumn(name.to_string()))
    }

    /// Row by index.
    pub fn row(&self, idx: usize) -> Option<&[Value]> {
        self.rows.get(idx).map(Vec::as_slice)
    }

    /// Cell by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All values of one column, in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, DatasetError> {
        let col = self.require_column(name)?;
        Ok(self.rows.iter().map(|r| &r[col]).collect())
    }

    /// Append a row, padding it with nulls to the table width.
    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Keep only the rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Value]) -> bool) {
        self.rows.retain(|r| keep(r));
    }

    /// Reorder rows with a comparator. The sort is stable.
    pub fn sort_rows_by(&mut self, cmp: impl FnMut(&Vec<Value>, &Vec<Value>) -> std::cmp::Ordering) {
        self.rows.sort_by(cmp);
    }

    /// Row as an ordered record.
    pub fn record(&self, idx: usize) -> Option<Map> {
        let row = self.rows.get(idx)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect(),
        )
    }

    /// All rows as ordered records.
    pub fn records(&self) -> Vec<Map> {
        (0..self.rows.len()).filter_map(|i| self.record(i)).collect()
    }

    /// Append another table's rows. Columns are unioned; cells missing on
    /// either side become null.
    pub fn concat(&mut self, other: Table) {
        let mut mapping = Vec::with_capacity(other.columns.len());
        for column in &other.columns {
            let idx = match self.column_index(column) {
                Some(idx) => idx,
                None => {
                    self.columns.push(column.clone());
                    for row in &mut self.rows {
                        row.push(Value::Null);
                    }
                    self.columns.len() - 1
                }
            };
            mapping.push(idx);
        }
        let width = self.columns.len();
        for row in other.rows {
            let mut new_row = vec![Value::Null; width];
            for (value, &idx) in row.into_iter().zip(mapping.iter()) {
                new_row[idx] = value;
            }
            self.rows.push(new_row);
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(Value::to_text).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<w$}", c, w = *w))
            .collect();
        writeln!(f, "{}", header.join(" | ").trim_end())?;
        for row in &cells {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<w$}", c, w = *w))
                .collect();
            writeln!(f, "{}", line.join(" | ").trim_end())?;
        }
        write!(f, "[{} rows x {} columns]", self.rows.len(), self.columns.len())
    }
}

/// The value flowing through a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    Table(Table),
    Document(Value),
}

/// Which representation an action requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Representation {
    Table,
    Document,
}

impl fmt::Display for Representation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Representation::Table => f.write_str("table"),
            Representation::Document => f.write_str("document"),
        }
    }
}

impl Dataset {
    /// An empty table; what a `none` source produces.
    pub fn empty() -> Self {
        Dataset::Table(Table::default())
    }

    pub fn representation(&self) -> Representation {
        match self {
            Dataset::Table(_) => Representation::Table,
            Dataset::Document(_) => Representation::Document,
        }
    }

    /// Number of records: table rows, array length, or 1 for other documents.
    /// A `null` document. Stages treat it like no dataset at all.
    pub fn is_null(&self) -> bool {
        matches!(self, Dataset::Document(Value::Null))
    }

    pub fn record_count(&self) -> usize {
        match self {
            Dataset::Table(t) => t.len(),
            Dataset::Document(Value::Array(items)) => items.len(),
            Dataset::Document(Value::Null) => 0,
            Dataset::Document(_) => 1,
        }
    }

    /// Convert into a table.
    ///
    /// Documents must be an array of objects, a single object, or an
    /// object whose only member is an array of objects.
    pub fn into_table(self) -> Result<Table, DatasetError> {
        match self {
            Dataset::Table(t) => Ok(t),
            Dataset::Document(doc) => document_to_table(doc),
        }
    }

    /// Convert into a document. Tables become an array of row objects.
    pub fn into_document(self) -> Value {
        match self {
            Dataset::Table(t) => Value::Array(t.records().into_iter().map(Value::Object).collect()),
            Dataset::Document(doc) => doc,
        }
    }

    /// Borrow as a table without converting.
    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Dataset::Table(t) => Some(t),
            Dataset::Document(_) => None,
        }
    }

    /// Append another dataset, converting to this dataset's representation.
    pub fn concat(self, other: Dataset) -> Result<Dataset, DatasetError> {
        match self {
            Dataset::Table(mut t) => {
                t.concat(other.into_table()?);
                Ok(Dataset::Table(t))
            }
            Dataset::Document(doc) => {
                let mut items = match doc {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    single => vec![single],
                };
                match other.into_document() {
                    Value::Array(more) => items.extend(more),
                    Value::Null => {}
                    single => items.push(single),
                }
                Ok(Dataset::Document(Value::Array(items)))
            }
        }
    }
}

impl From<Table> for Dataset {
    fn from(t: Table) -> Self {
        Dataset::Table(t)
    }
}

impl From<Value> for Dataset {
    fn from(v: Value) -> Self {
        Dataset::Document(v)
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dataset::Table(t) => write!(f, "{}", t),
            Dataset::Document(doc) => {
                let json = serde_json::Value::from(doc.clone());
                match serde_json::to_string_pretty(&json) {
                    Ok(s) => f.write_str(&s),
                    Err(_) => write!(f, "{}", doc),
                }
            }
        }
    }
}

fn document_to_table(doc: Value) -> Result<Table, DatasetError> {
    match doc {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for (idx, item) in items.into_iter().enumerate() {
                match item {
                    Value::Object(obj) => records.push(obj),
                    other => {
                        return Err(DatasetError::NotTabular(format!(
                            "array element {} is {}, expected object",
                            idx,
                            other.type_name()
                        )));
                    }
                }
            }
            Ok(Table::from_records(&records))
        }
        Value::Object(obj) => {
            let single_array = obj.len() == 1
                && obj.values().next().and_then(Value::as_array).is_some_and(|items| {
                    items.iter().all(|v| v.as_object().is_some())
                });
            if single_array {
                let inner = obj.into_values().next().unwrap_or(Value::Null);
                document_to_table(inner)
            } else {
                Ok(Table::from_records(&[obj]))
            }
        }
        Value::Null => Ok(Table::default()),
        other => Err(DatasetError::NotTabular(format!(
            "document is {}, expected array of objects",
            other.type_name()
        ))),
    }
}

/// Errors raised by dataset access and conversion.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("column not found: {0}")]
    MissingColumn(String),

    #[error("row {row} has {found} cells, table has {expected} columns")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("document cannot be converted to a table: {0}")]
    NotTabular(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::MapExt;

    fn people() -> Table {
        Table::from_rows(
            vec!["name".into(), "age".into()],
            vec![
                vec!["Ada".into(), 36i64.into()],
                vec!["Linus".into(), 21i64.into()],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_table_access() {
        let t = people();
        assert_eq!(t.len(), 2);
        assert_eq!(t.column_index("age"), Some(1));
        assert_eq!(t.get(1, "name"), Some(&Value::from("Linus")));
        assert!(matches!(
            t.require_column("city"),
            Err(DatasetError::MissingColumn(c)) if c == "city"
        ));
    }

    #[test]
    fn test_row_width_checked() {
        let err = Table::from_rows(vec!["a".into()], vec![vec![1i64.into(), 2i64.into()]]);
        assert!(matches!(err, Err(DatasetError::RowWidth { row: 0, .. })));

        let padded = Table::from_rows(vec!["a".into(), "b".into()], vec![vec![1i64.into()]])
            .unwrap();
        assert_eq!(padded.row(0).unwrap(), &[Value::Int(1), Value::Null]);
    }

    #[test]
    fn test_table_to_document_and_back() {
        let doc = Dataset::Table(people()).into_document();
        let items = doc.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].as_object().unwrap().get("name"),
            Some(&Value::from("Ada"))
        );

        let back = Dataset::Document(doc).into_table().unwrap();
        assert_eq!(back, people());
    }

    #[test]
    fn test_records_union_columns() {
        let records = vec![
            Map::new().with("a", 1i64),
            Map::new().with("b", 2i64).with("a", 3i64),
        ];
        let t = Table::from_records(&records);
        assert_eq!(t.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(t.get(0, "b"), Some(&Value::Null));
        assert_eq!(t.get(1, "a"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_wrapped_array_unwraps() {
        let doc = Value::Object(Map::new().with(
            "items",
            vec![Value::Object(Map::new().with("x", 1i64))],
        ));
        let t = Dataset::Document(doc).into_table().unwrap();
        assert_eq!(t.columns(), &["x".to_string()]);
    }

    #[test]
    fn test_scalar_document_is_not_tabular() {
        let err = Dataset::Document(Value::from("text")).into_table();
        assert!(matches!(err, Err(DatasetError::NotTabular(_))));
    }

    #[test]
    fn test_concat_tables_unions_columns() {
        let mut a = people();
        let b = Table::from_rows(vec!["city".into(), "name".into()], vec![vec![
            "Milano".into(),
            "Giovanni".into(),
        ]])
        .unwrap();
        a.concat(b);

        assert_eq!(a.columns().len(), 3);
        assert_eq!(a.get(2, "name"), Some(&Value::from("Giovanni")));
        assert_eq!(a.get(0, "city"), Some(&Value::Null));
    }

    #[test]
    fn test_concat_documents() {
        let a = Dataset::Document(Value::from(vec![1i64]));
        let b = Dataset::Document(Value::Int(2));
        let joined = a.concat(b).unwrap();
        assert_eq!(joined, Dataset::Document(Value::from(vec![1i64, 2])));
    }
}
