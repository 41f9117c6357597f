//! Flat-file formats for microetl.
//!
//! JSON is built into the core. This crate adds the rest; enable formats
//! via feature flags.
//!
//! # Features
//!
//! - `csv` (default) - CSV, first row as column names
//! - `yaml` (default) - YAML documents
//! - `text` (default) - plain text, one record per line
//! - `spreadsheet` (default) - XLSX, XLS, XLSB and ODS (read only)
//! - `all` - All formats
//!
//! Datasource options reach the formats unchanged, so a job can set
//! `delimiter`, `header` or `sheet` next to `local_input_data`.

use microetl::{FormatRegistry, Map, Value};

/// Register all enabled formats with the registry.
pub fn register_all(registry: &mut FormatRegistry) {
    #[cfg(feature = "csv")]
    registry.register(CsvFormat);
    #[cfg(feature = "yaml")]
    registry.register(YamlFormat);
    #[cfg(feature = "text")]
    registry.register(TextFormat);
    #[cfg(feature = "spreadsheet")]
    registry.register(SpreadsheetFormat);
}

/// Registry with the built-in JSON format plus every enabled format.
pub fn registry() -> FormatRegistry {
    let mut registry = FormatRegistry::with_builtins();
    register_all(&mut registry);
    registry
}

/// Boolean option, accepting YAML booleans and their string spellings.
#[cfg(any(feature = "csv", feature = "spreadsheet"))]
fn flag(options: &Map, key: &str, default: bool) -> bool {
    match options.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !matches!(s.trim().to_lowercase().as_str(), "false" | "no" | "0"),
        Some(Value::Int(n)) => *n != 0,
        _ => default,
    }
}

// ============================================
// CSV
// ============================================

#[cfg(feature = "csv")]
mod csv_impl {
    use super::*;
    use microetl::format::{Format, FormatError};
    use microetl::{Dataset, Table};

    /// CSV files. Cells are typed on read (integers, floats, booleans,
    /// empty as null).
    ///
    /// Options:
    /// - `delimiter` (or `sep`): single character, default `,`
    /// - `header`: first row holds column names, default true
    pub struct CsvFormat;

    fn delimiter(options: &Map) -> Result<u8, FormatError> {
        let Some(value) = options.get("delimiter").or_else(|| options.get("sep")) else {
            return Ok(b',');
        };
        let text = value.to_text();
        let text = if text == "\\t" { "\t".to_string() } else { text };
        match text.as_bytes() {
            [b] => Ok(*b),
            _ => Err(FormatError::Parse(format!(
                "CSV delimiter must be a single byte, got '{}'",
                text
            ))),
        }
    }

    impl Format for CsvFormat {
        fn name(&self) -> &'static str {
            "csv"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["csv"]
        }

        fn read(&self, data: &[u8], options: &Map) -> Result<Dataset, FormatError> {
            let header = flag(options, "header", true);
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(delimiter(options)?)
                .has_headers(header)
                .flexible(true)
                .from_reader(data);

            let mut columns: Vec<String> = if header {
                reader
                    .headers()
                    .map_err(|e| FormatError::Parse(format!("Invalid CSV: {}", e)))?
                    .iter()
                    .map(|h| h.trim().to_string())
                    .collect()
            } else {
                Vec::new()
            };

            let mut rows = Vec::new();
            for record in reader.records() {
                let record = record.map_err(|e| FormatError::Parse(format!("Invalid CSV: {}", e)))?;
                while columns.len() < record.len() {
                    columns.push(columns.len().to_string());
                }
                rows.push(record.iter().map(Value::infer).collect::<Vec<_>>());
            }
            Ok(Dataset::Table(Table::from_rows(columns, rows)?))
        }

        fn write(&self, dataset: &Dataset, options: &Map) -> Result<Vec<u8>, FormatError> {
            let table = dataset.clone().into_table()?;
            let mut writer = csv::WriterBuilder::new()
                .delimiter(delimiter(options)?)
                .from_writer(Vec::new());
            let serialize = |e: csv::Error| FormatError::Serialize(format!("CSV write failed: {}", e));

            if flag(options, "header", true) {
                writer.write_record(table.columns()).map_err(serialize)?;
            }
            for row in table.rows() {
                writer
                    .write_record(row.iter().map(Value::to_text))
                    .map_err(serialize)?;
            }
            writer
                .into_inner()
                .map_err(|e| FormatError::Serialize(format!("CSV write failed: {}", e)))
        }
    }
}

#[cfg(feature = "csv")]
pub use csv_impl::CsvFormat;

// ============================================
// YAML
// ============================================

#[cfg(feature = "yaml")]
mod yaml_impl {
    use super::*;
    use microetl::Dataset;
    use microetl::format::{Format, FormatError};

    /// YAML documents.
    pub struct YamlFormat;

    impl Format for YamlFormat {
        fn name(&self) -> &'static str {
            "yaml"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["yaml", "yml"]
        }

        fn read(&self, data: &[u8], _options: &Map) -> Result<Dataset, FormatError> {
            let doc: Value = serde_yaml::from_slice(data)
                .map_err(|e| FormatError::Parse(format!("Invalid YAML: {}", e)))?;
            Ok(Dataset::Document(doc))
        }

        fn write(&self, dataset: &Dataset, _options: &Map) -> Result<Vec<u8>, FormatError> {
            let json = serde_json::Value::from(dataset.clone().into_document());
            serde_yaml::to_string(&json)
                .map(String::into_bytes)
                .map_err(|e| FormatError::Serialize(format!("YAML serialization failed: {}", e)))
        }
    }
}

#[cfg(feature = "yaml")]
pub use yaml_impl::YamlFormat;

// ============================================
// PLAIN TEXT
// ============================================

#[cfg(feature = "text")]
mod text_impl {
    use super::*;
    use microetl::format::{Format, FormatError};
    use microetl::{Dataset, Table};

    /// Column holding each line.
    pub const LINE_COLUMN: &str = "line";

    /// Plain text, one record per line.
    ///
    /// Reading yields a one-column table (`line`). Writing emits one line
    /// per record: the single cell of one-column tables, otherwise the
    /// cells joined by tabs. Documents are written as-is when they are a
    /// string, otherwise one JSON value per array element.
    pub struct TextFormat;

    impl Format for TextFormat {
        fn name(&self) -> &'static str {
            "text"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["txt", "text"]
        }

        fn read(&self, data: &[u8], _options: &Map) -> Result<Dataset, FormatError> {
            let text = std::str::from_utf8(data)
                .map_err(|e| FormatError::Parse(format!("Invalid UTF-8: {}", e)))?;
            let mut table = Table::new(vec![LINE_COLUMN.to_string()]);
            for line in text.lines() {
                table.push_row(vec![Value::String(line.to_string())]);
            }
            Ok(Dataset::Table(table))
        }

        fn write(&self, dataset: &Dataset, _options: &Map) -> Result<Vec<u8>, FormatError> {
            let lines: Vec<String> = match dataset {
                Dataset::Table(table) => table
                    .rows()
                    .iter()
                    .map(|row| row.iter().map(Value::to_text).collect::<Vec<_>>().join("\t"))
                    .collect(),
                Dataset::Document(Value::String(s)) => vec![s.clone()],
                Dataset::Document(Value::Array(items)) => items.iter().map(Value::to_text).collect(),
                Dataset::Document(other) => vec![other.to_text()],
            };
            let mut out = lines.join("\n");
            if !out.is_empty() {
                out.push('\n');
            }
            Ok(out.into_bytes())
        }
    }
}

#[cfg(feature = "text")]
pub use text_impl::{LINE_COLUMN, TextFormat};

// ============================================
// SPREADSHEET FORMATS
// ============================================

#[cfg(feature = "spreadsheet")]
mod spreadsheet_impl {
    use super::*;
    use calamine::{Data, Reader, open_workbook_auto_from_rs};
    use microetl::format::{Format, FormatError};
    use microetl::{Dataset, Table};
    use std::io::Cursor;

    /// Read spreadsheet files (XLSX, ODS, XLS, XLSB) into a table.
    ///
    /// Options:
    /// - `sheet`: sheet name or zero-based index (default: first sheet)
    /// - `header`: first row holds column names, default true
    pub struct SpreadsheetFormat;

    fn cell(data: &Data) -> Value {
        match data {
            Data::Empty => Value::Null,
            Data::String(s) => Value::String(s.clone()),
            Data::Int(n) => Value::Int(*n),
            Data::Float(f) => Value::Float(*f),
            Data::Bool(b) => Value::Bool(*b),
            Data::Error(e) => Value::String(format!("#ERROR:{:?}", e)),
            Data::DateTime(dt) => Value::String(format!("{}", dt)),
            Data::DateTimeIso(s) => Value::String(s.clone()),
            Data::DurationIso(s) => Value::String(s.clone()),
        }
    }

    impl Format for SpreadsheetFormat {
        fn name(&self) -> &'static str {
            "excel"
        }

        fn extensions(&self) -> &'static [&'static str] {
            &["xlsx", "xls", "xlsb", "ods"]
        }

        fn read(&self, data: &[u8], options: &Map) -> Result<Dataset, FormatError> {
            let mut workbook = open_workbook_auto_from_rs(Cursor::new(data)).map_err(|e| {
                FormatError::Parse(format!("Failed to open spreadsheet: {}", e))
            })?;
            let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

            let name = match options.get("sheet") {
                None | Some(Value::Null) => sheet_names.first().cloned(),
                Some(Value::Int(i)) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| sheet_names.get(i).cloned()),
                Some(other) => {
                    let wanted = other.to_text();
                    sheet_names.iter().find(|n| **n == wanted).cloned()
                }
            }
            .ok_or_else(|| FormatError::Parse("Sheet not found in workbook".to_string()))?;

            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| FormatError::Parse(format!("Failed to read sheet {}: {}", name, e)))?;
            let mut rows: Vec<Vec<Value>> = range.rows().map(|r| r.iter().map(cell).collect()).collect();

            let columns: Vec<String> = if flag(options, "header", true) && !rows.is_empty() {
                rows.remove(0).iter().map(Value::to_text).collect()
            } else {
                let width = rows.first().map(Vec::len).unwrap_or(0);
                (0..width).map(|i| i.to_string()).collect()
            };
            tracing::debug!(sheet = %name, rows = rows.len(), "read spreadsheet");
            Ok(Dataset::Table(Table::from_rows(columns, rows)?))
        }
    }
}

#[cfg(feature = "spreadsheet")]
pub use spreadsheet_impl::SpreadsheetFormat;

#[cfg(test)]
mod tests {
    use super::*;
    use microetl::Dataset;
    use microetl::format::Format;

    #[test]
    fn test_registry_knows_extensions() {
        let registry = registry();
        for ext in ["json", "csv", "yml", "txt", "xlsx"] {
            assert!(registry.get(ext).is_some(), "no format for {}", ext);
        }
    }

    #[test]
    #[cfg(feature = "csv")]
    fn test_csv_read_types_cells() {
        let data = b"name,age,score\nada,36,9.5\nbob,,\n";
        let dataset = CsvFormat.read(data, &Map::new()).unwrap();
        let table = dataset.as_table().unwrap();
        assert_eq!(table.columns(), &["name", "age", "score"]);
        assert_eq!(table.get(0, "age"), Some(&Value::Int(36)));
        assert_eq!(table.get(0, "score"), Some(&Value::Float(9.5)));
        assert_eq!(table.get(1, "age"), Some(&Value::Null));
    }

    #[test]
    #[cfg(feature = "csv")]
    fn test_csv_delimiter_and_headerless() {
        let mut options = Map::new();
        options.insert("delimiter".into(), Value::from(";"));
        options.insert("header".into(), Value::Bool(false));
        let dataset = CsvFormat.read(b"a;1\nb;2\n", &options).unwrap();
        let table = dataset.as_table().unwrap();
        assert_eq!(table.columns(), &["0", "1"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1, "1"), Some(&Value::Int(2)));

        options.insert("delimiter".into(), Value::from("::"));
        assert!(CsvFormat.read(b"a", &options).is_err());
    }

    #[test]
    #[cfg(feature = "csv")]
    fn test_csv_write() {
        let json: serde_json::Value =
            serde_json::from_str(r#"[{"city": "Milano", "n": 2}, {"city": "Roma, RM", "n": null}]"#).unwrap();
        let dataset = Dataset::Document(Value::from(json));
        let bytes = CsvFormat.write(&dataset, &Map::new()).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "city,n\nMilano,2\n\"Roma, RM\",\n"
        );
    }

    #[test]
    #[cfg(feature = "yaml")]
    fn test_yaml_document() {
        let dataset = YamlFormat.read(b"name: test\nitems: [1, 2]\n", &Map::new()).unwrap();
        let Dataset::Document(doc) = &dataset else {
            panic!("expected a document");
        };
        assert_eq!(doc.as_object().unwrap()["items"], Value::from(vec![Value::Int(1), Value::Int(2)]));

        let text = String::from_utf8(YamlFormat.write(&dataset, &Map::new()).unwrap()).unwrap();
        assert!(text.contains("name: test"));
    }

    #[test]
    #[cfg(feature = "text")]
    fn test_text_lines() {
        let dataset = TextFormat.read(b"one\ntwo\n", &Map::new()).unwrap();
        let table = dataset.as_table().unwrap();
        assert_eq!(table.columns(), &[LINE_COLUMN]);
        assert_eq!(table.len(), 2);
        let out = TextFormat.write(&dataset, &Map::new()).unwrap();
        assert_eq!(out, b"one\ntwo\n");
    }

    #[test]
    #[cfg(feature = "spreadsheet")]
    fn test_spreadsheet_is_read_only() {
        let err = SpreadsheetFormat.write(&Dataset::empty(), &Map::new()).unwrap_err();
        assert!(matches!(err, microetl::FormatError::ReadOnly("excel")));
        assert!(SpreadsheetFormat.read(b"not a workbook", &Map::new()).is_err());
    }
}
