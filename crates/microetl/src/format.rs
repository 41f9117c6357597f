//! Flat-file formats.
//!
//! Formats turn bytes into datasets and back. JSON is built in; the
//! `microetl-formats` crate registers CSV, YAML, Excel and plain text.

use crate::dataset::{Dataset, DatasetError};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A flat-file format.
pub trait Format: Send + Sync {
    /// Canonical name (`json`, `csv`, ...).
    fn name(&self) -> &'static str;

    /// File extensions handled, lowercase, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Parse file contents.
    fn read(&self, data: &[u8], options: &Map) -> Result<Dataset, FormatError>;

    /// Serialize a dataset.
    ///
    /// Default implementation returns an error - override for writable formats.
    fn write(&self, dataset: &Dataset, options: &Map) -> Result<Vec<u8>, FormatError> {
        let _ = (dataset, options);
        Err(FormatError::ReadOnly(self.name()))
    }
}

/// Registry of available formats, looked up by name or extension.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    formats: IndexMap<&'static str, Arc<dyn Format>>,
    extensions: IndexMap<&'static str, &'static str>,
}

impl FormatRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in JSON format.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(JsonFormat);
        registry
    }

    /// Register a format, replacing any previous one with the same name.
    pub fn register(&mut self, format: impl Format + 'static) {
        let name = format.name();
        for ext in format.extensions() {
            self.extensions.insert(*ext, name);
        }
        self.formats.insert(name, Arc::new(format));
    }

    /// Look up a format by name or extension (case-insensitive).
    pub fn get(&self, name: &str) -> Option<Arc<dyn Format>> {
        let key = name.trim().trim_start_matches('.').to_lowercase();
        let canonical = self
            .formats
            .get_key_value(key.as_str())
            .map(|(k, _)| *k)
            .or_else(|| self.extensions.get(key.as_str()).copied())?;
        self.formats.get(canonical).cloned()
    }

    /// Format for a path, from an explicit name or the file extension.
    pub fn for_path(&self, path: &Path, format: Option<&str>) -> Result<Arc<dyn Format>, FormatError> {
        match format {
            Some(name) => self
                .get(name)
                .ok_or_else(|| FormatError::Unknown(name.to_string())),
            None => {
                let ext = extension(path)
                    .ok_or_else(|| FormatError::NoExtension(path.display().to_string()))?;
                self.get(&ext).ok_or(FormatError::Unknown(ext))
            }
        }
    }

    /// Registered format names.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.formats.keys().copied()
    }

    /// Read a file, or every matching file of a directory.
    ///
    /// Directory entries are read in file-name order and concatenated.
    /// With a format given only files with its extensions are read;
    /// otherwise every file with a registered extension is.
    pub fn read_path(
        &self,
        path: &Path,
        format: Option<&str>,
        options: &Map,
    ) -> Result<Dataset, FormatError> {
        if !path.is_dir() {
            let fmt = self.for_path(path, format)?;
            let data = std::fs::read(path).map_err(|source| FormatError::Io {
                path: path.display().to_string(),
                source,
            })?;
            tracing::debug!(path = %path.display(), format = fmt.name(), "reading file");
            return fmt.read(&data, options);
        }

        let files = self.list_dir(path, format)?;
        let mut combined: Option<Dataset> = None;
        for file in &files {
            let dataset = self.read_path(file, format, options)?;
            combined = Some(match combined {
                Some(acc) => acc.concat(dataset)?,
                None => dataset,
            });
        }
        tracing::debug!(dir = %path.display(), files = files.len(), "read directory");
        Ok(combined.unwrap_or_else(Dataset::empty))
    }

    fn list_dir(&self, dir: &Path, format: Option<&str>) -> Result<Vec<PathBuf>, FormatError> {
        let wanted: Option<Vec<&'static str>> = match format {
            Some(name) => Some(
                self.get(name)
                    .ok_or_else(|| FormatError::Unknown(name.to_string()))?
                    .extensions()
                    .to_vec(),
            ),
            None => None,
        };

        let entries = std::fs::read_dir(dir).map_err(|source| FormatError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| FormatError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = extension(&path) else {
                continue;
            };
            let matches = match &wanted {
                Some(exts) => exts.iter().any(|e| *e == ext),
                None => self.extensions.contains_key(ext.as_str()),
            };
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Serialize a dataset and write it to `path`, creating parent
    /// directories. Returns the number of records written.
    pub fn write_path(
        &self,
        path: &Path,
        format: Option<&str>,
        dataset: &Dataset,
        options: &Map,
    ) -> Result<usize, FormatError> {
        let fmt = self.for_path(path, format)?;
        let bytes = fmt.write(dataset, options)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| FormatError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, bytes).map_err(|source| FormatError::Io {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), format = fmt.name(), "wrote file");
        Ok(dataset.record_count())
    }
}

/// Lowercase extension of a path.
pub fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// JSON documents, written with four-space indentation.
pub struct JsonFormat;

impl Format for JsonFormat {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn read(&self, data: &[u8], _options: &Map) -> Result<Dataset, FormatError> {
        let json: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| FormatError::Parse(format!("Invalid JSON: {}", e)))?;
        Ok(Dataset::Document(Value::from(json)))
    }

    fn write(&self, dataset: &Dataset, options: &Map) -> Result<Vec<u8>, FormatError> {
        let indent = options
            .get("indent")
            .and_then(Value::as_i64)
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(4);
        let json = serde_json::Value::from(dataset.clone().into_document());
        to_json_indented(&json, indent)
    }
}

/// Pretty-print JSON with the given indentation width.
pub fn to_json_indented(json: &serde_json::Value, indent: usize) -> Result<Vec<u8>, FormatError> {
    let indent = " ".repeat(indent);
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(indent.as_bytes());
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    json.serialize(&mut serializer)
        .map_err(|e| FormatError::Serialize(format!("JSON serialization failed: {}", e)))?;
    out.push(b'\n');
    Ok(out)
}

/// Errors reading or writing files.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("unknown format: {0}")]
    Unknown(String),

    #[error("cannot infer format of {0}: no extension")]
    NoExtension(String),

    #[error("format {0} is read-only")]
    ReadOnly(&'static str),

    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Parse(String),

    #[error("{0}")]
    Serialize(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}
