//! Job configuration.
//!
//! A job file is YAML describing:
//! - `datasources`: `source` and `destination` roles
//! - `actions`: named sections, each an ordered `sequence` of actions
//! - `schemas`: optional named JSON Schema paths
//!
//! `paths` are injected by the loader, never read from the file.

use crate::api::ApiRequest;
use crate::params::template::{self, IncludeError};
use crate::value::{Map, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the action section run by the executor.
pub const TRANSFORM_SECTION: &str = "transform";

/// A fully loaded job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobConfig {
    /// Datasources by role (`source`, `destination`).
    #[serde(default)]
    pub datasources: IndexMap<String, DatasourceSpec>,

    /// Action sections by name.
    #[serde(default)]
    pub actions: IndexMap<String, ActionSection>,

    /// Named schema paths.
    #[serde(default)]
    pub schemas: IndexMap<String, String>,

    /// Working directories, set by the loader.
    #[serde(skip)]
    pub paths: Paths,
}

/// Working directories for a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paths {
    pub base_path: PathBuf,
    pub cfg_path: PathBuf,
    pub inp_path: PathBuf,
    pub out_path: PathBuf,
    pub tmp_path: PathBuf,
}

impl Paths {
    /// Conventional layout under a base directory.
    pub fn under(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        Self {
            cfg_path: base.join("jobs"),
            inp_path: base.join("inp_data"),
            out_path: base.join("out_data"),
            tmp_path: base.join("tmp"),
            base_path: base,
        }
    }

    /// Set the jobs directory.
    pub fn with_cfg(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cfg_path = dir.into();
        self
    }

    /// Set the input directory.
    pub fn with_inp(mut self, dir: impl Into<PathBuf>) -> Self {
        self.inp_path = dir.into();
        self
    }

    /// Set the output directory.
    pub fn with_out(mut self, dir: impl Into<PathBuf>) -> Self {
        self.out_path = dir.into();
        self
    }

    /// Resolve a path relative to the input directory.
    pub fn input(&self, relative: impl AsRef<Path>) -> PathBuf {
        resolve_against(&self.inp_path, relative.as_ref())
    }

    /// Resolve a path relative to the output directory.
    pub fn output(&self, relative: impl AsRef<Path>) -> PathBuf {
        resolve_against(&self.out_path, relative.as_ref())
    }
}

fn resolve_against(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// A datasource role: where data is read from or written to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasourceSpec {
    /// Backend tag (`type:`).
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Backend tag, older spelling.
    #[serde(default)]
    pub db_type: Option<String>,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default, deserialize_with = "port_from_any")]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub database: Option<String>,

    /// Inline query.
    #[serde(default)]
    pub query: Option<String>,

    /// Query template file, relative to the input directory.
    #[serde(default)]
    pub query_file: Option<String>,

    /// HTTP request for `api` sources.
    #[serde(default)]
    pub api: Option<ApiRequest>,

    /// Input file or directory.
    #[serde(default)]
    pub local_input_data: Option<String>,

    /// Output file or directory.
    #[serde(default)]
    pub local_output_data: Option<String>,

    /// File format (extension) filter.
    #[serde(default)]
    pub format: Option<String>,

    /// Target table for database sinks.
    #[serde(default)]
    pub table: Option<String>,

    /// Anything else, available to connectors.
    #[serde(flatten)]
    pub options: Map,
}

/// Which side of the pipeline a datasource serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl Role {
    pub fn key(self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Destination => "destination",
        }
    }

    /// Parse a `location` value; anything but `destination` is the source.
    pub fn from_location(location: Option<&str>) -> Self {
        match location.map(|s| s.trim().to_lowercase()).as_deref() {
            Some("destination") | Some("dest") | Some("target") => Role::Destination,
            _ => Role::Source,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl DatasourceSpec {
    /// The declared backend tag, if any.
    pub fn tag(&self) -> Option<&str> {
        self.kind
            .as_deref()
            .or(self.db_type.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// The file path configured for a role.
    pub fn local_path(&self, role: Role) -> Option<&str> {
        match role {
            Role::Source => self.local_input_data.as_deref(),
            Role::Destination => self.local_output_data.as_deref(),
        }
    }

    /// Resolve the backend kind for a role.
    ///
    /// An explicit tag wins; otherwise a configured path means `file`.
    pub fn resolve_kind(&self, role: Role) -> Result<DatasourceKind, ConfigError> {
        match self.tag() {
            Some(tag) => tag.parse(),
            None if self.local_path(role).is_some() => Ok(DatasourceKind::File),
            None => Err(ConfigError::UnresolvedKind(role.key().to_string())),
        }
    }
}

fn port_from_any<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Int(n)) => u16::try_from(n)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!(
            "port must be an integer, got {}",
            other.type_name()
        ))),
    }
}

/// Datasource backend kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasourceKind {
    Postgres,
    Mysql,
    Snowflake,
    Sqlite,
    Mongodb,
    Neo4j,
    Elasticsearch,
    File,
    Csv,
    Json,
    Excel,
    Text,
    Api,
    None,
}

/// Broad backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFamily {
    Sql,
    Document,
    Graph,
    Search,
    File,
    Api,
    None,
}

impl DatasourceKind {
    pub fn name(self) -> &'static str {
        match self {
            DatasourceKind::Postgres => "postgres",
            DatasourceKind::Mysql => "mysql",
            DatasourceKind::Snowflake => "snowflake",
            DatasourceKind::Sqlite => "sqlite",
            DatasourceKind::Mongodb => "mongodb",
            DatasourceKind::Neo4j => "neo4j",
            DatasourceKind::Elasticsearch => "elasticsearch",
            DatasourceKind::File => "file",
            DatasourceKind::Csv => "csv",
            DatasourceKind::Json => "json",
            DatasourceKind::Excel => "excel",
            DatasourceKind::Text => "text",
            DatasourceKind::Api => "api",
            DatasourceKind::None => "none",
        }
    }

    pub fn family(self) -> KindFamily {
        match self {
            DatasourceKind::Postgres
            | DatasourceKind::Mysql
            | DatasourceKind::Snowflake
            | DatasourceKind::Sqlite => KindFamily::Sql,
            DatasourceKind::Mongodb => KindFamily::Document,
            DatasourceKind::Neo4j => KindFamily::Graph,
            DatasourceKind::Elasticsearch => KindFamily::Search,
            DatasourceKind::File
            | DatasourceKind::Csv
            | DatasourceKind::Json
            | DatasourceKind::Excel
            | DatasourceKind::Text => KindFamily::File,
            DatasourceKind::Api => KindFamily::Api,
            DatasourceKind::None => KindFamily::None,
        }
    }

    /// Format implied by a file kind (`file` infers from the extension).
    pub fn implied_format(self) -> Option<&'static str> {
        match self {
            DatasourceKind::Csv => Some("csv"),
            DatasourceKind::Json => Some("json"),
            DatasourceKind::Excel => Some("xlsx"),
            DatasourceKind::Text => Some("txt"),
            _ => None,
        }
    }

    /// Kinds served by the connector registry.
    pub fn is_backend(self) -> bool {
        matches!(
            self.family(),
            KindFamily::Sql | KindFamily::Document | KindFamily::Graph | KindFamily::Search
        )
    }
}

impl FromStr for DatasourceKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => DatasourceKind::Postgres,
            "mysql" | "mariadb" => DatasourceKind::Mysql,
            "snowflake" => DatasourceKind::Snowflake,
            "sqlite" | "sqlite3" => DatasourceKind::Sqlite,
            "mongodb" | "mongo" => DatasourceKind::Mongodb,
            "neo4j" => DatasourceKind::Neo4j,
            "elasticsearch" | "elastic" | "es" => DatasourceKind::Elasticsearch,
            "file" | "local" => DatasourceKind::File,
            "csv" => DatasourceKind::Csv,
            "json" => DatasourceKind::Json,
            "excel" | "xlsx" | "xls" => DatasourceKind::Excel,
            "text" | "txt" => DatasourceKind::Text,
            "api" | "http" | "rest" => DatasourceKind::Api,
            "none" | "" => DatasourceKind::None,
            _ => return Err(ConfigError::UnknownKind(s.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for DatasourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered list of actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSection {
    #[serde(default)]
    pub sequence: Vec<Action>,
}

/// A single configured action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,

    /// Free-form parameters, usually a mapping.
    #[serde(default)]
    pub parameters: Value,

    /// Datasource role for nested reads and writes.
    #[serde(default)]
    pub location: Option<String>,

    /// Label used in logs.
    #[serde(default)]
    pub name: Option<String>,
}

impl Action {
    pub fn new(kind: ActionKind) -> Self {
        Self {
            kind,
            parameters: Value::Null,
            location: None,
            name: None,
        }
    }

    /// Set the parameters.
    pub fn parameters(mut self, parameters: impl Into<Value>) -> Self {
        self.parameters = parameters.into();
        self
    }

    /// Set the location.
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Parameters as a mapping (a list or scalar yields an empty map).
    pub fn params(&self) -> Map {
        self.parameters.as_object().cloned().unwrap_or_default()
    }

    /// Look up a single parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.as_object()?.get(key)
    }

    /// Name for log lines.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.to_string())
    }
}

/// Action type tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Filter,
    Aggregate,
    Sort,
    Pivot,
    Join,
    Sql,
    Dsl,
    Jq,
    Read,
    Write,
    Print,
    Api,
    Validate,
    /// Unrecognised tag, kept verbatim.
    Unknown(String),
}

impl ActionKind {
    /// All recognised kinds.
    pub const KNOWN: [ActionKind; 13] = [
        ActionKind::Filter,
        ActionKind::Aggregate,
        ActionKind::Sort,
        ActionKind::Pivot,
        ActionKind::Join,
        ActionKind::Sql,
        ActionKind::Dsl,
        ActionKind::Jq,
        ActionKind::Read,
        ActionKind::Write,
        ActionKind::Print,
        ActionKind::Api,
        ActionKind::Validate,
    ];

    pub fn parse(tag: &str) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "filter" => ActionKind::Filter,
            "aggregate" | "groupby" | "group_by" => ActionKind::Aggregate,
            "sort" => ActionKind::Sort,
            "pivot" => ActionKind::Pivot,
            "join" | "merge" => ActionKind::Join,
            "sql" => ActionKind::Sql,
            "dsl" | "mapping" => ActionKind::Dsl,
            "jq" => ActionKind::Jq,
            "read" => ActionKind::Read,
            "write" => ActionKind::Write,
            "print" => ActionKind::Print,
            "api" => ActionKind::Api,
            "validate" => ActionKind::Validate,
            _ => ActionKind::Unknown(tag.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ActionKind::Filter => "filter",
            ActionKind::Aggregate => "aggregate",
            ActionKind::Sort => "sort",
            ActionKind::Pivot => "pivot",
            ActionKind::Join => "join",
            ActionKind::Sql => "sql",
            ActionKind::Dsl => "dsl",
            ActionKind::Jq => "jq",
            ActionKind::Read => "read",
            ActionKind::Write => "write",
            ActionKind::Print => "print",
            ActionKind::Api => "api",
            ActionKind::Validate => "validate",
            ActionKind::Unknown(tag) => tag,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for ActionKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(ActionKind::parse(&tag))
    }
}

impl JobConfig {
    /// Load a job file: expand includes, interpolate the environment,
    /// parse YAML and inject paths.
    pub fn load(path: &Path, paths: &Paths) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or(Path::new("."));
        let text = template::expand_includes(&text, base_dir)?;
        Self::from_str_with_paths(&text, paths)
    }

    /// Parse job text (already include-expanded) and inject paths.
    pub fn from_str_with_paths(text: &str, paths: &Paths) -> Result<Self, ConfigError> {
        let text = template::interpolate_env(text).map_err(ConfigError::MissingEnv)?;
        let mut config: JobConfig =
            serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.paths = paths.clone();
        config.apply_path_overrides();
        Ok(config)
    }

    /// Apply `local_input_data` / `local_output_data` directory overrides.
    ///
    /// A path naming a directory replaces the corresponding working
    /// directory; a file path leaves it alone.
    ///
    /// The datasource keeps the resolved directory so later lookups do not
    /// join it twice.
    fn apply_path_overrides(&mut self) {
        for role in [Role::Source, Role::Destination] {
            let Some(dir) = self.override_dir(role) else {
                continue;
            };
            let resolved = dir.display().to_string();
            if let Some(spec) = self.datasources.get_mut(role.key()) {
                match role {
                    Role::Source => spec.local_input_data = Some(resolved),
                    Role::Destination => spec.local_output_data = Some(resolved),
                }
            }
            match role {
                Role::Source => self.paths.inp_path = dir,
                Role::Destination => self.paths.out_path = dir,
            }
        }
    }

    fn override_dir(&self, role: Role) -> Option<PathBuf> {
        let local = self.datasource(role)?.local_path(role)?;
        let base = match role {
            Role::Source => &self.paths.inp_path,
            Role::Destination => &self.paths.out_path,
        };
        let resolved = resolve_against(base, Path::new(local));
        resolved.is_dir().then_some(resolved)
    }

    /// Get a datasource by role.
    pub fn datasource(&self, role: Role) -> Option<&DatasourceSpec> {
        self.datasources.get(role.key())
    }

    /// Actions of a section (empty if the section is absent).
    pub fn section(&self, name: &str) -> &[Action] {
        self.actions
            .get(name)
            .map(|s| s.sequence.as_slice())
            .unwrap_or(&[])
    }

    /// Resolve a schema reference: a name from `schemas` or a path.
    pub fn schema_path(&self, reference: &str) -> PathBuf {
        let path = self
            .schemas
            .get(reference)
            .map(String::as_str)
            .unwrap_or(reference);
        self.paths.input(path)
    }
}

/// Errors loading or interpreting job configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Include(#[from] IncludeError),

    #[error("undefined environment variables: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("failed to parse job: {0}")]
    Parse(String),

    #[error("unknown datasource type: {0}")]
    UnknownKind(String),

    #[error("datasource '{0}' has neither a type nor a local path")]
    UnresolvedKind(String),

    #[error("missing datasource: {0}")]
    MissingDatasource(String),

    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = r#"
datasources:
  source:
    type: CSV
    local_input_data: people.csv
  destination:
    db_type: " SQLite "
    database: ":memory:"
    port: "5432"
actions:
  transform:
    sequence:
      - type: Sort
        parameters:
          column: age
      - type: filter
        parameters:
          filters:
            - name: age
              operator: ge
              value: 21
      - type: frobnicate
schemas:
  person: schemas/person.json
"#;

    #[test]
    fn test_parse_job() {
        let paths = Paths::under("/data");
        let config = JobConfig::from_str_with_paths(JOB, &paths).unwrap();

        let source = config.datasource(Role::Source).unwrap();
        assert_eq!(source.resolve_kind(Role::Source).unwrap(), DatasourceKind::Csv);

        let dest = config.datasource(Role::Destination).unwrap();
        assert_eq!(
            dest.resolve_kind(Role::Destination).unwrap(),
            DatasourceKind::Sqlite
        );
        assert_eq!(dest.port, Some(5432));

        let actions = config.section(TRANSFORM_SECTION);
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[0].kind, ActionKind::Sort);
        assert_eq!(actions[0].param("column").and_then(Value::as_str), Some("age"));
        assert_eq!(actions[2].kind, ActionKind::Unknown("frobnicate".into()));

        assert_eq!(config.paths.inp_path, PathBuf::from("/data/inp_data"));
        assert_eq!(
            config.schema_path("person"),
            PathBuf::from("/data/inp_data/schemas/person.json")
        );
    }

    #[test]
    fn test_kind_fallback_to_file() {
        let spec = DatasourceSpec {
            local_output_data: Some("out.json".into()),
            ..Default::default()
        };
        assert_eq!(
            spec.resolve_kind(Role::Destination).unwrap(),
            DatasourceKind::File
        );
        assert!(matches!(
            spec.resolve_kind(Role::Source),
            Err(ConfigError::UnresolvedKind(role)) if role == "source"
        ));
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!("PostgreSQL".parse::<DatasourceKind>().unwrap(), DatasourceKind::Postgres);
        assert_eq!(" es ".parse::<DatasourceKind>().unwrap(), DatasourceKind::Elasticsearch);
        assert_eq!("xlsx".parse::<DatasourceKind>().unwrap(), DatasourceKind::Excel);
        assert!("oracle".parse::<DatasourceKind>().is_err());
        assert!(DatasourceKind::Mongodb.is_backend());
        assert!(!DatasourceKind::Csv.is_backend());
    }

    #[test]
    fn test_action_kind_parse() {
        assert_eq!(ActionKind::parse(" JQ "), ActionKind::Jq);
        assert_eq!(ActionKind::parse("mapping"), ActionKind::Dsl);
        assert_eq!(ActionKind::parse("zip").to_string(), "zip");
    }

    #[test]
    fn test_missing_env_is_reported() {
        let text = "datasources:\n  source:\n    host: ${METL_CFG_UNDEFINED_HOST}\n";
        let err = JobConfig::from_str_with_paths(text, &Paths::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(vars) if vars == ["METL_CFG_UNDEFINED_HOST"]));
    }

    #[test]
    fn test_query_placeholders_survive_loading() {
        unsafe { std::env::set_var("METL_CFG_CITY", "Milano") };
        let text = "datasources:\n  source:\n    type: sqlite\n    query: \"SELECT * FROM t WHERE city = {{ METL_CFG_CITY }} AND host = '${METL_CFG_CITY}'\"\n";
        let config = JobConfig::from_str_with_paths(text, &Paths::default()).unwrap();
        unsafe { std::env::remove_var("METL_CFG_CITY") };
        assert_eq!(
            config.datasource(Role::Source).unwrap().query.as_deref(),
            Some("SELECT * FROM t WHERE city = {{ METL_CFG_CITY }} AND host = 'Milano'")
        );
    }

    #[test]
    fn test_directory_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("custom_in")).unwrap();
        let text = "datasources:\n  source:\n    local_input_data: custom_in\n";
        let paths = Paths::under(dir.path()).with_inp(dir.path());
        let config = JobConfig::from_str_with_paths(text, &paths).unwrap();
        assert_eq!(config.paths.inp_path, dir.path().join("custom_in"));
    }

    #[test]
    fn test_load_with_include() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("source.yml"),
            "  source:\n    type: none\n",
        )
        .unwrap();
        let job = dir.path().join("job.yml");
        std::fs::write(&job, "datasources:\n{% include 'source.yml' %}").unwrap();

        let config = JobConfig::load(&job, &Paths::under(dir.path())).unwrap();
        let source = config.datasource(Role::Source).unwrap();
        assert_eq!(source.resolve_kind(Role::Source).unwrap(), DatasourceKind::None);
    }
}
