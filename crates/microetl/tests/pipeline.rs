//! End-to-end job runs against temporary directories.

use microetl::{
    Dataset, ErrorClass, ExecutionContext, FormatRegistry, JobConfig, Map, Paths, PipelineError,
    RunContext, State, run,
};
use serde_json::json;
use std::path::Path;

fn context(dir: &Path, job: &str, yaml: &str) -> RunContext {
    let paths = Paths::under(dir).with_inp(dir).with_out(dir);
    let config = JobConfig::from_str_with_paths(yaml, &paths).unwrap();
    RunContext::new(job, config, ExecutionContext::new())
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_sort_then_filter() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("people.json"),
        r#"[{"age": 18}, {"age": 25}, {"age": 21}]"#,
    )
    .unwrap();

    let ctx = context(
        dir.path(),
        "adults",
        r#"
datasources:
  source:
    local_input_data: people.json
  destination:
    local_output_data: adults.json
actions:
  transform:
    sequence:
      - type: sort
        parameters:
          column: age
          direction: asc
      - type: filter
        parameters:
          filters:
            - name: age
              operator: ge
              value: 21
"#,
    );
    let report = run(&ctx).unwrap();
    assert_eq!(report.state, State::Done);
    assert_eq!(report.actions_executed, 2);
    assert_eq!(
        read_json(&dir.path().join("adults.json")),
        json!([{"age": 21}, {"age": 25}])
    );
}

#[test]
fn test_empty_sequence_copies_source() {
    let dir = tempfile::tempdir().unwrap();
    let inp = dir.path().join("in");
    std::fs::create_dir_all(&inp).unwrap();
    std::fs::write(inp.join("a.json"), r#"[{"id": 1, "tags": ["x"]}]"#).unwrap();
    std::fs::write(inp.join("b.json"), r#"[{"id": 2, "tags": []}]"#).unwrap();

    let ctx = context(
        dir.path(),
        "copy",
        "datasources:\n  source:\n    local_input_data: in\n  destination:\n    local_output_data: copy.json\n",
    );
    let report = run(&ctx).unwrap();
    assert_eq!(report.rows_read, 2);
    assert_eq!(report.rows_written, 2);

    let formats = FormatRegistry::with_builtins();
    let read = formats.read_path(&inp, None, &Map::new()).unwrap();
    let written = formats
        .read_path(&dir.path().join("copy.json"), None, &Map::new())
        .unwrap();
    assert_eq!(written, read);
}

#[test]
fn test_unreadable_source_fails_before_actions() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        dir.path(),
        "broken",
        r#"
datasources:
  source:
    local_input_data: missing/people.json
  destination:
    local_output_data: out.json
actions:
  transform:
    sequence:
      - type: write
        parameters:
          target: file
          path: reached.json
"#,
    );
    let err = run(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::Read { .. }));
    assert_eq!(err.class(), ErrorClass::Io);
    assert!(!dir.path().join("reached.json").exists());
    assert!(!dir.path().join("out.json").exists());
}

#[test]
fn test_mapping_with_schema_gate() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("customer.json"),
        r#"{"customer":{"first_name":"Giovanni","last_name":"Montoya"},
            "address":{"city":"Milano","country":"Italy"}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("customer.map"),
        r#"{
    fullName: concat(customer.first_name, " ", customer.last_name),
    city: concat(address.city, ", ", address.country)
}
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("summary.schema.json"),
        r#"{
            "type": "object",
            "properties": {"fullName": {"type": "string"}, "city": {"type": "string"}},
            "required": ["fullName", "city"],
            "additionalProperties": false
        }"#,
    )
    .unwrap();

    let ctx = context(
        dir.path(),
        "customer",
        r#"
datasources:
  source:
    local_input_data: customer.json
  destination:
    local_output_data: summary.json
schemas:
  summary: summary.schema.json
actions:
  transform:
    sequence:
      - type: dsl
        parameters:
          mapping: customer.map
          schema: summary
"#,
    );
    run(&ctx).unwrap();
    assert_eq!(
        read_json(&dir.path().join("summary.json")),
        json!({"fullName": "Giovanni Montoya", "city": "Milano, Italy"})
    );
}

#[test]
fn test_unknown_action_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), r#"[{"a": 1}]"#).unwrap();
    let ctx = context(
        dir.path(),
        "skip",
        r#"
datasources:
  source:
    local_input_data: in.json
  destination:
    type: none
actions:
  transform:
    sequence:
      - type: teleport
"#,
    );
    let report = run(&ctx).unwrap();
    assert_eq!(report.actions_executed, 1);
    assert_eq!(report.rows_written, 0);
}

#[cfg(feature = "sqlite")]
#[test]
fn test_sqlite_round_trip_with_bound_parameters() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("people.json"),
        r#"[{"name": "ada", "age": 36}, {"name": "bob", "age": 17}, {"name": "cy", "age": 21}]"#,
    )
    .unwrap();

    let load = context(
        dir.path(),
        "load",
        "datasources:\n  source:\n    local_input_data: people.json\n  destination:\n    type: sqlite\n    database: people.db\n    table: people\n",
    );
    assert_eq!(run(&load).unwrap().rows_written, 3);

    let extract = context(
        dir.path(),
        "extract",
        r#"
datasources:
  source:
    type: sqlite
    database: people.db
    query: "SELECT name FROM people WHERE age >= {{ min_age }} ORDER BY name"
    parameters:
      min_age: expr(20 + 1)
  destination:
    local_output_data: adults.json
"#,
    );
    let report = run(&extract).unwrap();
    assert_eq!(report.rows_read, 2);
    assert_eq!(
        read_json(&dir.path().join("adults.json")),
        json!([{"name": "ada"}, {"name": "cy"}])
    );
}

#[test]
fn test_dataset_reaches_destination_as_document() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("doc.json"), r#"{"k": {"n": 1}}"#).unwrap();
    let ctx = context(
        dir.path(),
        "doc",
        r#"
datasources:
  source:
    local_input_data: doc.json
  destination:
    local_output_data: out.json
actions:
  transform:
    sequence:
      - type: jq
        parameters:
          filter: "{n: .source.k.n}"
"#,
    );
    run(&ctx).unwrap();
    let written = FormatRegistry::with_builtins()
        .read_path(&dir.path().join("out.json"), None, &Map::new())
        .unwrap();
    assert!(matches!(written, Dataset::Document(_)));
    assert_eq!(read_json(&dir.path().join("out.json")), json!({"n": 1}));
}

#[test]
fn test_jq_without_output_fails_before_write() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("in.json"), r#"[{"a": 1}]"#).unwrap();
    let ctx = context(
        dir.path(),
        "empty",
        r#"
datasources:
  source:
    local_input_data: in.json
  destination:
    local_output_data: out.json
actions:
  transform:
    sequence:
      - type: jq
        parameters:
          filter: ".source[] | select(.a == 2)"
"#,
    );
    let err = run(&ctx).unwrap_err();
    assert!(matches!(err, PipelineError::NullDataset { index: 0, .. }));
    assert_eq!(err.class(), ErrorClass::Transform);
    assert!(!dir.path().join("out.json").exists());
}
