use super::{ActionError, ActionHandler};
use crate::config::{Action, ActionKind};
use crate::context::RunContext;
use crate::dataset::{Dataset, Table};
use crate::mapping::{Mapping, MappingError, jq};
use crate::params::ResolvedParameters;
use crate::schema;
use crate::value::{Map, Value};

/// Reshape the document with a textual mapping, optionally gated by a schema.
pub struct DslAction;

/// Run a jq-style filter over `{"source": dataset}`.
pub struct JqAction;

/// Check the document against a schema without changing it.
///
/// With `old_schema`, the table is first narrowed to the columns both
/// schemas share and each record is checked on its own; the narrowed
/// table is the result.
pub struct ValidateAction;

impl ActionHandler for DslAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Dsl
    }

    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let text = source_text(ctx, action, params, "mapping", "mapping_file")?;
        let mapping = Mapping::parse(&text)?;
        let document = dataset.into_document();

        let each = params
            .str("apply_to")
            .is_some_and(|a| a.eq_ignore_ascii_case("each"));
        let result = match document {
            Value::Array(items) if each => Value::Array(
                items
                    .iter()
                    .map(|item| mapping.bend(item))
                    .collect::<Result<_, _>>()?,
            ),
            document => mapping.bend(&document)?,
        };
        tracing::debug!(entries = mapping.len(), "mapping applied");

        gate(ctx, params, &result)?;
        Ok(Some(Dataset::Document(result)))
    }
}

impl ActionHandler for JqAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Jq
    }

    fn apply(
        &self,
        ctx: &RunContext,
        action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        let source = source_text(ctx, action, params, "filter", "filter_file")?;
        let mut envelope = Map::new();
        envelope.insert("source".to_string(), dataset.into_document());

        let mut outputs = jq::run(&source, &Value::Object(envelope)).map_err(MappingError::from)?;
        let result = match outputs.len() {
            0 => {
                tracing::warn!(action = %action.label(), "jq filter produced no output");
                return Ok(None);
            }
            1 => outputs.remove(0),
            _ => Value::Array(outputs),
        };

        gate(ctx, params, &result)?;
        Ok(Some(Dataset::Document(result)))
    }
}

impl ActionHandler for ValidateAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Validate
    }

    fn apply(
        &self,
        ctx: &RunContext,
        _action: &Action,
        params: &ResolvedParameters,
        dataset: Dataset,
    ) -> Result<Option<Dataset>, ActionError> {
        if !params.contains("schema") {
            return Err(ActionError::invalid("schema", "validate needs a schema"));
        }
        if let Some(old_schema) = params.str("old_schema").filter(|s| !s.is_empty()) {
            let target = params.require_str("schema")?;
            return project(ctx, &old_schema, &target, dataset).map(Some);
        }
        let document = match &dataset {
            Dataset::Document(doc) => doc.clone(),
            table => table.clone().into_document(),
        };
        gate(ctx, params, &document)?;
        Ok(Some(dataset))
    }
}

/// Keep the columns shared by both schemas, then validate every record
/// against `target`.
fn project(ctx: &RunContext, old: &str, target: &str, dataset: Dataset) -> Result<Dataset, ActionError> {
    let old_schema = ctx.load_schema(old)?;
    let target_schema = ctx.load_schema(target)?;
    let table = dataset.into_table()?;

    let keep: Vec<(String, usize)> = schema::shared_properties(&old_schema, &target_schema)
        .into_iter()
        .filter_map(|name| table.column_index(&name).map(|idx| (name, idx)))
        .collect();
    let columns = keep.iter().map(|(name, _)| name.clone()).collect();
    let rows = table
        .rows()
        .iter()
        .map(|row| keep.iter().map(|&(_, idx)| row[idx].clone()).collect())
        .collect();
    let projected = Table::from_rows(columns, rows)?;
    tracing::debug!(from = %old, to = %target, columns = projected.width(), "projected table");

    let validator = &ctx.exec().validator;
    for record in projected.records() {
        if !validator.validate(&Value::Object(record), &target_schema) {
            return Err(ActionError::Validation(target.to_string()));
        }
    }
    Ok(Dataset::Table(projected))
}

/// Inline text from `key` (raw, so braces survive), or the contents of a
/// file named by `key` or `file_key` under the input directory.
fn source_text(
    ctx: &RunContext,
    action: &Action,
    params: &ResolvedParameters,
    key: &str,
    file_key: &str,
) -> Result<String, ActionError> {
    if let Some(file) = params.str(file_key) {
        return read_input(ctx, &file);
    }
    let raw = action
        .param(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ActionError::invalid(key, format!("needs {} or {}", key, file_key)))?;
    if ctx.paths().input(raw).is_file() {
        return read_input(ctx, raw);
    }
    Ok(raw.to_string())
}

fn read_input(ctx: &RunContext, relative: &str) -> Result<String, ActionError> {
    let path = ctx.paths().input(relative);
    std::fs::read_to_string(&path).map_err(|e| {
        ActionError::invalid(relative, format!("failed to read {}: {}", path.display(), e))
    })
}

/// Validate against `schema` when one is configured.
fn gate(ctx: &RunContext, params: &ResolvedParameters, document: &Value) -> Result<(), ActionError> {
    let Some(reference) = params.str("schema").filter(|s| !s.is_empty()) else {
        return Ok(());
    };
    let schema = ctx.load_schema(&reference)?;
    if !ctx.exec().validator.validate(document, &schema) {
        return Err(ActionError::Validation(reference));
    }
    tracing::debug!(schema = %reference, "document validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::value::MapExt;

    const SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "fullName": {"type": "string"},
            "city": {"type": "string"}
        },
        "required": ["fullName", "city"],
        "additionalProperties": false
    }"#;

    fn customer() -> Dataset {
        let json: serde_json::Value = serde_json::from_str(
            r#"{"customer":{"first_name":"Giovanni","last_name":"Montoya"},
                "address":{"city":"Milano","country":"Italy"}}"#,
        )
        .unwrap();
        Dataset::Document(Value::from(json))
    }

    fn workdir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("customer.map"),
            "{\n  fullName: concat(customer.first_name, \" \", customer.last_name),\n  city: concat(address.city, \", \", address.country)\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("customer.json"), SCHEMA).unwrap();
        dir
    }

    #[test]
    fn test_dsl_mapping_file_with_schema() {
        let dir = workdir();
        let ctx = context_in(dir.path(), "{}");
        let out = run_on(
            &ctx,
            ActionKind::Dsl,
            "mapping: customer.map\nschema: customer.json",
            customer(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            out,
            Dataset::Document(Value::Object(
                Map::new()
                    .with("fullName", "Giovanni Montoya")
                    .with("city", "Milano, Italy")
            ))
        );
    }

    #[test]
    fn test_dsl_schema_by_name() {
        let dir = workdir();
        let ctx = context_in(dir.path(), "schemas:\n  customer: customer.json\n");
        let out = run_on(
            &ctx,
            ActionKind::Dsl,
            "mapping: customer.map\nschema: customer",
            customer(),
        )
        .unwrap();
        assert!(out.is_some());
    }

    #[test]
    fn test_dsl_validation_failure() {
        let dir = workdir();
        let ctx = context_in(dir.path(), "{}");
        let err = run_on(
            &ctx,
            ActionKind::Dsl,
            "mapping: \"{fullName: customer.first_name, extra: 1, city: address.city}\"\nschema: customer.json",
            customer(),
        )
        .unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));
    }

    #[test]
    fn test_dsl_each_element() {
        let input = table(&["n", "m"], &["[1, 2]", "[3, 4]"]);
        let out = run_on(&context(), ActionKind::Dsl, "mapping: \"{x: m}\"\napply_to: each", input)
            .unwrap()
            .unwrap();
        assert_eq!(
            out.into_document(),
            Value::from(vec![
                Value::Object(Map::new().with("x", 2)),
                Value::Object(Map::new().with("x", 4)),
            ])
        );
    }

    #[test]
    fn test_dsl_missing_path() {
        let err = run_on(&context(), ActionKind::Dsl, "mapping: \"{x: nope.deeper}\"", customer()).unwrap_err();
        assert!(matches!(err, ActionError::Mapping(_)));
    }

    #[test]
    fn test_jq_envelope() {
        let input = table(&["name", "adult"], &[r#"["ada", true]"#, r#"["bob", false]"#]);
        let out = run_on(
            &context(),
            ActionKind::Jq,
            "filter: \"[.source[] | select(.adult) | .name]\"",
            input,
        )
        .unwrap()
        .unwrap();
        assert_eq!(out.into_document(), Value::from(vec![Value::from("ada")]));
    }

    #[test]
    fn test_jq_ordering_select() {
        let input = table(&["name", "age"], &[r#"["ada", 36]"#, r#"["bob", 17]"#, r#"["cy", 21]"#]);
        let out = run_on(
            &context(),
            ActionKind::Jq,
            "filter: \"[.source[] | select(.age >= 21 and .name != \\\"cy\\\") | .name]\"",
            input,
        )
        .unwrap()
        .unwrap();
        assert_eq!(out.into_document(), Value::from(vec![Value::from("ada")]));
    }

    #[test]
    fn test_jq_without_output_is_null_dataset() {
        let input = table(&["a"], &["[1]"]);
        let out = run_on(
            &context(),
            ActionKind::Jq,
            "filter: \".source[] | select(.a == 2)\"",
            input,
        )
        .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn test_jq_syntax_error() {
        let err = run_on(&context(), ActionKind::Jq, "filter: \".source[] | .age >\"", customer()).unwrap_err();
        assert!(matches!(err, ActionError::Mapping(MappingError::Jq(_))));
    }

    #[test]
    fn test_jq_multiple_outputs_collect() {
        let out = run_on(&context(), ActionKind::Jq, "filter: .source[]", customer())
            .unwrap()
            .unwrap();
        assert_eq!(out.into_document().as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_validate_passes_dataset_through() {
        let dir = workdir();
        let ctx = context_in(dir.path(), "{}");
        let doc = Dataset::Document(Value::Object(
            Map::new().with("fullName", "Ada").with("city", "London"),
        ));
        let out = run_on(&ctx, ActionKind::Validate, "schema: customer.json", doc.clone())
            .unwrap()
            .unwrap();
        assert_eq!(out, doc);

        let err = run_on(&ctx, ActionKind::Validate, "schema: customer.json", customer()).unwrap_err();
        assert!(matches!(err, ActionError::Validation(_)));

        let err = run_on(&ctx, ActionKind::Validate, "{}", customer()).unwrap_err();
        assert!(matches!(err, ActionError::InvalidParameter { .. }));
    }

    #[test]
    fn test_validate_projects_old_schema_onto_new() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("legacy.json"),
            r#"{"type": "object", "properties": {
                "id": {"type": "integer"},
                "fax": {"type": "string"},
                "name": {"type": "string"}
            }}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("person.json"),
            r#"{"type": "object", "properties": {
                "name": {"type": "string"},
                "id": {"type": "integer"},
                "email": {"type": "string"}
            }, "required": ["id", "name"], "additionalProperties": false}"#,
        )
        .unwrap();
        let ctx = context_in(dir.path(), "{}");
        let input = table(
            &["name", "fax", "id", "internal"],
            &[r#"["ada", "555", 1, true]"#, r#"["bob", null, 2, false]"#],
        );

        let out = run_on(
            &ctx,
            ActionKind::Validate,
            "schema: person.json\nold_schema: legacy.json",
            input,
        )
        .unwrap()
        .unwrap();
        let t = out.as_table().unwrap();
        assert_eq!(t.columns(), ["id", "name"]);
        assert_eq!(column(&out, "name"), vec![Value::from("ada"), Value::from("bob")]);

        let bad = table(&["id", "name"], &[r#"["x", "ada"]"#]);
        let err = run_on(
            &ctx,
            ActionKind::Validate,
            "schema: person.json\nold_schema: legacy.json",
            bad,
        )
        .unwrap_err();
        assert!(matches!(err, ActionError::Validation(s) if s == "person.json"));
    }
}
