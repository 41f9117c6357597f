//! Text templating: environment interpolation, `{{ name }}` substitution and
//! `{% include %}` expansion.
//!
//! Supported syntax:
//! - `${VAR}` - environment variable, error if unset
//! - `${VAR:-default}` - default if VAR is unset or empty
//! - `${VAR-default}` - default only if VAR is unset
//! - `$$` - literal `$`
//! - `{{ name }}` - binding or environment lookup
//! - `{% include "file.yml" %}` - splice another file (config loading only)

use crate::value::{Map, Value};
use regex::Regex;
use std::env;
use std::path::Path;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escape
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: name
            (?:
                (:?-)                  # 2: :- or -
                ([^}]*)                # 3: default
            )?
        \}
        ",
    )
    .expect("valid env var regex")
});

static BINDING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("valid binding regex")
});

static INCLUDE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*include\s+["']([^"']+)["']\s*-?%\}"#).expect("valid include regex")
});

/// Maximum `{% include %}` nesting.
pub const MAX_INCLUDE_DEPTH: usize = 8;

/// Interpolate `${VAR}` forms from the process environment.
///
/// All missing variables are collected so they can be reported at once.
pub fn interpolate_env(input: &str) -> Result<String, Vec<String>> {
    let mut missing = Vec::new();

    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            let full = &caps[0];
            if full == "$$" {
                return "$".to_string();
            }
            let name = &caps[1];
            let default_syntax = caps.get(2).map(|m| m.as_str());
            let default_value = caps.get(3).map(|m| m.as_str());

            match env::var(name) {
                Ok(value) if value.is_empty() && default_syntax == Some(":-") => {
                    default_value.unwrap_or("").to_string()
                }
                Ok(value) => value,
                Err(_) => match default_value {
                    Some(default) => default.to_string(),
                    None => {
                        missing.push(name.to_string());
                        full.to_string()
                    }
                },
            }
        })
        .into_owned();

    if missing.is_empty() {
        Ok(text)
    } else {
        Err(missing)
    }
}

/// Render `{{ name }}` placeholders from bindings, then the environment.
///
/// Dotted names walk into nested maps. Unknown names render as the empty
/// string.
pub fn render(input: &str, bindings: &Map) -> String {
    BINDING_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            lookup(bindings, &caps[1])
                .map(Value::to_text)
                .or_else(|| env::var(&caps[1]).ok())
                .unwrap_or_default()
        })
        .into_owned()
}

/// Names referenced by `{{ name }}` placeholders, in order of appearance.
pub fn placeholders(input: &str) -> Vec<String> {
    BINDING_PATTERN
        .captures_iter(input)
        .map(|c| c[1].to_string())
        .collect()
}

/// Expand `{% include "path" %}` directives relative to `base_dir`.
pub fn expand_includes(input: &str, base_dir: &Path) -> Result<String, IncludeError> {
    expand_includes_at(input, base_dir, 0)
}

fn expand_includes_at(input: &str, base_dir: &Path, depth: usize) -> Result<String, IncludeError> {
    if !INCLUDE_PATTERN.is_match(input) {
        return Ok(input.to_string());
    }
    if depth >= MAX_INCLUDE_DEPTH {
        return Err(IncludeError::TooDeep(MAX_INCLUDE_DEPTH));
    }

    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in INCLUDE_PATTERN.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&input[last..whole.start()]);

        let path = base_dir.join(&caps[1]);
        let content = std::fs::read_to_string(&path).map_err(|source| IncludeError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let nested_base = path.parent().unwrap_or(base_dir);
        out.push_str(&expand_includes_at(&content, nested_base, depth + 1)?);
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn lookup<'a>(bindings: &'a Map, name: &str) -> Option<&'a Value> {
    if let Some(v) = bindings.get(name) {
        return Some(v);
    }
    let mut parts = name.split('.');
    let mut current = bindings.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Errors from `{% include %}` expansion.
#[derive(Debug, thiserror::Error)]
pub enum IncludeError {
    #[error("failed to read included file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("includes nested deeper than {0} levels")]
    TooDeep(usize),
}
