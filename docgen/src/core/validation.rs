//! Schema conformance checks for model drafts.
//!
//! Validation is consumed through [`SchemaValidator`] so loops can be tested
//! with any implementation; [`JsonSchemaValidator`] is the production one
//! (JSON Schema Draft 2020-12).

use std::fmt;

use anyhow::{Context, Result};
use jsonschema::Draft;
use jsonschema::error::ValidationErrorKind;
use serde::Serialize;
use serde_json::Value;

/// Path used for violations that concern the document as a whole.
pub const ROOT_PATH: &str = "(root)";

/// One schema violation: dotted field path plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// `validate(document, schema) -> violations`; an empty list means valid.
pub trait SchemaValidator {
    fn validate(&self, document: &Value, schema: &Value) -> Result<Vec<Violation>>;
}

/// JSON Schema Draft 2020-12 validator backed by the `jsonschema` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl SchemaValidator for JsonSchemaValidator {
    fn validate(&self, document: &Value, schema: &Value) -> Result<Vec<Violation>> {
        let compiled = compile_schema(schema)?;
        let violations = compiled
            .iter_errors(document)
            .map(|err| {
                let mut path = pointer_to_dotted(&err.instance_path.to_string());
                if let ValidationErrorKind::Required { property } = &err.kind
                    && let Some(name) = property.as_str()
                {
                    path = join_path(&path, name);
                }
                Violation::new(path, err.to_string())
            })
            .collect();
        Ok(violations)
    }
}

/// Compile a schema, failing with context when the schema itself is invalid.
pub fn compile_schema(schema: &Value) -> Result<jsonschema::Validator> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .context("compile json schema")
}

/// Parse a model draft into JSON.
///
/// Models often wrap JSON in a Markdown fence or add a sentence around it, so
/// the outermost `{...}` span is tried when the raw text does not parse.
pub fn parse_draft(text: &str) -> std::result::Result<Value, Violation> {
    let trimmed = strip_code_fence(text.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    let candidate = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    serde_json::from_str::<Value>(candidate)
        .map_err(|err| Violation::new(ROOT_PATH, format!("response is not valid JSON: {err}")))
}

/// Parse and validate a draft, returning the document or its violations.
pub fn check_draft<V: SchemaValidator + ?Sized>(
    validator: &V,
    draft: &str,
    schema: &Value,
) -> Result<std::result::Result<Value, Vec<Violation>>> {
    let document = match parse_draft(draft) {
        Ok(document) => document,
        Err(violation) => return Ok(Err(vec![violation])),
    };
    let violations = validator.validate(&document, schema)?;
    if violations.is_empty() {
        Ok(Ok(document))
    } else {
        Ok(Err(violations))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Convert a JSON pointer (`/document/title`) into a dotted path (`document.title`).
fn pointer_to_dotted(pointer: &str) -> String {
    let segments: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect();
    if segments.is_empty() {
        ROOT_PATH.to_string()
    } else {
        segments.join(".")
    }
}

fn join_path(parent: &str, child: &str) -> String {
    if parent == ROOT_PATH {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}
