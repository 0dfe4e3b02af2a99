//! Placeholder rendering and document output.
//!
//! Templates mark insertion points with `<!-- data-field="a.b.c" -->`. Each
//! marker is replaced by the value at that dotted path in the validated fields.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, instrument};

static FIELD_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<!--\s*data-field="([^"]+)"\s*-->"#).expect("field marker regex should be valid")
});

/// Replace every field marker in `html` with the matching value.
///
/// Strings are inserted verbatim, other scalars as JSON text and arrays or
/// objects as compact JSON. Markers whose path is missing or null are left
/// as they are. Identical inputs always render identical bytes.
pub fn render_fields(html: &str, fields: &Value) -> String {
    FIELD_MARKER_RE
        .replace_all(html, |caps: &Captures<'_>| {
            match lookup_path(fields, &caps[1]) {
                Some(Value::Null) | None => caps[0].to_string(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            }
        })
        .into_owned()
}

/// Value at a dotted path. Numeric segments index into arrays.
pub fn lookup_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    })
}

/// `<output>.fields.json`, next to the document.
pub fn sidecar_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".fields.json");
    output.with_file_name(name)
}

/// Write the rendered document and its fields sidecar, each atomically.
#[instrument(skip_all, fields(output = %output.display()))]
pub fn write_document(output: &Path, rendered: &str, fields: &Value) -> Result<PathBuf> {
    let parent = output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("create output dir {}", parent.display()))?;

    write_atomic(output, rendered.as_bytes())?;
    let sidecar = sidecar_path(output);
    let mut payload = serde_json::to_string_pretty(fields).context("serialize fields")?;
    payload.push('\n');
    write_atomic(&sidecar, payload.as_bytes())?;
    debug!(sidecar = %sidecar.display(), "wrote document");
    Ok(sidecar)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replaces_markers_by_value_kind() {
        let html = r#"<h1><!-- data-field="document.title" --></h1><p><!--data-field="document.count"--></p><ul><!-- data-field="document.tags" --></ul>"#;
        let fields = json!({
            "document": { "title": "Vision & <Plan>", "count": 3, "tags": ["a", "b"] }
        });
        assert_eq!(
            render_fields(html, &fields),
            r#"<h1>Vision & <Plan></h1><p>3</p><ul>["a","b"]</ul>"#
        );
    }

    #[test]
    fn missing_and_null_paths_keep_marker() {
        let html = r#"<!-- data-field="document.summary" -->|<!-- data-field="document.none" -->"#;
        let fields = json!({ "document": { "none": null } });
        assert_eq!(render_fields(html, &fields), html);
    }

    #[test]
    fn rendering_is_deterministic() {
        let html = include_str!("../../templates/architecture-vision/template.html");
        let fields = json!({
            "document": {
                "title": "T",
                "content": "C",
                "components": [{ "name": "api", "responsibility": "serve" }]
            }
        });
        let first = render_fields(html, &fields);
        let second = render_fields(html, &fields);
        assert_eq!(first, second);
        assert!(first.contains(r#"[{"name":"api","responsibility":"serve"}]"#));
    }

    #[test]
    fn lookup_supports_array_indices() {
        let value = json!({ "a": [{ "b": 1 }] });
        assert_eq!(lookup_path(&value, "a.0.b"), Some(&json!(1)));
        assert_eq!(lookup_path(&value, "a.x"), None);
    }

    #[test]
    fn write_document_creates_sidecar() {
        let temp = tempfile::tempdir().expect("tempdir");
        let output = temp.path().join("out").join("vision.html");
        let fields = json!({ "document": { "title": "T" } });
        let sidecar = write_document(&output, "<h1>T</h1>", &fields).expect("write");

        assert_eq!(sidecar, temp.path().join("out").join("vision.html.fields.json"));
        assert_eq!(fs::read_to_string(&output).expect("read"), "<h1>T</h1>");
        let stored: Value =
            serde_json::from_str(&fs::read_to_string(&sidecar).expect("read")).expect("parse");
        assert_eq!(stored, fields);
    }
}
