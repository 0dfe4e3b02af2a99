//! Document templates: schema, HTML layout and prompt sources.
//!
//! A template directory holds `schema.json` and `template.html`, plus optional
//! `generate.md`, `analysis_system.md` and `analysis_user.md` prompt sources.
//! Missing prompts fall back to the generic ones in `io/prompts/`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::validation::compile_schema;
use crate::errors::PreconditionError;

pub const SCHEMA_FILE: &str = "schema.json";
pub const HTML_FILE: &str = "template.html";
const GENERATE_FILE: &str = "generate.md";
const ANALYSIS_SYSTEM_FILE: &str = "analysis_system.md";
const ANALYSIS_USER_FILE: &str = "analysis_user.md";

const DEFAULT_GENERATE: &str = include_str!("prompts/generate.md");
const DEFAULT_ANALYSIS_SYSTEM: &str = include_str!("prompts/analysis_system.md");
const DEFAULT_ANALYSIS_USER: &str = include_str!("prompts/analysis_user.md");

const BUILTIN_TEMPLATES: &[BuiltinTemplate] = &[BuiltinTemplate {
    name: "architecture-vision",
    description: "Architecture vision: current state, target state, guiding principles",
    schema: include_str!("../../templates/architecture-vision/schema.json"),
    html: include_str!("../../templates/architecture-vision/template.html"),
    generate: include_str!("../../templates/architecture-vision/generate.md"),
    analysis_system: include_str!("../../templates/architecture-vision/analysis_system.md"),
    analysis_user: include_str!("../../templates/architecture-vision/analysis_user.md"),
}];

struct BuiltinTemplate {
    name: &'static str,
    description: &'static str,
    schema: &'static str,
    html: &'static str,
    generate: &'static str,
    analysis_system: &'static str,
    analysis_user: &'static str,
}

/// A loaded template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub schema: Value,
    pub html: String,
    /// Prompt source for one-shot generation.
    pub generate_prompt: String,
    /// Prompt sources seeding an analysis session.
    pub analysis_system_prompt: String,
    pub analysis_user_prompt: String,
}

impl Template {
    fn from_builtin(builtin: &BuiltinTemplate) -> Result<Self> {
        let schema = parse_schema(builtin.schema)
            .with_context(|| format!("parse built-in schema for {}", builtin.name))?;
        Ok(Self {
            name: builtin.name.to_string(),
            description: builtin.description.to_string(),
            schema,
            html: builtin.html.to_string(),
            generate_prompt: builtin.generate.to_string(),
            analysis_system_prompt: builtin.analysis_system.to_string(),
            analysis_user_prompt: builtin.analysis_user.to_string(),
        })
    }

    /// Load a template from `dir`; the directory name is the template name.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let name = dir
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .with_context(|| format!("template dir {} has no name", dir.display()))?
            .to_string();
        let schema_path = dir.join(SCHEMA_FILE);
        let schema_raw = fs::read_to_string(&schema_path)
            .with_context(|| format!("read {}", schema_path.display()))?;
        let schema =
            parse_schema(&schema_raw).with_context(|| format!("parse {}", schema_path.display()))?;
        let html_path = dir.join(HTML_FILE);
        let html =
            fs::read_to_string(&html_path).with_context(|| format!("read {}", html_path.display()))?;

        Ok(Self {
            description: format!("custom template from {}", dir.display()),
            schema,
            html,
            generate_prompt: read_optional(&dir.join(GENERATE_FILE), DEFAULT_GENERATE)?,
            analysis_system_prompt: read_optional(
                &dir.join(ANALYSIS_SYSTEM_FILE),
                DEFAULT_ANALYSIS_SYSTEM,
            )?,
            analysis_user_prompt: read_optional(&dir.join(ANALYSIS_USER_FILE), DEFAULT_ANALYSIS_USER)?,
            name,
        })
    }
}

fn parse_schema(raw: &str) -> Result<Value> {
    let schema: Value = serde_json::from_str(raw).context("parse schema json")?;
    if !schema.is_object() {
        bail!("schema must be a JSON object");
    }
    compile_schema(&schema)?;
    Ok(schema)
}

fn read_optional(path: &Path, default: &str) -> Result<String> {
    if !path.exists() {
        return Ok(default.to_string());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Templates known to this process, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, Template>,
}

impl TemplateStore {
    /// Store with the templates compiled into the binary.
    pub fn builtin() -> Result<Self> {
        let mut templates = BTreeMap::new();
        for builtin in BUILTIN_TEMPLATES {
            let template = Template::from_builtin(builtin)?;
            templates.insert(template.name.clone(), template);
        }
        Ok(Self { templates })
    }

    /// Add or override templates from each `<dir>/<name>/` holding a schema.
    /// A missing directory is ignored.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn with_dir(mut self, dir: &Path) -> Result<Self> {
        if !dir.exists() {
            debug!("templates directory missing");
            return Ok(self);
        }
        let mut dirs = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let path = entry.path();
            if path.join(SCHEMA_FILE).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        for path in dirs {
            let template = Template::load_dir(&path)?;
            if self.templates.contains_key(&template.name) {
                debug!(template = %template.name, "overriding template");
            }
            self.templates.insert(template.name.clone(), template);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&Template, PreconditionError> {
        self.templates
            .get(name)
            .ok_or_else(|| PreconditionError::UnknownTemplate {
                name: name.to_string(),
                available: self.names().join(", "),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }
}
