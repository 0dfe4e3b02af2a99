//! Research agent discovery and registration.
//!
//! Agents are external executables described by `<agents_dir>/<name>/agent.toml`.
//! Every manifest is validated when it is registered, so a bad tool name or
//! parameter schema fails the request before the first model round-trip.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::types::ToolDefinition;
use crate::core::validation::compile_schema;
use crate::errors::PreconditionError;

pub const MANIFEST_FILE: &str = "agent.toml";

static TOOL_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("tool name regex should be valid")
});

/// On-disk manifest shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentManifest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Program followed by fixed arguments.
    pub command: Vec<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// A validated agent ready to be invoked.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub name: String,
    pub description: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub tools: Vec<ToolDefinition>,
}

impl AgentSpec {
    /// Validate a manifest. `base_dir` resolves relative program paths that
    /// contain a separator; bare names are looked up on `PATH` at spawn time.
    pub fn from_manifest(manifest: AgentManifest, base_dir: Option<&Path>) -> Result<Self> {
        let name = manifest.name.trim().to_string();
        if name.is_empty() {
            bail!("agent name must be non-empty");
        }
        let mut command = manifest.command.into_iter();
        let program = command
            .next()
            .filter(|program| !program.trim().is_empty())
            .ok_or_else(|| anyhow!("agent '{name}' has an empty command"))?;
        let program = resolve_program(&program, base_dir);

        let mut seen = HashSet::new();
        for tool in &manifest.tools {
            if !TOOL_NAME_RE.is_match(&tool.name) {
                bail!(
                    "agent '{name}' tool name '{}' must match {}",
                    tool.name,
                    TOOL_NAME_RE.as_str()
                );
            }
            if !seen.insert(tool.name.as_str()) {
                bail!("agent '{name}' declares tool '{}' twice", tool.name);
            }
            if !tool.parameters.is_object() {
                bail!(
                    "agent '{name}' tool '{}' parameters must be a JSON object",
                    tool.name
                );
            }
            compile_schema(&tool.parameters)
                .with_context(|| format!("agent '{name}' tool '{}' parameters", tool.name))?;
        }

        Ok(Self {
            name,
            description: manifest.description,
            program,
            args: command.collect(),
            tools: manifest.tools,
        })
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.name == name)
    }
}

fn resolve_program(program: &str, base_dir: Option<&Path>) -> PathBuf {
    let path = PathBuf::from(program);
    match base_dir {
        Some(base) if path.is_relative() && program.contains(['/', '\\']) => base.join(path),
        _ => path,
    }
}

/// Parse and validate a manifest file.
pub fn load_manifest(path: &Path) -> Result<AgentSpec> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let manifest: AgentManifest =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    AgentSpec::from_manifest(manifest, path.parent())
        .with_context(|| format!("validate {}", path.display()))
}

/// Known agents, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, AgentSpec>,
}

impl AgentRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: AgentSpec) -> Result<()> {
        if self.agents.contains_key(&spec.name) {
            bail!("agent '{}' is registered twice", spec.name);
        }
        debug!(agent = %spec.name, tools = spec.tools.len(), "registered agent");
        self.agents.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Load every `<dir>/<name>/agent.toml`. A missing directory yields an
    /// empty registry.
    #[instrument(skip_all, fields(dir = %dir.display()))]
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut registry = Self::empty();
        if !dir.exists() {
            debug!("agents directory missing");
            return Ok(registry);
        }
        let mut manifests = Vec::new();
        for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
            let manifest = entry.path().join(MANIFEST_FILE);
            if manifest.is_file() {
                manifests.push(manifest);
            }
        }
        manifests.sort();
        for manifest in manifests {
            registry.register(load_manifest(&manifest)?)?;
        }
        info!(agents = registry.agents.len(), "loaded agents");
        Ok(registry)
    }

    pub fn resolve(&self, name: &str) -> Result<&AgentSpec, PreconditionError> {
        self.agents
            .get(name)
            .ok_or_else(|| PreconditionError::UnknownAgent {
                name: name.to_string(),
                available: self.available(),
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSpec> {
        self.agents.values()
    }

    fn available(&self) -> String {
        if self.agents.is_empty() {
            "none".to_string()
        } else {
            self.names().join(", ")
        }
    }
}

/// Parameter schema for a tool that takes no arguments.
pub fn no_parameters() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
