//! Tool execution backends for the analysis loop.
//!
//! The [`ToolHost`] trait decouples the loop from how tools run. The production
//! host ([`AgentToolHost`]) launches one agent process per call in a fresh
//! artifact directory; tests use scripted hosts that never spawn.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::params::{TOOL_PARAM, param_env_name, param_value_string};
use crate::core::types::{ToolCall, ToolDefinition, ToolResult};
use crate::core::validation::{JsonSchemaValidator, SchemaValidator};
use crate::errors::Cancelled;
use crate::io::agents::AgentSpec;
use crate::io::cache::ArtifactCache;
use crate::io::cancel::CancelToken;
use crate::io::process::run_command_streaming;

/// Preferred artifact file name inside a run directory.
pub const ARTIFACT_FILE: &str = "result.json";

/// Lines of agent stderr quoted in a failure result.
const STDERR_TAIL_LINES: usize = 20;

/// Executes tool calls on behalf of the analysis loop.
pub trait ToolHost {
    /// Tools advertised to the model, in declaration order.
    fn definitions(&self) -> &[ToolDefinition];

    /// Run one call. Tool failures come back as error results; `Err` is
    /// reserved for failures that must end the whole request (cancellation).
    fn execute(&self, call: &ToolCall, cancel: &CancelToken) -> Result<ToolResult>;
}

/// Runs tool calls as subprocesses of one research agent.
pub struct AgentToolHost {
    spec: AgentSpec,
    source_path: PathBuf,
    overrides: BTreeMap<String, String>,
    cache: ArtifactCache,
    output_limit_bytes: usize,
    validator: JsonSchemaValidator,
}

impl AgentToolHost {
    pub fn new(
        spec: AgentSpec,
        source_path: PathBuf,
        overrides: BTreeMap<String, String>,
        cache: ArtifactCache,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            spec,
            source_path,
            overrides,
            cache,
            output_limit_bytes,
            validator: JsonSchemaValidator,
        }
    }

    /// Check a call against the agent's declarations without spawning.
    fn check_call<'a>(&'a self, call: &ToolCall) -> std::result::Result<&'a ToolDefinition, String> {
        let Some(tool) = self.spec.tool(&call.name) else {
            let available: Vec<&str> = self.spec.tools.iter().map(|t| t.name.as_str()).collect();
            return Err(format!(
                "unknown tool '{}' (available: {})",
                call.name,
                available.join(", ")
            ));
        };
        if !call.arguments.is_object() {
            return Err(format!(
                "arguments for '{}' must be a JSON object, got: {}",
                call.name, call.arguments
            ));
        }
        let violations = self
            .validator
            .validate(&call.arguments, &tool.parameters)
            .map_err(|err| format!("validate arguments for '{}': {err:#}", call.name))?;
        if !violations.is_empty() {
            let lines: Vec<String> = violations.iter().map(|v| format!("- {v}")).collect();
            return Err(format!(
                "arguments for '{}' do not match its parameters:\n{}",
                call.name,
                lines.join("\n")
            ));
        }
        Ok(tool)
    }

    fn run_agent(&self, call: &ToolCall, cancel: &CancelToken) -> Result<std::result::Result<Value, String>> {
        let run_dir = match self.cache.create_run_directory(&self.spec.name) {
            Ok(dir) => dir,
            Err(err) => return Ok(Err(format!("{err:#}"))),
        };
        let env = agent_env(&call.name, &self.overrides, &call.arguments);
        let cmd = build_agent_command(&self.spec, &self.source_path, &run_dir.path, &env);
        info!(
            agent = %self.spec.name,
            tool = %call.name,
            run_dir = %run_dir.path.display(),
            "invoking agent"
        );

        let output = match run_command_streaming(cmd, &self.spec.name, self.output_limit_bytes, cancel) {
            Ok(output) => output,
            Err(err) if err.downcast_ref::<Cancelled>().is_some() => return Err(err),
            Err(err) => return Ok(Err(format!("failed to run agent '{}': {err:#}", self.spec.name))),
        };

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            warn!(agent = %self.spec.name, tool = %call.name, exit_code = %code, "agent failed");
            let mut message = format!(
                "agent '{}' tool '{}' exited with status {code}",
                self.spec.name, call.name
            );
            let tail = output.stderr_tail(STDERR_TAIL_LINES);
            if !tail.trim().is_empty() {
                message.push_str("\nstderr:\n");
                message.push_str(tail.trim_end());
            }
            message.push_str(&output.stderr_truncated_notice("agent"));
            return Ok(Err(message));
        }

        Ok(load_artifact(&run_dir.path).map_err(|err| format!("{err:#}")))
    }
}

impl ToolHost for AgentToolHost {
    fn definitions(&self) -> &[ToolDefinition] {
        &self.spec.tools
    }

    #[instrument(skip_all, fields(tool = %call.name, call_id = %call.id))]
    fn execute(&self, call: &ToolCall, cancel: &CancelToken) -> Result<ToolResult> {
        cancel.check()?;
        if let Err(message) = self.check_call(call) {
            debug!(%message, "rejected tool call");
            return Ok(ToolResult::error(&call.id, message));
        }
        match self.run_agent(call, cancel)? {
            Ok(artifact) => {
                debug!("agent produced artifact");
                Ok(ToolResult::success(&call.id, artifact.to_string()))
            }
            Err(message) => Ok(ToolResult::error(&call.id, message)),
        }
    }
}

/// Environment passed to an agent: overrides, then call arguments (which win),
/// then `PARAM_TOOL`.
pub fn agent_env(
    tool: &str,
    overrides: &BTreeMap<String, String>,
    arguments: &Value,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for (name, value) in overrides {
        env.insert(param_env_name(name), value.clone());
    }
    if let Some(args) = arguments.as_object() {
        for (name, value) in args {
            env.insert(param_env_name(name), param_value_string(value));
        }
    }
    env.insert(param_env_name(TOOL_PARAM), tool.to_string());
    env
}

/// `program args... <source_path> <output_path>` with the given environment.
pub fn build_agent_command(
    spec: &AgentSpec,
    source_path: &Path,
    output_path: &Path,
    env: &BTreeMap<String, String>,
) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).arg(source_path).arg(output_path).envs(env);
    cmd
}

/// Load the JSON artifact an agent left in `dir`: `result.json` if present,
/// otherwise the first `*.json` file in name order.
pub fn load_artifact(dir: &Path) -> Result<Value> {
    let preferred = dir.join(ARTIFACT_FILE);
    let path = if preferred.is_file() {
        preferred
    } else {
        let mut candidates: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("read artifact dir {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("agent wrote no JSON artifact in {}", dir.display()))?
    };
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read artifact {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse artifact {}", path.display()))
}
