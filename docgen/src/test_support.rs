//! Test-only doubles for the model and tool seams, plus filesystem fixtures.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{Message, ModelReply, ToolCall, ToolDefinition, ToolResult};
use crate::io::cancel::CancelToken;
use crate::io::config::DocgenConfig;
use crate::io::model::{ChatModel, ChatRequest};
use crate::io::tool_host::ToolHost;

/// A request as the model saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

/// Model that returns predetermined replies and records every request.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    replies: RefCell<VecDeque<ModelReply>>,
    repeat: Option<ModelReply>,
    requests: RefCell<Vec<RecordedRequest>>,
}

impl ScriptedModel {
    /// Replies returned in order; running out is an error.
    pub fn new(replies: Vec<ModelReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            ..Self::default()
        }
    }

    /// The same reply, forever.
    pub fn repeating(reply: ModelReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.borrow().clone()
    }
}

impl ChatModel for ScriptedModel {
    fn complete(&self, request: &ChatRequest<'_>, cancel: &CancelToken) -> Result<ModelReply> {
        cancel.check()?;
        self.requests.borrow_mut().push(RecordedRequest {
            messages: request.messages.to_vec(),
            tools: request.tools.to_vec(),
        });
        if let Some(reply) = self.replies.borrow_mut().pop_front() {
            return Ok(reply);
        }
        self.repeat
            .clone()
            .ok_or_else(|| anyhow!("scripted model has no more replies"))
    }
}

/// Canned outcome for one tool name.
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Success(String),
    Error(String),
    /// Fire the cancel token, then fail with it.
    Cancel,
}

/// Tool host that never spawns: answers from a table keyed by tool name.
#[derive(Debug, Default)]
pub struct ScriptedToolHost {
    definitions: Vec<ToolDefinition>,
    outcomes: BTreeMap<String, ScriptedOutcome>,
    executed: RefCell<Vec<ToolCall>>,
}

impl ScriptedToolHost {
    pub fn new(definitions: Vec<ToolDefinition>) -> Self {
        Self {
            definitions,
            ..Self::default()
        }
    }

    pub fn with_outcome(mut self, tool: &str, outcome: ScriptedOutcome) -> Self {
        self.outcomes.insert(tool.to_string(), outcome);
        self
    }

    pub fn executed(&self) -> Vec<ToolCall> {
        self.executed.borrow().clone()
    }

    pub fn executions(&self) -> usize {
        self.executed.borrow().len()
    }
}

impl ToolHost for ScriptedToolHost {
    fn definitions(&self) -> &[ToolDefinition] {
        &self.definitions
    }

    fn execute(&self, call: &ToolCall, cancel: &CancelToken) -> Result<ToolResult> {
        cancel.check()?;
        self.executed.borrow_mut().push(call.clone());
        match self.outcomes.get(&call.name) {
            Some(ScriptedOutcome::Success(content)) => Ok(ToolResult::success(&call.id, content)),
            Some(ScriptedOutcome::Error(message)) => Ok(ToolResult::error(&call.id, message)),
            Some(ScriptedOutcome::Cancel) => {
                cancel.cancel();
                cancel.check()?;
                Err(anyhow!("cancel token did not fire"))
            }
            None => Ok(ToolResult::success(&call.id, "{}")),
        }
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

pub fn tool_def(name: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: format!("{name} tool"),
        parameters: crate::io::agents::no_parameters(),
    }
}

/// Temporary directory laid out like a project using docgen.
pub struct TestWorkspace {
    pub dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Write a file, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Config with every path pointing inside the workspace.
    pub fn config(&self) -> DocgenConfig {
        let mut config = DocgenConfig::default();
        config.paths.cache_dir = self.path("cache");
        config.paths.agents_dir = self.path("agents");
        config
    }

    /// Install an agent whose program is a shell script. The manifest is
    /// written as `agents/<name>/agent.toml`; `tools_toml` holds its
    /// `[[tools]]` tables.
    #[cfg(unix)]
    pub fn install_script_agent(&self, name: &str, script: &str, tools_toml: &str) -> Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        let dir = self.path(&format!("agents/{name}"));
        fs::create_dir_all(&dir)?;
        let program = dir.join("run.sh");
        fs::write(&program, format!("#!/bin/sh\n{script}\n"))?;
        fs::set_permissions(&program, fs::Permissions::from_mode(0o755))?;
        let manifest = format!(
            "name = \"{name}\"\ndescription = \"test agent\"\ncommand = [\"./run.sh\"]\n\n{tools_toml}\n"
        );
        fs::write(dir.join("agent.toml"), manifest)?;
        Ok(dir)
    }
}
