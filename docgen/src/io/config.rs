//! Generator configuration stored in `docgen.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::retry::RetryPolicy;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "docgen.toml";

/// Generator configuration (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocgenConfig {
    pub model: ModelConfig,
    pub retry: RetryPolicy,
    pub analysis: AnalysisConfig,
    pub repair: RepairConfig,
    pub paths: PathsConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API (without `/chat/completions`).
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request HTTP timeout in seconds.
    pub request_timeout_secs: u64,
    pub temperature: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            temperature: Some(0.2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Maximum consumed turns per analysis session.
    pub max_turns: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { max_turns: 12 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepairConfig {
    /// Repair attempts allowed after the first draft.
    pub max_repair_attempts: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_repair_attempts: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the artifact cache for agent runs.
    pub cache_dir: PathBuf,
    /// Directory holding `<agent>/agent.toml` manifests.
    pub agents_dir: PathBuf,
    /// Extra templates layered over the built-in ones.
    pub templates_dir: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".docgen/cache"),
            agents_dir: PathBuf::from("agents"),
            templates_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Bytes of agent stdout/stderr kept in memory per stream.
    pub agent_output_limit_bytes: usize,
    /// Bytes of source text embedded in a one-shot generation prompt.
    pub source_budget_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            agent_output_limit_bytes: 1_000_000,
            source_budget_bytes: 200_000,
        }
    }
}

impl Default for DocgenConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            retry: RetryPolicy::default(),
            analysis: AnalysisConfig::default(),
            repair: RepairConfig::default(),
            paths: PathsConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl DocgenConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model.base_url.trim().is_empty() {
            return Err(anyhow!("model.base_url must be non-empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(anyhow!("retry.backoff_factor must be >= 1.0"));
        }
        if self.analysis.max_turns == 0 {
            return Err(anyhow!("analysis.max_turns must be > 0"));
        }
        if self.limits.agent_output_limit_bytes == 0 {
            return Err(anyhow!("limits.agent_output_limit_bytes must be > 0"));
        }
        if self.limits.source_budget_bytes == 0 {
            return Err(anyhow!("limits.source_budget_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `DocgenConfig::default()`.
pub fn load_config(path: &Path) -> Result<DocgenConfig> {
    if !path.exists() {
        let cfg = DocgenConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: DocgenConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DocgenConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
