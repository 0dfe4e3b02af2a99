//! Prompt rendering for generation, analysis and repair.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::core::types::ToolDefinition;
use crate::core::validation::Violation;
use crate::io::sources::SourceBundle;
use crate::io::templates::Template;

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");
const CORRECTION_TEMPLATE: &str = include_str!("prompts/correction.md");

/// Tool summary exposed to prompt templates.
#[derive(Debug, Clone, Serialize)]
struct ToolContext<'a> {
    name: &'a str,
    description: &'a str,
}

/// Inputs for the two prompts that seed an analysis session.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisPromptInputs<'a> {
    pub template: &'a Template,
    pub agent: &'a str,
    pub tools: &'a [ToolDefinition],
    pub source_path: &'a Path,
    pub params: &'a BTreeMap<String, String>,
}

/// Rendered system and user prompts for an analysis session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisPrompts {
    pub system: String,
    pub user: String,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.add_template("repair", REPAIR_TEMPLATE)
            .context("add repair template")?;
        env.add_template("correction", CORRECTION_TEMPLATE)
            .context("add correction template")?;
        Ok(Self { env })
    }

    /// Primary prompt for one-shot generation from ingested sources.
    pub fn render_generation(
        &self,
        template: &Template,
        sources: &SourceBundle,
        params: &BTreeMap<String, String>,
    ) -> Result<String> {
        let rendered = self
            .env
            .render_str(
                &template.generate_prompt,
                context! {
                    template => template.name.as_str(),
                    schema => pretty_schema(&template.schema)?,
                    sources => &sources.documents,
                    skipped => &sources.skipped,
                    params => params,
                },
            )
            .with_context(|| format!("render generation prompt for {}", template.name))?;
        debug!(template = %template.name, bytes = rendered.len(), "rendered generation prompt");
        Ok(rendered)
    }

    pub fn render_analysis(&self, inputs: &AnalysisPromptInputs<'_>) -> Result<AnalysisPrompts> {
        let tools: Vec<ToolContext<'_>> = inputs
            .tools
            .iter()
            .map(|tool| ToolContext {
                name: &tool.name,
                description: &tool.description,
            })
            .collect();
        let ctx = context! {
            template => inputs.template.name.as_str(),
            schema => pretty_schema(&inputs.template.schema)?,
            agent => inputs.agent,
            tools => tools,
            source_path => inputs.source_path.display().to_string(),
            params => inputs.params,
        };
        let system = self
            .env
            .render_str(&inputs.template.analysis_system_prompt, ctx.clone())
            .with_context(|| format!("render analysis system prompt for {}", inputs.template.name))?;
        let user = self
            .env
            .render_str(&inputs.template.analysis_user_prompt, ctx)
            .with_context(|| format!("render analysis user prompt for {}", inputs.template.name))?;
        Ok(AnalysisPrompts { system, user })
    }

    /// Follow-up prompt carrying the rejected draft verbatim and its violations.
    pub fn render_repair(&self, schema: &Value, draft: &str, violations: &[Violation]) -> Result<String> {
        let template = self.env.get_template("repair")?;
        let rendered = template
            .render(context! {
                schema => pretty_schema(schema)?,
                draft => draft,
                violations => violations,
            })
            .context("render repair prompt")?;
        Ok(rendered)
    }

    /// Corrective note appended when an analysis final answer is rejected.
    pub fn render_correction(&self, violations: &[Violation]) -> Result<String> {
        let template = self.env.get_template("correction")?;
        let rendered = template
            .render(context! { violations => violations })
            .context("render correction prompt")?;
        Ok(rendered)
    }
}

fn pretty_schema(schema: &Value) -> Result<String> {
    serde_json::to_string_pretty(schema).context("serialize schema")
}
