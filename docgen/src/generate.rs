//! Generation orchestrator: preconditions, analysis or one-shot generation,
//! rendering and output.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::analysis::{AnalysisSession, AnalysisSuccess, SessionSpec, run_analysis};
use crate::core::validation::{JsonSchemaValidator, SchemaValidator};
use crate::errors::{PreconditionError, TurnsExhaustedError};
use crate::io::agents::{AgentRegistry, AgentSpec};
use crate::io::cache::ArtifactCache;
use crate::io::cancel::CancelToken;
use crate::io::config::DocgenConfig;
use crate::io::model::ChatModel;
use crate::io::prompt::{AnalysisPromptInputs, PromptEngine};
use crate::io::render::{render_fields, write_document};
use crate::io::sources::ingest_sources;
use crate::io::templates::{Template, TemplateStore};
use crate::io::tool_host::AgentToolHost;
use crate::io::transcript::{TranscriptMeta, TranscriptOutcome, write_transcript};
use crate::repair::{RepairRequest, run_repair_loop};

/// One document generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    pub template: String,
    pub sources: Vec<PathBuf>,
    /// Research agent driving an analysis session; `None` means one-shot generation.
    pub agent: Option<String>,
    pub params: BTreeMap<String, String>,
    pub output: PathBuf,
    pub force: bool,
    pub dry_run: bool,
    /// Overrides `analysis.max_turns` from config.
    pub max_turns: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationMode {
    Direct {
        /// Attempts used, including the first.
        attempts: u32,
    },
    Analysis {
        agent: String,
        turns_used: u32,
        model_calls: u32,
        transcript: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOutcome {
    pub template: String,
    pub output: PathBuf,
    pub rendered: String,
    pub fields: Value,
    /// False for dry runs.
    pub written: bool,
    pub sidecar: Option<PathBuf>,
    pub mode: GenerationMode,
}

/// Runs generation requests against one model and one set of templates/agents.
pub struct Generator<'a, M: ChatModel + ?Sized> {
    config: &'a DocgenConfig,
    templates: &'a TemplateStore,
    agents: &'a AgentRegistry,
    model: &'a M,
    prompts: PromptEngine,
    validator: JsonSchemaValidator,
    cache: ArtifactCache,
}

impl<'a, M: ChatModel + ?Sized> Generator<'a, M> {
    pub fn new(
        config: &'a DocgenConfig,
        templates: &'a TemplateStore,
        agents: &'a AgentRegistry,
        model: &'a M,
    ) -> Result<Self> {
        Ok(Self {
            config,
            templates,
            agents,
            model,
            prompts: PromptEngine::new()?,
            validator: JsonSchemaValidator,
            cache: ArtifactCache::new(&config.paths.cache_dir)?,
        })
    }

    #[instrument(skip_all, fields(template = %request.template, agent = ?request.agent, dry_run = request.dry_run))]
    pub fn generate(&self, request: &GenerateRequest, cancel: &CancelToken) -> Result<GenerateOutcome> {
        let template = self.check_preconditions(request)?;
        if !request.dry_run {
            self.cache.clean();
        }

        let (fields, mode) = match &request.agent {
            Some(agent) => {
                let spec = self.agents.resolve(agent)?.clone();
                self.run_agent_analysis(template, spec, request, cancel)?
            }
            None => self.run_direct(template, request, cancel)?,
        };

        let rendered = render_fields(&template.html, &fields);
        if request.dry_run {
            info!(output = %request.output.display(), bytes = rendered.len(), "dry run, not writing");
            return Ok(GenerateOutcome {
                template: template.name.clone(),
                output: request.output.clone(),
                rendered,
                fields,
                written: false,
                sidecar: None,
                mode,
            });
        }

        let sidecar = write_document(&request.output, &rendered, &fields)?;
        info!(output = %request.output.display(), "document written");
        Ok(GenerateOutcome {
            template: template.name.clone(),
            output: request.output.clone(),
            rendered,
            fields,
            written: true,
            sidecar: Some(sidecar),
            mode,
        })
    }

    fn check_preconditions(&self, request: &GenerateRequest) -> Result<&'a Template> {
        if request.sources.is_empty() {
            return Err(PreconditionError::NoSources.into());
        }
        if let Some(missing) = request.sources.iter().find(|source| !source.exists()) {
            return Err(PreconditionError::MissingSource(missing.clone()).into());
        }
        let template = self.templates.get(&request.template)?;
        if let Some(agent) = &request.agent {
            self.agents.resolve(agent)?;
        }
        if request.output.exists() && !request.force && !request.dry_run {
            return Err(PreconditionError::OutputExists(request.output.clone()).into());
        }
        if request.max_turns == Some(0) {
            return Err(PreconditionError::InvalidMaxTurns.into());
        }
        Ok(template)
    }

    fn run_direct(
        &self,
        template: &Template,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<(Value, GenerationMode)> {
        let sources = ingest_sources(&request.sources, self.config.limits.source_budget_bytes)?;
        let prompt = self
            .prompts
            .render_generation(template, &sources, &request.params)?;
        let outcome = run_repair_loop(
            self.model,
            &self.validator,
            &self.prompts,
            &RepairRequest {
                schema: &template.schema,
                primary_prompt: &prompt,
                max_repair_attempts: self.config.repair.max_repair_attempts,
            },
            cancel,
        )?;
        Ok((
            outcome.fields,
            GenerationMode::Direct {
                attempts: outcome.attempt + 1,
            },
        ))
    }

    fn run_agent_analysis(
        &self,
        template: &Template,
        spec: AgentSpec,
        request: &GenerateRequest,
        cancel: &CancelToken,
    ) -> Result<(Value, GenerationMode)> {
        let (first, rest) = request
            .sources
            .split_first()
            .ok_or(PreconditionError::NoSources)?;
        if !rest.is_empty() {
            warn!(ignored = rest.len(), "analysis uses the first source only");
        }
        let source_path = absolute(first)?;
        let agent_name = spec.name.clone();

        let prompts = self.prompts.render_analysis(&AnalysisPromptInputs {
            template,
            agent: &spec.name,
            tools: &spec.tools,
            source_path: &source_path,
            params: &request.params,
        })?;
        let mut session = AnalysisSession::new(
            SessionSpec {
                agent: spec.name.clone(),
                template: template.name.clone(),
                source_path: source_path.clone(),
                max_turns: request.max_turns.unwrap_or(self.config.analysis.max_turns),
                params: request.params.clone(),
                schema: template.schema.clone(),
            },
            &prompts,
        );
        let host = AgentToolHost::new(
            spec,
            source_path,
            request.params.clone(),
            self.cache.clone(),
            self.config.limits.agent_output_limit_bytes,
        );

        let result = run_analysis(
            &mut session,
            self.model,
            &host,
            &self.validator,
            &self.prompts,
            cancel,
        );
        let transcript = if request.dry_run {
            None
        } else {
            self.persist_transcript(&session, &result)
        };
        let AnalysisSuccess {
            fields,
            turns_used,
            model_calls,
        } = result?;

        let violations = self.validator.validate(&fields, &template.schema)?;
        if !violations.is_empty() {
            bail!(
                "analysis answer failed re-validation: {}",
                violations
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }

        Ok((
            fields,
            GenerationMode::Analysis {
                agent: agent_name,
                turns_used,
                model_calls,
                transcript,
            },
        ))
    }

    /// Best effort: a transcript that cannot be written is logged, not fatal.
    fn persist_transcript(
        &self,
        session: &AnalysisSession,
        result: &Result<AnalysisSuccess>,
    ) -> Option<PathBuf> {
        let outcome = match result {
            Ok(_) => TranscriptOutcome::Success,
            Err(err) if err.downcast_ref::<TurnsExhaustedError>().is_some() => {
                TranscriptOutcome::TurnsExhausted
            }
            Err(_) => TranscriptOutcome::Failed,
        };
        let spec = session.spec();
        let meta = TranscriptMeta {
            template: spec.template.clone(),
            agent: spec.agent.clone(),
            source_path: spec.source_path.display().to_string(),
            max_turns: spec.max_turns,
            turns_used: session.turns_used(),
            model_calls: session.model_calls(),
            outcome,
            created_at: Utc::now().to_rfc3339(),
        };
        let written = self
            .cache
            .create_run_directory("transcript")
            .and_then(|dir| write_transcript(&dir.path, &meta, session.conversation()));
        match written {
            Ok(paths) => {
                debug!(path = %paths.conversation_path.display(), "wrote transcript");
                Some(paths.conversation_path)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to write transcript");
                None
            }
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("resolve source {}", path.display()))
}
