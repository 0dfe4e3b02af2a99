//! Analysis loop: a bounded, tool-using conversation that ends in a
//! schema-valid answer.
//!
//! The session moves `AwaitingModel -> AwaitingTool -> AwaitingModel ...`
//! until the model gives a valid final answer or the turn budget runs out.
//! A turn is consumed by every executed tool round and by every rejected
//! final answer, so at most `max_turns + 1` model calls happen.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Result, bail};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::budget::TurnBudget;
use crate::core::conversation::Conversation;
use crate::core::types::{Message, ToolCall, ToolResult};
use crate::core::validation::{SchemaValidator, Violation, check_draft};
use crate::errors::TurnsExhaustedError;
use crate::io::cancel::CancelToken;
use crate::io::model::{ChatModel, ChatRequest};
use crate::io::prompt::{AnalysisPrompts, PromptEngine};
use crate::io::tool_host::ToolHost;

/// Content of the error result recorded for calls requested after the budget ran out.
pub const NOT_EXECUTED: &str = "not executed: turn budget exhausted";

/// What a session is about.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub agent: String,
    pub template: String,
    pub source_path: PathBuf,
    pub max_turns: u32,
    pub params: BTreeMap<String, String>,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    AwaitingModel,
    /// Calls from the last assistant message, not yet executed.
    AwaitingTool(Vec<ToolCall>),
    Terminated,
}

/// State owned by one analysis request.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    spec: SessionSpec,
    conversation: Conversation,
    budget: TurnBudget,
    model_calls: u32,
    last_rejected: Option<(String, Vec<Violation>)>,
    state: SessionState,
}

/// A schema-valid final answer.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisSuccess {
    pub fields: Value,
    pub turns_used: u32,
    pub model_calls: u32,
}

impl AnalysisSession {
    /// Seed the conversation with the system and initial user prompts.
    pub fn new(spec: SessionSpec, prompts: &AnalysisPrompts) -> Self {
        Self {
            conversation: Conversation::seeded(&prompts.system, &prompts.user),
            budget: TurnBudget::new(spec.max_turns),
            model_calls: 0,
            last_rejected: None,
            state: SessionState::AwaitingModel,
            spec,
        }
    }

    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn turns_used(&self) -> u32 {
        self.budget.used()
    }

    pub fn model_calls(&self) -> u32 {
        self.model_calls
    }

    fn exhausted(&self, unexecuted_calls: Vec<String>) -> TurnsExhaustedError {
        let (last_draft, last_violations) = match &self.last_rejected {
            Some((draft, violations)) => (Some(draft.clone()), violations.clone()),
            None => (None, Vec::new()),
        };
        TurnsExhaustedError {
            max_turns: self.budget.max_turns(),
            model_calls: self.model_calls,
            last_draft,
            last_violations,
            unexecuted_calls,
        }
    }
}

/// Drive `session` to a terminal state.
///
/// Tool failures are fed back to the model as error results. The loop fails
/// with [`TurnsExhaustedError`] when the budget runs out, and with the
/// underlying error on transport failure or cancellation.
#[instrument(skip_all, fields(agent = %session.spec.agent, template = %session.spec.template, max_turns = session.spec.max_turns))]
pub fn run_analysis<M, H, V>(
    session: &mut AnalysisSession,
    model: &M,
    host: &H,
    validator: &V,
    prompts: &PromptEngine,
    cancel: &CancelToken,
) -> Result<AnalysisSuccess>
where
    M: ChatModel + ?Sized,
    H: ToolHost + ?Sized,
    V: SchemaValidator + ?Sized,
{
    loop {
        match std::mem::replace(&mut session.state, SessionState::Terminated) {
            SessionState::AwaitingModel => {
                cancel.check()?;
                let dangling = session.conversation.dangling_tool_calls();
                if !dangling.is_empty() {
                    bail!(
                        "conversation has unanswered tool calls before model invocation: {}",
                        dangling.join(", ")
                    );
                }

                let reply = model.complete(
                    &ChatRequest {
                        messages: session.conversation.messages(),
                        tools: host.definitions(),
                    },
                    cancel,
                )?;
                session.model_calls += 1;

                if reply.requests_tools() {
                    debug!(
                        model_calls = session.model_calls,
                        calls = reply.tool_calls.len(),
                        "model requested tools"
                    );
                    session.conversation.push(Message::assistant_tool_calls(
                        reply.content.unwrap_or_default(),
                        reply.tool_calls.clone(),
                    ));
                    session.state = SessionState::AwaitingTool(reply.tool_calls);
                    continue;
                }

                let draft = reply.content.unwrap_or_default();
                session.conversation.push(Message::assistant(draft.clone()));
                match check_draft(validator, &draft, &session.spec.schema)? {
                    Ok(fields) => {
                        info!(
                            turns_used = session.turns_used(),
                            model_calls = session.model_calls,
                            "analysis produced a valid answer"
                        );
                        return Ok(AnalysisSuccess {
                            fields,
                            turns_used: session.turns_used(),
                            model_calls: session.model_calls,
                        });
                    }
                    Err(violations) => {
                        warn!(violations = violations.len(), "final answer rejected");
                        session.last_rejected = Some((draft, violations.clone()));
                        if session.budget.consume().is_none() {
                            return Err(session.exhausted(Vec::new()).into());
                        }
                        let note = prompts.render_correction(&violations)?;
                        session.conversation.push(Message::system(note));
                        session.state = SessionState::AwaitingModel;
                    }
                }
            }
            SessionState::AwaitingTool(calls) => {
                if session.budget.is_exhausted() {
                    warn!(calls = calls.len(), "turn budget exhausted with pending tool calls");
                    for call in &calls {
                        session
                            .conversation
                            .push(Message::tool_result(&ToolResult::error(&call.id, NOT_EXECUTED)));
                    }
                    let names = calls.iter().map(|call| call.name.clone()).collect();
                    return Err(session.exhausted(names).into());
                }

                for call in &calls {
                    let result = host.execute(call, cancel)?;
                    if result.is_error {
                        debug!(tool = %call.name, "tool returned an error result");
                    }
                    session.conversation.push(Message::tool_result(&result));
                }
                let turn = session.budget.consume().unwrap_or(session.budget.used());
                info!(turn, calls = calls.len(), "tool round complete");
                session.state = SessionState::AwaitingModel;
            }
            SessionState::Terminated => bail!("analysis session already terminated"),
        }
    }
}
