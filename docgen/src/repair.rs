//! Validation-repair loop for one-shot generation.
//!
//! Attempt 0 sends the primary prompt. Every invalid draft is answered with a
//! repair prompt carrying the draft verbatim and its violations, until a draft
//! validates or `max_repair_attempts` repairs have been spent.

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::types::Message;
use crate::core::validation::{SchemaValidator, Violation, check_draft};
use crate::errors::RepairExhaustedError;
use crate::io::cancel::CancelToken;
use crate::io::model::{ChatModel, ChatRequest};
use crate::io::prompt::PromptEngine;

/// Inputs for one repair loop run.
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub schema: &'a Value,
    pub primary_prompt: &'a str,
    /// Repairs allowed after attempt 0.
    pub max_repair_attempts: u32,
}

/// The current draft and how it fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationAttempt {
    pub index: u32,
    pub draft: String,
    pub violations: Vec<Violation>,
}

/// A draft that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub fields: Value,
    /// Zero-based index of the successful attempt.
    pub attempt: u32,
    pub draft: String,
}

#[instrument(skip_all, fields(max_repair_attempts = request.max_repair_attempts))]
pub fn run_repair_loop<M, V>(
    model: &M,
    validator: &V,
    prompts: &PromptEngine,
    request: &RepairRequest<'_>,
    cancel: &CancelToken,
) -> Result<RepairOutcome>
where
    M: ChatModel + ?Sized,
    V: SchemaValidator + ?Sized,
{
    let mut current: Option<GenerationAttempt> = None;
    for index in 0..=request.max_repair_attempts {
        cancel.check()?;
        let mut messages = vec![Message::user(request.primary_prompt)];
        if let Some(previous) = &current {
            let repair = prompts.render_repair(request.schema, &previous.draft, &previous.violations)?;
            messages.push(Message::assistant(previous.draft.clone()));
            messages.push(Message::user(repair));
        }

        let reply = model.complete(
            &ChatRequest {
                messages: &messages,
                tools: &[],
            },
            cancel,
        )?;
        let draft = reply.content.unwrap_or_default();

        match check_draft(validator, &draft, request.schema)? {
            Ok(fields) => {
                info!(attempt = index, "draft validated");
                return Ok(RepairOutcome {
                    fields,
                    attempt: index,
                    draft,
                });
            }
            Err(violations) => {
                warn!(attempt = index, violations = violations.len(), "draft failed validation");
                for violation in &violations {
                    debug!(%violation, "violation");
                }
                current = Some(GenerationAttempt {
                    index,
                    draft,
                    violations,
                });
            }
        }
    }

    let last = current.unwrap_or_else(|| GenerationAttempt {
        index: 0,
        draft: String::new(),
        violations: Vec::new(),
    });
    Err(RepairExhaustedError {
        attempts: last.index + 1,
        last_draft: last.draft,
        violations: last.violations,
    }
    .into())
}
