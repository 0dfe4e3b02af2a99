//! Terminal failure types.
//!
//! Plumbing errors travel as `anyhow::Error` with context. The types here mark
//! the outcomes a caller must tell apart (precondition, repair exhaustion,
//! turn exhaustion, transport, cancellation); they ride inside `anyhow::Error`
//! and are recovered with `downcast_ref` at the CLI boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::validation::Violation;

/// Caller-side problems surfaced immediately and never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("output {} already exists (pass --force to overwrite)", .0.display())]
    OutputExists(PathBuf),
    #[error("unknown template '{name}' (available: {available})")]
    UnknownTemplate { name: String, available: String },
    #[error("unknown agent '{name}' (available: {available})")]
    UnknownAgent { name: String, available: String },
    #[error("no source locations given")]
    NoSources,
    #[error("source {} does not exist", .0.display())]
    MissingSource(PathBuf),
    #[error("max turns must be greater than 0")]
    InvalidMaxTurns,
}

/// Model transport failures that ended retrying.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("model request failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
    #[error("model request rejected: {0}")]
    Rejected(String),
}

/// The operation observed the request's cancellation signal.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;

/// The validation-repair loop ran out of attempts.
///
/// Keeps the final invalid draft so the failure can be diagnosed without
/// re-running the model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("document still invalid after {attempts} attempts ({} violations)", .violations.len())]
pub struct RepairExhaustedError {
    pub attempts: u32,
    pub last_draft: String,
    pub violations: Vec<Violation>,
}

/// The analysis loop used every turn without producing a valid answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("analysis exhausted {max_turns} turns after {model_calls} model calls")]
pub struct TurnsExhaustedError {
    pub max_turns: u32,
    pub model_calls: u32,
    /// Last final answer the schema check rejected, if any.
    pub last_draft: Option<String>,
    pub last_violations: Vec<Violation>,
    /// Tool calls requested after the budget ran out (never executed).
    pub unexecuted_calls: Vec<String>,
}

/// Render diagnostic context for a terminal failure, if the error carries any.
pub fn diagnostic_report(err: &anyhow::Error) -> Option<String> {
    if let Some(repair) = err.downcast_ref::<RepairExhaustedError>() {
        let mut out = String::from("last draft:\n");
        out.push_str(repair.last_draft.trim());
        out.push_str("\nviolations:\n");
        push_violations(&mut out, &repair.violations);
        return Some(out);
    }
    if let Some(turns) = err.downcast_ref::<TurnsExhaustedError>() {
        let mut out = String::new();
        if let Some(draft) = &turns.last_draft {
            out.push_str("last rejected answer:\n");
            out.push_str(draft.trim());
            out.push('\n');
        }
        if !turns.last_violations.is_empty() {
            out.push_str("violations:\n");
            push_violations(&mut out, &turns.last_violations);
        }
        if !turns.unexecuted_calls.is_empty() {
            out.push_str(&format!(
                "unexecuted tool calls: {}\n",
                turns.unexecuted_calls.join(", ")
            ));
        }
        return (!out.is_empty()).then_some(out);
    }
    None
}

fn push_violations(out: &mut String, violations: &[Violation]) {
    for violation in violations {
        out.push_str(&format!("- {violation}\n"));
    }
}
