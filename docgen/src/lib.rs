//! Schema-checked document generation driven by an LLM.
//!
//! A request names a template and some sources. The document fields come
//! either from one-shot generation guarded by a validation-repair loop, or
//! from a bounded analysis conversation in which the model calls tools
//! backed by external research-agent processes. The layout keeps a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (conversation log, turn budget,
//!   schema checks, parameter naming). No I/O.
//! - **[`io`]**: Side-effecting operations (model transport, subprocesses,
//!   artifact cache, templates, rendering).
//!
//! Orchestration modules ([`analysis`], [`repair`], [`generate`]) combine the
//! two to implement CLI commands.

pub mod agent_env;
pub mod analysis;
pub mod core;
pub mod errors;
pub mod exit_codes;
pub mod generate;
pub mod io;
pub mod logging;
pub mod repair;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
