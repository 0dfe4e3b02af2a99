//! Stable exit codes for docgen CLI commands.

use crate::errors::{
    Cancelled, PreconditionError, RepairExhaustedError, TransportError, TurnsExhaustedError,
};

/// Command succeeded.
pub const OK: i32 = 0;
/// Any failure without a more specific code (I/O, config, bad arguments).
pub const ERROR: i32 = 1;
/// Request rejected before any model call (output exists, unknown template/agent, missing source).
pub const PRECONDITION: i32 = 2;
/// The validation-repair loop ran out of attempts.
pub const VALIDATION_EXHAUSTED: i32 = 3;
/// The analysis loop ran out of turns.
pub const TURNS_EXHAUSTED: i32 = 4;
/// The model endpoint could not be reached or rejected the request.
pub const TRANSPORT: i32 = 5;
/// Cancelled (SIGINT convention).
pub const CANCELLED: i32 = 130;

/// Exit code for a failed command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<Cancelled>().is_some() {
        CANCELLED
    } else if err.downcast_ref::<PreconditionError>().is_some() {
        PRECONDITION
    } else if err.downcast_ref::<RepairExhaustedError>().is_some() {
        VALIDATION_EXHAUSTED
    } else if err.downcast_ref::<TurnsExhaustedError>().is_some() {
        TURNS_EXHAUSTED
    } else if err.downcast_ref::<TransportError>().is_some() {
        TRANSPORT
    } else {
        ERROR
    }
}
