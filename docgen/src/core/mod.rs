//! Deterministic, pure logic shared by the generation loops.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod conversation;
pub mod params;
pub mod types;
pub mod validation;
