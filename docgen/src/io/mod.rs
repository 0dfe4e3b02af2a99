//! Side-effecting operations: processes, network, filesystem.

pub mod agents;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod model;
pub mod process;
pub mod prompt;
pub mod render;
pub mod retry;
pub mod sources;
pub mod templates;
pub mod tool_host;
pub mod transcript;
