//! Reading tool parameters inside an agent process.
//!
//! The host passes every parameter as `PARAM_<UPPER_SNAKE_NAME>`; these
//! helpers read them back by their original spelling.

use std::env;

use crate::core::params::{param_env_name, parse_bool, parse_int_or};

/// Raw value of parameter `name`, if set.
pub fn read_param(name: &str) -> Option<String> {
    env::var(param_env_name(name)).ok()
}

/// `true`/`false` in any case; anything else yields `default`.
pub fn read_bool_param(name: &str, default: bool) -> bool {
    read_param(name)
        .and_then(|raw| parse_bool(&raw))
        .unwrap_or(default)
}

pub fn read_int_param(name: &str, default: i64) -> i64 {
    parse_int_or(read_param(name).as_deref(), default)
}

/// Tool selected by the host, from `PARAM_TOOL`.
pub fn read_tool() -> Option<String> {
    read_param(crate::core::params::TOOL_PARAM)
}
