//! Configuration module for ferrous-lua
//!
//! Settings that shape how a `LuaState` is created and how strictly the
//! binding layer treats programmer errors. Values can be built in code or
//! loaded from a Redis-style `key value` file.

mod parser;

pub use parser::{parse_config_file, parse_config_str, ConfigParseError};

use std::path::PathBuf;

/// Binding configuration applied when a state is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindConfig {
    /// Open the Lua standard libraries on creation
    pub open_standard_libs: bool,

    /// Install the new state as the thread's default context
    pub install_as_default: bool,

    /// Panic on programmer errors in builds with debug assertions
    pub strict_checks: bool,

    /// Capture and trace-log the Lua traceback on every native callback
    pub trace_callbacks: bool,

    /// Maximum number of compiled chunks kept by the chunk cache
    pub chunk_cache_limit: usize,
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            open_standard_libs: true,
            install_as_default: true,
            strict_checks: false,
            trace_callbacks: false,
            chunk_cache_limit: 64,
        }
    }
}

impl BindConfig {
    /// Load configuration from a file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigParseError> {
        let path = path.into();
        parse_config_file(&path)
    }

    /// Get a configuration parameter by name
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "open-standard-libs" => Some(yes_no(self.open_standard_libs)),
            "install-as-default" => Some(yes_no(self.install_as_default)),
            "strict-checks" => Some(yes_no(self.strict_checks)),
            "trace-callbacks" => Some(yes_no(self.trace_callbacks)),
            "chunk-cache-limit" => Some(self.chunk_cache_limit.to_string()),
            _ => None,
        }
    }

    /// Get all configuration parameters
    pub fn get_all(&self) -> Vec<(String, String)> {
        [
            "open-standard-libs",
            "install-as-default",
            "strict-checks",
            "trace-callbacks",
            "chunk-cache-limit",
        ]
        .iter()
        .filter_map(|param| self.get(param).map(|value| (param.to_string(), value)))
        .collect()
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}
