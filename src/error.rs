//! Error types for ferrous-lua
//!
//! Only the scripting-runtime tier and state setup produce `LuaBindError`.
//! Programmer errors on handles (wrong receiver type, malformed paths) are
//! reported through the context diagnostics and answered with default values.

use std::io;
use std::path::PathBuf;

use crate::config::ConfigParseError;

/// Main error type for ferrous-lua operations
#[derive(Debug, thiserror::Error)]
pub enum LuaBindError {
    /// The interpreter could not be allocated
    #[error("couldn't create Lua state")]
    StateCreation,

    /// The interpreter behind a context has already been closed
    #[error("Lua state is closed")]
    StateClosed,

    /// Source failed to compile
    #[error("Script Syntax Error:\n{0}")]
    Syntax(String),

    /// Error raised while running inside a protected call, traceback included
    #[error("{0}")]
    Runtime(String),

    /// Script file could not be read
    #[error("couldn't read script {}: {source}", path.display())]
    Io {
        /// Path of the script
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// A call was attempted on a value that is not a function
    #[error("attempting to call invalid Lua function (type is {0})")]
    NotAFunction(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigParseError),
}

/// Type alias for Results throughout ferrous-lua
pub type Result<T> = std::result::Result<T, LuaBindError>;
