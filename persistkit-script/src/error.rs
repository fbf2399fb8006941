//! Error types for entity scripts.

use thiserror::Error;

/// Result type for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Everything that can go wrong between receiving source text and handing
/// back a model. None of these abort the caller; they are all reported as
/// validation failures upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("syntax error at {line}:{column}: {message}")]
    Syntax {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("disallowed operation: {0}")]
    Disallowed(String),

    #[error("resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("timeout: script exceeded {timeout_ms}ms deadline")]
    Timeout { timeout_ms: u64 },

    #[error("no entity model found: define `model Name : Entity {{ table = \"...\"; ... }}`")]
    NoModel,

    #[error("ambiguous script: models {} all qualify and none derives from the others", .0.join(", "))]
    Ambiguous(Vec<String>),
}

impl ScriptError {
    pub(crate) fn syntax(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            column,
            message: message.into(),
        }
    }
}
