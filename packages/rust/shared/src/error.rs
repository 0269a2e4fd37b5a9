//! Error types for StudyForge.
//!
//! Library crates use [`StudyForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Maximum number of characters of raw generator output kept in an error.
pub const EXCERPT_CHARS: usize = 200;

/// Top-level error type for all StudyForge operations.
#[derive(Debug, thiserror::Error)]
pub enum StudyForgeError {
    /// Malformed or empty caller input. Never retried.
    #[error("invalid input: {message}")]
    InputValidation { message: String },

    /// Generator output could not be parsed as a structured object.
    #[error("unparseable generator output: {message}")]
    GenerationParse { message: String, excerpt: String },

    /// Output parsed, but does not conform to the expected contract.
    #[error("schema violation at `{field}`: {message}")]
    SchemaValidation { field: String, message: String },

    /// Bounded retry exhausted without a conforming object.
    #[error("generation failed for {contract} after {attempts} attempt(s): {last_error}")]
    GenerationFailure {
        contract: String,
        attempts: u32,
        last_error: String,
        excerpt: String,
    },

    /// A required precondition (e.g. the practice gate) is not satisfied.
    #[error("precondition failed: {message}")]
    Precondition { message: String },

    /// The text-generation service (or another collaborator) failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// No session exists with the given id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, StudyForgeError>;

impl StudyForgeError {
    /// Create an input validation error from any displayable message.
    pub fn input(msg: impl Into<String>) -> Self {
        Self::InputValidation {
            message: msg.into(),
        }
    }

    /// Create a parse error, keeping a truncated excerpt of the raw output.
    pub fn parse(msg: impl Into<String>, raw: &str) -> Self {
        Self::GenerationParse {
            message: msg.into(),
            excerpt: excerpt(raw),
        }
    }

    /// Create a schema validation error for the given field path.
    pub fn schema(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SchemaValidation {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create a precondition error from any displayable message.
    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the bounded corrective retry loop may try again after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::GenerationParse { .. } | Self::SchemaValidation { .. }
        )
    }
}

/// Truncate raw text to [`EXCERPT_CHARS`] characters for diagnostics.
pub fn excerpt(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(EXCERPT_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
