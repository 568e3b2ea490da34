//! Error types for the pipe framework.
//!
//! Per-field problems (missing keys, bad casts, absent wires) never show up
//! here: they degrade to the type's default. What remains is:
//!
//! - [`PipeError`] - structural misuse, exhausted terminals and source I/O
//! - [`ConcurrencyError`] - worker pool and cooperative task failures
//! - [`DefinitionError`] - pipeline definition files and the CLI layer
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Pipe Errors
// =============================================================================

/// Errors raised while building or running a pipe.
#[derive(Debug, Error)]
pub enum PipeError {
    /// No pipe registered under this name.
    #[error("Unknown pipe: {0}")]
    UnknownPipe(String),

    /// A configuration was used in a way its shape does not allow.
    ///
    /// This is a programmer error (e.g. an un-dictized mapping read as a
    /// configuration node without `force`), not a data condition.
    #[error("Structural misuse: {0}")]
    Structural(String),

    /// A literal configuration value the pipe cannot accept (e.g. an unknown `op`).
    #[error("Invalid configuration for '{pipe}': {reason}")]
    InvalidConf { pipe: String, reason: String },

    /// A terminal was read more times than its source produced items.
    #[error("Terminal '{0}' is exhausted")]
    TerminalExhausted(String),

    /// Worker pool or cooperative task failure.
    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    /// IO error from a source pipe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error from a source pipe.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error from a source pipe.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

// =============================================================================
// Concurrency Errors
// =============================================================================

/// Errors from the concurrency adapter.
#[derive(Debug, Error)]
pub enum ConcurrencyError {
    /// The worker pool could not be built.
    #[error("Failed to build worker pool: {0}")]
    PoolBuild(String),

    /// A cooperative task panicked or was cancelled.
    #[error("Task failed: {0}")]
    Join(String),
}

impl From<rayon::ThreadPoolBuildError> for ConcurrencyError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        ConcurrencyError::PoolBuild(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ConcurrencyError {
    fn from(err: tokio::task::JoinError) -> Self {
        ConcurrencyError::Join(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PipeError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipeError::Concurrency(err.into())
    }
}

// =============================================================================
// Definition Errors (top-level)
// =============================================================================

/// Errors loading or running a pipeline definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The definition could not be read.
    #[error("Failed to read definition: {0}")]
    Io(#[from] std::io::Error),

    /// The definition is not valid JSON or has unknown tags.
    #[error("Invalid definition: {0}")]
    Json(#[from] serde_json::Error),

    /// A step referenced a terminal that is not defined.
    #[error("Undefined terminal: {0}")]
    UndefinedTerminal(String),

    /// A pipe failed while running the definition.
    #[error("Pipe error: {0}")]
    Pipe(#[from] PipeError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for pipe operations.
pub type PipeResult<T> = Result<T, PipeError>;

/// Result type for concurrency primitives.
pub type ConcurrencyResult<T> = Result<T, ConcurrencyError>;

/// Result type for definition loading and running.
pub type DefinitionResult<T> = Result<T, DefinitionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        // ConcurrencyError -> PipeError
        let err = ConcurrencyError::PoolBuild("no threads".into());
        let pipe_err: PipeError = err.into();
        assert!(pipe_err.to_string().contains("no threads"));

        // PipeError -> DefinitionError
        let def_err: DefinitionError = PipeError::UnknownPipe("nope".into()).into();
        assert!(def_err.to_string().contains("nope"));
    }

    #[test]
    fn test_invalid_conf_format() {
        let err = PipeError::InvalidConf {
            pipe: "simplemath".into(),
            reason: "unknown variant `bogus`".into(),
        };
        assert_eq!(err.to_string(), "Invalid configuration for 'simplemath': unknown variant `bogus`");
    }

    #[test]
    fn test_terminal_exhausted_format() {
        let err = PipeError::TerminalExhausted("rates".into());
        assert_eq!(err.to_string(), "Terminal 'rates' is exhausted");
    }
}
