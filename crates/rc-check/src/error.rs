//! Error types for the leak checker.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures that abort a check or a whole batch.
///
/// Leaks are not errors: they are reported through the check outcome and
/// folded into the batch verdict. These variants cover conditions that would
/// corrupt every later measurement if the batch carried on.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{name}: error already pending before the check: {error}")]
    PendingErrorBefore { name: String, error: String },

    #[error("{name}: unit of work left an error pending in round {round}: {error}")]
    PendingErrorAfter {
        name: String,
        round: usize,
        error: String,
    },

    #[error("runtime does not expose an instrumented reference count")]
    Uninstrumented,

    #[error("status output failed: {0}")]
    Output(#[from] io::Error),
}

/// Redirecting the error stream failed. Never fatal to a check.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("error stream redirection is not supported here")]
    Unsupported,

    #[error("error stream redirection failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("max_rounds must be at least 1")]
    InvalidMaxRounds,

    #[error("invalid value for {var}: '{value}'")]
    InvalidEnv { var: &'static str, value: String },
}
