use thiserror::Error;

/// Errors produced while preparing, running or evaluating measurements.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The adapter could not produce an artifact for a configuration.
    ///
    /// Build failures are deterministic, so they are never retried.
    #[error("build failed for target '{target}': {message}")]
    Build { target: String, message: String },

    /// The artifact ran, but its output diverged from the captured validity reference.
    #[error(
        "output of '{target}' under {configuration} diverged (expected {expected}, got {actual})"
    )]
    OutputValidation {
        target: String,
        configuration: String,
        expected: String,
        actual: String,
    },

    /// The configuration enables a flag outside the allowed flag subset.
    #[error("flag {flag} is not part of the allowed flag subset {allowed:?}")]
    ConfigurationOutOfRange { flag: usize, allowed: Vec<usize> },

    /// Per-target metadata (dataset table, makefiles, ...) could not be read.
    #[error("metadata for target '{target}' could not be read: {reason}")]
    TargetMetadata { target: String, reason: String },

    /// The adapter does not know the requested target.
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    /// The artifact ran but no duration could be extracted from it.
    #[error("run of target '{target}' failed: {message}")]
    Run { target: String, message: String },

    /// A measurement setup parameter was rejected.
    #[error("invalid measurement setup: {0}")]
    InvalidSetup(String),

    /// A function argument was outside its documented domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// One or more tasks of a parallel map failed.
    #[error(
        "{} of {total} parallel tasks failed; first failure {}",
        .failures.len(),
        describe_first(.failures)
    )]
    Worker {
        total: usize,
        /// Task index and failure message, ordered by task index. Never empty.
        failures: Vec<(usize, String)>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error was caused by a failed validity check rather than a crash or a
    /// build problem.
    pub fn is_output_validation(&self) -> bool {
        matches!(self, Error::OutputValidation { .. })
    }

    /// Whether this error was raised while building an artifact.
    pub fn is_build(&self) -> bool {
        matches!(self, Error::Build { .. })
    }
}

fn describe_first(failures: &[(usize, String)]) -> String {
    match failures.first() {
        Some((index, message)) => format!("(task {index}): {message}"),
        None => "unknown".to_string(),
    }
}

/// A specialized `Result` type for measurement operations.
pub type Result<T> = std::result::Result<T, Error>;
