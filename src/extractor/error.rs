//! Error handling for the extraction pipeline.
//!
//! # Error Categories
//!
//! - Configuration errors (missing livepatch state) are fatal before any work
//! - Command preparation and extraction tool failures abort the whole run,
//!   leaving the per-item log behind for diagnosis
//! - Grouping assertion violations point at inconsistent codestream enumeration
//!
//! Missing symbols on other architectures are not errors; they are collected
//! in a [`super::MissingSymbolReport`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type for pipeline operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Error type for pipeline operations.
///
/// All variants carry user-friendly messages suitable for CLI output.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Missing or inconsistent prerequisite state.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `make -sn` could not be run for a file.
    #[error("make failed for {file} on {cs}: {message}")]
    MakeFailed {
        cs: String,
        file: String,
        message: String,
    },

    /// The compiler invocation of a file was not found in the make output.
    #[error("Couldn't find cmdline for {file} on {cs}. Aborting")]
    CompilerCommandNotFound { cs: String, file: String },

    /// The extraction tool exited with a non-zero status.
    #[error("{tool} failed for {cs}:{file} ({}). Check {}", exit_description(.code), .log.display())]
    ToolFailed {
        tool: String,
        cs: String,
        file: String,
        code: Option<i32>,
        log: PathBuf,
    },

    /// The externalized symbol report of the extraction tool is unusable.
    #[error("Invalid externalized symbol report {}: {reason}", .path.display())]
    SymbolReport { path: PathBuf, reason: String },

    /// Two codestreams compared position by position have different file counts.
    #[error("Codestreams {left} and {right} have a different number of files ({left_count} vs {right_count})")]
    FileCountMismatch {
        left: String,
        right: String,
        left_count: usize,
        right_count: usize,
    },

    /// Filesystem or process IO failed.
    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// A JSON state file could not be read or written.
    #[error("Failed to process {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl ExtractError {
    /// Wrap an IO error with a description of the failed operation.
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        ExtractError::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the error happened before any extraction work was started.
    pub fn is_config(&self) -> bool {
        matches!(self, ExtractError::Config(_))
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "killed by signal".to_string(),
    }
}
