//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A config path was given explicitly but does not exist.
    #[error("config file not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// The planner gave up on the request.
    #[error("halted at line {line}: {message}")]
    Halted { line: usize, message: String },

    #[error(transparent)]
    Runtime(#[from] runtime::Error),

    #[error(transparent)]
    Parse(#[from] planner::ParseError),

    #[error(transparent)]
    Planner(#[from] planner::Error),

    #[error("failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
