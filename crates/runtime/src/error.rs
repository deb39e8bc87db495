use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to launch server {server}: {source}")]
    ProcessLaunch {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("discovery failed for server {server}: {reason}")]
    Discovery { server: String, reason: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("cannot bind arguments for {tool}: {reason}")]
    Binding { tool: String, reason: String },

    #[error("tool {tool} failed: {reason}")]
    Tool { tool: String, reason: String },

    #[error("remote call {tool} on {server} failed: {reason}")]
    Remote {
        server: String,
        tool: String,
        reason: String,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("tool layer is not started")]
    NotStarted,

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("scheduler loop failed to start: {0}")]
    LoopStart(String),

    #[error("scheduler loop is shut down")]
    LoopShutdown,

    #[error("blocking call issued from the scheduler loop thread")]
    LoopReentry,
}

impl Error {
    /// Whether the failure was a bounded wait running out, as opposed to an
    /// error raised by the work itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
