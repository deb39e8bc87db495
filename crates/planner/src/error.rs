//! Planner error types.

use thiserror::Error;

/// The planner output did not follow the command protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error{}: {reason}", location(.line))]
pub struct ParseError {
    /// 1-based line in the planner output, when one line is to blame.
    pub line: Option<usize>,
    pub reason: String,
}

impl ParseError {
    pub(crate) fn at(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            reason: reason.into(),
        }
    }

    pub(crate) fn whole(reason: impl Into<String>) -> Self {
        Self {
            line: None,
            reason: reason.into(),
        }
    }
}

fn location(line: &Option<usize>) -> String {
    line.map(|line| format!(" at line {line}")).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("line {line}: {tool}: {source}")]
    Tool {
        line: usize,
        tool: String,
        #[source]
        source: runtime::Error,
    },
}

impl Error {
    /// The planner output line the failure belongs to, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Parse(e) => e.line,
            Error::Tool { line, .. } => Some(*line),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
