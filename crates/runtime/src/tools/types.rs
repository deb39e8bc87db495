//! Tool descriptor types.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use super::{Arguments, Schema};

/// Function backing a local tool. An `Err` carries a human-readable reason.
pub type Handler = Arc<dyn Fn(&Arguments) -> Result<Value, String> + Send + Sync>;

/// Where a tool is executed.
#[derive(Clone)]
pub enum Origin {
    Local(Handler),
    Remote { server: String },
}

impl Origin {
    pub fn is_local(&self) -> bool {
        matches!(self, Origin::Local(_))
    }

    /// Name of the serving server for remote tools.
    pub fn server(&self) -> Option<&str> {
        match self {
            Origin::Local(_) => None,
            Origin::Remote { server } => Some(server),
        }
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Local(_) => f.write_str("Local"),
            Origin::Remote { server } => f.debug_struct("Remote").field("server", server).finish(),
        }
    }
}

/// A registered tool.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: Schema,
    pub origin: Origin,
}

impl ToolDescriptor {
    /// Describe a local tool backed by `handler`.
    pub fn local<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(&Arguments) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            origin: Origin::Local(Arc::new(handler)),
        }
    }
}

/// A tool as reported by a server during discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredTool {
    pub name: String,
    pub description: String,
    pub schema: Schema,
}

impl From<mcp::Tool> for DiscoveredTool {
    fn from(tool: mcp::Tool) -> Self {
        Self {
            schema: Schema::from_json_schema(&tool.input_schema),
            description: tool.description.unwrap_or_default(),
            name: tool.name,
        }
    }
}

/// The planner-facing view of a tool: name and description only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}
