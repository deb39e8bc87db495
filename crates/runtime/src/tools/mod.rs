//! Tool descriptors, directory and argument binding.

pub mod builtin;
mod directory;
mod schema;
mod types;

pub use directory::{MergeReport, ToolDirectory};
pub use schema::{Arguments, Param, Schema};
pub use types::{DiscoveredTool, Handler, Origin, ToolDescriptor, ToolSummary};
