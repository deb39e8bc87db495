//! Toolbridge runtime: the tool execution subsystem.
//!
//! This crate lets synchronous code list and execute a dynamic set of tools,
//! some implemented locally and some served by remote MCP servers.
//!
//! # Overview
//!
//! - **ToolDirectory**: name → tool mapping. Local tools always win over
//!   remote ones; among remote servers the last one discovered wins.
//! - **Supervisor**: launches configured servers in their own process groups
//!   and terminates them at shutdown.
//! - **Bridge**: one background thread running the async loop, with a
//!   blocking, timeout-bounded `run_blocking` for every other thread.
//! - **SessionManager**: ephemeral or persistent sessions per server.
//! - **ToolLayer**: the facade tying these together (`start`, `execute`,
//!   `stop`).
//!
//! # Example
//!
//! ```no_run
//! use runtime::{LayerConfig, ToolLayer};
//!
//! # fn main() -> runtime::Result<()> {
//! let layer = ToolLayer::new();
//! layer.start(LayerConfig::load("toolbridge.toml")?)?;
//! let args = layer.bind("get_issue", &["PROJ-1".to_string()])?;
//! let result = layer.execute("get_issue", args)?;
//! println!("{result}");
//! layer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
mod discovery;
mod error;
mod layer;
pub mod session;
pub mod supervisor;
pub mod tools;

pub use bridge::Bridge;
pub use config::{LayerConfig, ServerConfig, Settings};
pub use discovery::{discover_all, discover_server};
pub use error::{Error, Result};
pub use layer::{Status, ToolLayer};
pub use mcp::TransportKind;
pub use session::{Connector, HttpConnector, RemoteSession, SessionManager};
pub use supervisor::Supervisor;
pub use tools::{Arguments, Origin, Schema, ToolDescriptor, ToolDirectory, ToolSummary};
