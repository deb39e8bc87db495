//! MCP (Model Context Protocol) client library.
//!
//! This crate provides a session client for MCP servers reachable over HTTP,
//! either through streamable-HTTP POSTs or through the legacy SSE transport
//! (an event stream plus a message endpoint).
//!
//! # Example
//!
//! ```no_run
//! use mcp::Client;
//!
//! # async fn example() -> mcp::Result<()> {
//! let client = Client::connect("http://127.0.0.1:8001/mcp")?;
//! client.initialize().await?;
//!
//! for tool in client.list_tools().await? {
//!     println!("Tool: {}", tool.name);
//! }
//!
//! let mut arguments = serde_json::Map::new();
//! arguments.insert("issue_key".into(), "PROJ-1".into());
//! let result = client.call_tool("get_issue", arguments).await?;
//! println!("{}", result.text());
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod protocol;
mod sse;
mod transport;

pub use client::Client;
pub use error::{Error, Result};
pub use protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult,
    PROTOCOL_VERSION, RequestId, ServerCapabilities, ServerInfo, Tool, ToolContent,
};
pub use sse::{ENDPOINT_TIMEOUT, EventParser, SseEvent, SseTransport};
pub use transport::{
    CONNECT_TIMEOUT, HttpTransport, MAX_OUTPUT_SIZE, SESSION_HEADER, TransportKind,
    find_in_event_stream,
};
