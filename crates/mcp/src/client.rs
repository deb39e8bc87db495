//! MCP client session (handshake, discovery, calls).

use std::sync::OnceLock;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsParams,
    ListToolsResult, Tool,
};
use crate::sse::SseTransport;
use crate::transport::{HttpTransport, TransportKind};

/// Upper bound on `tools/list` pages followed before giving up.
const MAX_LIST_PAGES: usize = 64;

enum Transport {
    Http(HttpTransport),
    Sse(SseTransport),
}

impl Transport {
    fn endpoint(&self) -> &str {
        match self {
            Self::Http(t) => t.endpoint(),
            Self::Sse(t) => t.endpoint(),
        }
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        match self {
            Self::Http(t) => t.request(method, params).await,
            Self::Sse(t) => t.request(method, params).await,
        }
    }

    async fn notify(&self, method: &str) -> Result<()> {
        match self {
            Self::Http(t) => t.notify(method).await,
            Self::Sse(t) => t.notify(method).await,
        }
    }

    async fn terminate(&self) -> Result<()> {
        match self {
            Self::Http(t) => t.terminate().await,
            Self::Sse(t) => t.terminate().await,
        }
    }
}

/// A session with one MCP server.
pub struct Client {
    transport: Transport,
    server_info: OnceLock<InitializeResult>,
}

impl Client {
    /// Open a streamable-HTTP transport to `endpoint`. The handshake is
    /// performed by [`Client::initialize`].
    pub fn connect(endpoint: impl Into<String>) -> Result<Self> {
        Ok(Self::with_transport(HttpTransport::new(endpoint)?))
    }

    /// Open the event stream at `url` and wait for the server to announce
    /// its message endpoint.
    pub async fn connect_sse(url: &str) -> Result<Self> {
        Ok(Self::new(Transport::Sse(SseTransport::connect(url).await?)))
    }

    /// Connect to `endpoint` with the given transport.
    pub async fn open(endpoint: &str, kind: TransportKind) -> Result<Self> {
        match kind {
            TransportKind::StreamableHttp => Self::connect(endpoint),
            TransportKind::Sse => Self::connect_sse(endpoint).await,
        }
    }

    pub fn with_transport(transport: HttpTransport) -> Self {
        Self::new(Transport::Http(transport))
    }

    fn new(transport: Transport) -> Self {
        Self {
            transport,
            server_info: OnceLock::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.transport.endpoint()
    }

    /// Perform the initialize handshake. Calling it again on an initialized
    /// session returns the cached server info.
    pub async fn initialize(&self) -> Result<&InitializeResult> {
        if let Some(info) = self.server_info.get() {
            return Ok(info);
        }

        let result: InitializeResult = self
            .transport
            .request("initialize", Some(InitializeParams::default()))
            .await?;
        self.transport.notify("notifications/initialized").await?;

        debug!(
            endpoint = %self.endpoint(),
            server = %result.server_info.name,
            protocol = %result.protocol_version,
            "session initialized"
        );
        Ok(self.server_info.get_or_init(|| result))
    }

    pub fn is_initialized(&self) -> bool {
        self.server_info.get().is_some()
    }

    /// Server info (after initialization).
    pub fn server_info(&self) -> Option<&InitializeResult> {
        self.server_info.get()
    }

    /// List every tool the server offers, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.ensure_initialized()?;

        let mut tools = Vec::new();
        let mut cursor = None;
        for _ in 0..MAX_LIST_PAGES {
            let page: ListToolsResult = self
                .transport
                .request("tools/list", Some(ListToolsParams { cursor }))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(Error::InvalidResponse(format!(
            "tools/list did not finish after {MAX_LIST_PAGES} pages"
        )))
    }

    /// Call a tool by name. A result flagged `isError` is returned as
    /// [`Error::ToolCallFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult> {
        self.ensure_initialized()?;

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.transport.request("tools/call", Some(params)).await?;

        if result.is_error {
            return Err(Error::ToolCallFailed(result.text()));
        }
        Ok(result)
    }

    /// Terminate the session on the server (best effort on the server side).
    pub async fn close(&self) -> Result<()> {
        self.transport.terminate().await
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}
