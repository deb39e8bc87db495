//! HTTP session transport (JSON-RPC over POST).
//!
//! Each request is a single POST to the server endpoint. Servers may answer
//! with a plain JSON body or with a `text/event-stream` body carrying the
//! response as an event. A `Mcp-Session-Id` header returned by the server is
//! echoed on every later request and used to terminate the session.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// Header carrying the server-assigned session id.
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Maximum response body size (1MB).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Timeout for establishing the TCP connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ACCEPT_BOTH: &str = "application/json, text/event-stream";

/// How a server endpoint is spoken to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// JSON-RPC over POST, one request per exchange.
    #[default]
    #[serde(alias = "http", alias = "streamable-http")]
    StreamableHttp,
    /// Long-lived event stream plus a message endpoint.
    Sse,
}

impl TransportKind {
    /// Guess the transport from the endpoint URL: a path ending in `sse`
    /// selects [`TransportKind::Sse`].
    pub fn detect(endpoint: &str) -> Self {
        let Ok(url) = reqwest::Url::parse(endpoint) else {
            return Self::default();
        };
        let last = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last());
        match last {
            Some(segment) if segment.eq_ignore_ascii_case("sse") => Self::Sse,
            _ => Self::StreamableHttp,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreamableHttp => f.write_str("streamable_http"),
            Self::Sse => f.write_str("sse"),
        }
    }
}

/// JSON-RPC transport bound to one server endpoint.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicI64,
}

impl HttpTransport {
    /// Create a transport for `endpoint`. No I/O happens until the first request.
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Self::with_client(http, endpoint)
    }

    /// Create a transport sharing an existing HTTP client.
    pub fn with_client(http: reqwest::Client, endpoint: impl Into<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(Error::InvalidEndpoint(endpoint));
        }
        Ok(Self {
            http,
            endpoint,
            session_id: Mutex::new(None),
            next_id: AtomicI64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Session id assigned by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Send a request and decode the `result` of the matching response.
    pub async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p)?;
        }

        let response = self.post(&request).await?;
        self.remember_session(&response);
        let response = check_status(response).await?;

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        let body = read_capped(response).await?;

        let response = if is_stream {
            find_in_event_stream(&body, &id)?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&body)?
        };

        if response.id != id {
            return Err(Error::InvalidResponse(format!(
                "response ID mismatch: expected {id}, got {}",
                response.id
            )));
        }

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send a notification. The server is expected to answer `202 Accepted`.
    pub async fn notify(&self, method: &str) -> Result<()> {
        let response = self.post(&JsonRpcNotification::new(method)).await?;
        self.remember_session(&response);
        check_status(response).await?;
        Ok(())
    }

    /// Ask the server to drop the session. Servers that do not support
    /// explicit termination answer 405, which is not an error.
    pub async fn terminate(&self) -> Result<()> {
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };

        let response = self
            .http
            .delete(&self.endpoint)
            .header(SESSION_HEADER, session_id)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::METHOD_NOT_ALLOWED {
            debug!(endpoint = %self.endpoint, "server does not support session termination");
            return Ok(());
        }
        check_status(response).await?;
        Ok(())
    }

    async fn post(&self, body: &impl Serialize) -> Result<reqwest::Response> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, ACCEPT_BOTH)
            .json(body);
        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }
        Ok(request.send().await?)
    }

    fn remember_session(&self, response: &reqwest::Response) {
        let Some(value) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let mut slot = self.session_id.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_deref() != Some(value) {
            *slot = Some(value.to_string());
        }
    }
}

pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Http {
        status: status.as_u16(),
        body,
    })
}

/// Read a response body, failing as soon as it grows past
/// [`MAX_OUTPUT_SIZE`].
async fn read_capped(mut response: reqwest::Response) -> Result<String> {
    if let Some(size) = response.content_length() {
        let size = usize::try_from(size).unwrap_or(usize::MAX);
        if size > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size,
                max: MAX_OUTPUT_SIZE,
            });
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if body.len() + chunk.len() > MAX_OUTPUT_SIZE {
            return Err(Error::OutputTooLarge {
                size: body.len() + chunk.len(),
                max: MAX_OUTPUT_SIZE,
            });
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8(body)
        .map_err(|e| Error::InvalidResponse(format!("response body is not UTF-8: {e}")))
}

/// Scan a `text/event-stream` body for the response carrying `id`.
///
/// Events are separated by blank lines; the `data:` lines of one event are
/// joined with newlines. Events that are not responses (server requests,
/// notifications) are skipped.
pub fn find_in_event_stream(body: &str, id: &RequestId) -> Result<JsonRpcResponse> {
    let mut data = String::new();
    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                match serde_json::from_str::<JsonRpcResponse>(&data) {
                    Ok(response) if &response.id == id => return Ok(response),
                    _ => {}
                }
                data.clear();
            }
            continue;
        }
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.strip_prefix(' ').unwrap_or(chunk));
        }
    }

    Err(Error::InvalidResponse(format!(
        "no response for request {id} in event stream"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_endpoint() {
        let err = HttpTransport::new("localhost:8000").err().unwrap();
        assert!(matches!(err, Error::InvalidEndpoint(_)));
    }

    #[test]
    fn transport_is_detected_from_the_path() {
        assert_eq!(TransportKind::detect("http://localhost:8001/sse/"), TransportKind::Sse);
        assert_eq!(TransportKind::detect("http://localhost:8001/SSE"), TransportKind::Sse);
        assert_eq!(
            TransportKind::detect("http://localhost:8001/mcp"),
            TransportKind::StreamableHttp
        );
        assert_eq!(
            TransportKind::detect("http://localhost:8001/"),
            TransportKind::StreamableHttp
        );
        assert_eq!(TransportKind::detect("not a url"), TransportKind::StreamableHttp);
    }

    #[test]
    fn transport_kind_accepts_aliases() {
        let kind: TransportKind = serde_json::from_str("\"streamable-http\"").unwrap();
        assert_eq!(kind, TransportKind::StreamableHttp);
        let kind: TransportKind = serde_json::from_str("\"sse\"").unwrap();
        assert_eq!(kind, TransportKind::Sse);
        assert_eq!(kind.to_string(), "sse");
    }

    #[test]
    fn event_stream_skips_unrelated_events() {
        let body = "event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}\n\
                    \n\
                    event: message\n\
                    data: {\"jsonrpc\":\"2.0\",\"id\":7,\"result\":{\"tools\":[]}}\n\n";
        let response = find_in_event_stream(body, &RequestId::Number(7)).unwrap();
        assert_eq!(response.id, RequestId::Number(7));
        assert_eq!(response.result.unwrap()["tools"], serde_json::json!([]));
    }

    #[test]
    fn event_stream_joins_multiline_data() {
        let body = "data: {\"jsonrpc\":\"2.0\",\n\
                    data: \"id\":3,\"result\":null}";
        let response = find_in_event_stream(body, &RequestId::Number(3)).unwrap();
        assert_eq!(response.id, RequestId::Number(3));
    }

    #[test]
    fn event_stream_without_match_is_an_error() {
        let body = "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n\n";
        let err = find_in_event_stream(body, &RequestId::Number(2)).unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
    }
}
