//! Legacy HTTP+SSE session transport.
//!
//! The client opens a long-lived `GET` on the stream URL. The server first
//! sends an `endpoint` event naming the URL that requests are POSTed to, then
//! delivers every JSON-RPC response as a `message` event on the stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Url;
use reqwest::header::ACCEPT;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::transport::{CONNECT_TIMEOUT, MAX_OUTPUT_SIZE, check_status};

/// How long to wait for the server to announce its message endpoint.
pub const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// One server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server did not set one.
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes may arrive split anywhere, including inside a UTF-8 sequence.
#[derive(Debug, Default)]
pub struct EventParser {
    line: Vec<u8>,
    event: Option<String>,
    data: Option<String>,
}

impl EventParser {
    /// Feed raw bytes and return every event they complete.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            if byte != b'\n' {
                self.line.push(byte);
                continue;
            }
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw);
            events.extend(self.process_line(line.trim_end_matches('\r')));
        }
        events
    }

    /// Flush a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.line.is_empty() {
            let raw = std::mem::take(&mut self.line);
            let line = String::from_utf8_lossy(&raw).into_owned();
            if let Some(event) = self.process_line(line.trim_end_matches('\r')) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    /// Bytes held for the event currently being assembled.
    pub fn buffered(&self) -> usize {
        self.line.len() + self.data.as_ref().map_or(0, String::len)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let data = self.data.take()?;
        Some(SseEvent {
            event: event
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

type Waiters = HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>;
type Pending = Arc<Mutex<Waiters>>;

fn lock(pending: &Pending) -> MutexGuard<'_, Waiters> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a waiter when its request finishes or is cancelled.
struct PendingEntry<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

/// JSON-RPC transport over an SSE stream plus a message endpoint.
pub struct SseTransport {
    http: reqwest::Client,
    stream_url: Url,
    messages_url: Url,
    pending: Pending,
    next_id: AtomicI64,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream at `url` and wait for the message endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        let stream_url = Url::parse(url).map_err(|_| Error::InvalidEndpoint(url.to_string()))?;
        if !matches!(stream_url.scheme(), "http" | "https") {
            return Err(Error::InvalidEndpoint(url.to_string()));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let response = http
            .get(stream_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = check_status(response).await?;

        let pending = Pending::default();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_stream(response, pending.clone(), endpoint_tx));

        let announced = async {
            let path = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
                Ok(Ok(path)) => path,
                Ok(Err(_)) => {
                    return Err(Error::InvalidResponse(
                        "event stream closed before announcing the message endpoint".into(),
                    ));
                }
                Err(_) => {
                    return Err(Error::InvalidResponse(format!(
                        "no endpoint event within {ENDPOINT_TIMEOUT:?}"
                    )));
                }
            };
            stream_url.join(&path).map_err(|e| {
                Error::InvalidResponse(format!("invalid message endpoint '{path}': {e}"))
            })
        }
        .await;

        match announced {
            Ok(messages_url) => {
                debug!(stream = %stream_url, messages = %messages_url, "event stream open");
                Ok(Self {
                    http,
                    stream_url,
                    messages_url,
                    pending,
                    next_id: AtomicI64::new(1),
                    reader,
                })
            }
            Err(e) => {
                reader.abort();
                Err(e)
            }
        }
    }

    pub fn endpoint(&self) -> &str {
        self.stream_url.as_str()
    }

    /// URL requests are POSTed to, as announced by the server.
    pub fn messages_url(&self) -> &Url {
        &self.messages_url
    }

    /// Send a request and wait for its response on the stream.
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

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);
        let _entry = PendingEntry {
            pending: &self.pending,
            id,
        };

        self.post(&request).await?;
        let response = rx.await.map_err(|_| {
            Error::InvalidResponse("event stream closed before the response arrived".into())
        })?;

        let value = response.into_result()?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn notify(&self, method: &str) -> Result<()> {
        self.post(&JsonRpcNotification::new(method)).await
    }

    /// Drop the event stream, which ends the session on the server.
    pub async fn terminate(&self) -> Result<()> {
        self.reader.abort();
        Ok(())
    }

    async fn post(&self, body: &impl Serialize) -> Result<()> {
        let response = self
            .http
            .post(self.messages_url.clone())
            .json(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_stream(
    mut response: reqwest::Response,
    pending: Pending,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut parser = EventParser::default();
    let mut endpoint_tx = Some(endpoint_tx);

    loop {
        let chunk = match response.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "event stream failed");
                break;
            }
        };
        for event in parser.feed(&chunk) {
            deliver(event, &pending, &mut endpoint_tx);
        }
        if parser.buffered() > MAX_OUTPUT_SIZE {
            warn!(max = MAX_OUTPUT_SIZE, "event exceeds size limit; dropping stream");
            break;
        }
    }
    if let Some(event) = parser.finish() {
        deliver(event, &pending, &mut endpoint_tx);
    }

    // Waiters see a closed channel.
    lock(&pending).clear();
}

fn deliver(
    event: SseEvent,
    pending: &Pending,
    endpoint_tx: &mut Option<oneshot::Sender<String>>,
) {
    match event.event.as_str() {
        "endpoint" => {
            if let Some(tx) = endpoint_tx.take() {
                let _ = tx.send(event.data.trim().to_string());
            }
        }
        "message" => match parse_response(&event.data) {
            Some(response) => match lock(pending).remove(&response.id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(id = %response.id, "response for unknown request"),
            },
            None => debug!("ignoring non-response message"),
        },
        other => debug!(event = other, "ignoring event"),
    }
}

/// Notifications and server-to-client requests carry a `method`.
fn parse_response(data: &str) -> Option<JsonRpcResponse> {
    let value: serde_json::Value = serde_json::from_str(data).ok()?;
    if value.get("method").is_some() {
        return None;
    }
    serde_json::from_value(value).ok()
}
