//! Remote session management.
//!
//! A server is reached either through an ephemeral session (connect,
//! handshake, one request, close) or through one persistent session that is
//! created on first use and kept until [`SessionManager::close_all`].
//!
//! Ephemeral sessions are closed on every exit path. When the calling future
//! is dropped (a timeout or shutdown cancelled it), the close is handed to a
//! task on the manager's [`TaskTracker`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp::TransportKind;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::tools::Arguments;
use crate::{Error, Result};

/// An open session with one server.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Perform the initialize handshake.
    async fn initialize(&self) -> mcp::Result<()>;

    async fn list_tools(&self) -> mcp::Result<Vec<mcp::Tool>>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> mcp::Result<mcp::CallToolResult>;

    async fn close(&self) -> mcp::Result<()>;
}

/// Opens sessions to server endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        transport: TransportKind,
    ) -> mcp::Result<Arc<dyn RemoteSession>>;
}

/// Connector for MCP servers over HTTP, either transport.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl Connector for HttpConnector {
    async fn open(
        &self,
        endpoint: &str,
        transport: TransportKind,
    ) -> mcp::Result<Arc<dyn RemoteSession>> {
        Ok(Arc::new(mcp::Client::open(endpoint, transport).await?))
    }
}

#[async_trait]
impl RemoteSession for mcp::Client {
    async fn initialize(&self) -> mcp::Result<()> {
        mcp::Client::initialize(self).await.map(|_| ())
    }

    async fn list_tools(&self) -> mcp::Result<Vec<mcp::Tool>> {
        mcp::Client::list_tools(self).await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> mcp::Result<mcp::CallToolResult> {
        mcp::Client::call_tool(self, name, arguments).await
    }

    async fn close(&self) -> mcp::Result<()> {
        mcp::Client::close(self).await
    }
}

/// Bound on closing a session whose call was cancelled.
const ABANDONED_CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Owns an open session until it is closed or kept.
///
/// Dropping an unclosed guard spawns the close onto the current runtime.
struct SessionGuard {
    server: String,
    session: Arc<dyn RemoteSession>,
    tracker: TaskTracker,
    done: bool,
}

impl SessionGuard {
    fn new(server: &str, session: Arc<dyn RemoteSession>, tracker: &TaskTracker) -> Self {
        Self {
            server: server.to_string(),
            session,
            tracker: tracker.clone(),
            done: false,
        }
    }

    fn session(&self) -> &dyn RemoteSession {
        self.session.as_ref()
    }

    async fn close(mut self) {
        close_quietly(&self.server, self.session.as_ref()).await;
        self.done = true;
    }

    /// Hand the session over without closing it.
    fn keep(mut self) -> Arc<dyn RemoteSession> {
        self.done = true;
        self.session.clone()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(server = %self.server, "no runtime to close abandoned session");
            return;
        };

        debug!(server = %self.server, "closing session of a cancelled call");
        let server = std::mem::take(&mut self.server);
        let session = self.session.clone();
        self.tracker.spawn_on(
            async move {
                let close = close_quietly(&server, session.as_ref());
                if tokio::time::timeout(ABANDONED_CLOSE_TIMEOUT, close).await.is_err() {
                    debug!(server = %server, "timed out closing abandoned session");
                }
            },
            &handle,
        );
    }
}

struct ServerSlot {
    endpoint: String,
    transport: TransportKind,
    persistent: bool,
    /// Persistent session; the lock serializes creation.
    session: Mutex<Option<Arc<dyn RemoteSession>>>,
}

/// Per-server session state. Only this type opens or closes sessions.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    servers: HashMap<String, ServerSlot>,
    tracker: TaskTracker,
}

impl SessionManager {
    pub fn new<'a>(
        connector: Arc<dyn Connector>,
        servers: impl IntoIterator<Item = &'a ServerConfig>,
    ) -> Self {
        let servers = servers
            .into_iter()
            .map(|config| {
                (
                    config.name.clone(),
                    ServerSlot {
                        endpoint: config.endpoint.clone(),
                        transport: config.transport(),
                        persistent: config.persistent,
                        session: Mutex::new(None),
                    },
                )
            })
            .collect();
        Self {
            connector,
            servers,
            tracker: TaskTracker::new(),
        }
    }

    /// Track background closes on `tracker`, so whoever waits on it also
    /// waits for sessions abandoned by cancelled calls.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn knows(&self, server: &str) -> bool {
        self.servers.contains_key(server)
    }

    /// Call `tool` on `server`. Retrying is left to the caller.
    pub async fn call(&self, server: &str, tool: &str, arguments: Arguments) -> Result<Value> {
        let slot = self.slot(server)?;
        let arguments: Map<String, Value> = arguments
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();
        let remote_err = |e: mcp::Error| Error::Remote {
            server: server.to_string(),
            tool: tool.to_string(),
            reason: e.to_string(),
        };

        let result = if slot.persistent {
            let session = self
                .persistent_session(server, slot)
                .await
                .map_err(remote_err)?;
            session.call_tool(tool, arguments).await.map_err(remote_err)?
        } else {
            let session = self.open(server, slot).await.map_err(remote_err)?;
            let outcome = async {
                session.session().initialize().await?;
                session.session().call_tool(tool, arguments).await
            }
            .await;
            session.close().await;
            outcome.map_err(remote_err)?
        };

        serde_json::to_value(&result.content).map_err(|e| Error::Remote {
            server: server.to_string(),
            tool: tool.to_string(),
            reason: format!("unreadable result: {e}"),
        })
    }

    /// List a server's tools over a short-lived session.
    pub async fn list_tools(&self, server: &str) -> Result<Vec<mcp::Tool>> {
        let slot = self.slot(server)?;
        let discovery_err = |e: mcp::Error| Error::Discovery {
            server: server.to_string(),
            reason: e.to_string(),
        };

        let session = self.open(server, slot).await.map_err(discovery_err)?;
        let outcome = async {
            session.session().initialize().await?;
            session.session().list_tools().await
        }
        .await;
        session.close().await;
        outcome.map_err(discovery_err)
    }

    /// Number of persistent sessions currently open.
    pub async fn open_sessions(&self) -> usize {
        let mut open = 0;
        for slot in self.servers.values() {
            if slot.session.lock().await.is_some() {
                open += 1;
            }
        }
        open
    }

    /// Close every persistent session. Failures are logged, not returned.
    pub async fn close_all(&self) {
        for (name, slot) in &self.servers {
            let Some(session) = slot.session.lock().await.take() else {
                continue;
            };
            match session.close().await {
                Ok(()) => info!(server = %name, "closed persistent session"),
                Err(e) => warn!(server = %name, error = %e, "failed to close persistent session"),
            }
        }
    }

    fn slot(&self, server: &str) -> Result<&ServerSlot> {
        self.servers
            .get(server)
            .ok_or_else(|| Error::UnknownServer(server.to_string()))
    }

    async fn open(&self, server: &str, slot: &ServerSlot) -> mcp::Result<SessionGuard> {
        let session = self.connector.open(&slot.endpoint, slot.transport).await?;
        Ok(SessionGuard::new(server, session, &self.tracker))
    }

    async fn persistent_session(
        &self,
        server: &str,
        slot: &ServerSlot,
    ) -> mcp::Result<Arc<dyn RemoteSession>> {
        let mut current = slot.session.lock().await;
        if let Some(session) = current.as_ref() {
            return Ok(session.clone());
        }

        let session = self.open(server, slot).await?;
        if let Err(e) = session.session().initialize().await {
            session.close().await;
            return Err(e);
        }
        let session = session.keep();
        info!(server, transport = %slot.transport, "opened persistent session");
        *current = Some(session.clone());
        Ok(session)
    }
}

async fn close_quietly(server: &str, session: &dyn RemoteSession) {
    if let Err(e) = session.close().await {
        debug!(server, error = %e, "failed to close session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        opened: AtomicUsize,
        initialized: AtomicUsize,
        calls: AtomicUsize,
        closed: AtomicUsize,
    }

    #[derive(Default)]
    struct FakeConnector {
        counters: Arc<Counters>,
        open_delay: Duration,
        fail_initialize: bool,
        hang_initialize: bool,
        fail_call: bool,
        hang_call: bool,
        transports: std::sync::Mutex<Vec<TransportKind>>,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        fail_initialize: bool,
        hang_initialize: bool,
        fail_call: bool,
        hang_call: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn open(
            &self,
            _endpoint: &str,
            transport: TransportKind,
        ) -> mcp::Result<Arc<dyn RemoteSession>> {
            tokio::time::sleep(self.open_delay).await;
            self.counters.opened.fetch_add(1, Ordering::SeqCst);
            self.transports.lock().unwrap().push(transport);
            Ok(Arc::new(FakeSession {
                counters: self.counters.clone(),
                fail_initialize: self.fail_initialize,
                hang_initialize: self.hang_initialize,
                fail_call: self.fail_call,
                hang_call: self.hang_call,
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for FakeSession {
        async fn initialize(&self) -> mcp::Result<()> {
            if self.hang_initialize {
                std::future::pending::<()>().await;
            }
            if self.fail_initialize {
                return Err(mcp::Error::InvalidResponse("handshake refused".into()));
            }
            self.counters.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn list_tools(&self) -> mcp::Result<Vec<mcp::Tool>> {
            Ok(vec![mcp::Tool {
                name: "get_issue".into(),
                description: Some("Fetch an issue".into()),
                input_schema: serde_json::json!({
                    "properties": {"key": {}},
                    "required": ["key"]
                }),
            }])
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Map<String, Value>,
        ) -> mcp::Result<mcp::CallToolResult> {
            self.counters.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang_call {
                std::future::pending::<()>().await;
            }
            if self.fail_call {
                return Err(mcp::Error::ToolCallFailed("boom".into()));
            }
            Ok(mcp::CallToolResult {
                content: vec![mcp::ToolContent::Text {
                    text: format!("{name} {}", Value::Object(arguments)),
                }],
                is_error: false,
            })
        }

        async fn close(&self) -> mcp::Result<()> {
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(connector: FakeConnector, persistent: bool) -> (SessionManager, Arc<Counters>) {
        let counters = connector.counters.clone();
        let config = ServerConfig::remote("jira", "http://127.0.0.1:9/mcp").persistent(persistent);
        (SessionManager::new(Arc::new(connector), [&config]), counters)
    }

    fn args(pairs: &[(&str, &str)]) -> Arguments {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[tokio::test]
    async fn ephemeral_session_per_call() {
        let (sessions, counters) = manager(FakeConnector::default(), false);
        for _ in 0..2 {
            sessions.call("jira", "get_issue", args(&[("key", "PROJ-1")])).await.unwrap();
        }
        assert_eq!(counters.opened.load(Ordering::SeqCst), 2);
        assert_eq!(counters.initialized.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert_eq!(sessions.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn ephemeral_session_closed_after_failure() {
        let connector = FakeConnector {
            fail_call: true,
            ..Default::default()
        };
        let (sessions, counters) = manager(connector, false);
        let err = sessions.call("jira", "get_issue", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, Error::Remote { .. }));
        assert!(err.to_string().contains("boom"), "{err}");
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn arguments_are_sent_as_strings() {
        let (sessions, _) = manager(FakeConnector::default(), false);
        let result = sessions
            .call("jira", "get_issue", args(&[("key", "PROJ-1"), ("limit", "5")]))
            .await
            .unwrap();
        assert_eq!(
            result,
            serde_json::json!([{
                "type": "text",
                "text": r#"get_issue {"key":"PROJ-1","limit":"5"}"#
            }])
        );
    }

    #[tokio::test]
    async fn persistent_session_is_reused_until_closed() {
        let (sessions, counters) = manager(FakeConnector::default(), true);
        for _ in 0..3 {
            sessions.call("jira", "get_issue", Arguments::new()).await.unwrap();
        }
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.calls.load(Ordering::SeqCst), 3);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 0);
        assert_eq!(sessions.open_sessions().await, 1);

        sessions.close_all().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn concurrent_first_calls_create_one_session() {
        let connector = FakeConnector {
            open_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let (sessions, counters) = manager(connector, true);
        let (a, b) = tokio::join!(
            sessions.call("jira", "get_issue", Arguments::new()),
            sessions.call("jira", "get_issue", Arguments::new()),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_handshake_is_not_kept() {
        let connector = FakeConnector {
            fail_initialize: true,
            ..Default::default()
        };
        let (sessions, counters) = manager(connector, true);
        assert!(sessions.call("jira", "get_issue", Arguments::new()).await.is_err());
        assert_eq!(sessions.open_sessions().await, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_server_fails_without_connecting() {
        let (sessions, counters) = manager(FakeConnector::default(), false);
        let err = sessions.call("wiki", "search", Arguments::new()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownServer(name) if name == "wiki"));
        assert_eq!(counters.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancelled_call_still_closes_its_session() {
        let connector = FakeConnector {
            hang_call: true,
            ..Default::default()
        };
        let counters = connector.counters.clone();
        let config = ServerConfig::remote("jira", "http://127.0.0.1:9/mcp");
        let tracker = TaskTracker::new();
        let sessions =
            SessionManager::new(Arc::new(connector), [&config]).with_tracker(tracker.clone());

        let call = sessions.call("jira", "get_issue", Arguments::new());
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());
        assert_eq!(counters.calls.load(Ordering::SeqCst), 1);

        tracker.close();
        tracker.wait().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_handshake_does_not_keep_a_session() {
        let connector = FakeConnector {
            hang_initialize: true,
            ..Default::default()
        };
        let (sessions, counters) = manager(connector, true);
        let call = sessions.call("jira", "get_issue", Arguments::new());
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counters.opened.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.open_sessions().await, 0);
    }

    #[tokio::test]
    async fn connector_receives_the_configured_transport() {
        let connector = Arc::new(FakeConnector::default());
        let configs = [
            ServerConfig::remote("jira", "http://127.0.0.1:9/sse/"),
            ServerConfig::remote("wiki", "http://127.0.0.1:9/mcp"),
        ];
        let sessions = SessionManager::new(connector.clone(), &configs);
        sessions.list_tools("jira").await.unwrap();
        sessions.list_tools("wiki").await.unwrap();
        assert_eq!(
            *connector.transports.lock().unwrap(),
            [TransportKind::Sse, TransportKind::StreamableHttp]
        );
    }

    #[tokio::test]
    async fn listing_uses_a_short_lived_session() {
        let (sessions, counters) = manager(FakeConnector::default(), true);
        let tools = sessions.list_tools("jira").await.unwrap();
        assert_eq!(tools[0].name, "get_issue");
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.open_sessions().await, 0);
    }
}
