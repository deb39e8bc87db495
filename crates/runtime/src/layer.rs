//! The tool layer: one synchronous facade over the whole subsystem.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::config::LayerConfig;
use crate::discovery::discover_all;
use crate::session::{Connector, HttpConnector, SessionManager};
use crate::supervisor::Supervisor;
use crate::tools::{
    Arguments, Origin, Schema, ToolDescriptor, ToolDirectory, ToolSummary, builtin,
};
use crate::{Error, Result};

/// Upper bound on closing persistent sessions during stop.
const CLOSE_SESSIONS_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on joining the loop thread during stop.
const LOOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether the layer is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Inactive,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Active => f.write_str("active"),
            Status::Inactive => f.write_str("inactive"),
        }
    }
}

struct Running {
    config: LayerConfig,
    bridge: Arc<Bridge>,
    sessions: Arc<SessionManager>,
    supervisor: Supervisor,
    /// Servers that launched (or need no launch) and are asked for tools.
    reachable: Vec<String>,
}

/// Synchronous entry point for listing and executing tools.
///
/// Local tools work at any time. Remote tools need [`ToolLayer::start`],
/// which launches configured servers, starts the scheduler loop and runs
/// discovery.
///
/// # Example
///
/// ```no_run
/// use runtime::{LayerConfig, ToolLayer};
///
/// # fn main() -> runtime::Result<()> {
/// let layer = ToolLayer::new();
/// layer.start(LayerConfig::load("toolbridge.toml")?)?;
/// for tool in layer.list_tools() {
///     println!("{}: {}", tool.name, tool.description);
/// }
/// let args = layer.bind("ping", &[])?;
/// println!("{}", layer.execute("ping", args)?);
/// layer.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct ToolLayer {
    directory: ToolDirectory,
    connector: Arc<dyn Connector>,
    state: Mutex<Option<Running>>,
}

impl Default for ToolLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolLayer {
    /// A layer reaching servers over HTTP, with the built-in tools registered.
    pub fn new() -> Self {
        Self::with_connector(Arc::new(HttpConnector))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let directory = ToolDirectory::new();
        for tool in builtin::all() {
            let name = tool.name.clone();
            if let Err(e) = directory.register_local(tool) {
                warn!(tool = %name, error = %e, "failed to register built-in tool");
            }
        }
        Self {
            directory,
            connector,
            state: Mutex::new(None),
        }
    }

    /// Add a local tool. Names must be unique across local tools.
    pub fn register_local(&self, descriptor: ToolDescriptor) -> Result<()> {
        self.directory.register_local(descriptor)
    }

    /// The directory backing this layer.
    pub fn directory(&self) -> &ToolDirectory {
        &self.directory
    }

    /// Launch servers, start the loop and discover tools.
    ///
    /// Calling this on a started layer does nothing. A server that fails to
    /// launch or to answer discovery is logged and skipped; only an invalid
    /// config or a loop that cannot start fails the call.
    pub fn start(&self, config: LayerConfig) -> Result<()> {
        let mut state = self.lock();
        if state.is_some() {
            debug!("tool layer already started");
            return Ok(());
        }
        config.validate()?;

        let mut supervisor = Supervisor::new();
        let mut excluded = BTreeSet::new();
        for server in &config.servers {
            if let Err(e) = supervisor.launch(server) {
                warn!(server = %server.name, error = %e, "server failed to launch; excluding it");
                excluded.insert(server.name.as_str());
            }
        }

        let bridge = match Bridge::start() {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                supervisor.terminate_all(config.settings.kill_after());
                return Err(e);
            }
        };

        let eligible: Vec<_> = config
            .servers
            .iter()
            .filter(|server| !excluded.contains(server.name.as_str()))
            .collect();
        let sessions = SessionManager::new(self.connector.clone(), eligible.iter().copied())
            .with_tracker(bridge.tracker());
        let sessions = Arc::new(sessions);
        let reachable: Vec<String> = eligible.iter().map(|server| server.name.clone()).collect();

        if !supervisor.is_empty() {
            let settle = config.settings.discovery_settle();
            if !settle.is_zero() {
                info!(?settle, "waiting for launched servers before discovery");
                std::thread::sleep(settle);
            }
        }

        let answered = discover_all(
            &bridge,
            &sessions,
            &self.directory,
            reachable.iter().map(String::as_str),
            config.settings.discovery_timeout(),
        );
        info!(
            servers = reachable.len(),
            answered,
            tools = self.directory.len(),
            "tool layer started"
        );

        *state = Some(Running {
            config,
            bridge,
            sessions,
            supervisor,
            reachable,
        });
        Ok(())
    }

    /// Stop with the configured grace period, terminating launched servers.
    pub fn shutdown(&self) {
        self.stop(true, None);
    }

    /// Close persistent sessions, stop the loop and deal with launched
    /// servers: terminate them (waiting `kill_after`, or the configured
    /// grace period, before killing) or leave them running.
    ///
    /// Safe to call at any time, any number of times.
    pub fn stop(&self, terminate_processes: bool, kill_after: Option<Duration>) {
        let Some(mut running) = self.lock().take() else {
            self.directory.clear_remote();
            return;
        };

        let sessions = running.sessions.clone();
        let closing = async move {
            sessions.close_all().await;
            Ok(())
        };
        if let Err(e) = running
            .bridge
            .run_blocking("closing sessions", closing, CLOSE_SESSIONS_TIMEOUT)
        {
            warn!(error = %e, "failed to close persistent sessions");
        }
        running.bridge.shutdown(LOOP_JOIN_TIMEOUT);

        if terminate_processes {
            let grace = kill_after.unwrap_or_else(|| running.config.settings.kill_after());
            running.supervisor.terminate_all(grace);
        } else {
            running.supervisor.release();
        }

        self.directory.clear_remote();
        info!("tool layer stopped");
    }

    pub fn status(&self) -> Status {
        match self.lock().as_ref() {
            Some(running) if running.bridge.is_running() => Status::Active,
            _ => Status::Inactive,
        }
    }

    pub fn is_started(&self) -> bool {
        self.lock().is_some()
    }

    /// Re-run discovery against every reachable server.
    ///
    /// Each server's remote tools are replaced wholesale. Returns the number
    /// of servers that answered.
    pub fn rediscover(&self) -> Result<usize> {
        let (bridge, sessions, servers, timeout) = {
            let state = self.lock();
            let running = state.as_ref().ok_or(Error::NotStarted)?;
            (
                running.bridge.clone(),
                running.sessions.clone(),
                running.reachable.clone(),
                running.config.settings.discovery_timeout(),
            )
        };
        Ok(discover_all(
            &bridge,
            &sessions,
            &self.directory,
            servers.iter().map(String::as_str),
            timeout,
        ))
    }

    /// Name and description of every tool, for the planner.
    pub fn list_tools(&self) -> Vec<ToolSummary> {
        self.directory.list()
    }

    pub fn schema(&self, name: &str) -> Result<Schema> {
        self.directory
            .resolve(name)
            .map(|tool| tool.schema)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))
    }

    /// Bind planner-supplied positional arguments to `name`'s parameters.
    pub fn bind(&self, name: &str, args: &[String]) -> Result<Arguments> {
        self.schema(name)?.bind(name, args)
    }

    /// Execute a tool with the configured call timeout.
    pub fn execute(&self, name: &str, args: Arguments) -> Result<Value> {
        self.run(name, args, None)
    }

    pub fn execute_with_timeout(
        &self,
        name: &str,
        args: Arguments,
        timeout: Duration,
    ) -> Result<Value> {
        self.run(name, args, Some(timeout))
    }

    /// Call `tool` on `server` directly, bypassing the directory.
    ///
    /// Fails without touching the network when `server` is not configured.
    pub fn call_remote(
        &self,
        server: &str,
        tool: &str,
        args: Arguments,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (bridge, sessions, default_timeout) = {
            let state = self.lock();
            let running = state.as_ref().ok_or(Error::NotStarted)?;
            (
                running.bridge.clone(),
                running.sessions.clone(),
                running.config.settings.call_timeout(),
            )
        };
        if !sessions.knows(server) {
            return Err(Error::UnknownServer(server.to_string()));
        }

        let operation = format!("{tool} on {server}");
        let work = {
            let server = server.to_string();
            let tool = tool.to_string();
            async move { sessions.call(&server, &tool, args).await }
        };
        bridge.run_blocking(&operation, work, timeout.unwrap_or(default_timeout))
    }

    fn run(&self, name: &str, args: Arguments, timeout: Option<Duration>) -> Result<Value> {
        let tool = self
            .directory
            .resolve(name)
            .ok_or_else(|| Error::UnknownTool(name.to_string()))?;

        match tool.origin {
            Origin::Local(handler) => handler(&args).map_err(|reason| Error::Tool {
                tool: name.to_string(),
                reason,
            }),
            Origin::Remote { server } => {
                debug!(tool = name, server = %server, "executing remote tool");
                self.call_remote(&server, name, args, timeout)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ToolLayer {
    fn drop(&mut self) {
        self.stop(true, None);
    }
}
