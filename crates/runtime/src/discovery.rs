//! Capability discovery against configured servers.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::Result;
use crate::bridge::Bridge;
use crate::session::SessionManager;
use crate::tools::{DiscoveredTool, ToolDirectory};

/// List the tools `server` offers, blocking on the bridge for at most `timeout`.
pub fn discover_server(
    bridge: &Bridge,
    sessions: &Arc<SessionManager>,
    server: &str,
    timeout: Duration,
) -> Result<Vec<DiscoveredTool>> {
    let work = {
        let sessions = sessions.clone();
        let server = server.to_string();
        async move { sessions.list_tools(&server).await }
    };
    let tools = bridge.run_blocking(&format!("discovery of {server}"), work, timeout)?;

    Ok(tools
        .into_iter()
        .filter(|tool| !tool.name.is_empty())
        .map(DiscoveredTool::from)
        .collect())
}

/// Discover every server in `servers` and merge the results into `directory`.
///
/// A failing server is logged and contributes nothing; the rest continue.
/// Returns the number of servers that answered.
pub fn discover_all<'a>(
    bridge: &Bridge,
    sessions: &Arc<SessionManager>,
    directory: &ToolDirectory,
    servers: impl IntoIterator<Item = &'a str>,
    timeout: Duration,
) -> usize {
    let mut answered = 0;
    for server in servers {
        match discover_server(bridge, sessions, server, timeout) {
            Ok(tools) => {
                let report = directory.merge_remote(server, tools);
                info!(
                    server,
                    tools = report.registered.len(),
                    shadowed = report.shadowed.len(),
                    "discovered tools"
                );
                answered += 1;
            }
            Err(e) => {
                warn!(server, error = %e, "discovery failed; server contributes no tools");
                directory.merge_remote(server, Vec::new());
            }
        }
    }
    answered
}
