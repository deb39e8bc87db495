//! Server configuration loading and validation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use mcp::TransportKind;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Top-level tool layer configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Tool servers to launch and/or connect to.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Timeouts and delays.
    #[serde(default)]
    pub settings: Settings,
}

/// One tool server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique server name.
    #[serde(default)]
    pub name: String,

    /// Session endpoint URL.
    #[serde(default, alias = "sse_url", alias = "url")]
    pub endpoint: String,

    /// Wire transport. Detected from the endpoint when omitted: a path
    /// ending in `sse` selects the event-stream transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,

    /// Command line used to spawn the server as a child process.
    #[serde(default)]
    pub command: Option<Vec<String>>,

    /// Working directory for the child process.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables for the child process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Reuse one session for every call instead of one session per call.
    #[serde(
        default,
        alias = "use_persistent_session",
        alias = "persistent_session",
        alias = "persistent_sessions"
    )]
    pub persistent: bool,
}

impl ServerConfig {
    /// A server reached at `endpoint` that is not spawned by us.
    pub fn remote(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Transport used to reach this server.
    pub fn transport(&self) -> TransportKind {
        self.transport.unwrap_or_else(|| TransportKind::detect(&self.endpoint))
    }
}

/// Timeouts and delays, all optional in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bound on a single remote tool call.
    pub call_timeout_secs: u64,
    /// Bound on listing one server's tools.
    pub discovery_timeout_secs: u64,
    /// Wait after launching child processes before the first connection.
    pub discovery_settle_ms: u64,
    /// Grace period between terminate and kill at shutdown.
    pub kill_after_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            call_timeout_secs: 60,
            discovery_timeout_secs: 30,
            discovery_settle_ms: 5000,
            kill_after_secs: 3,
        }
    }
}

impl Settings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }

    pub fn discovery_settle(&self) -> Duration {
        Duration::from_millis(self.discovery_settle_ms)
    }

    pub fn kill_after(&self) -> Duration {
        Duration::from_secs(self.kill_after_secs)
    }
}

impl LayerConfig {
    /// Load configuration from a `.json` or `.toml` file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::parse_json(&content)
        } else {
            Self::parse_toml(&content)
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Config(e.to_string()))
    }

    /// Parse configuration from a JSON string.
    pub fn parse_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Check required fields and name uniqueness.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (idx, server) in self.servers.iter().enumerate() {
            let name = server.name.trim();
            if name.is_empty() {
                return Err(Error::Config(format!(
                    "server at index {idx} missing required field 'name'"
                )));
            }
            let endpoint = server.endpoint.trim();
            if endpoint.is_empty() {
                return Err(Error::Config(format!(
                    "server '{name}' missing required field 'endpoint'"
                )));
            }
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "server '{name}' endpoint must be an http(s) URL, got '{endpoint}'"
                )));
            }
            let empty_command = server
                .command
                .as_ref()
                .is_some_and(|cmd| cmd.first().is_none_or(|program| program.trim().is_empty()));
            if empty_command {
                return Err(Error::Config(format!("server '{name}' has an empty command")));
            }
            if !seen.insert(name) {
                return Err(Error::Config(format!("duplicate server name '{name}'")));
            }
        }
        Ok(())
    }

    /// Look up a server by name.
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.name == name)
    }
}
