//! Name → tool mapping shared by discovery, the planner listing and execution.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use super::{DiscoveredTool, Origin, ToolDescriptor, ToolSummary};
use crate::{Error, Result};

/// Outcome of merging one server's tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Tools now served by this server.
    pub registered: Vec<String>,
    /// Tools dropped because a local tool has the same name.
    pub shadowed: Vec<String>,
}

/// Registry of local and remote tools.
///
/// Local tools always win over remote ones. Among remote tools the server
/// merged last owns a contested name.
#[derive(Debug, Default)]
pub struct ToolDirectory {
    entries: RwLock<BTreeMap<String, ToolDescriptor>>,
}

impl ToolDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local tool. Names must be unique.
    pub fn register_local(&self, mut descriptor: ToolDescriptor) -> Result<()> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config("tool name must be non-empty".into()));
        }
        if !descriptor.origin.is_local() {
            return Err(Error::Config(format!("tool {name} is not a local tool")));
        }

        let mut entries = self.write();
        if entries.contains_key(&name) {
            return Err(Error::DuplicateTool(name));
        }
        descriptor.name = name.clone();
        entries.insert(name, descriptor);
        Ok(())
    }

    /// Replace everything `server` previously contributed with `tools`.
    pub fn merge_remote(&self, server: &str, tools: Vec<DiscoveredTool>) -> MergeReport {
        let mut report = MergeReport::default();
        let mut entries = self.write();
        entries.retain(|_, d| d.origin.server() != Some(server));

        for tool in tools {
            if tool.name.is_empty() {
                continue;
            }
            match entries.get(&tool.name).map(|d| &d.origin) {
                Some(Origin::Local(_)) => {
                    debug!(tool = %tool.name, server, "local tool shadows remote tool");
                    report.shadowed.push(tool.name);
                    continue;
                }
                Some(Origin::Remote { server: previous }) if previous != server => {
                    warn!(
                        tool = %tool.name,
                        previous = %previous,
                        server,
                        "tool offered by multiple servers; using the latest"
                    );
                }
                _ => {}
            }

            report.registered.push(tool.name.clone());
            entries.insert(
                tool.name.clone(),
                ToolDescriptor {
                    name: tool.name,
                    description: tool.description,
                    schema: tool.schema,
                    origin: Origin::Remote {
                        server: server.to_string(),
                    },
                },
            );
        }
        report
    }

    /// Drop every remote tool.
    pub fn clear_remote(&self) {
        self.write().retain(|_, d| d.origin.is_local());
    }

    pub fn resolve(&self, name: &str) -> Option<ToolDescriptor> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Name and description of every tool, sorted by name.
    pub fn list(&self) -> Vec<ToolSummary> {
        self.read()
            .values()
            .map(|d| ToolSummary {
                name: d.name.clone(),
                description: d.description.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ToolDescriptor>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ToolDescriptor>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
