//! Child process management for tool servers.

use std::collections::BTreeMap;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::{Error, Result};

/// Interval between liveness checks while waiting for a process to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A spawned tool server.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    child: Child,
}

impl ManagedProcess {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }

    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process group to exit, wait up to `grace`, then kill it.
    pub fn terminate(&mut self, grace: Duration) {
        if !self.is_running() {
            return;
        }

        self.signal_terminate();
        let deadline = Instant::now() + grace;
        while self.is_running() && Instant::now() < deadline {
            std::thread::sleep(POLL_INTERVAL);
        }

        if self.is_running() {
            warn!(server = %self.name, pid = self.id(), "server did not exit in time; killing");
            self.kill();
        }
        // Reap so no zombie is left behind.
        let _ = self.child.wait();
    }

    #[cfg(unix)]
    fn signal_terminate(&mut self) {
        // The child leads its own process group; signal the whole group.
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions.
        let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
        if rc != 0 {
            debug!(server = %self.name, "SIGTERM to process group failed; falling back to kill");
            let _ = self.child.kill();
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&mut self) {
        let _ = self.child.kill();
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        {
            let pgid = self.child.id() as libc::pid_t;
            // SAFETY: kill(2) has no memory-safety preconditions.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
        let _ = self.child.kill();
    }
}

/// Owns every spawned tool server. Nothing else terminates them.
#[derive(Debug, Default)]
pub struct Supervisor {
    processes: BTreeMap<String, ManagedProcess>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the configured command in its own process group with standard
    /// streams detached from ours. Servers without a command are skipped.
    pub fn launch(&mut self, config: &ServerConfig) -> Result<()> {
        let Some((program, args)) = config.command.as_deref().and_then(|c| c.split_first()) else {
            return Ok(());
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let command_line = config.command.as_deref().unwrap_or_default().join(" ");
        info!(server = %config.name, command = %command_line, "starting server");
        let child = cmd.spawn().map_err(|source| Error::ProcessLaunch {
            server: config.name.clone(),
            source,
        })?;

        if let Some(mut previous) = self.processes.insert(
            config.name.clone(),
            ManagedProcess {
                name: config.name.clone(),
                child,
            },
        ) {
            warn!(server = %config.name, "server launched twice; stopping the older process");
            previous.terminate(Duration::ZERO);
        }
        Ok(())
    }

    /// Terminate every process still alive, each with `grace` before kill.
    pub fn terminate_all(&mut self, grace: Duration) {
        for (name, mut process) in std::mem::take(&mut self.processes) {
            debug!(server = %name, pid = process.id(), "stopping server");
            process.terminate(grace);
        }
    }

    /// Stop tracking every process without signalling it.
    pub fn release(&mut self) {
        for name in std::mem::take(&mut self.processes).into_keys() {
            debug!(server = %name, "leaving server running");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn is_running(&mut self, name: &str) -> bool {
        self.processes.get_mut(name).is_some_and(ManagedProcess::is_running)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.terminate_all(Duration::ZERO);
    }
}
