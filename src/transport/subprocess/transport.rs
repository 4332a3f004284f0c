//! Subprocess transport implementation using the Copilot CLI

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;

use crate::error::{CopilotError, Result};
use crate::transport::{Transport, TransportStreams};
use crate::types::options::ClientOptions;

use super::config::{CLI_PATH_ENV, SpawnMode, SubprocessConfig};

/// Subprocess transport for the Copilot CLI
///
/// Spawns the CLI in server mode and talks to it over stdio, or over TCP
/// once the CLI has announced its port.
pub struct SubprocessTransport {
    pub(super) config: SubprocessConfig,
    pub(super) process: Option<Child>,
    /// Held open in TCP mode so the CLI does not see EOF on stdin
    pub(super) stdin: Option<ChildStdin>,
    pub(super) stderr_task: Option<JoinHandle<()>>,
    pub(super) stdout_task: Option<JoinHandle<()>>,
}

impl SubprocessTransport {
    /// Create a new subprocess transport
    ///
    /// The CLI is located when connecting, so a missing installation surfaces
    /// as a connection error from `start()`.
    #[must_use]
    pub fn new(config: SubprocessConfig) -> Self {
        Self {
            config,
            process: None,
            stdin: None,
            stderr_task: None,
            stdout_task: None,
        }
    }

    /// Create a transport from client options
    #[must_use]
    pub fn from_options(options: &ClientOptions) -> Self {
        Self::new(SubprocessConfig::from_options(options))
    }

    /// Spawn mode in use
    #[must_use]
    pub fn mode(&self) -> SpawnMode {
        self.config.mode
    }

    /// OS process id of the running CLI
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(Child::id)
    }

    pub(super) fn resolve_cli(&self) -> Result<PathBuf> {
        match &self.config.cli_path {
            Some(path) => Ok(path.clone()),
            None => Self::find_cli(),
        }
    }

    /// Find the Copilot CLI binary
    ///
    /// # Errors
    /// Returns error if the CLI cannot be found in `COPILOT_CLI_PATH`, PATH or
    /// common locations
    pub fn find_cli() -> Result<PathBuf> {
        if let Ok(path) = env::var(CLI_PATH_ENV)
            && !path.is_empty()
        {
            return Ok(PathBuf::from(path));
        }

        if let Ok(path) = which::which("copilot") {
            return Ok(path);
        }

        let home = env::var("HOME").unwrap_or_else(|_| String::from("/root"));
        let locations = vec![
            PathBuf::from(home.clone()).join(".npm-global/bin/copilot"),
            PathBuf::from("/usr/local/bin/copilot"),
            PathBuf::from(home.clone()).join(".local/bin/copilot"),
            PathBuf::from(home.clone()).join("node_modules/.bin/copilot"),
            PathBuf::from(home).join(".yarn/bin/copilot"),
        ];

        for path in locations {
            if path.exists() && path.is_file() {
                return Ok(path);
            }
        }

        Err(CopilotError::cli_not_found())
    }
}

impl std::fmt::Debug for SubprocessTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessTransport")
            .field("config", &self.config)
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Transport for SubprocessTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<TransportStreams>> {
        Box::pin(self.connect_impl())
    }

    fn shutdown(&mut self, grace: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.shutdown_impl(grace))
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.kill_impl())
    }

    fn describe(&self) -> String {
        match (self.config.mode, self.pid()) {
            (SpawnMode::Stdio, Some(pid)) => format!("stdio (pid {pid})"),
            (SpawnMode::Tcp(_), Some(pid)) => format!("tcp (pid {pid})"),
            (mode, None) => format!("{mode:?} (not running)"),
        }
    }
}

impl Drop for SubprocessTransport {
    fn drop(&mut self) {
        self.drop_impl();
    }
}
