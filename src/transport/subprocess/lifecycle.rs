//! Lifecycle management for subprocess transport (connect, shutdown, kill)

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::ChildStdout;
use tokio::task::JoinHandle;

use crate::error::{CopilotError, Result};
use crate::transport::TransportStreams;
use crate::transport::tcp::dial;

use super::command::CommandBuilder;
use super::config::{SpawnMode, parse_port_announcement};
use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Spawn the CLI and hand over its streams
    ///
    /// # Errors
    /// Returns `ConnectionUnavailable` if the CLI cannot be found, spawned,
    /// or does not announce its port in time
    pub(super) async fn connect_impl(&mut self) -> Result<TransportStreams> {
        // A previous process may still be around after a crash.
        self.kill_impl().await?;

        let cli_path = self.resolve_cli()?;
        let mut cmd = CommandBuilder::new(&cli_path, &self.config).build();

        let mut child = cmd.spawn().map_err(|e| {
            if let Some(ref cwd) = self.config.cwd
                && !cwd.exists()
            {
                return CopilotError::connection_unavailable(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                ));
            }
            CopilotError::connection_unavailable(format!(
                "Failed to start Copilot CLI at {}: {e}",
                cli_path.display()
            ))
        })?;
        log::debug!(
            "Spawned Copilot CLI {} (pid {:?})",
            cli_path.display(),
            child.id()
        );

        if let Some(stderr) = child.stderr.take() {
            self.stderr_task = Some(forward_lines("stderr", stderr));
        }

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CopilotError::connection_unavailable("Failed to get stdin handle"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CopilotError::connection_unavailable("Failed to get stdout handle"))?;
        self.process = Some(child);

        match self.config.mode {
            SpawnMode::Stdio => Ok(TransportStreams {
                reader: Box::new(stdout),
                writer: Box::new(stdin),
            }),
            SpawnMode::Tcp(_) => {
                self.stdin = Some(stdin);
                match self.connect_announced_port(stdout).await {
                    Ok(streams) => Ok(streams),
                    Err(e) => {
                        self.kill_impl().await?;
                        Err(e)
                    }
                }
            }
        }
    }

    async fn connect_announced_port(&mut self, stdout: ChildStdout) -> Result<TransportStreams> {
        let timeout = self.config.connect_timeout;
        let mut lines = BufReader::new(stdout).lines();

        let port = tokio::time::timeout(timeout, async {
            while let Some(line) = lines.next_line().await? {
                log::debug!("[CLI stdout] {line}");
                if let Some(port) = parse_port_announcement(&line) {
                    return Ok::<u16, CopilotError>(port);
                }
            }
            Err(CopilotError::connection_unavailable(
                "Copilot CLI exited before announcing its port",
            ))
        })
        .await
        .map_err(|_| {
            CopilotError::connection_unavailable(format!(
                "Copilot CLI did not announce a port within {timeout:?}"
            ))
        })??;

        self.stdout_task = Some(tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("[CLI stdout] {line}");
            }
        }));

        log::debug!("Copilot CLI listening on port {port}");
        dial("127.0.0.1", port, timeout).await
    }

    /// Wait for the CLI to exit after its input was closed, then kill it
    ///
    /// # Errors
    /// Returns error if waiting on the process fails
    pub(super) async fn shutdown_impl(&mut self, grace: Duration) -> Result<()> {
        // Closing stdin signals the process to exit gracefully
        self.stdin.take();

        if let Some(mut child) = self.process.take() {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    log::debug!("Copilot CLI exited with {status}");
                }
                Ok(Err(e)) => {
                    self.abort_tasks();
                    return Err(CopilotError::Io(e));
                }
                Err(_) => {
                    log::warn!("Copilot CLI did not exit within {grace:?}; killing it");
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                }
            }
        }

        self.abort_tasks();
        Ok(())
    }

    /// Kill the CLI immediately
    ///
    /// # Errors
    /// Returns error if the kill signal cannot be delivered
    pub(super) async fn kill_impl(&mut self) -> Result<()> {
        self.stdin.take();
        if let Some(mut child) = self.process.take() {
            if let Ok(Some(_)) = child.try_wait() {
                // Already exited
            } else {
                child.kill().await?;
            }
        }
        self.abort_tasks();
        Ok(())
    }

    fn abort_tasks(&mut self) {
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if let Some(task) = self.stdout_task.take() {
            task.abort();
        }
    }

    /// Handle Drop cleanup
    pub(super) fn drop_impl(&mut self) {
        self.abort_tasks();
        if let Some(mut child) = self.process.take() {
            let _ = child.start_kill();
        }
    }
}

/// Forward a child stream to the log line by line
fn forward_lines<R>(label: &'static str, stream: R) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log::debug!("[CLI {label}] {line}");
        }
    })
}
