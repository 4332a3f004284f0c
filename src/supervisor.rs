//! Connection lifecycle: start, stop, crash detection and auto-restart
//!
//! The supervisor owns the [`Transport`] and the current [`RpcConnection`].
//! Every established connection gets a monitor task that notices when its read
//! loop ends; if that happens while the client is running, the pending table
//! has already been failed with `ConnectionLost` and the supervisor either
//! reconnects or moves to [`ConnectionState::Error`].
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected
//!       ▲                    │  ▲                │
//!       │                  fail └──── crash ─────┤ (auto_restart)
//!       │                    ▼                   │
//!       └────── stop ───── Error ◀── crash ──────┘ (no restart / exhausted)
//! ```

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{CopilotError, Result};
use crate::rpc::{InboundSink, RpcConnection};
use crate::transport::{Framing, JsonRpcCodec, Transport};
use crate::types::options::ClientOptions;
use crate::types::responses::PingResponse;

/// Capacity of the state transition channel
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not started, or stopped
    Disconnected,
    /// Starting or restarting
    Connecting,
    /// Connection established and verified
    Connected,
    /// Start or restart failed; terminal until `start()` is called again
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Subset of [`ClientOptions`] the supervisor needs
#[derive(Debug, Clone)]
pub(crate) struct SupervisorConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Option<Duration>,
    pub stop_timeout: Duration,
    pub auto_restart: bool,
    pub max_restart_attempts: u32,
    pub restart_backoff: Duration,
    pub framing: Framing,
    pub max_frame_size: usize,
    pub verify_protocol_version: bool,
}

impl From<&ClientOptions> for SupervisorConfig {
    fn from(options: &ClientOptions) -> Self {
        Self {
            connect_timeout: options.connect_timeout,
            request_timeout: options.request_timeout,
            stop_timeout: options.stop_timeout,
            auto_restart: options.auto_restart,
            max_restart_attempts: options.max_restart_attempts,
            restart_backoff: options.restart_backoff,
            framing: options.framing,
            max_frame_size: options.max_frame_size,
            verify_protocol_version: options.verify_protocol_version,
        }
    }
}

/// Produces a live connection on demand and keeps it alive
pub struct Supervisor {
    config: SupervisorConfig,
    transport: tokio::sync::Mutex<Box<dyn Transport>>,
    connection: RwLock<Option<Arc<RpcConnection>>>,
    sink: Arc<dyn InboundSink>,
    state: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
    /// Cancelled by `stop()`; replaced by `start()`
    run_token: Mutex<CancellationToken>,
    /// Serializes start, stop and restart
    lifecycle: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    restarts: AtomicU32,
    protocol_version: Mutex<Option<u32>>,
}

impl Supervisor {
    /// Create a supervisor in the `Disconnected` state
    pub(crate) fn new(
        config: SupervisorConfig,
        transport: Box<dyn Transport>,
        sink: Arc<dyn InboundSink>,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let run_token = CancellationToken::new();
        run_token.cancel();

        Arc::new(Self {
            config,
            transport: tokio::sync::Mutex::new(transport),
            connection: RwLock::new(None),
            sink,
            state,
            transitions,
            run_token: Mutex::new(run_token),
            lifecycle: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            restarts: AtomicU32::new(0),
            protocol_version: Mutex::new(None),
        })
    }

    // ========================================================================
    // Observation
    // ========================================================================

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition in order
    #[must_use]
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }

    /// Completed automatic restarts
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Protocol version reported by the server on the current connection
    #[must_use]
    pub fn protocol_version(&self) -> Option<u32> {
        *self.protocol_version.lock()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            log::debug!("Connection state {previous} -> {next}");
            let _ = self.transitions.send(next);
        }
    }

    fn run_token(&self) -> CancellationToken {
        self.run_token.lock().clone()
    }

    // ========================================================================
    // Start / Stop
    // ========================================================================

    /// Establish the connection
    ///
    /// A no-op when already connected.
    ///
    /// # Errors
    /// Returns `ConnectionUnavailable` if the CLI cannot be spawned or reached
    /// within the connect timeout, or `ProtocolVersionMismatch`
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        *self.run_token.lock() = CancellationToken::new();
        self.set_state(ConnectionState::Connecting);

        match self.establish().await {
            Ok(connection) => {
                self.install(connection);
                self.set_state(ConnectionState::Connected);
                log::info!("Connected to Copilot CLI");
                Ok(())
            }
            Err(e) => {
                self.run_token().cancel();
                self.kill_transport().await;
                self.set_state(ConnectionState::Error);
                Err(e)
            }
        }
    }

    /// Close the connection, give the CLI `stop_timeout` to exit, then kill it
    ///
    /// Pending requests fail with `ClientStopped`.
    ///
    /// # Errors
    /// Returns error if the process could not be reaped
    pub async fn stop(&self) -> Result<()> {
        self.run_token().cancel();
        let _guard = self.lifecycle.lock().await;
        self.close_connection().await;

        let grace = self.config.stop_timeout;
        let result = self.transport.lock().await.shutdown(grace).await;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    /// Close the connection and kill the CLI immediately
    ///
    /// # Errors
    /// Returns error if the process could not be killed
    pub async fn force_stop(&self) -> Result<()> {
        self.run_token().cancel();
        let _guard = self.lifecycle.lock().await;
        self.close_connection().await;

        let result = self.transport.lock().await.kill().await;
        self.set_state(ConnectionState::Disconnected);
        result
    }

    async fn close_connection(&self) {
        let connection = self.connection.write().take();
        if let Some(connection) = connection {
            let failed = connection.fail_pending(|| CopilotError::ClientStopped);
            connection.close().await;
            // Requests registered while closing
            let failed = failed + connection.fail_pending(|| CopilotError::ClientStopped);
            if failed > 0 {
                log::debug!("Failed {failed} pending request(s) on stop");
            }
        }
    }

    /// The live connection, waiting out a start or restart in progress
    ///
    /// # Errors
    /// Returns `NotConnected` when stopped or failed, or `ConnectionUnavailable`
    /// if no connection appears within the connect timeout
    pub async fn connection(&self) -> Result<Arc<RpcConnection>> {
        let mut rx = self.state.subscribe();
        let deadline = tokio::time::Instant::now() + self.config.connect_timeout;
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Connected => {
                    if let Some(connection) = self.connection.read().clone() {
                        return Ok(connection);
                    }
                }
                ConnectionState::Connecting => {}
                ConnectionState::Disconnected => {
                    return Err(CopilotError::not_connected("client is not started"));
                }
                ConnectionState::Error => {
                    return Err(CopilotError::not_connected(
                        "connection failed; call start() to reconnect",
                    ));
                }
            }

            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(CopilotError::ClientStopped),
                Err(_) => {
                    return Err(CopilotError::connection_unavailable(format!(
                        "no connection within {:?}",
                        self.config.connect_timeout
                    )));
                }
            }
        }
    }

    // ========================================================================
    // Connection setup
    // ========================================================================

    async fn establish(&self) -> Result<Arc<RpcConnection>> {
        let limit = self.config.connect_timeout;
        let streams = {
            let mut transport = self.transport.lock().await;
            let target = transport.describe();
            log::debug!("Connecting via {target}");
            match tokio::time::timeout(limit, transport.connect()).await {
                Ok(streams) => streams?,
                Err(_) => {
                    return Err(CopilotError::connection_unavailable(format!(
                        "{target} not reachable within {limit:?}"
                    )));
                }
            }
        };

        let codec = JsonRpcCodec::new(self.config.framing, self.config.max_frame_size);
        let connection = RpcConnection::spawn(
            streams,
            codec,
            self.sink.clone(),
            self.config.request_timeout,
        );

        if self.config.verify_protocol_version
            && let Err(e) = self.verify_protocol_version(&connection).await
        {
            connection.close().await;
            return Err(e);
        }
        Ok(connection)
    }

    async fn verify_protocol_version(&self, connection: &RpcConnection) -> Result<()> {
        let limit = self.config.connect_timeout;
        let result = connection
            .request_with_timeout("ping", json!({ "message": null }), Some(limit))
            .await
            .map_err(|e| match e {
                CopilotError::Timeout(_) => CopilotError::connection_unavailable(format!(
                    "protocol handshake did not complete within {limit:?}"
                )),
                other => other,
            })?;
        let ping: PingResponse = serde_json::from_value(result)
            .map_err(|e| CopilotError::protocol(format!("unexpected ping result: {e}")))?;

        match ping.protocol_version {
            Some(version) if version == crate::SDK_PROTOCOL_VERSION => {
                *self.protocol_version.lock() = Some(version);
                Ok(())
            }
            Some(version) => Err(CopilotError::ProtocolVersionMismatch {
                expected: crate::SDK_PROTOCOL_VERSION,
                actual: version.to_string(),
            }),
            None => Err(CopilotError::ProtocolVersionMismatch {
                expected: crate::SDK_PROTOCOL_VERSION,
                actual: "none reported".to_string(),
            }),
        }
    }

    fn install(self: &Arc<Self>, connection: Arc<RpcConnection>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = connection.close_signal();
        *self.connection.write() = Some(connection);

        let weak = Arc::downgrade(self);
        let run_token = self.run_token();
        tokio::spawn(monitor(weak, generation, closed, run_token));
    }

    async fn kill_transport(&self) {
        if let Err(e) = self.transport.lock().await.kill().await {
            log::debug!("Error killing transport: {e}");
        }
    }

    // ========================================================================
    // Crash handling
    // ========================================================================

    async fn on_connection_lost(self: Arc<Self>, generation: u64, run_token: CancellationToken) {
        {
            let mut current = self.connection.write();
            if current.as_ref().is_some_and(|c| c.is_closed()) {
                *current = None;
            }
        }
        log::warn!("Connection to Copilot CLI lost");
        self.sink.on_connection_lost();

        // stop() cancels the token before taking the lock, so any state set
        // below lands before its Disconnected.
        let _guard = self.lifecycle.lock().await;
        if run_token.is_cancelled() || self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        if !self.config.auto_restart {
            self.kill_transport().await;
            self.set_state(ConnectionState::Error);
            return;
        }

        self.set_state(ConnectionState::Connecting);

        let max = self.config.max_restart_attempts;
        for attempt in 1..=max {
            log::warn!("Restarting Copilot CLI (attempt {attempt}/{max})");
            let outcome = tokio::select! {
                () = run_token.cancelled() => return,
                outcome = self.establish() => outcome,
            };
            match outcome {
                Ok(connection) => {
                    if run_token.is_cancelled() {
                        connection.close().await;
                        return;
                    }
                    self.install(connection);
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    self.set_state(ConnectionState::Connected);
                    log::info!("Reconnected to Copilot CLI after {attempt} attempt(s)");
                    return;
                }
                Err(e) => {
                    log::warn!("Restart attempt {attempt} failed: {e}");
                    self.kill_transport().await;
                }
            }

            if attempt < max {
                let backoff = self.config.restart_backoff * attempt;
                tokio::select! {
                    () = run_token.cancelled() => return,
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }

        log::error!("Copilot CLI could not be restarted after {max} attempt(s)");
        self.set_state(ConnectionState::Error);
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("restarts", &self.restart_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Wait for a connection's read loop to end and react if it was unexpected
async fn monitor(
    supervisor: Weak<Supervisor>,
    generation: u64,
    closed: CancellationToken,
    run_token: CancellationToken,
) {
    tokio::select! {
        () = closed.cancelled() => {}
        () = run_token.cancelled() => return,
    }
    if run_token.is_cancelled() {
        return;
    }
    let Some(supervisor) = supervisor.upgrade() else {
        return;
    };
    if supervisor.generation.load(Ordering::SeqCst) != generation {
        return;
    }
    supervisor.on_connection_lost(generation, run_token).await;
}
