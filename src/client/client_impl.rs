//! `CopilotClient` implementation
//!
//! This module contains the constructors and public API methods for `CopilotClient`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::tasks::ClientSink;
use super::{ClientInner, CopilotClient};
use crate::dispatcher::EventDispatcher;
use crate::error::{CopilotError, Result};
use crate::router::{CallbackRouter, SessionHandlers};
use crate::session::CopilotSession;
use crate::supervisor::{ConnectionState, Supervisor, SupervisorConfig};
use crate::transport::{SubprocessTransport, TcpTransport, Transport};
use crate::types::identifiers::SessionId;
use crate::types::lifecycle::{LifecycleHandler, SessionLifecycleEvent};
use crate::types::options::ClientOptions;
use crate::types::responses::{
    CreateSessionResponse, GetAuthStatusResponse, GetStatusResponse, ListModelsResponse,
    ListSessionsResponse, ModelInfo, PingResponse, SessionIdResponse, SessionMetadata,
    SuccessResponse,
};
use crate::types::session_config::SessionConfig;

impl CopilotClient {
    /// Create a client for the configured CLI
    ///
    /// Nothing is spawned or dialed until [`CopilotClient::start`] (or the
    /// first call, with `auto_start`).
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the options conflict
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let transport: Box<dyn Transport> = match options.cli_url.as_deref() {
            Some(url) => Box::new(TcpTransport::new(url, options.connect_timeout)?),
            None => Box::new(SubprocessTransport::from_options(&options)),
        };
        Ok(Self::with_transport(options, transport))
    }

    /// Create a client over a caller-supplied transport
    ///
    /// Process related options (`cli_path`, `cli_url`, `port`, ...) are
    /// ignored; everything else applies.
    #[must_use]
    pub fn with_transport(options: ClientOptions, transport: Box<dyn Transport>) -> Self {
        let router = Arc::new(CallbackRouter::new());
        let dispatcher = Arc::new(EventDispatcher::new());
        let models = Arc::new(Mutex::new(None));
        let sink = Arc::new(ClientSink {
            router: router.clone(),
            dispatcher: dispatcher.clone(),
            models: models.clone(),
        });
        let supervisor = Supervisor::new(SupervisorConfig::from(&options), transport, sink);

        Self {
            inner: Arc::new(ClientInner {
                options,
                supervisor,
                router,
                dispatcher,
                models,
            }),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connect to the CLI
    ///
    /// # Errors
    /// Returns `ConnectionUnavailable` if the CLI cannot be started or reached
    /// within the connect timeout, or `ProtocolVersionMismatch`
    pub async fn start(&self) -> Result<()> {
        self.inner.supervisor.start().await
    }

    /// Stop gracefully
    ///
    /// Pending calls fail with `ClientStopped`; local sessions are closed.
    ///
    /// # Errors
    /// Returns error if the CLI process could not be reaped
    pub async fn stop(&self) -> Result<()> {
        let result = self.inner.supervisor.stop().await;
        self.release_sessions();
        result
    }

    /// Stop immediately, killing the CLI process
    ///
    /// # Errors
    /// Returns error if the CLI process could not be killed
    pub async fn force_stop(&self) -> Result<()> {
        let result = self.inner.supervisor.force_stop().await;
        self.release_sessions();
        result
    }

    fn release_sessions(&self) {
        self.inner.models.lock().take();
        self.inner.dispatcher.fail_waiters(|| CopilotError::ClientStopped);
        self.inner.dispatcher.close_all();
        self.inner.router.clear();
    }

    /// Current connection state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.supervisor.state()
    }

    /// Observe every state transition in order
    #[must_use]
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.supervisor.state_changes()
    }

    /// Number of completed automatic restarts
    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.inner.supervisor.restart_count()
    }

    /// Protocol version negotiated on the current connection
    #[must_use]
    pub fn protocol_version(&self) -> Option<u32> {
        self.inner.supervisor.protocol_version()
    }

    /// Options this client was created with
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Create a session
    ///
    /// Tools, permission and user-input handlers and hooks in `config` are
    /// registered locally under the new session id; only their declarations
    /// are sent to the CLI.
    ///
    /// # Errors
    /// Returns the RPC error of `session.create` or a connection error
    pub async fn create_session(&self, config: SessionConfig) -> Result<CopilotSession> {
        let params = config.to_params(None)?;
        self.open_session("session.create", params, config.session_id.clone(), &config)
            .await
    }

    /// Resume an existing session
    ///
    /// # Errors
    /// Returns the RPC error of `session.resume` or a connection error
    pub async fn resume_session(
        &self,
        session_id: impl Into<SessionId>,
        config: SessionConfig,
    ) -> Result<CopilotSession> {
        let session_id = session_id.into();
        let params = config.to_params(Some(&session_id))?;
        self.open_session("session.resume", params, Some(session_id), &config)
            .await
    }

    async fn open_session(
        &self,
        method: &str,
        params: Value,
        known_id: Option<SessionId>,
        config: &SessionConfig,
    ) -> Result<CopilotSession> {
        let inner = &self.inner;
        let handlers = SessionHandlers::from_config(config);
        let open_events = |id: &SessionId| {
            inner.dispatcher.open(
                id.clone(),
                inner.options.event_error_policy,
                inner.options.event_error_handler.clone(),
            )
        };

        // With a known id, register first so reverse calls and events that
        // race the response already find the session.
        let preopened = known_id.map(|id| {
            inner.router.register(id.clone(), handlers.clone());
            let events = open_events(&id);
            (id, events)
        });

        let response: CreateSessionResponse = match inner.call(method, params).await {
            Ok(response) => response,
            Err(e) => {
                if let Some((id, events)) = preopened {
                    inner.router.unregister(id.as_str());
                    inner.dispatcher.close_state(&events);
                }
                return Err(e);
            }
        };

        let events = match preopened {
            Some((id, events)) if id == response.session_id => events,
            stale => {
                if let Some((id, events)) = stale {
                    inner.router.unregister(id.as_str());
                    inner.dispatcher.close_state(&events);
                }
                inner.router.register(response.session_id.clone(), handlers);
                open_events(&response.session_id)
            }
        };

        log::debug!("Opened session {} via {method}", response.session_id);
        Ok(CopilotSession::new(
            response.session_id,
            response.workspace_path,
            self.inner.clone(),
            events,
        ))
    }

    /// Delete a session on the CLI and release it locally
    ///
    /// # Errors
    /// Returns `Session` if the CLI reports failure
    pub async fn delete_session(&self, session_id: impl Into<SessionId>) -> Result<()> {
        let session_id = session_id.into();
        let response: SuccessResponse = self
            .inner
            .call("session.delete", json!({ "sessionId": session_id }))
            .await?;
        if !response.success {
            return Err(CopilotError::session(format!(
                "failed to delete session {session_id}: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )));
        }
        self.inner.router.unregister(session_id.as_str());
        self.inner.dispatcher.close(session_id.as_str());
        Ok(())
    }

    /// Sessions known to the CLI
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let response: ListSessionsResponse = self.inner.call("session.list", json!({})).await?;
        Ok(response.sessions)
    }

    /// Most recently updated session, if any
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn get_last_session_id(&self) -> Result<Option<SessionId>> {
        let response: SessionIdResponse =
            self.inner.call("session.getLastId", json!({})).await?;
        Ok(response.session_id)
    }

    /// Session shown in the CLI's terminal UI (server mode only)
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn get_foreground_session_id(&self) -> Result<Option<SessionId>> {
        let response: SessionIdResponse =
            self.inner.call("session.getForeground", json!({})).await?;
        Ok(response.session_id)
    }

    /// Bring a session to the CLI's terminal UI (server mode only)
    ///
    /// # Errors
    /// Returns `Session` if the CLI reports failure
    pub async fn set_foreground_session_id(&self, session_id: impl Into<SessionId>) -> Result<()> {
        let session_id = session_id.into();
        let response: SuccessResponse = self
            .inner
            .call("session.setForeground", json!({ "sessionId": session_id }))
            .await?;
        if response.success {
            Ok(())
        } else {
            Err(CopilotError::session(format!(
                "failed to set foreground session {session_id}: {}",
                response.error.as_deref().unwrap_or("unknown error")
            )))
        }
    }

    // ========================================================================
    // Server queries
    // ========================================================================

    /// Round-trip a message through the CLI
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn ping(&self, message: Option<&str>) -> Result<PingResponse> {
        self.inner.call("ping", json!({ "message": message })).await
    }

    /// CLI version and protocol version
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn get_status(&self) -> Result<GetStatusResponse> {
        self.inner.call("status.get", json!({})).await
    }

    /// Authentication state of the CLI
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn get_auth_status(&self) -> Result<GetAuthStatusResponse> {
        self.inner.call("auth.getStatus", json!({})).await
    }

    /// Models available to sessions; cached until the connection changes
    ///
    /// # Errors
    /// Returns error if the call fails
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        if let Some(models) = self.inner.models.lock().clone() {
            return Ok(models);
        }
        let response: ListModelsResponse = self.inner.call("models.list", json!({})).await?;
        *self.inner.models.lock() = Some(response.models.clone());
        Ok(response.models)
    }

    // ========================================================================
    // Lifecycle notifications
    // ========================================================================

    /// Subscribe to `session.lifecycle` notifications; returns a subscription id
    pub fn on_lifecycle<F>(&self, handler: F) -> u64
    where
        F: Fn(&SessionLifecycleEvent) -> Result<()> + Send + Sync + 'static,
    {
        let handler: LifecycleHandler = Arc::new(handler);
        self.inner.dispatcher.on_lifecycle(handler)
    }

    /// Subscribe to one lifecycle `type`, such as
    /// [`kinds::DELETED`](crate::types::lifecycle::kinds::DELETED)
    pub fn on_lifecycle_type<F>(&self, event_type: impl Into<String>, handler: F) -> u64
    where
        F: Fn(&SessionLifecycleEvent) -> Result<()> + Send + Sync + 'static,
    {
        let handler: LifecycleHandler = Arc::new(handler);
        self.inner
            .dispatcher
            .on_lifecycle_type(event_type.into(), handler)
    }

    /// Remove a lifecycle subscription
    pub fn off_lifecycle(&self, id: u64) -> bool {
        self.inner.dispatcher.off_lifecycle(id)
    }
}
