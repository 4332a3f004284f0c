//! `CopilotSession`, a handle bound to one conversation
//!
//! Sessions are created through [`crate::CopilotClient::create_session`] or
//! [`crate::CopilotClient::resume_session`]. Closing a handle only releases
//! local state; deleting the conversation on the CLI is
//! [`crate::CopilotClient::delete_session`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;

use crate::client::ClientInner;
use crate::dispatcher::SessionEventState;
use crate::error::{CopilotError, Result};
use crate::types::events::{
    AssistantMessageData, EventErrorHandler, EventErrorPolicy, EventHandler, SessionEvent,
};
use crate::types::identifiers::SessionId;
use crate::types::responses::{GetMessagesResponse, SendMessageResponse};
use crate::types::session_config::MessageOptions;

/// Handle to one session
///
/// Clones share subscribers and waiters.
#[derive(Clone)]
pub struct CopilotSession {
    session_id: SessionId,
    workspace_path: Option<PathBuf>,
    client: Arc<ClientInner>,
    events: Arc<SessionEventState>,
}

impl CopilotSession {
    pub(crate) fn new(
        session_id: SessionId,
        workspace_path: Option<PathBuf>,
        client: Arc<ClientInner>,
        events: Arc<SessionEventState>,
    ) -> Self {
        Self {
            session_id,
            workspace_path,
            client,
            events,
        }
    }

    /// Session id
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Workspace directory of an infinite session, if the CLI reported one
    #[must_use]
    pub fn workspace_path(&self) -> Option<&Path> {
        self.workspace_path.as_deref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.events.is_closed() {
            Err(CopilotError::session_closed(self.session_id.as_str()))
        } else {
            Ok(())
        }
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Send a message; returns the message id assigned by the CLI
    ///
    /// Returns once the CLI accepted the message. Progress arrives as events.
    ///
    /// # Errors
    /// Returns `SessionClosed` after [`CopilotSession::close`], or the error of
    /// `session.send`
    pub async fn send(&self, message: impl Into<MessageOptions>) -> Result<String> {
        self.ensure_open()?;
        let mut params = serde_json::to_value(message.into())?;
        params["sessionId"] = json!(self.session_id);
        let response: SendMessageResponse = self.client.call("session.send", params).await?;
        Ok(response.message_id.unwrap_or_default())
    }

    /// Send a message and wait until the session is idle
    ///
    /// Resolves with the last assistant message of the turn. The waiter is
    /// registered before the message is sent, so a fast turn cannot be missed.
    /// On timeout the turn keeps running on the CLI; call
    /// [`CopilotSession::abort`] to stop it.
    ///
    /// # Errors
    /// - `Timeout` if the session does not become idle in time
    /// - `Session` if the CLI reports `session.error`
    /// - `ConnectionLost` if the connection drops while waiting
    pub async fn send_and_wait(
        &self,
        message: impl Into<MessageOptions>,
        timeout: Option<Duration>,
    ) -> Result<Option<AssistantMessageData>> {
        self.ensure_open()?;
        let limit = timeout.unwrap_or(self.client.options.send_and_wait_timeout);
        let (waiter, rx) = self.events.add_waiter()?;

        let turn = async {
            self.send(message).await?;
            rx.await
                .unwrap_or_else(|_| Err(CopilotError::session_closed(self.session_id.as_str())))
        };

        match tokio::time::timeout(limit, turn).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                self.events.remove_waiter(waiter);
                Err(e)
            }
            Err(_) => {
                self.events.remove_waiter(waiter);
                Err(CopilotError::timeout(format!(
                    "session {} did not become idle within {limit:?}",
                    self.session_id
                )))
            }
        }
    }

    /// Abort the turn in progress
    ///
    /// # Errors
    /// Returns the error of `session.abort`
    pub async fn abort(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .request("session.abort", json!({ "sessionId": self.session_id }))
            .await?;
        Ok(())
    }

    /// Full event history of the session
    ///
    /// # Errors
    /// Returns the error of `session.getMessages`
    pub async fn get_messages(&self) -> Result<Vec<SessionEvent>> {
        self.ensure_open()?;
        let response: GetMessagesResponse = self
            .client
            .call("session.getMessages", json!({ "sessionId": self.session_id }))
            .await?;
        Ok(response.events)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Subscribe to this session's events
    ///
    /// Subscribers run in registration order, one event at a time.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session is closed
    pub fn on<F>(&self, handler: F) -> Result<Subscription>
    where
        F: Fn(&SessionEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let handler: EventHandler = Arc::new(handler);
        let id = self.events.subscribe(handler);
        Ok(Subscription {
            id,
            events: Arc::downgrade(&self.events),
        })
    }

    /// Subscribe to events of one wire `type`, such as `"assistant.message"`
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session is closed
    pub fn on_type<F>(&self, event_type: impl Into<String>, handler: F) -> Result<Subscription>
    where
        F: Fn(&SessionEvent) -> Result<()> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        self.on(move |event| {
            if event.event_type == event_type {
                handler(event)
            } else {
                Ok(())
            }
        })
    }

    /// Events as a stream; the subscription ends when the stream is dropped
    ///
    /// The stream finishes when the session is closed.
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session is closed
    pub fn events(&self) -> Result<impl Stream<Item = SessionEvent> + Send + 'static> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.on(move |event| {
            let _ = tx.send(event.clone());
            Ok(())
        })?;
        let guard = UnsubscribeOnDrop(subscription);

        Ok(async_stream::stream! {
            let _guard = guard;
            while let Some(event) = rx.recv().await {
                yield event;
            }
        })
    }

    /// Error policy for failing subscribers
    pub fn set_event_error_policy(&self, policy: EventErrorPolicy) {
        self.events.set_policy(policy);
    }

    /// Current error policy
    #[must_use]
    pub fn event_error_policy(&self) -> EventErrorPolicy {
        self.events.policy()
    }

    /// Install a handler called with every subscriber failure
    pub fn set_event_error_handler<F>(&self, handler: F)
    where
        F: Fn(&SessionEvent, &CopilotError) -> Result<()> + Send + Sync + 'static,
    {
        let handler: EventErrorHandler = Arc::new(handler);
        self.events.set_error_handler(Some(handler));
    }

    /// Remove the custom error handler
    pub fn clear_event_error_handler(&self) {
        self.events.set_error_handler(None);
    }

    // ========================================================================
    // Close
    // ========================================================================

    /// Release local handlers and subscribers
    ///
    /// Idempotent. The session is not deleted on the CLI and can be resumed.
    /// Outstanding `send_and_wait` calls fail with `SessionClosed`.
    pub fn close(&self) {
        if self.events.is_closed() {
            return;
        }
        if self.client.dispatcher.close_state(&self.events) {
            self.client.router.unregister(self.session_id.as_str());
        }
        log::debug!("Closed session {}", self.session_id);
    }

    /// Whether the handle was closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

impl std::fmt::Debug for CopilotSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotSession")
            .field("session_id", &self.session_id)
            .field("workspace_path", &self.workspace_path)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Handle to one event subscription
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    events: Weak<SessionEventState>,
}

impl Subscription {
    /// Subscription id
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop receiving events; returns `false` if already removed
    pub fn unsubscribe(&self) -> bool {
        self.events
            .upgrade()
            .is_some_and(|events| events.unsubscribe(self.id))
    }
}

struct UnsubscribeOnDrop(Subscription);

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        self.0.unsubscribe();
    }
}
