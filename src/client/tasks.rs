//! Inbound sink bridging the read loop to the router and dispatcher
//!
//! Reverse calls run on their own task and reply through the [`Responder`];
//! notifications are only parsed and enqueued. Nothing here blocks the read
//! loop.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::dispatcher::EventDispatcher;
use crate::error::CopilotError;
use crate::router::CallbackRouter;
use crate::rpc::{InboundRequest, InboundSink, Notification, Responder};
use crate::types::events::SessionEvent;
use crate::types::lifecycle::SessionLifecycleEvent;
use crate::types::responses::ModelInfo;

/// Notification carrying a session event
pub(crate) const SESSION_EVENT: &str = "session.event";

/// Notification carrying a session lifecycle change
pub(crate) const SESSION_LIFECYCLE: &str = "session.lifecycle";

/// Model list cached per connection
pub(crate) type ModelCache = Arc<Mutex<Option<Vec<ModelInfo>>>>;

pub(crate) struct ClientSink {
    pub(crate) router: Arc<CallbackRouter>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) models: ModelCache,
}

impl ClientSink {
    fn dispatch_session_event(&self, mut params: Value) {
        let Some(session_id) = params
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            log::warn!("Dropping {SESSION_EVENT} without sessionId");
            return;
        };
        let raw = params.get_mut("event").map(Value::take).unwrap_or(Value::Null);
        match SessionEvent::from_value(raw) {
            Ok(event) => self.dispatcher.dispatch(&session_id, event),
            Err(e) => log::warn!("Dropping malformed event for session {session_id}: {e}"),
        }
    }

    fn dispatch_lifecycle(&self, params: Value) {
        match serde_json::from_value::<SessionLifecycleEvent>(params) {
            Ok(event) => self.dispatcher.dispatch_lifecycle(event),
            Err(e) => log::warn!("Dropping malformed {SESSION_LIFECYCLE}: {e}"),
        }
    }
}

impl InboundSink for ClientSink {
    fn on_request(&self, request: InboundRequest, responder: Responder) {
        let router = self.router.clone();
        tokio::spawn(async move {
            let InboundRequest { id, method, params } = request;
            let sent = match router.handle(&method, params).await {
                Ok(result) => responder.respond(result).await,
                Err(error) => {
                    log::debug!("Answering '{method}' ({id}) with error {}", error.code);
                    responder.respond_error(error).await
                }
            };
            if let Err(e) = sent {
                log::debug!("Could not answer '{method}' ({id}): {e}");
            }
        });
    }

    fn on_notification(&self, notification: Notification) {
        match notification.method.as_str() {
            SESSION_EVENT => self.dispatch_session_event(notification.params),
            SESSION_LIFECYCLE => self.dispatch_lifecycle(notification.params),
            other => log::debug!("Ignoring notification '{other}'"),
        }
    }

    fn on_connection_lost(&self) {
        self.models.lock().take();
        self.dispatcher
            .fail_waiters(|| CopilotError::connection_lost("connection to Copilot CLI lost"));
    }
}
