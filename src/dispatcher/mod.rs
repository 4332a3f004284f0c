//! Event dispatcher for `session.event` and `session.lifecycle` notifications
//!
//! Each open session has a serial queue: events for one session reach its
//! subscribers strictly in arrival order, while different sessions are
//! delivered concurrently. The read loop only enqueues, so a slow subscriber
//! never stalls response correlation.
//!
//! Subscriber failures are isolated according to the session's
//! [`EventErrorPolicy`]:
//!
//! - `PropagateAndLogErrors` (default): log, skip the remaining subscribers
//!   for this event, continue with the next event
//! - `SuppressAndLogErrors`: log, keep delivering this event
//!
//! A custom [`EventErrorHandler`] sees every failure first. If it fails too,
//! delivery of that event stops regardless of policy.

mod lifecycle;
mod session_queue;

pub use session_queue::{IdleOutcome, SessionEventState};

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CopilotError;
use crate::types::events::{EventErrorHandler, EventErrorPolicy, SessionEvent};
use crate::types::identifiers::SessionId;
use crate::types::lifecycle::{LifecycleHandler, SessionLifecycleEvent};

use lifecycle::LifecycleDispatcher;
use session_queue::SessionQueue;

/// Fans notifications out to per-session and client-level subscribers
#[derive(Default)]
pub struct EventDispatcher {
    sessions: RwLock<HashMap<SessionId, SessionQueue>>,
    lifecycle: LifecycleDispatcher,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the event state of a session and start its queue
    ///
    /// Opening an id that is already open closes the previous state first.
    /// Must be called inside a Tokio runtime.
    pub fn open(
        &self,
        session_id: SessionId,
        policy: EventErrorPolicy,
        error_handler: Option<EventErrorHandler>,
    ) -> Arc<SessionEventState> {
        let state = Arc::new(SessionEventState::new(
            session_id.clone(),
            policy,
            error_handler,
        ));
        let previous = self
            .sessions
            .write()
            .insert(session_id, SessionQueue::spawn(state.clone()));
        if let Some(previous) = previous {
            previous.shutdown();
        }
        state
    }

    /// Close a session: subscribers are dropped and waiters fail with `SessionClosed`
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().remove(session_id);
        match removed {
            Some(queue) => {
                queue.shutdown();
                true
            }
            None => false,
        }
    }

    /// Close `state` only if it is still the registered state of its session
    pub(crate) fn close_state(&self, state: &Arc<SessionEventState>) -> bool {
        let mut sessions = self.sessions.write();
        let current = sessions
            .get(state.session_id().as_str())
            .is_some_and(|queue| Arc::ptr_eq(queue.state(), state));
        let removed = if current {
            sessions.remove(state.session_id().as_str())
        } else {
            None
        };
        drop(sessions);

        match removed {
            Some(queue) => queue.shutdown(),
            None => state.close(),
        }
        current
    }

    /// Event state of an open session
    #[must_use]
    pub fn state(&self, session_id: &str) -> Option<Arc<SessionEventState>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|queue| queue.state().clone())
    }

    /// Whether a session is open
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// Enqueue an event for its session; events for unknown sessions are dropped
    pub fn dispatch(&self, session_id: &str, event: SessionEvent) {
        match self.sessions.read().get(session_id) {
            Some(queue) => queue.push(event),
            None => log::debug!(
                "Dropping '{}' for unknown session {session_id}",
                event.event_type
            ),
        }
    }

    /// Fail the idle waiters of every session
    pub fn fail_waiters(&self, make_error: impl Fn() -> CopilotError) {
        let states: Vec<Arc<SessionEventState>> = self
            .sessions
            .read()
            .values()
            .map(|queue| queue.state().clone())
            .collect();
        for state in states {
            state.fail_waiters(&make_error);
        }
    }

    /// Close every session
    pub fn close_all(&self) {
        let drained: Vec<SessionQueue> = self.sessions.write().drain().map(|(_, q)| q).collect();
        for queue in drained {
            queue.shutdown();
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribe to lifecycle notifications; returns the subscription id
    pub fn on_lifecycle(&self, handler: LifecycleHandler) -> u64 {
        self.lifecycle.subscribe(None, handler)
    }

    /// Subscribe to lifecycle notifications of one `type` only
    pub fn on_lifecycle_type(&self, event_type: String, handler: LifecycleHandler) -> u64 {
        self.lifecycle.subscribe(Some(event_type), handler)
    }

    /// Remove a lifecycle subscription
    pub fn off_lifecycle(&self, id: u64) -> bool {
        self.lifecycle.unsubscribe(id)
    }

    /// Enqueue a lifecycle notification
    pub fn dispatch_lifecycle(&self, event: SessionLifecycleEvent) {
        self.lifecycle.dispatch(event);
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sessions", &self.sessions.read().len())
            .field("lifecycle_subscribers", &self.lifecycle.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::events::{AssistantMessageData, SessionEventKind};
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    fn message(text: &str) -> SessionEvent {
        SessionEvent::new(
            "assistant.message",
            SessionEventKind::AssistantMessage(AssistantMessageData {
                content: Some(text.to_string()),
                ..Default::default()
            }),
        )
    }

    fn idle() -> SessionEvent {
        SessionEvent::new("session.idle", SessionEventKind::SessionIdle(json!({})))
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let dispatcher = EventDispatcher::new();
        let state = dispatcher.open(SessionId::new("s"), EventErrorPolicy::default(), None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        state.subscribe(Arc::new(move |event: &SessionEvent| -> crate::Result<()> {
            if let Some(data) = event.as_assistant_message() {
                sink.lock().unwrap().push(data.content.clone().unwrap_or_default());
            }
            Ok(())
        }));

        let (_, rx) = state.add_waiter().unwrap();
        for i in 0..20 {
            dispatcher.dispatch("s", message(&i.to_string()));
        }
        dispatcher.dispatch("s", idle());

        let last = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(last.and_then(|m| m.content).as_deref(), Some("19"));
        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn close_fails_waiters() {
        let dispatcher = EventDispatcher::new();
        let state = dispatcher.open(SessionId::new("s"), EventErrorPolicy::default(), None);
        let (_, rx) = state.add_waiter().unwrap();

        assert!(dispatcher.close("s"));
        assert!(matches!(rx.await.unwrap(), Err(CopilotError::SessionClosed(_))));
        assert!(state.is_closed());
        assert!(state.add_waiter().is_err());
        assert!(!dispatcher.close("s"));
    }

    #[tokio::test]
    async fn reopening_replaces_state() {
        let dispatcher = EventDispatcher::new();
        let first = dispatcher.open(SessionId::new("s"), EventErrorPolicy::default(), None);
        let second = dispatcher.open(SessionId::new("s"), EventErrorPolicy::default(), None);
        assert!(first.is_closed());
        assert!(!second.is_closed());

        // Closing the stale state leaves the live one registered
        assert!(!dispatcher.close_state(&first));
        assert!(dispatcher.contains("s"));
        assert!(dispatcher.close_state(&second));
        assert!(!dispatcher.contains("s"));
    }
}
