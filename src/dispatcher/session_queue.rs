//! Per-session subscriber list, error policy and idle waiters

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{CopilotError, Result};
use crate::types::events::{
    AssistantMessageData, EventErrorHandler, EventErrorPolicy, EventHandler, SessionEvent,
    SessionEventKind,
};
use crate::types::identifiers::SessionId;

/// Outcome delivered to an idle waiter
pub type IdleOutcome = Result<Option<AssistantMessageData>>;

struct IdleWaiter {
    id: u64,
    last_message: Option<AssistantMessageData>,
    tx: oneshot::Sender<IdleOutcome>,
}

/// Event state of one session
///
/// Mutated under narrow locks; subscribers are invoked on a snapshot of the
/// list so a subscriber may subscribe or unsubscribe without deadlocking.
pub struct SessionEventState {
    session_id: SessionId,
    subscribers: RwLock<Vec<(u64, EventHandler)>>,
    policy: RwLock<EventErrorPolicy>,
    error_handler: RwLock<Option<EventErrorHandler>>,
    waiters: Mutex<Vec<IdleWaiter>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SessionEventState {
    pub(crate) fn new(
        session_id: SessionId,
        policy: EventErrorPolicy,
        error_handler: Option<EventErrorHandler>,
    ) -> Self {
        Self {
            session_id,
            subscribers: RwLock::new(Vec::new()),
            policy: RwLock::new(policy),
            error_handler: RwLock::new(error_handler),
            waiters: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Session these events belong to
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Append a subscriber; returns its id
    pub fn subscribe(&self, handler: EventHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push((id, handler));
        id
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    /// Number of subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Current error policy
    #[must_use]
    pub fn policy(&self) -> EventErrorPolicy {
        *self.policy.read()
    }

    /// Replace the error policy
    pub fn set_policy(&self, policy: EventErrorPolicy) {
        *self.policy.write() = policy;
    }

    /// Replace or clear the custom error handler
    pub fn set_error_handler(&self, handler: Option<EventErrorHandler>) {
        *self.error_handler.write() = handler;
    }

    /// Whether the session was closed locally
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Idle waiters
    // ========================================================================

    /// Register a one-shot waiter resolved by the next `session.idle`
    ///
    /// # Errors
    /// Returns `SessionClosed` if the session is closed
    pub fn add_waiter(&self) -> Result<(u64, oneshot::Receiver<IdleOutcome>)> {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut waiters = self.waiters.lock();
        // Checked under the lock so close() cannot miss this waiter.
        if self.is_closed() {
            return Err(CopilotError::session_closed(self.session_id.as_str()));
        }
        waiters.push(IdleWaiter {
            id,
            last_message: None,
            tx,
        });
        Ok((id, rx))
    }

    /// Drop a waiter that is no longer awaited
    pub fn remove_waiter(&self, id: u64) -> bool {
        let mut waiters = self.waiters.lock();
        let before = waiters.len();
        waiters.retain(|w| w.id != id);
        waiters.len() != before
    }

    /// Number of outstanding waiters
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Fail every outstanding waiter
    pub fn fail_waiters(&self, make_error: impl Fn() -> CopilotError) {
        let drained: Vec<IdleWaiter> = self.waiters.lock().drain(..).collect();
        for waiter in drained {
            let _ = waiter.tx.send(Err(make_error()));
        }
    }

    pub(crate) fn close(&self) {
        let drained: Vec<IdleWaiter> = {
            let mut waiters = self.waiters.lock();
            self.closed.store(true, Ordering::SeqCst);
            waiters.drain(..).collect()
        };
        self.subscribers.write().clear();
        for waiter in drained {
            let _ = waiter
                .tx
                .send(Err(CopilotError::session_closed(self.session_id.as_str())));
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Deliver one event to the subscribers, then settle waiters
    pub(crate) fn deliver(&self, event: &SessionEvent) {
        if self.is_closed() {
            return;
        }
        self.notify_subscribers(event);
        self.settle_waiters(event);
    }

    fn notify_subscribers(&self, event: &SessionEvent) {
        let subscribers: Vec<EventHandler> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        if subscribers.is_empty() {
            return;
        }
        let policy = self.policy();
        let error_handler = self.error_handler.read().clone();

        for handler in subscribers {
            let Err(error) = call_guarded(|| handler(event)) else {
                continue;
            };

            if let Some(ref on_error) = error_handler
                && let Err(secondary) = call_guarded(|| on_error(event, &error))
            {
                log::error!(
                    "Event error handler failed on '{}' in session {}: {secondary} (subscriber error: {error})",
                    event.event_type,
                    self.session_id
                );
                return;
            }

            match policy {
                EventErrorPolicy::PropagateAndLogErrors => {
                    log::warn!(
                        "Subscriber failed on '{}' in session {}: {error}; skipping remaining subscribers",
                        event.event_type,
                        self.session_id
                    );
                    return;
                }
                EventErrorPolicy::SuppressAndLogErrors => {
                    log::warn!(
                        "Subscriber failed on '{}' in session {}: {error}",
                        event.event_type,
                        self.session_id
                    );
                }
            }
        }
    }

    fn settle_waiters(&self, event: &SessionEvent) {
        match &event.kind {
            SessionEventKind::AssistantMessage(data) => {
                for waiter in self.waiters.lock().iter_mut() {
                    waiter.last_message = Some(data.clone());
                }
            }
            SessionEventKind::SessionIdle(_) => {
                let drained: Vec<IdleWaiter> = self.waiters.lock().drain(..).collect();
                for waiter in drained {
                    let _ = waiter.tx.send(Ok(waiter.last_message));
                }
            }
            SessionEventKind::SessionError(data) => {
                let message = data
                    .message
                    .clone()
                    .unwrap_or_else(|| "session error".to_string());
                self.fail_waiters(|| CopilotError::session(message.clone()));
            }
            _ => {}
        }
    }
}

impl std::fmt::Debug for SessionEventState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventState")
            .field("session_id", &self.session_id)
            .field("subscribers", &self.subscriber_count())
            .field("policy", &self.policy())
            .field("waiters", &self.waiter_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Run a synchronous callback, turning a panic into a handler error
fn call_guarded(f: impl FnOnce() -> Result<()>) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic) => Err(CopilotError::from_panic(panic.as_ref())),
    }
}

// ============================================================================
// Serial queue
// ============================================================================

/// Serial delivery queue of one session
///
/// Events are delivered one at a time in arrival order on a dedicated task;
/// the next event waits until every subscriber has seen the current one.
pub(crate) struct SessionQueue {
    state: Arc<SessionEventState>,
    tx: mpsc::UnboundedSender<SessionEvent>,
    worker: JoinHandle<()>,
}

impl SessionQueue {
    /// Start the delivery task; must be called inside a Tokio runtime
    pub(crate) fn spawn(state: Arc<SessionEventState>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SessionEvent>();
        let worker_state = state.clone();
        let worker = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                worker_state.deliver(&event);
            }
        });
        Self { state, tx, worker }
    }

    pub(crate) fn state(&self) -> &Arc<SessionEventState> {
        &self.state
    }

    /// Enqueue without waiting for delivery
    pub(crate) fn push(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Dropping event for session {}: queue closed", self.state.session_id);
        }
    }

    /// Close the state and stop the worker
    pub(crate) fn shutdown(self) {
        self.state.close();
        drop(self.tx);
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> SessionEventState {
        SessionEventState::new(SessionId::new("s1"), EventErrorPolicy::default(), None)
    }

    fn idle() -> SessionEvent {
        SessionEvent::new("session.idle", SessionEventKind::SessionIdle(json!({})))
    }

    fn message(content: &str) -> SessionEvent {
        SessionEvent::new(
            "assistant.message",
            SessionEventKind::AssistantMessage(AssistantMessageData {
                content: Some(content.to_string()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn removed_waiter_is_not_resolved_by_late_idle() {
        let state = state();
        let (stale, mut stale_rx) = state.add_waiter().unwrap();
        let (_live, mut live_rx) = state.add_waiter().unwrap();
        assert_eq!(state.waiter_count(), 2);

        assert!(state.remove_waiter(stale));
        assert!(!state.remove_waiter(stale));
        assert_eq!(state.waiter_count(), 1);
        // The sender went away with the entry.
        assert!(matches!(
            stale_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));

        state.deliver(&message("late"));
        state.deliver(&idle());
        assert_eq!(state.waiter_count(), 0);
        let outcome = live_rx.try_recv().unwrap().unwrap().unwrap();
        assert_eq!(outcome.content.as_deref(), Some("late"));
    }

    #[test]
    fn idle_with_no_waiters_is_a_no_op() {
        let state = state();
        state.deliver(&idle());
        assert_eq!(state.waiter_count(), 0);

        let (_, mut rx) = state.add_waiter().unwrap();
        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)));
    }

    #[test]
    fn session_error_fails_waiters() {
        let state = state();
        let (_, mut rx) = state.add_waiter().unwrap();
        let error = SessionEvent::from_value(json!({
            "type": "session.error",
            "data": {"errorType": "model", "message": "quota"}
        }))
        .unwrap();
        state.deliver(&error);

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, CopilotError::Session(ref m) if m == "quota"));
        assert_eq!(state.waiter_count(), 0);
    }

    #[test]
    fn closed_state_rejects_new_waiters() {
        let state = state();
        let (_, mut rx) = state.add_waiter().unwrap();
        state.close();
        assert!(state.is_closed());
        assert!(matches!(
            rx.try_recv().unwrap(),
            Err(CopilotError::SessionClosed(_))
        ));
        assert!(state.add_waiter().is_err());
    }
}
