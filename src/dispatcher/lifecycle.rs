//! Client-level `session.lifecycle` fan-out

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::CopilotError;
use crate::types::lifecycle::{LifecycleHandler, SessionLifecycleEvent};

/// Subscriber id, optional `type` filter and callback
type Subscribers = Arc<RwLock<Vec<(u64, Option<String>, LifecycleHandler)>>>;

/// Lifecycle subscribers, served by their own serial queue
///
/// A failing subscriber is logged and does not stop the others.
#[derive(Default)]
pub(crate) struct LifecycleDispatcher {
    subscribers: Subscribers,
    next_id: AtomicU64,
    queue: Mutex<Option<mpsc::UnboundedSender<SessionLifecycleEvent>>>,
}

impl LifecycleDispatcher {
    /// Register a subscriber; with `event_type` set it only sees that type
    pub(crate) fn subscribe(&self, event_type: Option<String>, handler: LifecycleHandler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscribers.write().push((id, event_type, handler));
        id
    }

    pub(crate) fn unsubscribe(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _, _)| *sid != id);
        subscribers.len() != before
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Enqueue an event; the delivery task is started on first use
    pub(crate) fn dispatch(&self, event: SessionLifecycleEvent) {
        if self.subscribers.read().is_empty() {
            return;
        }
        let mut queue = self.queue.lock();
        let tx = queue.get_or_insert_with(|| spawn_worker(self.subscribers.clone()));
        if let Err(mpsc::error::SendError(event)) = tx.send(event) {
            // Worker gone (runtime restarted); start a fresh one.
            let tx = queue.insert(spawn_worker(self.subscribers.clone()));
            let _ = tx.send(event);
        }
    }
}

fn spawn_worker(subscribers: Subscribers) -> mpsc::UnboundedSender<SessionLifecycleEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<SessionLifecycleEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let snapshot: Vec<LifecycleHandler> = subscribers
                .read()
                .iter()
                .filter(|(_, filter, _)| filter.as_deref().is_none_or(|t| t == event.event_type))
                .map(|(_, _, h)| h.clone())
                .collect();
            for handler in snapshot {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(&event)))
                    .unwrap_or_else(|panic| Err(CopilotError::from_panic(panic.as_ref())));
                if let Err(e) = outcome {
                    log::warn!(
                        "Lifecycle subscriber failed on '{}' for session {}: {e}",
                        event.event_type,
                        event.session_id
                    );
                }
            }
        }
    });
    tx
}
