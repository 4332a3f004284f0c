//! Pending request table

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::messages::Response;
use crate::error::{CopilotError, Result};

/// Receiving side of a pending request
pub type ResponseReceiver = oneshot::Receiver<Result<Value>>;

/// Request awaiting response
struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// Assigns request ids and matches responses to waiting callers
///
/// Every entry is removed exactly once, whichever of its outcomes lands first.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Correlator {
    /// Create an empty table; ids start at 1
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id and insert a pending entry for it
    pub fn register(&self, method: &str) -> (u64, ResponseReceiver) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    /// Resolve the entry matching `response`
    ///
    /// Returns `false` if no entry matches, in which case the response is
    /// unmatched noise.
    pub fn resolve(&self, response: Response) -> bool {
        let Some(id) = response.id.as_u64() else {
            return false;
        };
        let Some(pending) = self.pending.lock().remove(&id) else {
            return false;
        };
        let outcome = response.outcome.map_err(CopilotError::from);
        if let Err(ref e) = outcome {
            log::debug!("Request {id} ({}) failed: {e}", pending.method);
        }
        // The caller may have stopped listening; that is fine.
        let _ = pending.tx.send(outcome);
        true
    }

    /// Remove an entry without resolving it; a later response for `id` is
    /// then unmatched
    pub fn cancel(&self, id: u64) -> bool {
        self.pending.lock().remove(&id).is_some()
    }

    /// Fail every entry, returning how many were failed
    pub fn fail_all(&self, make_error: impl Fn() -> CopilotError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.pending.lock();
            pending.drain().map(|(_, p)| p).collect()
        };
        let count = drained.len();
        for pending in drained {
            let _ = pending.tx.send(Err(make_error()));
        }
        count
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is outstanding
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::messages::JsonRpcError;
    use crate::types::identifiers::RequestId;
    use serde_json::json;

    fn response(id: u64, outcome: std::result::Result<Value, JsonRpcError>) -> Response {
        Response {
            id: RequestId::Number(id),
            outcome,
        }
    }

    #[test]
    fn ids_are_monotonic_and_unique() {
        let correlator = Correlator::new();
        let (a, _ra) = correlator.register("ping");
        let (b, _rb) = correlator.register("ping");
        assert!(b > a);
        assert_eq!(correlator.len(), 2);
    }

    #[tokio::test]
    async fn resolves_matching_entry_once() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("status.get");

        assert!(correlator.resolve(response(id, Ok(json!({"version": "1"})))));
        assert!(!correlator.resolve(response(id, Ok(json!(null)))));
        assert_eq!(rx.await.unwrap().unwrap()["version"], "1");
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn error_outcome_keeps_code_and_data() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("session.send");
        let mut err = JsonRpcError::new(-32000, "busy");
        err.data = Some(json!({"retry": true}));
        correlator.resolve(response(id, Err(err)));

        match rx.await.unwrap() {
            Err(CopilotError::Rpc { code, data, .. }) => {
                assert_eq!(code, -32000);
                assert_eq!(data, Some(json!({"retry": true})));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn fail_all_drains_table() {
        let correlator = Correlator::new();
        let (_, r1) = correlator.register("a");
        let (_, r2) = correlator.register("b");

        assert_eq!(correlator.fail_all(|| CopilotError::ClientStopped), 2);
        assert!(matches!(r1.await.unwrap(), Err(CopilotError::ClientStopped)));
        assert!(matches!(r2.await.unwrap(), Err(CopilotError::ClientStopped)));
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn cancelled_entry_ignores_late_response() {
        let correlator = Correlator::new();
        let (id, rx) = correlator.register("slow");
        assert!(correlator.cancel(id));
        assert!(!correlator.cancel(id));

        assert!(!correlator.resolve(response(id, Ok(json!("late")))));
        assert!(rx.await.is_err());
        assert!(correlator.is_empty());
    }

    #[test]
    fn string_ids_match_numeric_entries() {
        let correlator = Correlator::new();
        let (id, _rx) = correlator.register("ping");
        let resp = Response {
            id: RequestId::String(id.to_string()),
            outcome: Ok(json!(1)),
        };
        assert!(correlator.resolve(resp));
    }
}
