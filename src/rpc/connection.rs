//! One live JSON-RPC connection: serialized writer, read loop, correlation

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::correlator::Correlator;
use super::messages::{
    IncomingMessage, InboundRequest, JSONRPC_VERSION, JsonRpcError, Notification,
    OutboundNotification, OutboundRequest, OutboundResponse,
};
use crate::error::{CopilotError, Result};
use crate::transport::{BoxedReader, BoxedWriter, JsonRpcCodec, TransportStreams};
use crate::types::identifiers::RequestId;

/// Receives inbound reverse calls and notifications from the read loop
///
/// Implementations must return quickly: work is handed off to other tasks so
/// the read loop can keep correlating responses.
pub trait InboundSink: Send + Sync + 'static {
    /// A reverse call that must be answered through `responder`
    fn on_request(&self, request: InboundRequest, responder: Responder);

    /// A fire-and-forget notification
    fn on_notification(&self, notification: Notification);

    /// The connection dropped unexpectedly
    fn on_connection_lost(&self) {}
}

/// Shared, serialized frame writer
///
/// Closing drops the underlying stream so the peer observes EOF even while
/// other handles to the writer are still alive.
#[derive(Clone)]
pub(crate) struct FrameWriter {
    inner: Arc<Mutex<Option<FramedWrite<BoxedWriter, JsonRpcCodec>>>>,
}

impl FrameWriter {
    fn new(writer: BoxedWriter, codec: JsonRpcCodec) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(FramedWrite::new(writer, codec)))),
        }
    }

    async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        let frame = serde_json::to_string(message)?;
        let mut guard = self.inner.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| CopilotError::connection_lost("writer is closed"))?;
        sink.send(frame).await
    }

    async fn close(&self) -> Result<()> {
        let taken = self.inner.lock().await.take();
        match taken {
            Some(mut sink) => sink.close().await,
            None => Ok(()),
        }
    }
}

/// Reply handle for one inbound request
pub struct Responder {
    writer: FrameWriter,
    id: RequestId,
}

impl Responder {
    /// Id of the request being answered
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Send a successful result
    ///
    /// # Errors
    /// Returns error if the connection is gone
    pub async fn respond(self, result: Value) -> Result<()> {
        self.writer
            .send(&OutboundResponse {
                jsonrpc: JSONRPC_VERSION,
                id: &self.id,
                result: Some(&result),
                error: None,
            })
            .await
    }

    /// Send an error object
    ///
    /// # Errors
    /// Returns error if the connection is gone
    pub async fn respond_error(self, error: JsonRpcError) -> Result<()> {
        self.writer
            .send(&OutboundResponse {
                jsonrpc: JSONRPC_VERSION,
                id: &self.id,
                result: None,
                error: Some(&error),
            })
            .await
    }
}

impl std::fmt::Debug for Responder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Responder").field("id", &self.id).finish()
    }
}

/// A live connection to the CLI
pub struct RpcConnection {
    writer: FrameWriter,
    correlator: Arc<Correlator>,
    closed: CancellationToken,
    reader_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    request_timeout: Option<Duration>,
}

impl RpcConnection {
    /// Take over `streams` and start the read loop
    pub fn spawn(
        streams: TransportStreams,
        codec: JsonRpcCodec,
        sink: Arc<dyn InboundSink>,
        request_timeout: Option<Duration>,
    ) -> Arc<Self> {
        let writer = FrameWriter::new(streams.writer, codec.clone());
        let correlator = Arc::new(Correlator::new());
        let closed = CancellationToken::new();

        let reader_task = tokio::spawn(read_loop(
            FramedRead::new(streams.reader, codec),
            correlator.clone(),
            writer.clone(),
            sink,
            closed.clone(),
        ));

        Arc::new(Self {
            writer,
            correlator,
            closed,
            reader_task: parking_lot::Mutex::new(Some(reader_task)),
            request_timeout,
        })
    }

    /// Send a request using the default timeout
    ///
    /// # Errors
    /// Returns the decoded RPC error, `Timeout`, or `ConnectionLost`
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a request and wait for its response
    ///
    /// With a timeout, the pending entry is removed when it elapses so that a
    /// late response is dropped as unmatched.
    ///
    /// # Errors
    /// Returns the decoded RPC error, `Timeout`, or `ConnectionLost`
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.is_closed() {
            return Err(CopilotError::connection_lost("connection is closed"));
        }

        let (id, rx) = self.correlator.register(method);
        // The read loop cancels the token before draining the table, so an
        // entry registered after the drain is caught here.
        if self.is_closed() {
            self.correlator.cancel(id);
            return Err(CopilotError::connection_lost("connection is closed"));
        }

        log::debug!("-> {method} (id {id})");
        let envelope = OutboundRequest {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params: &params,
        };
        if let Err(e) = self.writer.send(&envelope).await {
            self.correlator.cancel(id);
            return Err(CopilotError::connection_lost(format!(
                "failed to write '{method}': {e}"
            )));
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.correlator.cancel(id);
                    return Err(CopilotError::timeout(format!(
                        "'{method}' (id {id}) timed out after {limit:?}"
                    )));
                }
            },
            None => rx.await,
        };

        outcome.unwrap_or_else(|_| Err(CopilotError::connection_lost("response channel dropped")))
    }

    /// Typed request: serialize `params`, deserialize the result
    ///
    /// # Errors
    /// Returns `Protocol` if the result does not have the expected shape
    pub async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let result = self.request(method, serde_json::to_value(params)?).await?;
        serde_json::from_value(result)
            .map_err(|e| CopilotError::protocol(format!("unexpected '{method}' result: {e}")))
    }

    /// Send a notification
    ///
    /// # Errors
    /// Returns error if the connection is gone
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        self.writer
            .send(&OutboundNotification {
                jsonrpc: JSONRPC_VERSION,
                method,
                params: &params,
            })
            .await
    }

    /// Whether the read loop has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait until the read loop has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Token cancelled when the read loop ends; does not keep the connection alive
    pub(crate) fn close_signal(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Fail every outstanding request
    pub fn fail_pending(&self, make_error: impl Fn() -> CopilotError) -> usize {
        self.correlator.fail_all(make_error)
    }

    /// Number of outstanding requests
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    /// Stop the read loop and close the writer
    pub async fn close(&self) {
        self.closed.cancel();
        if let Err(e) = self.writer.close().await {
            log::debug!("Error closing writer: {e}");
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for RpcConnection {
    fn drop(&mut self) {
        self.closed.cancel();
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("closed", &self.is_closed())
            .field("correlator", &self.correlator)
            .finish_non_exhaustive()
    }
}

async fn read_loop(
    mut frames: FramedRead<BoxedReader, JsonRpcCodec>,
    correlator: Arc<Correlator>,
    writer: FrameWriter,
    sink: Arc<dyn InboundSink>,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = closed.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(frame)) => handle_frame(&frame, &correlator, &writer, sink.as_ref()),
            Some(Err(e)) => {
                log::warn!("Inbound stream failed: {e}");
                break;
            }
            None => {
                log::debug!("Inbound stream reached EOF");
                break;
            }
        }
    }

    closed.cancel();
    let failed = correlator.fail_all(|| CopilotError::connection_lost("connection closed"));
    if failed > 0 {
        log::debug!("Failed {failed} pending request(s) after connection closed");
    }
}

fn handle_frame(frame: &str, correlator: &Correlator, writer: &FrameWriter, sink: &dyn InboundSink) {
    let value: Value = match serde_json::from_str(frame) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("Dropping unparseable frame: {e}");
            return;
        }
    };

    match IncomingMessage::classify(value) {
        Ok(IncomingMessage::Response(response)) => {
            let id = response.id.clone();
            if !correlator.resolve(response) {
                log::debug!("Dropping response for unknown request id {id}");
            }
        }
        Ok(IncomingMessage::Request(request)) => {
            log::debug!("<- {} (reverse call {})", request.method, request.id);
            let responder = Responder {
                writer: writer.clone(),
                id: request.id.clone(),
            };
            sink.on_request(request, responder);
        }
        Ok(IncomingMessage::Notification(notification)) => sink.on_notification(notification),
        Err(reason) => log::warn!("Dropping malformed message: {reason}"),
    }
}
