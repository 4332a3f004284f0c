//! Shared fixtures: an in-memory transport and a scripted CLI peer

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use kodegen_copilot_agent::transport::JsonRpcCodec;
use kodegen_copilot_agent::{
    ClientOptions, ClientOptionsBuilder, CopilotClient, CopilotSession, Result, SessionConfig,
    Transport, TransportStreams,
};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

/// How long a test waits for traffic before failing
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Transport
// ============================================================================

/// Transport handing the server end of each new connection to the test
pub struct DuplexTransport {
    peers: mpsc::UnboundedSender<FakePeer>,
    connects: Arc<AtomicUsize>,
    hang: bool,
}

impl Transport for DuplexTransport {
    fn connect(&mut self) -> BoxFuture<'_, Result<TransportStreams>> {
        Box::pin(async move {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            let (client, server) = tokio::io::duplex(64 * 1024);
            let (reader, writer) = tokio::io::split(client);
            let _ = self.peers.send(FakePeer::new(server));
            Ok(TransportStreams {
                reader: Box::new(reader),
                writer: Box::new(writer),
            })
        })
    }

    fn shutdown(&mut self, _grace: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn kill(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn describe(&self) -> String {
        "in-memory duplex".to_string()
    }
}

/// A client wired to a [`DuplexTransport`]
pub struct Harness {
    pub client: CopilotClient,
    pub peers: mpsc::UnboundedReceiver<FakePeer>,
    pub connects: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(options: ClientOptions) -> Self {
        Self::build(options, false)
    }

    /// Harness whose transport never finishes connecting
    pub fn hanging(options: ClientOptions) -> Self {
        Self::build(options, true)
    }

    fn build(options: ClientOptions, hang: bool) -> Self {
        let (tx, peers) = mpsc::unbounded_channel();
        let connects = Arc::new(AtomicUsize::new(0));
        let transport = DuplexTransport {
            peers: tx,
            connects: connects.clone(),
            hang,
        };
        Self {
            client: CopilotClient::with_transport(options, Box::new(transport)),
            peers,
            connects,
        }
    }

    /// Start the client and return the peer of the new connection
    pub async fn start(&mut self) -> FakePeer {
        self.client.start().await.expect("start");
        self.next_peer().await
    }

    pub async fn next_peer(&mut self) -> FakePeer {
        tokio::time::timeout(WAIT, self.peers.recv())
            .await
            .expect("no connection within wait")
            .expect("transport dropped")
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Create a session, answering `session.create` with `session_id`
    pub async fn create_session(
        &self,
        peer: &mut FakePeer,
        session_id: &str,
        config: SessionConfig,
    ) -> CopilotSession {
        let client = self.client.clone();
        let task = tokio::spawn(async move { client.create_session(config).await });
        let (id, _) = peer.expect_request("session.create").await;
        peer.reply(&id, json!({ "sessionId": session_id })).await;
        task.await.expect("join").expect("create_session")
    }
}

/// Options for in-memory tests: no handshake, no auto start, fast restarts
pub fn test_options() -> ClientOptionsBuilder {
    ClientOptions::builder()
        .verify_protocol_version(false)
        .auto_start(false)
        .connect_timeout(Duration::from_secs(2))
        .restart_backoff(Duration::from_millis(10))
}

// ============================================================================
// Scripted peer
// ============================================================================

/// The CLI side of an in-memory connection
pub struct FakePeer {
    reader: FramedRead<ReadHalf<DuplexStream>, JsonRpcCodec>,
    writer: FramedWrite<WriteHalf<DuplexStream>, JsonRpcCodec>,
}

impl FakePeer {
    pub fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: FramedRead::new(reader, JsonRpcCodec::default()),
            writer: FramedWrite::new(writer, JsonRpcCodec::default()),
        }
    }

    /// Next message from the client
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(WAIT, self.reader.next())
            .await
            .expect("no message within wait")
            .expect("client closed the stream")
            .expect("frame");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// `None` once the client closed its writer
    pub async fn recv_eof(&mut self) -> bool {
        matches!(
            tokio::time::timeout(WAIT, self.reader.next()).await,
            Ok(None)
        )
    }

    /// Next message, which must be a request for `method`; returns `(id, params)`
    pub async fn expect_request(&mut self, method: &str) -> (Value, Value) {
        let message = self.recv().await;
        assert_eq!(message["method"], method, "unexpected message {message}");
        assert!(message.get("id").is_some(), "expected a request: {message}");
        (message["id"].clone(), message["params"].clone())
    }

    pub async fn send(&mut self, message: Value) {
        self.writer
            .send(message.to_string())
            .await
            .expect("write to client");
    }

    pub async fn send_raw(&mut self, frame: &str) {
        self.writer.send(frame.to_string()).await.expect("write to client");
    }

    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub async fn reply_error(&mut self, id: &Value, code: i64, message: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message }
        }))
        .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    /// Send a reverse call and wait for the client's answer
    pub async fn call(&mut self, id: u64, method: &str, params: Value) -> Value {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await;
        let answer = self.recv().await;
        assert_eq!(answer["id"], id, "answer to the wrong call: {answer}");
        answer
    }

    /// Emit a `session.event` notification
    pub async fn event(&mut self, session_id: &str, event_type: &str, data: Value) {
        self.notify(
            "session.event",
            json!({ "sessionId": session_id, "event": { "type": event_type, "data": data } }),
        )
        .await;
    }
}
