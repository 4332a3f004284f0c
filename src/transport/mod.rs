//! Transport layer for communicating with the Copilot CLI
//!
//! A transport produces a raw duplex byte stream. Framing lives in
//! [`codec`]; correlation and dispatch live in [`crate::rpc`].

pub mod codec;
pub mod subprocess;
pub mod tcp;

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Read half of a connection
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a connection
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of an established connection
pub struct TransportStreams {
    /// Inbound bytes
    pub reader: BoxedReader,
    /// Outbound bytes
    pub writer: BoxedWriter,
}

impl std::fmt::Debug for TransportStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStreams").finish_non_exhaustive()
    }
}

/// Transport trait for establishing the byte stream to the CLI
///
/// `connect` may be called again after a crash; implementations release any
/// state left from the previous connection before establishing a new one.
pub trait Transport: Send + Sync {
    /// Establish a connection and hand over its streams
    ///
    /// # Errors
    /// Returns `ConnectionUnavailable` if the process cannot be spawned or
    /// the endpoint cannot be reached
    fn connect(&mut self) -> BoxFuture<'_, Result<TransportStreams>>;

    /// Wait up to `grace` for the remote side to exit, then force it
    ///
    /// Called after the writer has been closed, which is the signal for the
    /// CLI to exit.
    ///
    /// # Errors
    /// Returns error if cleanup fails
    fn shutdown(&mut self, grace: Duration) -> BoxFuture<'_, Result<()>>;

    /// Tear down immediately
    ///
    /// # Errors
    /// Returns error if the process cannot be killed
    fn kill(&mut self) -> BoxFuture<'_, Result<()>>;

    /// Short description for logs
    fn describe(&self) -> String;
}

pub use codec::{DEFAULT_MAX_FRAME_SIZE, Framing, JsonRpcCodec};
pub use subprocess::SubprocessTransport;
pub use tcp::{TcpTransport, parse_cli_url};
