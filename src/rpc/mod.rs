//! JSON-RPC plumbing: envelopes, request correlation and the live connection
//!
//! A connection owns one read loop. Responses are matched to waiting callers
//! through the [`Correlator`]; reverse calls and notifications are handed to
//! an [`InboundSink`] without blocking the loop.

pub mod connection;
pub mod correlator;
pub mod messages;

pub use connection::{InboundSink, Responder, RpcConnection};
pub use correlator::{Correlator, ResponseReceiver};
pub use messages::{
    IncomingMessage, InboundRequest, JSONRPC_VERSION, JsonRpcError, Notification, Response,
    error_codes,
};
