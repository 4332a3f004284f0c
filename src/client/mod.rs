//! `CopilotClient`, the public entry point
//!
//! The client owns one connection to the Copilot CLI and the tables that
//! route inbound traffic:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CopilotClient                          │
//! │                                                               │
//! │  create_session / ping / list_models ...                      │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  ┌────────────┐  owns   ┌───────────────┐                     │
//! │  │ Supervisor │───────▶│ RpcConnection │◀── Transport bytes   │
//! │  └────────────┘         └──────┬────────┘                     │
//! │                        read loop │                            │
//! │              ┌─────────────────┼────────────────┐             │
//! │              ▼                 ▼                ▼             │
//! │         Correlator      CallbackRouter    EventDispatcher     │
//! │        (responses)     (reverse calls)    (notifications)     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! **Key Design Points:**
//! - Writes are serialized by one writer lock; reads happen on one task
//! - Reverse calls and notifications are handed off, so a slow handler never
//!   stalls unrelated responses
//! - Handlers and subscribers stay registered across automatic restarts
//!
//! # Example
//!
//! ```no_run
//! use kodegen_copilot_agent::{ClientOptions, CopilotClient, SessionConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = CopilotClient::new(ClientOptions::default())?;
//! client.start().await?;
//!
//! let session = client
//!     .create_session(SessionConfig::builder().model("gpt-5").build())
//!     .await?;
//! if let Some(reply) = session.send_and_wait("What is 2 + 2?", None).await? {
//!     println!("{}", reply.content.unwrap_or_default());
//! }
//!
//! session.close();
//! client.stop().await?;
//! # Ok(())
//! # }
//! ```

mod client_impl;
mod tasks;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::router::CallbackRouter;
use crate::rpc::RpcConnection;
use crate::supervisor::{ConnectionState, Supervisor};
use crate::types::options::ClientOptions;

use tasks::ModelCache;

/// Client for the Copilot CLI
///
/// Cheap to clone; clones share the connection and all sessions.
#[derive(Clone)]
pub struct CopilotClient {
    inner: Arc<ClientInner>,
}

/// State shared between the client and its sessions
pub(crate) struct ClientInner {
    pub(crate) options: ClientOptions,
    pub(crate) supervisor: Arc<Supervisor>,
    pub(crate) router: Arc<CallbackRouter>,
    pub(crate) dispatcher: Arc<EventDispatcher>,
    pub(crate) models: ModelCache,
}

impl ClientInner {
    /// The live connection, starting the client first if `auto_start` allows
    pub(crate) async fn connection(&self) -> Result<Arc<RpcConnection>> {
        if self.options.auto_start && self.supervisor.state() == ConnectionState::Disconnected {
            self.supervisor.start().await?;
        }
        self.supervisor.connection().await
    }

    /// Forward call with a typed result
    pub(crate) async fn call<R: DeserializeOwned>(&self, method: &str, params: Value) -> Result<R> {
        self.connection().await?.call(method, &params).await
    }

    /// Forward call whose result is ignored
    pub(crate) async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.connection().await?.request(method, params).await
    }
}

impl std::fmt::Debug for CopilotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotClient")
            .field("state", &self.inner.supervisor.state())
            .field("options", &self.inner.options)
            .field("router", &self.inner.router)
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}
