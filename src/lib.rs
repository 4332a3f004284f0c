//! # Copilot Agent Client for Rust
//!
//! A client library that drives the Copilot CLI through a duplex JSON-RPC
//! connection. Calls such as "create a session" or "send and wait for the
//! reply" look synchronous; underneath, the CLI streams events back and calls
//! into the client for tools, permissions, hooks and user input.
//!
//! ## Quick Start
//!
//! ```no_run
//! use kodegen_copilot_agent::{ClientOptions, CopilotClient, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CopilotClient::new(ClientOptions::default())?;
//!     client.start().await?;
//!
//!     let session = client.create_session(SessionConfig::default()).await?;
//!     let reply = session.send_and_wait("What is 2 + 2?", None).await?;
//!     log::info!("Copilot: {:?}", reply.and_then(|m| m.content));
//!
//!     client.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Core Features
//!
//! ### 1. Client-side tools
//!
//! Tools are declared per session; the CLI calls back with `tool.call` and the
//! handler's result is returned to the model:
//!
//! ```no_run
//! # use kodegen_copilot_agent::{CopilotClient, SessionConfig, ToolDefinition};
//! # use serde_json::json;
//! # async fn example(client: CopilotClient) -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::builder()
//!     .tool(ToolDefinition::new(
//!         "lookup_issue",
//!         "Fetch an issue by number",
//!         json!({"type": "object", "properties": {"id": {"type": "integer"}}}),
//!         |invocation| async move {
//!             Ok(format!("issue {} is open", invocation.arguments["id"]))
//!         },
//!     ))
//!     .build();
//! let session = client.create_session(config).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### 2. Event subscriptions
//!
//! Events for one session are delivered in order. A failing subscriber is
//! isolated according to the session's [`EventErrorPolicy`]:
//!
//! ```no_run
//! # use kodegen_copilot_agent::{CopilotSession, EventErrorPolicy};
//! # fn example(session: CopilotSession) -> kodegen_copilot_agent::Result<()> {
//! session.set_event_error_policy(EventErrorPolicy::SuppressAndLogErrors);
//! let subscription = session.on(|event| {
//!     if let Some(message) = event.as_assistant_message() {
//!         log::info!("{}", message.content.as_deref().unwrap_or_default());
//!     }
//!     Ok(())
//! })?;
//! subscription.unsubscribe();
//! # Ok(())
//! # }
//! ```
//!
//! ### 3. Connection supervision
//!
//! If the CLI crashes, pending calls fail with
//! [`CopilotError::ConnectionLost`] and the client reconnects when
//! `auto_restart` is enabled. Transitions can be observed through
//! [`CopilotClient::state_changes`].

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod router;
pub mod rpc;
pub mod session;
pub mod supervisor;
pub mod transport;
pub mod types;

// Re-export commonly used types for external API
pub use client::CopilotClient;
pub use error::{CopilotError, Result};
pub use session::{CopilotSession, Subscription};
pub use supervisor::ConnectionState;
pub use transport::{Framing, SubprocessTransport, TcpTransport, Transport, TransportStreams};

// Re-export type submodules for flat public API
pub use types::events::{
    AssistantMessageData, EventErrorHandler, EventErrorPolicy, SessionErrorData, SessionEvent,
    SessionEventKind,
};
pub use types::hooks::{HookKind, SessionHooks};
pub use types::identifiers::{RequestId, SessionId, ToolName};
pub use types::lifecycle::SessionLifecycleEvent;
pub use types::options::{ClientOptions, ClientOptionsBuilder};
pub use types::permissions::{PermissionRequest, PermissionRequestResult, permission_handler};
pub use types::responses::{
    GetAuthStatusResponse, GetStatusResponse, ModelInfo, PingResponse, SessionMetadata,
};
pub use types::session_config::{
    InfiniteSessionConfig, MessageOptions, SessionConfig, SessionConfigBuilder,
};
pub use types::tools::{ToolDefinition, ToolInvocation, ToolResultObject};
pub use types::user_input::{UserInputRequest, UserInputResponse, user_input_handler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version this client speaks; checked against `ping` after connecting
pub const SDK_PROTOCOL_VERSION: u32 = 2;
