//! Error types for the Copilot agent client

use thiserror::Error;

/// Main error type for the Copilot agent client
#[derive(Error, Debug)]
pub enum CopilotError {
    /// The CLI could not be spawned or the endpoint could not be reached
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// The connection dropped while the request was outstanding
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The client was stopped while the request was outstanding
    #[error("Client stopped")]
    ClientStopped,

    /// No live connection and auto-start is disabled or failed
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// The remote side answered with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
        /// Optional structured error data
        data: Option<serde_json::Value>,
    },

    /// The remote protocol version does not match this client
    #[error("Protocol version mismatch: client expects {expected}, server reports {actual}")]
    ProtocolVersionMismatch {
        /// Version this client speaks
        expected: u32,
        /// Version reported by the server, if any
        actual: String,
    },

    /// Malformed response to one of our own calls
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON encode or decode error
    #[error("JSON decode error: {0}")]
    JsonDecode(#[from] serde_json::Error),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Session not known to this client
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Session handle was closed locally
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// The remote reported a session-level error
    #[error("Session error: {0}")]
    Session(String),

    /// An application handler or subscriber failed
    #[error("Handler error: {0}")]
    Handler(String),

    /// Error raised by application code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Copilot client operations
pub type Result<T> = std::result::Result<T, CopilotError>;

impl CopilotError {
    /// Create an error describing a missing CLI installation
    #[must_use]
    pub fn cli_not_found() -> Self {
        Self::ConnectionUnavailable(
            "Copilot CLI not found. Install with:\n\
             npm install -g @github/copilot\n\
             \n\
             Or set COPILOT_CLI_PATH, or pass cli_path in ClientOptions"
                .to_string(),
        )
    }

    /// Create a connection unavailable error
    pub fn connection_unavailable(msg: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(msg.into())
    }

    /// Create a connection lost error
    pub fn connection_lost(msg: impl Into<String>) -> Self {
        Self::ConnectionLost(msg.into())
    }

    /// Create a not connected error
    pub fn not_connected(msg: impl Into<String>) -> Self {
        Self::NotConnected(msg.into())
    }

    /// Create an RPC error
    pub fn rpc(code: i64, msg: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self::Rpc {
            code,
            message: msg.into(),
            data,
        }
    }

    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a session not found error
    pub fn session_not_found(session_id: impl Into<String>) -> Self {
        Self::SessionNotFound(session_id.into())
    }

    /// Create a session closed error
    pub fn session_closed(session_id: impl Into<String>) -> Self {
        Self::SessionClosed(session_id.into())
    }

    /// Create a session error
    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Create a handler error
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Create a handler error from a caught panic payload
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::Handler(format!("handler panicked: {message}"))
    }

    /// JSON-RPC error code, if this is an RPC error
    #[must_use]
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error means the connection could not be established
    #[must_use]
    pub fn is_connection_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable(_))
    }

    /// Whether this error came from a dropped connection
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    /// Whether this error is a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Build a fresh copy suitable for failing several waiters with the same cause
    ///
    /// Errors wrapping foreign sources (I/O, JSON, anyhow) are flattened into
    /// their message since those sources are not `Clone`.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::ConnectionUnavailable(m) => Self::ConnectionUnavailable(m.clone()),
            Self::ConnectionLost(m) => Self::ConnectionLost(m.clone()),
            Self::ClientStopped => Self::ClientStopped,
            Self::NotConnected(m) => Self::NotConnected(m.clone()),
            Self::Rpc {
                code,
                message,
                data,
            } => Self::Rpc {
                code: *code,
                message: message.clone(),
                data: data.clone(),
            },
            Self::ProtocolVersionMismatch { expected, actual } => Self::ProtocolVersionMismatch {
                expected: *expected,
                actual: actual.clone(),
            },
            Self::Protocol(m) => Self::Protocol(m.clone()),
            Self::Transport(m) => Self::Transport(m.clone()),
            Self::Timeout(m) => Self::Timeout(m.clone()),
            Self::InvalidConfig(m) => Self::InvalidConfig(m.clone()),
            Self::SessionNotFound(m) => Self::SessionNotFound(m.clone()),
            Self::SessionClosed(m) => Self::SessionClosed(m.clone()),
            Self::Session(m) => Self::Session(m.clone()),
            Self::Handler(m) => Self::Handler(m.clone()),
            Self::JsonDecode(e) => Self::Protocol(e.to_string()),
            Self::Io(e) => Self::Transport(e.to_string()),
            Self::Other(e) => Self::Handler(e.to_string()),
        }
    }
}
