//! Subprocess transport implementation using the Copilot CLI
//!
//! This module provides a transport implementation that spawns the Copilot CLI
//! in server mode and communicates with it via stdin/stdout or a local socket.

mod command;
mod config;
mod lifecycle;
mod transport;

// Re-export public types
pub use command::CommandBuilder;
pub use config::{
    AUTH_TOKEN_ENV, CLI_PATH_ENV, PORT_ANNOUNCEMENT, STRIPPED_ENV_VARS, SpawnMode,
    SubprocessConfig, parse_port_announcement,
};
pub use transport::SubprocessTransport;
