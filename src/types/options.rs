//! Client options and configuration
//!
//! This module contains the configuration for [`crate::CopilotClient`],
//! including a builder pattern for easy configuration.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::events::{EventErrorHandler, EventErrorPolicy};
use crate::error::{CopilotError, Result};
use crate::transport::codec::{DEFAULT_MAX_FRAME_SIZE, Framing};

/// Default time allowed to spawn/dial and finish the handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default grace period for a graceful stop
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout of `send_and_wait`
pub const DEFAULT_SEND_AND_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of reconnect attempts after a crash
pub const DEFAULT_MAX_RESTART_ATTEMPTS: u32 = 3;

// ============================================================================
// Client Options
// ============================================================================

/// Options for [`crate::CopilotClient`]
#[derive(Clone)]
pub struct ClientOptions {
    /// Path to the CLI executable (discovered when unset)
    pub cli_path: Option<PathBuf>,
    /// Extra arguments placed before the SDK-managed flags
    pub cli_args: Vec<String>,
    /// Working directory of the CLI process
    pub cwd: Option<PathBuf>,
    /// TCP port for spawn-then-connect mode (0 picks a random port)
    pub port: u16,
    /// Talk to a spawned CLI over stdin/stdout
    pub use_stdio: bool,
    /// Connect to an already running CLI instead of spawning one
    pub cli_url: Option<String>,
    /// CLI log level
    pub log_level: String,
    /// Start on first use
    pub auto_start: bool,
    /// Reconnect after the CLI crashes
    pub auto_restart: bool,
    /// Replaces the inherited environment when set
    pub env: Option<HashMap<String, String>>,
    /// GitHub token passed to the CLI
    pub github_token: Option<String>,
    /// Allow the CLI to use stored credentials
    pub use_logged_in_user: Option<bool>,
    /// Bound on spawning/dialing plus the protocol handshake
    pub connect_timeout: Duration,
    /// Default timeout for forward calls (none = wait for the response)
    pub request_timeout: Option<Duration>,
    /// Grace period for a graceful stop
    pub stop_timeout: Duration,
    /// Default timeout of `send_and_wait`
    pub send_and_wait_timeout: Duration,
    /// Reconnect attempts after a crash
    pub max_restart_attempts: u32,
    /// Delay between reconnect attempts, multiplied by the attempt number
    pub restart_backoff: Duration,
    /// Message framing in both directions
    pub framing: Framing,
    /// Largest accepted inbound frame
    pub max_frame_size: usize,
    /// Check the server protocol version after connecting
    pub verify_protocol_version: bool,
    /// Event error policy applied to new sessions
    pub event_error_policy: EventErrorPolicy,
    /// Event error handler applied to new sessions
    pub event_error_handler: Option<EventErrorHandler>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cli_path: None,
            cli_args: Vec::new(),
            cwd: None,
            port: 0,
            use_stdio: true,
            cli_url: None,
            log_level: "info".to_string(),
            auto_start: true,
            auto_restart: true,
            env: None,
            github_token: None,
            use_logged_in_user: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: None,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            send_and_wait_timeout: DEFAULT_SEND_AND_WAIT_TIMEOUT,
            max_restart_attempts: DEFAULT_MAX_RESTART_ATTEMPTS,
            restart_backoff: Duration::from_millis(500),
            framing: Framing::default(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            verify_protocol_version: true,
            event_error_policy: EventErrorPolicy::default(),
            event_error_handler: None,
        }
    }
}

impl ClientOptions {
    /// Create a new builder for `ClientOptions`
    #[must_use]
    pub fn builder() -> ClientOptionsBuilder {
        ClientOptionsBuilder::default()
    }

    /// Whether stored credentials may be used
    #[must_use]
    pub fn uses_logged_in_user(&self) -> bool {
        self.use_logged_in_user
            .unwrap_or(self.github_token.is_none())
    }

    /// Check mutually exclusive settings
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first conflict found
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = self.cli_url.as_deref().filter(|u| !u.is_empty()) {
            if self.use_stdio || self.cli_path.is_some() {
                return Err(CopilotError::invalid_config(
                    "cli_url is mutually exclusive with use_stdio and cli_path",
                ));
            }
            if self.github_token.is_some() || self.use_logged_in_user.is_some() {
                return Err(CopilotError::invalid_config(
                    "github_token and use_logged_in_user cannot be used with cli_url",
                ));
            }
            crate::transport::tcp::parse_cli_url(url)?;
        }
        if self.max_frame_size == 0 {
            return Err(CopilotError::invalid_config("max_frame_size must be positive"));
        }
        if self.connect_timeout.is_zero() {
            return Err(CopilotError::invalid_config(
                "connect_timeout must be positive",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("cli_path", &self.cli_path)
            .field("cli_args", &self.cli_args)
            .field("cwd", &self.cwd)
            .field("port", &self.port)
            .field("use_stdio", &self.use_stdio)
            .field("cli_url", &self.cli_url)
            .field("log_level", &self.log_level)
            .field("auto_start", &self.auto_start)
            .field("auto_restart", &self.auto_restart)
            .field("env", &self.env.as_ref().map(|e| format!("[{} vars]", e.len())))
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("use_logged_in_user", &self.use_logged_in_user)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("stop_timeout", &self.stop_timeout)
            .field("send_and_wait_timeout", &self.send_and_wait_timeout)
            .field("max_restart_attempts", &self.max_restart_attempts)
            .field("restart_backoff", &self.restart_backoff)
            .field("framing", &self.framing)
            .field("max_frame_size", &self.max_frame_size)
            .field("verify_protocol_version", &self.verify_protocol_version)
            .field("event_error_policy", &self.event_error_policy)
            .field(
                "event_error_handler",
                &self.event_error_handler.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

// ============================================================================
// Builder for ClientOptions
// ============================================================================

/// Builder for `ClientOptions`
#[derive(Debug, Default)]
pub struct ClientOptionsBuilder {
    options: ClientOptions,
}

impl ClientOptionsBuilder {
    /// Set the CLI executable path
    #[must_use]
    pub fn cli_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cli_path = Some(path.into());
        self
    }

    /// Add an extra CLI argument
    #[must_use]
    pub fn cli_arg(mut self, arg: impl Into<String>) -> Self {
        self.options.cli_args.push(arg.into());
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.cwd = Some(path.into());
        self
    }

    /// Spawn the CLI listening on a TCP port instead of stdio
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self.options.use_stdio = false;
        self
    }

    /// Choose between stdio and TCP for a spawned CLI
    #[must_use]
    pub const fn use_stdio(mut self, use_stdio: bool) -> Self {
        self.options.use_stdio = use_stdio;
        self
    }

    /// Connect to a running CLI at `host:port`, `http(s)://host:port` or a bare port
    #[must_use]
    pub fn cli_url(mut self, url: impl Into<String>) -> Self {
        self.options.cli_url = Some(url.into());
        self.options.use_stdio = false;
        self
    }

    /// Set the CLI log level
    #[must_use]
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.options.log_level = level.into();
        self
    }

    /// Start on first use
    #[must_use]
    pub const fn auto_start(mut self, enabled: bool) -> Self {
        self.options.auto_start = enabled;
        self
    }

    /// Reconnect after a crash
    #[must_use]
    pub const fn auto_restart(mut self, enabled: bool) -> Self {
        self.options.auto_restart = enabled;
        self
    }

    /// Set one environment variable for the CLI process
    ///
    /// The first call replaces the inherited environment.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options
            .env
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Authenticate the CLI with a GitHub token
    #[must_use]
    pub fn github_token(mut self, token: impl Into<String>) -> Self {
        self.options.github_token = Some(token.into());
        self
    }

    /// Allow or forbid stored credentials
    #[must_use]
    pub const fn use_logged_in_user(mut self, enabled: bool) -> Self {
        self.options.use_logged_in_user = Some(enabled);
        self
    }

    /// Set the connect and handshake timeout
    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.options.connect_timeout = timeout;
        self
    }

    /// Set the default forward-call timeout
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = Some(timeout);
        self
    }

    /// Set the graceful stop grace period
    #[must_use]
    pub const fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.options.stop_timeout = timeout;
        self
    }

    /// Set the default `send_and_wait` timeout
    #[must_use]
    pub const fn send_and_wait_timeout(mut self, timeout: Duration) -> Self {
        self.options.send_and_wait_timeout = timeout;
        self
    }

    /// Set the number of reconnect attempts after a crash
    #[must_use]
    pub const fn max_restart_attempts(mut self, attempts: u32) -> Self {
        self.options.max_restart_attempts = attempts;
        self
    }

    /// Set the delay between reconnect attempts
    #[must_use]
    pub const fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.options.restart_backoff = backoff;
        self
    }

    /// Set the message framing
    #[must_use]
    pub const fn framing(mut self, framing: Framing) -> Self {
        self.options.framing = framing;
        self
    }

    /// Set the largest accepted inbound frame
    #[must_use]
    pub const fn max_frame_size(mut self, size: usize) -> Self {
        self.options.max_frame_size = size;
        self
    }

    /// Enable or disable the protocol version check
    #[must_use]
    pub const fn verify_protocol_version(mut self, enabled: bool) -> Self {
        self.options.verify_protocol_version = enabled;
        self
    }

    /// Set the event error policy for new sessions
    #[must_use]
    pub const fn event_error_policy(mut self, policy: EventErrorPolicy) -> Self {
        self.options.event_error_policy = policy;
        self
    }

    /// Set the event error handler for new sessions
    #[must_use]
    pub fn event_error_handler(mut self, handler: EventErrorHandler) -> Self {
        self.options.event_error_handler = Some(handler);
        self
    }

    /// Build and validate the options
    ///
    /// # Errors
    /// Returns `InvalidConfig` if settings conflict
    pub fn build(self) -> Result<ClientOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let options = ClientOptions::builder().build().unwrap();
        assert!(options.use_stdio);
        assert!(options.auto_start);
        assert!(options.auto_restart);
        assert_eq!(options.log_level, "info");
        assert_eq!(options.framing, Framing::NewlineDelimited);
        assert_eq!(options.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
        assert!(options.uses_logged_in_user());
    }

    #[test]
    fn cli_url_conflicts_with_cli_path() {
        let err = ClientOptions::builder()
            .cli_url("localhost:8080")
            .cli_path("/usr/bin/copilot")
            .build()
            .unwrap_err();
        assert!(matches!(err, CopilotError::InvalidConfig(_)));
    }

    #[test]
    fn cli_url_conflicts_with_explicit_stdio() {
        let result = ClientOptions::builder()
            .cli_url("8080")
            .use_stdio(true)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn cli_url_rejects_auth_options() {
        let result = ClientOptions::builder()
            .cli_url("8080")
            .github_token("ghp_x")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn token_disables_logged_in_user_by_default() {
        let options = ClientOptions::builder().github_token("t").build().unwrap();
        assert!(!options.uses_logged_in_user());
    }

    #[test]
    fn debug_redacts_token() {
        let options = ClientOptions::builder().github_token("secret").build().unwrap();
        assert!(!format!("{options:?}").contains("secret"));
    }
}
