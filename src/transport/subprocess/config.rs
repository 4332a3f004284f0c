//! Configuration constants and types for subprocess transport

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::options::ClientOptions;

/// Environment variable that overrides CLI discovery
pub const CLI_PATH_ENV: &str = "COPILOT_CLI_PATH";

/// Environment variable carrying the GitHub token to the CLI
pub const AUTH_TOKEN_ENV: &str = "COPILOT_SDK_AUTH_TOKEN";

/// Environment variables removed from the child environment
///
/// `NODE_DEBUG` makes Node print diagnostics on stdout, which corrupts the
/// JSON-RPC stream.
pub const STRIPPED_ENV_VARS: &[&str] = &["NODE_DEBUG"];

/// Marker the CLI prints on stdout once its TCP server is up
pub const PORT_ANNOUNCEMENT: &str = "listening on port";

/// How the spawned CLI talks to us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// JSON-RPC over stdin/stdout
    Stdio,
    /// JSON-RPC over TCP on the given port (0 = CLI picks one)
    Tcp(u16),
}

/// Settings needed to spawn the CLI
#[derive(Debug, Clone)]
pub struct SubprocessConfig {
    /// Explicit CLI path
    pub cli_path: Option<PathBuf>,
    /// Extra arguments placed before SDK-managed flags
    pub cli_args: Vec<String>,
    /// Working directory
    pub cwd: Option<PathBuf>,
    /// Replacement environment
    pub env: Option<HashMap<String, String>>,
    /// CLI log level
    pub log_level: String,
    /// Stdio or TCP
    pub mode: SpawnMode,
    /// Token passed through `AUTH_TOKEN_ENV`
    pub github_token: Option<String>,
    /// Whether stored credentials may be used
    pub use_logged_in_user: bool,
    /// Bound on waiting for the port announcement and dialing
    pub connect_timeout: Duration,
}

impl SubprocessConfig {
    /// Derive spawn settings from client options
    #[must_use]
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            cli_path: options.cli_path.clone(),
            cli_args: options.cli_args.clone(),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
            log_level: options.log_level.clone(),
            mode: if options.use_stdio {
                SpawnMode::Stdio
            } else {
                SpawnMode::Tcp(options.port)
            },
            github_token: options.github_token.clone(),
            use_logged_in_user: options.uses_logged_in_user(),
            connect_timeout: options.connect_timeout,
        }
    }
}

/// Extract the port from a `listening on port N` line
#[must_use]
pub fn parse_port_announcement(line: &str) -> Option<u16> {
    let lower = line.to_ascii_lowercase();
    let start = lower.find(PORT_ANNOUNCEMENT)? + PORT_ANNOUNCEMENT.len();
    let digits: String = lower[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_announced_port() {
        assert_eq!(
            parse_port_announcement("Server Listening on port 51234"),
            Some(51234)
        );
        assert_eq!(parse_port_announcement("listening on port 80."), Some(80));
        assert_eq!(parse_port_announcement("starting up"), None);
    }

    #[test]
    fn options_select_spawn_mode() {
        let stdio = SubprocessConfig::from_options(&ClientOptions::default());
        assert_eq!(stdio.mode, SpawnMode::Stdio);

        let tcp = SubprocessConfig::from_options(
            &ClientOptions::builder().port(9000).build().unwrap(),
        );
        assert_eq!(tcp.mode, SpawnMode::Tcp(9000));
    }
}
