//! CLI command building logic for subprocess transport

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use super::config::{AUTH_TOKEN_ENV, STRIPPED_ENV_VARS, SpawnMode, SubprocessConfig};

/// Command builder for the Copilot CLI
pub struct CommandBuilder<'a> {
    cli_path: &'a Path,
    config: &'a SubprocessConfig,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub fn new(cli_path: &'a Path, config: &'a SubprocessConfig) -> Self {
        Self { cli_path, config }
    }

    /// Program and arguments; `.js` entry points run through `node`
    #[must_use]
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        let cli = self.cli_path.to_string_lossy().to_string();
        let mut args = Vec::new();

        let program = if self
            .cli_path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("js"))
        {
            args.push(cli);
            "node".to_string()
        } else {
            cli
        };

        args.extend(self.config.cli_args.iter().cloned());
        args.push("--server".to_string());
        args.push("--log-level".to_string());
        args.push(self.config.log_level.clone());

        match self.config.mode {
            SpawnMode::Stdio => args.push("--stdio".to_string()),
            SpawnMode::Tcp(port) => {
                if port > 0 {
                    args.push("--port".to_string());
                    args.push(port.to_string());
                }
            }
        }

        if self.config.github_token.is_some() {
            args.push("--auth-token-env".to_string());
            args.push(AUTH_TOKEN_ENV.to_string());
        }
        if !self.config.use_logged_in_user {
            args.push("--no-auto-login".to_string());
        }

        (program, args)
    }

    /// Environment for the child process
    #[must_use]
    pub fn environment(&self) -> HashMap<String, String> {
        let mut process_env = match &self.config.env {
            Some(env) => env.clone(),
            None => env::vars().collect(),
        };
        for key in STRIPPED_ENV_VARS {
            process_env.remove(*key);
        }
        if let Some(token) = &self.config.github_token {
            process_env.insert(AUTH_TOKEN_ENV.to_string(), token.clone());
        }
        process_env
    }

    /// Build the complete CLI command with piped stdio
    pub fn build(&self) -> Command {
        let (program, args) = self.program_and_args();
        let mut cmd = Command::new(program);
        cmd.args(args);

        cmd.env_clear().envs(self.environment());
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        // stderr is piped rather than inherited so the child cannot touch the
        // parent terminal; it is forwarded to the log instead.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}
